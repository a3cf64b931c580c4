use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

use crate::gpio::GpioError;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelId {
    Channel1,
    Channel2,
}

impl ChannelId {
    pub fn number(&self) -> u8 {
        match self {
            ChannelId::Channel1 => 1,
            ChannelId::Channel2 => 2,
        }
    }

    pub fn from_number(number: &str) -> Option<ChannelId> {
        match number {
            "1" => Some(ChannelId::Channel1),
            "2" => Some(ChannelId::Channel2),
            _ => None,
        }
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.number())
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn is_on(&self) -> bool {
        matches!(self, RelayState::On)
    }
}

impl From<bool> for RelayState {
    fn from(on: bool) -> Self {
        match on {
            true => RelayState::On,
            false => RelayState::Off,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlInputs {
    /// Software control is enabled.
    pub auto_mode: bool,
    /// The manual bypass energizes every channel.
    pub manual_override: bool,
}

/// Composite state of the two-channel device. Ordered from disabled to
/// fully on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PowerState {
    ManualOverride,
    Off,
    Stage1,
    FullOn,
}

impl PowerState {
    pub fn code(&self) -> i8 {
        match self {
            PowerState::ManualOverride => -1,
            PowerState::Off => 0,
            PowerState::Stage1 => 1,
            PowerState::FullOn => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PowerState::ManualOverride => "manual_override",
            PowerState::Off => "off",
            PowerState::Stage1 => "stage1",
            PowerState::FullOn => "full_on",
        }
    }
}

impl Serialize for PowerState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.code())
    }
}

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("Automatic control disabled")]
    AutoControlDisabled,

    #[error("Channel {0} is not configured")]
    UnknownChannel(String),

    #[error(transparent)]
    Gpio(#[from] GpioError),

    #[error("Power sequence task failed: {0}")]
    TaskFailed(String),
}
