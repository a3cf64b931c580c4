use std::sync::Arc;

use crate::gpio::Direction;
use crate::gpio::Gpio;
use crate::gpio::GpioError;
use crate::gpio::LineId;
use crate::power_types::ControlInputs;
use crate::power_types::PowerState;
use crate::power_types::RelayState;

/// A channel is energized when the manual bypass is on, or when software
/// control is enabled and its output is set.
pub fn relay_active(inputs: ControlInputs, output: RelayState) -> bool {
    inputs.manual_override || (inputs.auto_mode && output.is_on())
}

pub fn evaluate(inputs: ControlInputs, channel1: RelayState, channel2: RelayState) -> PowerState {
    if !inputs.auto_mode {
        return PowerState::ManualOverride;
    }
    if relay_active(inputs, channel2) {
        PowerState::FullOn
    } else if relay_active(inputs, channel1) {
        PowerState::Stage1
    } else {
        PowerState::Off
    }
}

/// The mode switches on the front panel.
pub struct InputLines {
    gpio: Arc<dyn Gpio>,
    auto_mode_in: LineId,
    manual_mode_in: Option<LineId>,
}

impl InputLines {
    pub fn open(
        gpio: Arc<dyn Gpio>,
        auto_mode_in: LineId,
        manual_mode_in: Option<LineId>,
    ) -> Result<InputLines, GpioError> {
        gpio.configure(auto_mode_in, Direction::Input)?;
        if let Some(line) = manual_mode_in {
            gpio.configure(line, Direction::Input)?;
        }
        Ok(InputLines {
            gpio,
            auto_mode_in,
            manual_mode_in,
        })
    }

    pub fn read(&self) -> Result<ControlInputs, GpioError> {
        let auto_mode = self.gpio.read(self.auto_mode_in)?;
        let manual_override = match self.manual_mode_in {
            Some(line) => self.gpio.read(line)?,
            None => false,
        };
        Ok(ControlInputs {
            auto_mode,
            manual_override,
        })
    }
}

/// One live read of the inputs and both relay outputs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PowerSnapshot {
    pub inputs: ControlInputs,
    pub channel1: RelayState,
    pub channel2: RelayState,
}

impl PowerSnapshot {
    pub fn state(&self) -> PowerState {
        evaluate(self.inputs, self.channel1, self.channel2)
    }

    pub fn channel1_active(&self) -> bool {
        relay_active(self.inputs, self.channel1)
    }

    pub fn channel2_active(&self) -> bool {
        relay_active(self.inputs, self.channel2)
    }
}
