use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::gpio_cdev_shim::CdevGpio;
use crate::gpio_dummy::DummyGpio;
use crate::gpio_sysfs_shim::SysfsGpio;

const LINES_PER_BANK: u32 = 32;

/// Offset of a GPIO line. Parses plain numbers (`17`) and SUNXI port names
/// (`PA8`, `PG7`), where each port bank holds 32 lines.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "LineSpec")]
pub struct LineId(u32);

impl LineId {
    pub const fn new(offset: u32) -> LineId {
        LineId(offset)
    }

    pub fn offset(&self) -> u32 {
        self.0
    }
}

impl Display for LineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
#[error("Invalid GPIO line '{spec}': {message}")]
pub struct LineParseError {
    spec: String,
    message: String,
}

impl LineParseError {
    pub fn new<S1: Into<String>, S2: Into<String>>(spec: S1, message: S2) -> Self {
        Self {
            spec: spec.into(),
            message: message.into(),
        }
    }
}

impl FromStr for LineId {
    type Err = LineParseError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(LineParseError::new(spec, "empty line name"));
        }

        if let Ok(offset) = trimmed.parse::<u32>() {
            return Ok(LineId(offset));
        }

        let upper = trimmed.to_ascii_uppercase();
        let mut chars = upper.chars();
        let bank = match (chars.next(), chars.next()) {
            (Some('P'), Some(bank)) if bank.is_ascii_uppercase() => bank,
            _ => {
                return Err(LineParseError::new(
                    spec,
                    "expected a line offset or a port name like 'PA8'",
                ))
            }
        };

        let pin = match chars.as_str().parse::<u32>() {
            Ok(pin) => pin,
            Err(_) => return Err(LineParseError::new(spec, "missing pin number")),
        };
        if pin >= LINES_PER_BANK {
            return Err(LineParseError::new(
                spec,
                format!("pin number must be below {}", LINES_PER_BANK),
            ));
        }

        let bank = bank as u32 - 'A' as u32;
        Ok(LineId(bank * LINES_PER_BANK + pin))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LineSpec {
    Offset(u32),
    Name(String),
}

impl TryFrom<LineSpec> for LineId {
    type Error = LineParseError;

    fn try_from(spec: LineSpec) -> Result<Self, Self::Error> {
        match spec {
            LineSpec::Offset(offset) => Ok(LineId(offset)),
            LineSpec::Name(name) => name.parse(),
        }
    }
}

/// Optional line in configuration. `"none"` (or an empty string) disables it.
pub fn deserialize_optional_line<'de, D>(deserializer: D) -> Result<Option<LineId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let spec = LineSpec::deserialize(deserializer)?;
    match spec {
        LineSpec::Name(name)
            if name.trim().is_empty() || name.trim().eq_ignore_ascii_case("none") =>
        {
            Ok(None)
        }
        spec => LineId::try_from(spec)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output { initial: bool },
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("GPIO line {0} is not configured")]
    NotConfigured(LineId),

    #[error("I/O error on GPIO line {line}: {source}")]
    Io {
        line: LineId,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cdev(#[from] gpio_cdev::errors::Error),

    #[error("Edge watch on GPIO line {0} closed")]
    Closed(LineId),

    #[error("No usable GPIO backend found: {0}")]
    NoBackend(String),
}

impl GpioError {
    pub fn io(line: LineId, source: std::io::Error) -> Self {
        GpioError::Io { line, source }
    }
}

/// Blocking source of rising edges on one input line.
pub trait EdgeSource: Send {
    fn wait(&mut self) -> Result<(), GpioError>;
}

/// Capability set every GPIO backend provides. Values are logical levels:
/// `true` is high.
pub trait Gpio: Send + Sync {
    fn name(&self) -> &'static str;

    fn configure(&self, line: LineId, direction: Direction) -> Result<(), GpioError>;

    fn read(&self, line: LineId) -> Result<bool, GpioError>;

    fn write(&self, line: LineId, value: bool) -> Result<(), GpioError>;

    fn subscribe(&self, line: LineId) -> Result<Box<dyn EdgeSource>, GpioError>;

    /// Hand all lines back to the kernel.
    fn cleanup(&self) {}
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Auto,
    Cdev,
    Sysfs,
    Dummy,
}

/// Opens the backend for `kind`. `dummy_inputs` seeds the input levels of
/// the in-memory backend and is ignored by the others.
pub fn open_backend(
    kind: BackendKind,
    chip: &Path,
    sysfs_root: &Path,
    dummy_inputs: &[(LineId, bool)],
) -> Result<Arc<dyn Gpio>, GpioError> {
    match kind {
        BackendKind::Cdev => Ok(Arc::new(CdevGpio::open(chip)?)),
        BackendKind::Sysfs => Ok(Arc::new(SysfsGpio::open(sysfs_root)?)),
        BackendKind::Dummy => Ok(Arc::new(DummyGpio::with_inputs(
            dummy_inputs.iter().copied(),
        ))),
        BackendKind::Auto => {
            if chip.exists() {
                debug!("Found GPIO character device '{}'", chip.display());
                return Ok(Arc::new(CdevGpio::open(chip)?));
            }
            if sysfs_root.join("export").exists() {
                debug!("Found sysfs GPIO interface '{}'", sysfs_root.display());
                return Ok(Arc::new(SysfsGpio::open(sysfs_root)?));
            }
            Err(GpioError::NoBackend(format!(
                "neither '{}' nor '{}' exists",
                chip.display(),
                sysfs_root.display()
            )))
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
