//! Daemon configuration, read once at startup from a TOML file.
//!
//! Every key is optional. A missing file yields the defaults of the AC-1
//! dual-relay unit:
//!
//! ```toml
//! address = "0.0.0.0"
//! port = 8000
//! gpio_backend = "auto"
//!
//! [device]
//! variant = "dual"
//! auto_mode_in = "PA8"
//! manual_mode_in = "PA6"
//! relay_out_1 = "PA9"
//! relay_out_2 = "PA10"
//! onoff_button = "PA3"
//! shutdown_button = "PA0"
//! reboot_button = "PA1"
//! ready_led = "PA7"
//! settle_delay_secs = 5
//! cooldown_delay_secs = 15
//! ```
//!
//! Optional lines (buttons, LED, override input) are disabled with `"none"`.
//!
//! With `gpio_backend = "dummy"` the input levels can be preset, so a
//! development host can leave the disabled state:
//!
//! ```toml
//! [dummy]
//! inputs = { PA8 = true, PA6 = false }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::buttons::ButtonEvent;
use crate::gpio::deserialize_optional_line;
use crate::gpio::BackendKind;
use crate::gpio::LineId;
use crate::gpio::LineParseError;
use crate::sequencer::SequenceTiming;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/hifipowerd.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    InvalidLine(#[from] LineParseError),

    #[error("GPIO line {line} is assigned to both '{first}' and '{second}'")]
    DuplicateLine {
        line: LineId,
        first: &'static str,
        second: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub debug_mode: bool,
    pub gpio_backend: BackendKind,
    pub gpio_chip: PathBuf,
    pub sysfs_root: PathBuf,
    /// Relay boards that switch on a low level.
    pub invert_outputs: bool,
    pub button_debounce_ms: u64,
    pub shutdown_command: String,
    pub reboot_command: String,
    pub device: DeviceConfig,
    pub dummy: DummyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: String::from("0.0.0.0"),
            port: 8000,
            debug_mode: false,
            gpio_backend: BackendKind::Auto,
            gpio_chip: PathBuf::from("/dev/gpiochip0"),
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            invert_outputs: false,
            button_debounce_ms: 50,
            shutdown_command: String::from("sudo poweroff"),
            reboot_command: String::from("sudo reboot"),
            device: DeviceConfig::default(),
            dummy: DummyConfig::default(),
        }
    }
}

/// Input levels the in-memory backend starts with, keyed by line name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DummyConfig {
    pub inputs: BTreeMap<String, bool>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum DeviceConfig {
    Dual(DualConfig),
    Single(SingleConfig),
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::Dual(DualConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DualConfig {
    pub auto_mode_in: LineId,
    #[serde(deserialize_with = "deserialize_optional_line")]
    pub manual_mode_in: Option<LineId>,
    pub relay_out_1: LineId,
    pub relay_out_2: LineId,
    #[serde(deserialize_with = "deserialize_optional_line")]
    pub onoff_button: Option<LineId>,
    #[serde(deserialize_with = "deserialize_optional_line")]
    pub shutdown_button: Option<LineId>,
    #[serde(deserialize_with = "deserialize_optional_line")]
    pub reboot_button: Option<LineId>,
    #[serde(deserialize_with = "deserialize_optional_line")]
    pub ready_led: Option<LineId>,
    pub settle_delay_secs: u64,
    pub cooldown_delay_secs: u64,
}

impl Default for DualConfig {
    fn default() -> Self {
        // PA0 .. PA10 on the Orange Pi header
        DualConfig {
            auto_mode_in: LineId::new(8),
            manual_mode_in: Some(LineId::new(6)),
            relay_out_1: LineId::new(9),
            relay_out_2: LineId::new(10),
            onoff_button: Some(LineId::new(3)),
            shutdown_button: Some(LineId::new(0)),
            reboot_button: Some(LineId::new(1)),
            ready_led: Some(LineId::new(7)),
            settle_delay_secs: 5,
            cooldown_delay_secs: 15,
        }
    }
}

impl DualConfig {
    pub fn timing(&self) -> SequenceTiming {
        SequenceTiming {
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            cooldown_delay: Duration::from_secs(self.cooldown_delay_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SingleConfig {
    pub auto_mode_in: LineId,
    pub relay_out: LineId,
    #[serde(deserialize_with = "deserialize_optional_line")]
    pub shutdown_button: Option<LineId>,
    #[serde(deserialize_with = "deserialize_optional_line")]
    pub reboot_button: Option<LineId>,
    #[serde(deserialize_with = "deserialize_optional_line")]
    pub ready_led: Option<LineId>,
}

impl Default for SingleConfig {
    fn default() -> Self {
        SingleConfig {
            auto_mode_in: LineId::new(8),
            relay_out: LineId::new(7),
            shutdown_button: Some(LineId::new(9)),
            reboot_button: Some(LineId::new(10)),
            ready_led: None,
        }
    }
}

impl DeviceConfig {
    pub fn ready_led(&self) -> Option<LineId> {
        match self {
            DeviceConfig::Dual(dual) => dual.ready_led,
            DeviceConfig::Single(single) => single.ready_led,
        }
    }

    pub fn buttons(&self) -> Vec<(ButtonEvent, LineId)> {
        let lines = match self {
            DeviceConfig::Dual(dual) => [
                (ButtonEvent::Toggle, dual.onoff_button),
                (ButtonEvent::Shutdown, dual.shutdown_button),
                (ButtonEvent::Reboot, dual.reboot_button),
            ],
            DeviceConfig::Single(single) => [
                (ButtonEvent::Toggle, None),
                (ButtonEvent::Shutdown, single.shutdown_button),
                (ButtonEvent::Reboot, single.reboot_button),
            ],
        };
        lines
            .into_iter()
            .filter_map(|(event, line)| line.map(|line| (event, line)))
            .collect()
    }

    fn lines(&self) -> Vec<(&'static str, Option<LineId>)> {
        match self {
            DeviceConfig::Dual(dual) => vec![
                ("auto_mode_in", Some(dual.auto_mode_in)),
                ("manual_mode_in", dual.manual_mode_in),
                ("relay_out_1", Some(dual.relay_out_1)),
                ("relay_out_2", Some(dual.relay_out_2)),
                ("onoff_button", dual.onoff_button),
                ("shutdown_button", dual.shutdown_button),
                ("reboot_button", dual.reboot_button),
                ("ready_led", dual.ready_led),
            ],
            DeviceConfig::Single(single) => vec![
                ("auto_mode_in", Some(single.auto_mode_in)),
                ("relay_out", Some(single.relay_out)),
                ("shutdown_button", single.shutdown_button),
                ("reboot_button", single.reboot_button),
                ("ready_led", single.ready_led),
            ],
        }
    }
}

impl Config {
    /// Loads `path`, falling back to the defaults when it does not exist.
    /// Returns the path actually read.
    pub fn load(path: &Path) -> Result<(Config, Option<PathBuf>), ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Config::default(), None))
            }
            Err(source) => {
                return Err(ConfigError::FileRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = Config::parse(&text, path)?;
        Ok((config, Some(path.to_path_buf())))
    }

    pub fn parse(text: &str, path: &Path) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.dummy_inputs()?;
        let mut seen = BTreeMap::new();
        for (role, line) in self.device.lines() {
            let line = match line {
                Some(line) => line,
                None => continue,
            };
            if let Some(first) = seen.insert(line, role) {
                return Err(ConfigError::DuplicateLine {
                    line,
                    first,
                    second: role,
                });
            }
        }
        Ok(())
    }

    pub fn dummy_inputs(&self) -> Result<Vec<(LineId, bool)>, ConfigError> {
        let mut inputs = Vec::with_capacity(self.dummy.inputs.len());
        for (name, value) in &self.dummy.inputs {
            inputs.push((name.parse::<LineId>()?, *value));
        }
        Ok(inputs)
    }

    pub fn button_debounce(&self) -> Duration {
        Duration::from_millis(self.button_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Config, ConfigError> {
        Config::parse(text, Path::new("test.toml"))
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 8000);
        assert_eq!(
            config.device.buttons(),
            vec![
                (ButtonEvent::Toggle, LineId::new(3)),
                (ButtonEvent::Shutdown, LineId::new(0)),
                (ButtonEvent::Reboot, LineId::new(1)),
            ]
        );
    }

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
        Config {
            device: DeviceConfig::Single(SingleConfig::default()),
            ..Config::default()
        }
        .validate()
        .unwrap();
    }

    #[test]
    fn parses_dual_device_with_port_names() {
        let config = parse(
            r#"
            port = 8080
            gpio_backend = "sysfs"
            invert_outputs = true

            [device]
            variant = "dual"
            relay_out_1 = "PG6"
            relay_out_2 = 17
            settle_delay_secs = 8
            ready_led = "none"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.gpio_backend, BackendKind::Sysfs);
        assert!(config.invert_outputs);
        let dual = match config.device {
            DeviceConfig::Dual(dual) => dual,
            other => panic!("unexpected device {:?}", other),
        };
        assert_eq!(dual.relay_out_1, LineId::new(6 * 32 + 6));
        assert_eq!(dual.relay_out_2, LineId::new(17));
        assert_eq!(dual.auto_mode_in, LineId::new(8));
        assert_eq!(dual.ready_led, None);
        assert_eq!(dual.timing().settle_delay, Duration::from_secs(8));
        assert_eq!(dual.timing().cooldown_delay, Duration::from_secs(15));
    }

    #[test]
    fn parses_single_device() {
        let config = parse(
            r#"
            [device]
            variant = "single"
            reboot_button = "none"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.device,
            DeviceConfig::Single(SingleConfig {
                reboot_button: None,
                ..SingleConfig::default()
            })
        );
        assert_eq!(
            config.device.buttons(),
            vec![(ButtonEvent::Shutdown, LineId::new(9))]
        );
    }

    #[test]
    fn rejects_lines_shared_by_two_roles() {
        let result = parse(
            r#"
            [device]
            variant = "dual"
            relay_out_2 = "PA9"
            "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::DuplicateLine {
                first: "relay_out_1",
                second: "relay_out_2",
                ..
            })
        ));
    }

    #[test]
    fn rejects_bad_line_names_and_unknown_keys() {
        assert!(matches!(
            parse("[device]\nvariant = \"dual\"\nrelay_out_1 = \"PA99\"\n"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            parse("listen = \"0.0.0.0\"\n"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            parse("[device]\nvariant = \"triple\"\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn parses_dummy_input_levels() {
        let config = parse(
            r#"
            gpio_backend = "dummy"

            [dummy]
            inputs = { PA8 = true, "6" = false }
            "#,
        )
        .unwrap();

        assert_eq!(config.gpio_backend, BackendKind::Dummy);
        assert_eq!(
            config.dummy_inputs().unwrap(),
            vec![(LineId::new(6), false), (LineId::new(8), true)]
        );
        assert!(Config::default().dummy_inputs().unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_dummy_input_names() {
        assert!(matches!(
            parse("[dummy]\ninputs = { PZ99 = true }\n"),
            Err(ConfigError::InvalidLine(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = Config::load(&dir.path().join("hifipowerd.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(source, None);
    }

    #[test]
    fn loads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hifipowerd.toml");
        std::fs::write(&path, "port = 9000\n").unwrap();

        let (config, source) = Config::load(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(source, Some(path));
    }
}
