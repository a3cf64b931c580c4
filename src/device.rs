use std::sync::Arc;

use log::info;

use crate::config::DeviceConfig;
use crate::gpio::Gpio;
use crate::power_state::InputLines;
use crate::power_types::ChannelId::*;
use crate::power_types::PowerError;
use crate::relay_ctl::Channel;
use crate::relay_ctl::RelayControl;
use crate::sequencer::Sequencer;
use crate::switch::Switch;

/// The configured power distribution unit.
#[derive(Clone)]
pub enum Device {
    Dual(Arc<Sequencer>),
    Single(Arc<Switch>),
}

impl Device {
    pub fn open(
        gpio: Arc<dyn Gpio>,
        config: &DeviceConfig,
        invert_outputs: bool,
    ) -> Result<Device, PowerError> {
        match config {
            DeviceConfig::Dual(dual) => {
                let relays = RelayControl::open(
                    Arc::clone(&gpio),
                    vec![
                        Channel::new(Channel1, "main", dual.relay_out_1),
                        Channel::new(Channel2, "amp", dual.relay_out_2),
                    ],
                    invert_outputs,
                )?;
                log_channels(&relays);
                let inputs = InputLines::open(gpio, dual.auto_mode_in, dual.manual_mode_in)?;
                info!(
                    "Dual relay device ready, settle delay {}s, cool-down delay {}s",
                    dual.settle_delay_secs, dual.cooldown_delay_secs
                );
                Ok(Device::Dual(Arc::new(Sequencer::new(
                    relays,
                    inputs,
                    dual.timing(),
                ))))
            }
            DeviceConfig::Single(single) => {
                let relays = RelayControl::open(
                    Arc::clone(&gpio),
                    vec![Channel::new(Channel1, "power", single.relay_out)],
                    invert_outputs,
                )?;
                log_channels(&relays);
                let inputs = InputLines::open(gpio, single.auto_mode_in, None)?;
                info!("Single relay device ready");
                Ok(Device::Single(Arc::new(Switch::new(relays, inputs))))
            }
        }
    }

    /// Switches every relay off, for process exit.
    pub async fn release(&self) -> Result<(), PowerError> {
        match self {
            Device::Dual(sequencer) => sequencer.release().await,
            Device::Single(switch) => switch.release(),
        }
    }
}

fn log_channels(relays: &RelayControl) {
    for channel in relays.channels() {
        info!("Relay {} '{}' on line {}", channel.id, channel.name, channel.line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SingleConfig;
    use crate::gpio::LineId;
    use crate::gpio_dummy::DummyGpio;
    use crate::power_types::RelayState;

    #[tokio::test]
    async fn opens_default_dual_device() {
        let gpio = Arc::new(DummyGpio::new());
        let device = Device::open(gpio.clone(), &DeviceConfig::default(), false).unwrap();

        let sequencer = match &device {
            Device::Dual(sequencer) => sequencer.clone(),
            Device::Single(_) => panic!("expected a dual device"),
        };
        gpio.set_input(LineId::new(8), true);
        sequencer.relays().set_all(RelayState::On).unwrap();
        assert!(gpio.read(LineId::new(9)).unwrap());
        assert!(gpio.read(LineId::new(10)).unwrap());

        device.release().await.unwrap();
        assert!(!gpio.read(LineId::new(9)).unwrap());
        assert!(!gpio.read(LineId::new(10)).unwrap());
    }

    #[tokio::test]
    async fn single_release_ignores_mode() {
        let gpio = Arc::new(DummyGpio::new());
        let config = DeviceConfig::Single(SingleConfig::default());
        let device = Device::open(gpio.clone(), &config, true).unwrap();
        // inverted, so the idle relay line sits high
        assert!(gpio.read(LineId::new(7)).unwrap());

        device.release().await.unwrap();

        assert!(gpio.read(LineId::new(7)).unwrap());
        assert_eq!(gpio.writes().len(), 1);
    }
}
