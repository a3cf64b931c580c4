use std::sync::Arc;

use log::info;

use crate::gpio::Direction;
use crate::gpio::Gpio;
use crate::gpio::LineId;
use crate::power_types::ChannelId;
use crate::power_types::PowerError;
use crate::power_types::RelayState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub line: LineId,
}

impl Channel {
    pub fn new<S: Into<String>>(id: ChannelId, name: S, line: LineId) -> Channel {
        Channel {
            id,
            name: name.into(),
            line,
        }
    }
}

pub struct RelayControl {
    gpio: Arc<dyn Gpio>,
    channels: Vec<Channel>,
    invert_outputs: bool,
}

impl RelayControl {
    /// Claims the relay lines as outputs, every relay starting off.
    pub fn open(
        gpio: Arc<dyn Gpio>,
        channels: Vec<Channel>,
        invert_outputs: bool,
    ) -> Result<RelayControl, PowerError> {
        for channel in &channels {
            gpio.configure(
                channel.line,
                Direction::Output {
                    initial: invert_outputs,
                },
            )?;
        }
        Ok(RelayControl {
            gpio,
            channels,
            invert_outputs,
        })
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn set_all(&self, state: RelayState) -> Result<(), PowerError> {
        for channel in &self.channels {
            self.write(channel, state)?;
        }
        Ok(())
    }

    pub fn set(&self, relay: ChannelId, state: RelayState) -> Result<(), PowerError> {
        let channel = self.channel(relay)?;
        self.write(channel, state)
    }

    pub fn get(&self, relay: ChannelId) -> Result<RelayState, PowerError> {
        let channel = self.channel(relay)?;
        let level = self.gpio.read(channel.line)?;
        Ok(RelayState::from(level != self.invert_outputs))
    }

    fn channel(&self, relay: ChannelId) -> Result<&Channel, PowerError> {
        match self.channels.iter().find(|channel| channel.id == relay) {
            Some(channel) => Ok(channel),
            None => Err(PowerError::UnknownChannel(relay.to_string())),
        }
    }

    fn write(&self, channel: &Channel, state: RelayState) -> Result<(), PowerError> {
        info!("Set '{}' to '{:?}'", channel.name, state);
        self.gpio
            .write(channel.line, state.is_on() != self.invert_outputs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio_dummy::DummyGpio;

    const MAIN: LineId = LineId::new(9);
    const AMP: LineId = LineId::new(10);

    fn relays(gpio: &Arc<DummyGpio>, invert_outputs: bool) -> RelayControl {
        RelayControl::open(
            gpio.clone(),
            vec![
                Channel::new(ChannelId::Channel1, "main", MAIN),
                Channel::new(ChannelId::Channel2, "amp", AMP),
            ],
            invert_outputs,
        )
        .unwrap()
    }

    #[test]
    fn relays_start_off() {
        let gpio = Arc::new(DummyGpio::new());
        let relays = relays(&gpio, false);

        assert_eq!(relays.get(ChannelId::Channel1).unwrap(), RelayState::Off);
        assert_eq!(relays.get(ChannelId::Channel2).unwrap(), RelayState::Off);
        assert!(!gpio.read(MAIN).unwrap());
        assert!(gpio.writes().is_empty());
    }

    #[test]
    fn inverted_outputs_drive_active_low() {
        let gpio = Arc::new(DummyGpio::new());
        let relays = relays(&gpio, true);
        assert!(gpio.read(AMP).unwrap());

        relays.set(ChannelId::Channel2, RelayState::On).unwrap();

        assert!(!gpio.read(AMP).unwrap());
        assert_eq!(relays.get(ChannelId::Channel2).unwrap(), RelayState::On);
        assert_eq!(relays.get(ChannelId::Channel1).unwrap(), RelayState::Off);
    }

    #[test]
    fn set_all_writes_every_channel() {
        let gpio = Arc::new(DummyGpio::new());
        let relays = relays(&gpio, false);

        relays.set_all(RelayState::On).unwrap();

        let lines: Vec<_> = gpio.writes().iter().map(|w| (w.line, w.value)).collect();
        assert_eq!(lines, vec![(MAIN, true), (AMP, true)]);
    }

    #[test]
    fn missing_channel_is_reported() {
        let gpio = Arc::new(DummyGpio::new());
        let relays = RelayControl::open(
            gpio.clone(),
            vec![Channel::new(ChannelId::Channel1, "power", MAIN)],
            false,
        )
        .unwrap();

        assert!(matches!(
            relays.set(ChannelId::Channel2, RelayState::On),
            Err(PowerError::UnknownChannel(_))
        ));
    }
}
