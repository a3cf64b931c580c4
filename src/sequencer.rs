use std::time::Duration;

use log::debug;
use log::info;
use log::warn;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;
use tokio::time::sleep;

use crate::power_state::InputLines;
use crate::power_state::PowerSnapshot;
use crate::power_types::ChannelId;
use crate::power_types::ChannelId::*;
use crate::power_types::PowerError;
use crate::power_types::PowerState;
use crate::power_types::RelayState;
use crate::power_types::RelayState::*;
use crate::relay_ctl::RelayControl;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SequenceTiming {
    /// Between main power and amplifiers on power-up.
    pub settle_delay: Duration,
    /// Between amplifiers and main power on power-down.
    pub cooldown_delay: Duration,
}

impl Default for SequenceTiming {
    fn default() -> Self {
        SequenceTiming {
            settle_delay: Duration::from_secs(5),
            cooldown_delay: Duration::from_secs(15),
        }
    }
}

/// Two-channel power sequencer. Channel 1 feeds the main equipment and
/// channel 2 the amplifiers.
///
/// At most one operation that writes relays runs at a time. Status reads go
/// straight to the hardware and never wait for a running sequence.
pub struct Sequencer {
    relays: RelayControl,
    inputs: InputLines,
    timing: SequenceTiming,
    in_flight: Mutex<()>,
}

impl Sequencer {
    pub fn new(relays: RelayControl, inputs: InputLines, timing: SequenceTiming) -> Sequencer {
        Sequencer {
            relays,
            inputs,
            timing,
            in_flight: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn relays(&self) -> &RelayControl {
        &self.relays
    }

    pub fn snapshot(&self) -> Result<PowerSnapshot, PowerError> {
        Ok(PowerSnapshot {
            inputs: self.inputs.read()?,
            channel1: self.relays.get(Channel1)?,
            channel2: self.relays.get(Channel2)?,
        })
    }

    pub fn state(&self) -> Result<PowerState, PowerError> {
        Ok(self.snapshot()?.state())
    }

    pub async fn power_on(&self) -> Result<(), PowerError> {
        let guard = self.in_flight.lock().await;
        self.sequence_on(&guard).await
    }

    pub async fn power_off(&self) -> Result<(), PowerError> {
        let guard = self.in_flight.lock().await;
        self.sequence_off(&guard).await
    }

    /// Steps toward fully on, or collapses to off when already fully on.
    pub async fn toggle(&self) -> Result<(), PowerError> {
        let guard = self.in_flight.lock().await;
        match self.state()? {
            PowerState::ManualOverride => {
                debug!("Toggle ignored, automatic control disabled");
                Ok(())
            }
            PowerState::FullOn => self.sequence_off(&guard).await,
            PowerState::Off | PowerState::Stage1 => self.sequence_on(&guard).await,
        }
    }

    /// Writes one relay directly, bypassing the sequence.
    pub async fn set_channel(&self, channel: ChannelId, state: RelayState) -> Result<(), PowerError> {
        let _guard = self.in_flight.lock().await;
        if !self.inputs.read()?.auto_mode {
            warn!(
                "Refusing to set channel {} to '{:?}', automatic control disabled",
                channel, state
            );
            return Err(PowerError::AutoControlDisabled);
        }
        self.relays.set(channel, state)
    }

    /// Switches every relay off without sequencing, for process exit.
    pub async fn release(&self) -> Result<(), PowerError> {
        let _guard = self.in_flight.lock().await;
        self.relays.set_all(Off)
    }

    async fn sequence_on(&self, _guard: &MutexGuard<'_, ()>) -> Result<(), PowerError> {
        match self.state()? {
            PowerState::Stage1 => {
                info!("Powering on amplifiers");
                self.relays.set(Channel2, On)?;
            }
            PowerState::Off => {
                info!(
                    "Powering on main equipment, amplifiers follow in {:?}",
                    self.timing.settle_delay
                );
                self.relays.set(Channel1, On)?;
                sleep(self.timing.settle_delay).await;
                self.relays.set(Channel2, On)?;
            }
            state => debug!("Power on ignored in state {:?}", state),
        }
        Ok(())
    }

    async fn sequence_off(&self, _guard: &MutexGuard<'_, ()>) -> Result<(), PowerError> {
        match self.state()? {
            PowerState::FullOn => {
                info!(
                    "Powering off amplifiers, main equipment follows in {:?}",
                    self.timing.cooldown_delay
                );
                self.relays.set(Channel2, Off)?;
                sleep(self.timing.cooldown_delay).await;
                self.relays.set(Channel1, Off)?;
            }
            PowerState::Stage1 => {
                info!("Powering off main equipment");
                self.relays.set(Channel1, Off)?;
            }
            state => debug!("Power off ignored in state {:?}", state),
        }
        Ok(())
    }
}
