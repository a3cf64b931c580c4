use log::warn;
use serde::Serialize;

use crate::power_state::InputLines;
use crate::power_types::ChannelId::Channel1;
use crate::power_types::PowerError;
use crate::power_types::RelayState;
use crate::relay_ctl::RelayControl;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    Disabled,
    Off,
    On,
}

/// Single-relay driver. Every write is refused while the equipment is not in
/// automatic mode.
pub struct Switch {
    relays: RelayControl,
    inputs: InputLines,
}

impl Switch {
    pub fn new(relays: RelayControl, inputs: InputLines) -> Switch {
        Switch { relays, inputs }
    }

    pub fn check_automatic_mode(&self) -> Result<bool, PowerError> {
        Ok(self.inputs.read()?.auto_mode)
    }

    pub fn check_output_state(&self) -> Result<RelayState, PowerError> {
        self.relays.get(Channel1)
    }

    pub fn state(&self) -> Result<SwitchState, PowerError> {
        if !self.check_automatic_mode()? {
            return Ok(SwitchState::Disabled);
        }
        match self.check_output_state()? {
            RelayState::On => Ok(SwitchState::On),
            RelayState::Off => Ok(SwitchState::Off),
        }
    }

    pub fn set_output(&self, state: RelayState) -> Result<(), PowerError> {
        if !self.check_automatic_mode()? {
            warn!("Refusing to switch power '{:?}', automatic control disabled", state);
            return Err(PowerError::AutoControlDisabled);
        }
        self.relays.set(Channel1, state)
    }

    pub fn turn_on(&self) -> Result<(), PowerError> {
        self.set_output(RelayState::On)
    }

    pub fn turn_off(&self) -> Result<(), PowerError> {
        self.set_output(RelayState::Off)
    }

    /// Switches the relay off regardless of mode, for process exit.
    pub fn release(&self) -> Result<(), PowerError> {
        self.relays.set_all(RelayState::Off)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gpio::LineId;
    use crate::gpio_dummy::DummyGpio;
    use crate::relay_ctl::Channel;
    use std::sync::Arc;

    pub const AUTO: LineId = LineId::new(8);
    pub const RELAY: LineId = LineId::new(7);

    pub fn switch(gpio: &Arc<DummyGpio>) -> Switch {
        let relays = RelayControl::open(
            gpio.clone(),
            vec![Channel::new(Channel1, "power", RELAY)],
            false,
        )
        .unwrap();
        let inputs = InputLines::open(gpio.clone(), AUTO, None).unwrap();
        Switch::new(relays, inputs)
    }

    #[test]
    fn writes_are_refused_outside_automatic_mode() {
        let gpio = Arc::new(DummyGpio::new());
        let switch = switch(&gpio);

        assert!(matches!(switch.turn_on(), Err(PowerError::AutoControlDisabled)));
        assert!(matches!(switch.turn_off(), Err(PowerError::AutoControlDisabled)));
        assert!(gpio.writes().is_empty());
        assert_eq!(switch.state().unwrap(), SwitchState::Disabled);
    }

    #[test]
    fn each_command_is_exactly_one_write() {
        let gpio = Arc::new(DummyGpio::new());
        gpio.set_input(AUTO, true);
        let switch = switch(&gpio);

        switch.turn_on().unwrap();
        assert_eq!(switch.check_output_state().unwrap(), RelayState::On);
        assert_eq!(switch.state().unwrap(), SwitchState::On);

        switch.turn_off().unwrap();
        let writes: Vec<_> = gpio.writes().iter().map(|w| (w.line, w.value)).collect();
        assert_eq!(writes, vec![(RELAY, true), (RELAY, false)]);
        assert_eq!(switch.state().unwrap(), SwitchState::Off);
    }

    #[test]
    fn output_state_is_reported_outside_automatic_mode() {
        let gpio = Arc::new(DummyGpio::new());
        gpio.set_input(AUTO, true);
        let switch = switch(&gpio);
        switch.turn_on().unwrap();

        gpio.set_input(AUTO, false);

        assert!(!switch.check_automatic_mode().unwrap());
        assert_eq!(switch.check_output_state().unwrap(), RelayState::On);
    }
}
