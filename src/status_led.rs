use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::gpio::Direction;
use crate::gpio::Gpio;
use crate::gpio::GpioError;
use crate::gpio::LineId;

pub struct StatusLed {
    gpio: Arc<dyn Gpio>,
    line: LineId,
}

impl StatusLed {
    pub fn open(gpio: Arc<dyn Gpio>, line: LineId, lit: bool) -> Result<StatusLed, GpioError> {
        gpio.configure(line, Direction::Output { initial: lit })?;
        Ok(StatusLed { gpio, line })
    }

    pub fn set(&self, lit: bool) -> Result<(), GpioError> {
        self.gpio.write(self.line, lit)
    }

    pub fn is_lit(&self) -> Result<bool, GpioError> {
        self.gpio.read(self.line)
    }

    /// Blinks `times` within `duration`, then leaves the LED at `then`, or
    /// at its previous state when `then` is `None`.
    pub async fn blink(
        &self,
        times: u32,
        duration: Duration,
        then: Option<bool>,
    ) -> Result<(), GpioError> {
        let then = match then {
            Some(lit) => lit,
            None => self.is_lit()?,
        };
        let step = duration / (2 * times.max(1));
        for _ in 0..times {
            self.set(true)?;
            sleep(step).await;
            self.set(false)?;
            sleep(step).await;
        }
        self.set(then)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio_dummy::DummyGpio;

    const LED: LineId = LineId::new(7);

    #[tokio::test(start_paused = true)]
    async fn blink_restores_previous_state() {
        let gpio = Arc::new(DummyGpio::new());
        let led = StatusLed::open(gpio.clone(), LED, true).unwrap();
        let start = tokio::time::Instant::now();

        led.blink(5, Duration::from_millis(500), None).await.unwrap();

        let values: Vec<_> = gpio.writes().iter().map(|w| w.value).collect();
        assert_eq!(values.len(), 11);
        assert_eq!(&values[..2], &[true, false]);
        assert!(led.is_lit().unwrap());
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn blink_ends_in_requested_state() {
        let gpio = Arc::new(DummyGpio::new());
        let led = StatusLed::open(gpio.clone(), LED, true).unwrap();

        led.blink(2, Duration::from_secs(1), Some(false)).await.unwrap();

        assert!(!led.is_lit().unwrap());
    }
}
