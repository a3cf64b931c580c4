use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Mutex;

use log::debug;
use log::info;
use tokio::time::Instant;

use crate::gpio::lock;
use crate::gpio::Direction;
use crate::gpio::EdgeSource;
use crate::gpio::Gpio;
use crate::gpio::GpioError;
use crate::gpio::LineId;

const JOURNAL_LIMIT: usize = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineWrite {
    pub line: LineId,
    pub value: bool,
    pub at: Instant,
}

/// In-memory lines for hosts without GPIO. Keeps a journal of output writes
/// and lets callers drive inputs and button edges by hand.
#[derive(Default)]
pub struct DummyGpio {
    levels: Mutex<HashMap<LineId, bool>>,
    journal: Mutex<VecDeque<LineWrite>>,
    watchers: Mutex<HashMap<LineId, Vec<mpsc::Sender<()>>>>,
    failing: AtomicBool,
}

impl DummyGpio {
    pub fn new() -> DummyGpio {
        DummyGpio::default()
    }

    /// A dummy whose inputs start at the given levels instead of low.
    pub fn with_inputs<I: IntoIterator<Item = (LineId, bool)>>(inputs: I) -> DummyGpio {
        let gpio = DummyGpio::new();
        for (line, value) in inputs {
            debug!("Dummy input {} preset to {}", line, value);
            gpio.set_input(line, value);
        }
        gpio
    }

    pub fn set_input(&self, line: LineId, value: bool) {
        lock(&self.levels).insert(line, value);
    }

    /// Raises a rising edge on every subscriber of `line`.
    #[cfg(test)]
    pub fn press(&self, line: LineId) {
        if let Some(senders) = lock(&self.watchers).get_mut(&line) {
            senders.retain(|sender| sender.send(()).is_ok());
        }
    }

    pub fn writes(&self) -> Vec<LineWrite> {
        lock(&self.journal).iter().copied().collect()
    }

    /// Makes every following write fail with an I/O error.
    #[cfg(test)]
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Gpio for DummyGpio {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn configure(&self, line: LineId, direction: Direction) -> Result<(), GpioError> {
        let mut levels = lock(&self.levels);
        match direction {
            Direction::Input => {
                levels.entry(line).or_insert(false);
            }
            Direction::Output { initial } => {
                levels.insert(line, initial);
            }
        }
        Ok(())
    }

    fn read(&self, line: LineId) -> Result<bool, GpioError> {
        match lock(&self.levels).get(&line) {
            Some(value) => Ok(*value),
            None => Err(GpioError::NotConfigured(line)),
        }
    }

    fn write(&self, line: LineId, value: bool) -> Result<(), GpioError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GpioError::io(
                line,
                std::io::Error::new(std::io::ErrorKind::Other, "write failure"),
            ));
        }
        let mut levels = lock(&self.levels);
        match levels.get_mut(&line) {
            Some(level) => *level = value,
            None => return Err(GpioError::NotConfigured(line)),
        }
        info!("Dummy line {} set to {}", line, value);

        let mut journal = lock(&self.journal);
        if journal.len() == JOURNAL_LIMIT {
            journal.pop_front();
        }
        journal.push_back(LineWrite {
            line,
            value,
            at: Instant::now(),
        });
        Ok(())
    }

    fn subscribe(&self, line: LineId) -> Result<Box<dyn EdgeSource>, GpioError> {
        let (sender, receiver) = mpsc::channel();
        lock(&self.watchers).entry(line).or_default().push(sender);
        Ok(Box::new(DummyEdges { line, receiver }))
    }

    fn cleanup(&self) {
        let writes = self.writes();
        debug!("Dummy GPIO recorded {} writes", writes.len());
        for write in writes {
            debug!(
                "  line {} set to {} {:?} ago",
                write.line,
                write.value,
                write.at.elapsed()
            );
        }
        lock(&self.watchers).clear();
    }
}

struct DummyEdges {
    line: LineId,
    receiver: mpsc::Receiver<()>,
}

impl EdgeSource for DummyEdges {
    fn wait(&mut self) -> Result<(), GpioError> {
        self.receiver.recv().map_err(|_| GpioError::Closed(self.line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_lines_are_rejected() {
        let gpio = DummyGpio::new();
        assert!(matches!(
            gpio.write(LineId::new(1), true),
            Err(GpioError::NotConfigured(_))
        ));
        assert!(gpio.writes().is_empty());
    }

    #[test]
    fn configuring_an_input_keeps_a_preset_level() {
        let gpio = DummyGpio::new();
        gpio.set_input(LineId::new(8), true);
        gpio.configure(LineId::new(8), Direction::Input).unwrap();
        assert!(gpio.read(LineId::new(8)).unwrap());
    }

    #[test]
    fn preset_inputs_survive_configuration() {
        let gpio = DummyGpio::with_inputs([(LineId::new(8), true), (LineId::new(6), false)]);
        gpio.configure(LineId::new(8), Direction::Input).unwrap();
        gpio.configure(LineId::new(6), Direction::Input).unwrap();
        assert!(gpio.read(LineId::new(8)).unwrap());
        assert!(!gpio.read(LineId::new(6)).unwrap());
    }

    #[test]
    fn failing_writes_leave_the_level_alone() {
        let gpio = DummyGpio::new();
        gpio.configure(LineId::new(9), Direction::Output { initial: false })
            .unwrap();
        gpio.fail_writes(true);

        let err = gpio.write(LineId::new(9), true).unwrap_err();
        assert!(err.to_string().contains('9'), "{}", err);
        assert!(!gpio.read(LineId::new(9)).unwrap());
        assert!(gpio.writes().is_empty());

        gpio.fail_writes(false);
        gpio.write(LineId::new(9), true).unwrap();
        assert!(gpio.read(LineId::new(9)).unwrap());
    }

    #[test]
    fn press_wakes_subscribers() {
        let gpio = DummyGpio::new();
        let mut edges = gpio.subscribe(LineId::new(3)).unwrap();
        gpio.press(LineId::new(3));
        edges.wait().unwrap();
    }
}
