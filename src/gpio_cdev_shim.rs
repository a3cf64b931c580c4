use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use gpio_cdev::Chip;
use gpio_cdev::EventRequestFlags;
use gpio_cdev::LineEventHandle;
use gpio_cdev::LineHandle;
use gpio_cdev::LineRequestFlags;
use log::debug;
use log::info;

use crate::gpio::lock;
use crate::gpio::Direction;
use crate::gpio::EdgeSource;
use crate::gpio::Gpio;
use crate::gpio::GpioError;
use crate::gpio::LineId;

const CONSUMER: &str = "hifipowerd";

pub struct CdevGpio {
    chip: Mutex<Chip>,
    handles: Mutex<HashMap<LineId, LineHandle>>,
}

impl CdevGpio {
    pub fn open(path: &Path) -> Result<CdevGpio, GpioError> {
        let chip = Chip::new(path)?;
        info!(
            "Opened GPIO chip '{}' ({}, {} lines)",
            chip.name(),
            chip.label(),
            chip.num_lines()
        );
        Ok(CdevGpio {
            chip: Mutex::new(chip),
            handles: Mutex::new(HashMap::new()),
        })
    }
}

impl Gpio for CdevGpio {
    fn name(&self) -> &'static str {
        "cdev"
    }

    fn configure(&self, line: LineId, direction: Direction) -> Result<(), GpioError> {
        let chip_line = lock(&self.chip).get_line(line.offset())?;
        let handle = match direction {
            Direction::Input => chip_line.request(LineRequestFlags::INPUT, 0, CONSUMER)?,
            Direction::Output { initial } => {
                chip_line.request(LineRequestFlags::OUTPUT, initial as u8, CONSUMER)?
            }
        };
        debug!("Requested line {} as {:?}", line, direction);
        lock(&self.handles).insert(line, handle);
        Ok(())
    }

    fn read(&self, line: LineId) -> Result<bool, GpioError> {
        match lock(&self.handles).get(&line) {
            Some(handle) => Ok(handle.get_value()? != 0),
            None => Err(GpioError::NotConfigured(line)),
        }
    }

    fn write(&self, line: LineId, value: bool) -> Result<(), GpioError> {
        match lock(&self.handles).get(&line) {
            Some(handle) => Ok(handle.set_value(value as u8)?),
            None => Err(GpioError::NotConfigured(line)),
        }
    }

    fn subscribe(&self, line: LineId) -> Result<Box<dyn EdgeSource>, GpioError> {
        let chip_line = lock(&self.chip).get_line(line.offset())?;
        let events = chip_line.events(
            LineRequestFlags::INPUT,
            EventRequestFlags::RISING_EDGE,
            CONSUMER,
        )?;
        Ok(Box::new(CdevEdges { events }))
    }

    fn cleanup(&self) {
        let mut handles = lock(&self.handles);
        debug!("Releasing {} GPIO line handles", handles.len());
        handles.clear();
    }
}

struct CdevEdges {
    events: LineEventHandle,
}

impl EdgeSource for CdevEdges {
    fn wait(&mut self) -> Result<(), GpioError> {
        self.events.get_event()?;
        Ok(())
    }
}
