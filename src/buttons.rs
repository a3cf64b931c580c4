use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::error;
use log::info;
use log::warn;
use tokio::sync::mpsc;

use crate::device::Device;
use crate::gpio::Gpio;
use crate::gpio::GpioError;
use crate::gpio::LineId;
use crate::status_led::StatusLed;
use crate::system_ctl;
use crate::system_ctl::SystemCommands;

const BLINK_COUNT: u32 = 5;
const BLINK_DURATION: Duration = Duration::from_millis(500);

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum ButtonEvent {
    Toggle,
    Shutdown,
    Reboot,
}

/// Watches `line` for presses on a dedicated thread and forwards them as
/// `event`. Presses closer together than `debounce` are dropped.
pub fn watch(
    gpio: &dyn Gpio,
    line: LineId,
    event: ButtonEvent,
    debounce: Duration,
    events: mpsc::Sender<ButtonEvent>,
) -> Result<JoinHandle<()>, GpioError> {
    let mut edges = gpio.subscribe(line)?;
    let handle = thread::Builder::new()
        .name(format!("button-{}", line))
        .spawn(move || {
            let mut last_press: Option<Instant> = None;
            loop {
                if let Err(e) = edges.wait() {
                    error!("Stopped watching {:?} button: {}", event, e);
                    return;
                }
                let now = Instant::now();
                if let Some(last) = last_press {
                    if now.duration_since(last) < debounce {
                        debug!("Ignoring bounce on {:?} button", event);
                        continue;
                    }
                }
                last_press = Some(now);
                debug!("{:?} button pressed", event);
                if events.blocking_send(event).is_err() {
                    return;
                }
            }
        })
        .map_err(|e| GpioError::io(line, e))?;
    info!("Watching line {} for {:?} presses", line, event);
    Ok(handle)
}

pub struct ButtonActions {
    pub device: Device,
    pub led: Option<Arc<StatusLed>>,
    pub commands: SystemCommands,
}

impl ButtonActions {
    async fn handle(&self, event: ButtonEvent) {
        match event {
            ButtonEvent::Toggle => self.toggle(),
            ButtonEvent::Shutdown => self.system(&self.commands.shutdown).await,
            ButtonEvent::Reboot => self.system(&self.commands.reboot).await,
        }
    }

    fn toggle(&self) {
        match &self.device {
            // queued behind any running sequence by the sequencer itself
            Device::Dual(sequencer) => {
                let sequencer = Arc::clone(sequencer);
                tokio::spawn(async move {
                    if let Err(e) = sequencer.toggle().await {
                        error!("Power toggle failed: {}", e);
                    }
                });
            }
            Device::Single(_) => warn!("Toggle button is not supported by the single relay device"),
        }
    }

    async fn system(&self, command: &str) {
        if let Some(led) = &self.led {
            if let Err(e) = led.blink(BLINK_COUNT, BLINK_DURATION, None).await {
                warn!("Failed to blink the ready LED: {}", e);
            }
        }
        if let Err(e) = system_ctl::run(command).await {
            error!("{}", e);
        }
    }
}

/// Handles button presses until every watcher has stopped.
pub async fn dispatch(mut events: mpsc::Receiver<ButtonEvent>, actions: ButtonActions) {
    while let Some(event) = events.recv().await {
        info!("Handling {:?} button", event);
        actions.handle(event).await;
    }
    debug!("Button dispatcher finished");
}
