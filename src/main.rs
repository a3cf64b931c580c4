mod buttons;
mod config;
mod device;
mod gpio;
mod gpio_cdev_shim;
mod gpio_dummy;
mod gpio_sysfs_shim;
mod power_state;
mod power_types;
mod relay_ctl;
mod sequencer;
mod status_led;
mod switch;
mod system_ctl;
mod web;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::error;
use log::info;
use log::warn;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use buttons::ButtonActions;
use config::Config;
use config::DEFAULT_CONFIG_PATH;
use device::Device;
use gpio::BackendKind;
use gpio::Gpio;
use status_led::StatusLed;
use system_ctl::SystemCommands;

const EXIT_BLINK_COUNT: u32 = 5;
const EXIT_BLINK_DURATION: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "HIFIPOWER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to listen on, overrides the config file
    #[arg(short, long)]
    address: Option<String>,

    /// Port to listen on, overrides the config file
    #[arg(short, long)]
    port: Option<u16>,

    /// GPIO backend, overrides the config file
    #[arg(long, value_enum)]
    gpio_backend: Option<BackendKind>,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn load_config(args: &Args) -> Result<(Config, Option<PathBuf>)> {
    let (mut config, source) = Config::load(&args.config)?;
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(kind) = args.gpio_backend {
        config.gpio_backend = kind;
    }
    Ok((config, source))
}

fn init_logging(args: &Args, config: &Config) -> Result<()> {
    let mut verbosity = 2 + args.verbose as usize;
    if config.debug_mode {
        verbosity = verbosity.max(3);
    }
    stderrlog::new()
        .module(module_path!())
        .quiet(args.quiet)
        .verbosity(verbosity)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .context("Failed to initialize logging")
}

async fn shutdown_signal() {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

fn start_buttons(
    gpio: &Arc<dyn Gpio>,
    config: &Config,
    device: &Device,
    led: Option<Arc<StatusLed>>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel(8);
    for (event, line) in config.device.buttons() {
        buttons::watch(gpio.as_ref(), line, event, config.button_debounce(), tx.clone())
            .with_context(|| format!("Failed to watch {:?} button on line {}", event, line))?;
    }
    let actions = ButtonActions {
        device: device.clone(),
        led,
        commands: SystemCommands {
            shutdown: config.shutdown_command.clone(),
            reboot: config.reboot_command.clone(),
        },
    };
    tokio::spawn(buttons::dispatch(rx, actions));
    Ok(())
}

/// Runs `cleanup` unless `interrupt` fires first. Returns whether the
/// cleanup ran to completion.
async fn unless_interrupted<C, I>(cleanup: C, interrupt: I) -> bool
where
    C: Future<Output = ()>,
    I: Future<Output = ()>,
{
    tokio::select! {
        _ = cleanup => true,
        _ = interrupt => false,
    }
}

async fn finish(gpio: &Arc<dyn Gpio>, device: &Device, led: Option<&StatusLed>) {
    if let Some(led) = led {
        if let Err(e) = led
            .blink(EXIT_BLINK_COUNT, EXIT_BLINK_DURATION, Some(false))
            .await
        {
            warn!("Failed to blink the ready LED: {}", e);
        }
    }
    if let Err(e) = device.release().await {
        error!("Failed to switch the relays off: {}", e);
    }
    gpio.cleanup();
    info!("GPIO released");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, source) = load_config(&args)?;
    init_logging(&args, &config)?;
    match source {
        Some(path) => info!("Loaded configuration from '{}'", path.display()),
        None => info!(
            "No configuration at '{}', using defaults",
            args.config.display()
        ),
    }

    let dummy_inputs = config.dummy_inputs()?;
    let gpio = gpio::open_backend(
        config.gpio_backend,
        &config.gpio_chip,
        &config.sysfs_root,
        &dummy_inputs,
    )
    .context("Failed to open GPIO")?;
    info!("Using {} GPIO backend", gpio.name());

    let device = Device::open(Arc::clone(&gpio), &config.device, config.invert_outputs)
        .context("Failed to set up the relay device")?;

    let led = match config.device.ready_led() {
        Some(line) => Some(Arc::new(
            StatusLed::open(Arc::clone(&gpio), line, true)
                .with_context(|| format!("Failed to set up the ready LED on line {}", line))?,
        )),
        None => None,
    };

    start_buttons(&gpio, &config, &device, led.clone())?;

    let address = format!("{}:{}", config.address, config.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Listening on http://{}", address);

    let served = axum::serve(listener, web::router(device.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    info!("Releasing hardware, signal again to exit immediately");
    if !unless_interrupted(finish(&gpio, &device, led.as_deref()), shutdown_signal()).await {
        anyhow::bail!("Interrupted while releasing hardware, relays may still be switched");
    }
    served
}
