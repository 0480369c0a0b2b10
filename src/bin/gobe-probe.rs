use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use log::{info, warn};
use gobe_session::config::io::ConfigIO;
use gobe_session::config::types::Config;
use gobe_session::device::connection::BtleStack;
use gobe_session::init_logging;
use gobe_session::session::auth::OfflineAuthService;
use gobe_session::session::controller::{ControllerEvent, ControllerSettings, SessionController};
use gobe_session::session::dispatch::DisplayThread;
use gobe_session::session::facade::DeviceSessionFacade;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Runs the GoBe session without a window and prints every status change.\n\nExample: ./target/release/gobe-probe --target MyGobeName --pin 010401 --duration 2m", long_about = None)]
struct Args {
    /// Config file to read, instead of the one used by gobe-session
    #[arg(long)]
    config: Option<PathBuf>,

    /// Account login (email address), overrides the config file
    #[arg(long)]
    login: Option<String>,

    /// Account password, overrides the config file
    #[arg(long)]
    password: Option<String>,

    /// Advertised name of the wristband, overrides the config file
    #[arg(long)]
    target: Option<String>,

    /// Pin of the wristband, overrides the config file
    #[arg(long)]
    pin: Option<String>,

    /// How often the step count is read, e.g. "5s"
    #[arg(long, value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// How long one scan runs
    #[arg(long, value_parser = humantime::parse_duration, default_value = "15s")]
    scan_duration: Duration,

    /// Exit after this long, instead of waiting for ctrl-c
    #[arg(long, value_parser = humantime::parse_duration)]
    duration: Option<Duration>,
}

async fn read_config(args: &Args) -> Result<Config, Box<dyn Error>> {
    let config_io = match &args.config {
        Some(path) => ConfigIO::open_sync(path)?,
        None => ConfigIO::new_sync()?,
    };

    let mut config = match config_io.read().await {
        Ok(config) => config,
        Err(err) if err.is_file_not_found_error() => Config::default(),
        Err(err) => return Err(err.into()),
    };

    if let Some(login) = &args.login {
        config.account.login = login.clone();
    }
    if let Some(password) = &args.password {
        config.account.password = password.clone();
    }
    if let Some(target) = &args.target {
        config.device.target_name = target.clone();
    }
    if let Some(pin) = &args.pin {
        config.device.pin_code = pin.clone();
    }
    if let Some(interval) = args.poll_interval {
        config.telemetry.poll_interval_secs = interval.as_secs();
    }
    config.normalize();

    Ok(config)
}

fn print_event(event: ControllerEvent) {
    match event {
        ControllerEvent::SessionStatus(status) => println!("[SESSION] {}", status),
        ControllerEvent::DeviceStatus(status) => println!("[DEVICE]  {}", status),
        ControllerEvent::HeartRate(Some(bpm)) => println!("[HR]      {} bpm", bpm),
        ControllerEvent::HeartRate(None) => println!("[HR]      unknown"),
        ControllerEvent::Steps(Some(steps)) => println!("[STEPS]   {}", steps),
        ControllerEvent::Steps(None) => println!("[STEPS]   unknown"),
        ControllerEvent::DeviceDiscovered(device) => println!("[SCAN]    {} ({})", device.name, device.identifier),
        ControllerEvent::ScanFinished => println!("[SCAN]    finished"),
        ControllerEvent::DeviceRemembered(known) => println!("[DEVICE]  remembered {} ({})", known.name, known.identifier),
        ControllerEvent::Notice(notice) => println!("[NOTICE]  {}", notice),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let args = Args::parse();
    let config = read_config(&args).await?;

    let display = DisplayThread::spawn()?;
    let facade = DeviceSessionFacade::new(
        Arc::new(OfflineAuthService::new(config.device.known_device.is_some())),
        Arc::new(BtleStack::with_scan_duration(args.scan_duration)),
        Arc::new(display),
        tokio::runtime::Handle::current(),
    );

    let controller = SessionController::new(facade, ControllerSettings::from_config(&config), print_event);
    controller.start();

    match args.duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => info!("Probe duration elapsed"),
                result = tokio::signal::ctrl_c() => if let Err(err) = result { warn!("Failed to wait for ctrl-c: {}", err) },
            }
        },
        None => {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to wait for ctrl-c: {}", err);
            }
        },
    }

    controller.shutdown();
    Ok(())
}
