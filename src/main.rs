use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scancam::config::{AppConfig, CameraBackendKind, ConfigStore};
use scancam::events::{EventBus, SystemEvent};
use scancam::permission::{DeviceNodePermissions, PermissionAuthority, StaticPermissions};
use scancam::recognition::MockRecognitionService;
use scancam::scanner::Scanner;
use scancam::session::SessionController;
use scancam::video::backend::CaptureBackend;
use scancam::video::frame::FrameMeta;
use scancam::video::synthetic::SyntheticCamera;
use scancam::video::v4l2::{self, V4l2Camera};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// scancam command line arguments
#[derive(Parser, Debug)]
#[command(name = "scancam")]
#[command(version, about = "Camera session controller with a scanning console", long_about = None)]
struct CliArgs {
    /// Configuration file (default: $SCANCAM_CONFIG or ./scancam.toml)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Capture backend (overrides config)
    #[arg(short = 'b', long, value_name = "BACKEND")]
    backend: Option<CameraBackendKind>,

    /// V4L2 device path (overrides config)
    #[arg(short = 'd', long, value_name = "DEVICE")]
    device: Option<PathBuf>,

    /// Write --backend/--device back to the configuration file
    #[arg(long)]
    save: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting scancam v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().unwrap_or_else(get_config_path);
    let config_store = ConfigStore::new(&config_path).await?;
    tracing::info!("Configuration file: {}", config_store.path().display());

    // CLI overrides apply to this run only unless --save is given
    let apply_overrides = |config: &mut AppConfig| {
        if let Some(backend) = args.backend {
            config.camera.backend = backend;
        }
        if let Some(device) = args.device.clone() {
            config.camera.device = Some(device);
        }
    };
    if args.save {
        config_store.update(&apply_overrides).await?;
    }
    let mut config = (*config_store.get()).clone();
    apply_overrides(&mut config);

    let (backend, permissions) = build_backend(&config);
    tracing::info!("Using {} capture backend", backend.name());

    let events = Arc::new(EventBus::new());
    let controller = SessionController::new(backend, config.camera.session_options());
    controller.attach_event_bus(events.clone());
    spawn_event_logger(events.subscribe());

    let recognizer = Arc::new(MockRecognitionService::new(
        config.scanner.labels.clone(),
        Duration::from_millis(config.scanner.recognition_delay_ms),
    ));
    let scanner = Scanner::new(controller.clone(), permissions, recognizer);
    scanner.set_event_bus(events.clone());

    println!("scancam ready, type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Failed to read command: {}", e);
                        break;
                    }
                };
                match run_command(line.trim(), &controller, &scanner, &events).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("error: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    scanner.handle_disappear().await;
    tracing::info!("scancam stopped");
    Ok(())
}

/// Execute one console command; `Ok(false)` ends the session
async fn run_command(
    command: &str,
    controller: &SessionController,
    scanner: &Scanner,
    events: &EventBus,
) -> anyhow::Result<bool> {
    match command {
        "" => {}
        "configure" => {
            controller.configure().await?;
            println!("configured");
        }
        "setup" => {
            scanner.setup_camera().await;
            println!("{}", serde_json::to_string(&scanner.camera_status())?);
        }
        "start" => controller.start().await,
        "stop" => controller.stop().await,
        "background" => events.publish(SystemEvent::AppEnteredBackground),
        "foreground" => events.publish(SystemEvent::AppLeftBackground),
        "interrupt" => events.publish(SystemEvent::CameraInterrupted {
            reason: Some("console".to_string()),
        }),
        "resume" => events.publish(SystemEvent::CameraInterruptionEnded),
        "scan" => match scanner.capture_and_scan().await {
            Some(id) => println!("scan {} started", id),
            None => println!("{}", serde_json::to_string(&scanner.state())?),
        },
        "result" => println!("{}", serde_json::to_string(&scanner.state())?),
        "reset" => scanner.reset(),
        "frame" => match controller.latest_frame() {
            Some(frame) => println!("{}", serde_json::to_string(&FrameMeta::from(&*frame))?),
            None => println!("no frame available"),
        },
        "state" => println!("{}", serde_json::to_string_pretty(&controller.status().await?)?),
        "help" => println!(
            "commands: configure setup start stop background foreground interrupt resume \
             scan result reset frame state quit"
        ),
        "quit" | "exit" => return Ok(false),
        other => println!("unknown command: {}", other),
    }
    Ok(true)
}

fn build_backend(config: &AppConfig) -> (Arc<dyn CaptureBackend>, Arc<dyn PermissionAuthority>) {
    match config.camera.backend {
        CameraBackendKind::Synthetic => (
            Arc::new(SyntheticCamera::new(config.synthetic.clone())),
            Arc::new(StaticPermissions::granted()),
        ),
        CameraBackendKind::V4l2 => {
            let node = config.camera.device.clone().unwrap_or_else(|| {
                v4l2::enumerate_devices()
                    .ok()
                    .and_then(|devices| devices.into_iter().next())
                    .map(|d| d.path)
                    .unwrap_or_else(|| PathBuf::from("/dev/video0"))
            });
            (
                Arc::new(V4l2Camera::new(config.camera.v4l2_config())),
                Arc::new(DeviceNodePermissions::new(node)),
            )
        }
    }
}

/// Log camera, scanner and error events as they pass over the bus
fn spawn_event_logger(mut rx: broadcast::Receiver<SystemEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event)
                    if event.matches_topic("camera.*")
                        || event.matches_topic("scanner.*")
                        || event.matches_topic("system.*") =>
                {
                    match serde_json::to_string(&event) {
                        Ok(json) => tracing::info!("event: {}", json),
                        Err(e) => tracing::debug!("Failed to encode event: {}", e),
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event logger lagged, {} events skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "scancam=error",
        LogLevel::Warn => "scancam=warn",
        LogLevel::Info => "scancam=info",
        LogLevel::Verbose => "scancam=debug,v4l=info",
        LogLevel::Debug => "scancam=debug,v4l=debug",
        LogLevel::Trace => "scancam=trace,v4l=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the configuration file path
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SCANCAM_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("scancam.toml")
}
