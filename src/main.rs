pub mod config;
pub mod device;
pub mod mqtt;
pub mod router;

use crate::config::BridgeConfig;
use crate::device::{Connector, DeviceAdapter, SerialConnector, SimulatedConnector};
use crate::mqtt::mqtt_handler::MqttHandler;
use crate::mqtt::topics::Topics;
use crate::router::{run_worker, CommandRouter};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const WORKER_QUEUE: usize = 32;

/// Bridges a Keithley 6517B electrometer to an MQTT broker.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    config: Option<PathBuf>,

    /// Use a simulated instrument instead of the serial port
    #[arg(long)]
    simulate: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup(cli.verbose)?;

    let path = match cli.config {
        Some(path) => path,
        None => BridgeConfig::default_path()?,
    };
    let config = BridgeConfig::load(&path).await?;

    let connector: Arc<dyn Connector> = if cli.simulate {
        info!("Using simulated Keithley 6517B");
        Arc::new(SimulatedConnector::default())
    } else {
        Arc::new(SerialConnector::from_settings(&config.device))
    };

    let topics = Topics::new(&config.device.topic_base, &config.device.device_name);
    let shutdown = CancellationToken::new();
    let (worker_tx, worker_rx) = mpsc::channel(WORKER_QUEUE);

    let handler = MqttHandler::new(&config.mqtt, topics.clone(), worker_tx);
    let router = CommandRouter::new(DeviceAdapter::new(connector), handler.client(), topics);
    let worker = tokio::spawn(run_worker(
        router,
        worker_rx,
        config.measurement.interval(),
        shutdown.clone(),
    ));

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                ctrl_c.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {}", e),
        }
    });

    let result = handler.run(shutdown.clone()).await;
    shutdown.cancel();
    worker
        .await
        .map_err(|e| eyre!("Command worker failed: {}", e))?;

    result.map_err(|e| eyre!("Bridge stopped: {}", e))
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", if verbose { "debug" } else { "info" })
    }
    setup_logging_env(if verbose { Level::DEBUG } else { Level::INFO });
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
