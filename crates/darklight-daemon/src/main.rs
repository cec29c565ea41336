//! DarkLight Daemon - Main entry point
//!
//! Connects to a DarkLight cover calibrator (or the built-in simulator),
//! keeps its state polled and serves an operator console on stdin.

mod config;
mod console;

use anyhow::Result;
use clap::Parser;
use darklight_serial::{open_transport, Link, SimConfig, SimulatedDevice, Transport};
use darklight_session::{Session, SessionConfig};
use std::path::PathBuf;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "darklightd")]
#[command(about = "DarkLight cover calibrator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "darklight.toml")]
    config: PathBuf,

    /// Serial port path
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Drive the in-process simulated device instead of a serial port
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("DarkLight v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(port) = args.port {
        config.serial.port = port;
    }
    if let Some(baud) = args.baud {
        config.serial.baud = baud;
    }
    let session_config = config.to_session_config();

    if args.simulate {
        info!("Using simulated device");
        let (line, _device) = SimulatedDevice::spawn(SimConfig::default());
        serve(Transport::new(line).with_label("simulator"), session_config).await
    } else {
        info!(
            port = %config.serial.port,
            baud = config.serial.baud,
            "Configuration loaded"
        );
        let transport = open_transport(&config.serial.port, config.serial.baud)?;
        serve(transport, session_config).await
    }
}

async fn serve<S: Link>(transport: Transport<S>, config: SessionConfig) -> Result<()> {
    let mut session = Session::connect(transport, config).await?;
    session.start_polling();

    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted");
                let _ = interrupt_tx.send(true);
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let result = console::run(session.dispatcher(), stdin, interrupt_rx).await;

    session.disconnect().await;
    result
}
