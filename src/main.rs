//! lablink command line entry point.
//!
//! `pump` replays a CSV command list against a syringe-pump style device;
//! `sensor` opens an interactive acquisition session against a detector
//! style device, with stdin as the control channel.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use lablink::config::Settings;
use lablink::protocol::{AcquisitionEngine, Codec, PumpEngine};
use lablink::sequence;
use lablink::sink::ExchangeLog;
use lablink::transport::Transport;
use log::{error, info};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "lablink", about = "Serial instrument control and acquisition")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port override
    #[arg(long)]
    port: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a CSV command list against the device
    Pump {
        /// CSV file with Block,Step,Command,Sleep columns
        #[arg(long)]
        input: PathBuf,

        /// Replay count override
        #[arg(long)]
        repeat: Option<usize>,
    },
    /// Run an interactive acquisition session (stdin is the control channel)
    Sensor,
}

#[cfg(feature = "instrument_serial")]
fn build_transport(settings: &Settings) -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(lablink::transport::SerialTransport::new(
        settings.serial.port.clone(),
        settings.serial.baud_rate,
        Duration::from_millis(settings.serial.timeout_ms),
    )))
}

#[cfg(not(feature = "instrument_serial"))]
fn build_transport(_settings: &Settings) -> Result<Arc<dyn Transport>> {
    anyhow::bail!("Serial support not enabled. Rebuild with --features instrument_serial")
}

/// Adapt blocking stdin lines into an async command channel.
fn stdin_commands() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut settings = Settings::new(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.serial.port = port;
    }

    let start = Instant::now();
    match cli.command {
        Commands::Pump { input, repeat } => {
            run_pump(&settings, &input, repeat).await?;
        }
        Commands::Sensor => {
            run_sensor(&settings).await?;
        }
    }
    info!("Duration: {:.2} min", start.elapsed().as_secs_f64() / 60.0);
    Ok(())
}

async fn run_pump(settings: &Settings, input: &PathBuf, repeat: Option<usize>) -> Result<()> {
    let items = sequence::load_csv(input)
        .with_context(|| format!("Failed to load command list '{}'", input.display()))?;
    let repetitions = repeat.unwrap_or(settings.protocol.repetitions);
    info!("Loaded {} sequence items", items.len());

    let log_path = PathBuf::from(&settings.storage.output_dir)
        .join(format!("{}_log_pump.csv", Utc::now().format("%Y-%m-%d")));
    let log = ExchangeLog::open(log_path)?;

    let transport = build_transport(settings)?;
    let mut engine = PumpEngine::new(transport, Codec::pump(&settings.protocol.address), log)
        .with_poll_interval(Duration::from_millis(settings.protocol.poll_interval_ms))
        .with_poll_bound(settings.protocol.max_poll_attempts);

    engine.connect().await?;
    let result = engine.run_sequence(&items, repetitions).await;
    if let Err(e) = &result {
        error!("Sequence aborted: {}", e);
    }
    engine.shutdown().await?;
    result.map_err(Into::into)
}

async fn run_sensor(settings: &Settings) -> Result<()> {
    let log_path = PathBuf::from(&settings.storage.output_dir)
        .join(format!("{}_log_sensor.csv", Utc::now().format("%Y-%m-%d")));
    let log = ExchangeLog::open(log_path)?;

    let transport = build_transport(settings)?;
    let codec = Codec::sensor(settings.protocol.telemetry_arity);
    let mut engine = AcquisitionEngine::new(transport, codec)
        .with_exchange_log(log)
        .with_directives(
            settings.protocol.start_directive.clone(),
            settings.protocol.stop_directive.clone(),
        )
        .with_echo_prefixes(settings.protocol.echo_prefixes.clone())
        .with_stop_grace(Duration::from_millis(settings.protocol.stop_grace_ms));

    engine.connect().await?;
    engine.interrogate(&settings.protocol.init_queries).await?;

    info!(
        "Session ready. Type {} to begin acquisition.",
        settings.protocol.start_directive
    );
    engine.run_control(stdin_commands()).await?;

    let out_dir = PathBuf::from(&settings.storage.output_dir);
    let (data_path, events_path) = engine.finalize(&out_dir).await?;
    info!(
        "Telemetry written to '{}', events to '{}'",
        data_path.display(),
        events_path.display()
    );
    Ok(())
}
