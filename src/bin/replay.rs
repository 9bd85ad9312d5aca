//! Replays a captured rtl_433 JSON-lines file through discovery and dispatch.
//!
//! Usage:
//!   rtl_433 -F json -R 20 > capture.jsonl
//!   cargo run --bin replay -- capture.jsonl --speed 60
//!
//! Readings are paced by their recorded `time` field, divided by `--speed`,
//! so the discovery window sees the capture the way a live run would.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use clap::Parser;
use log::{info, warn};
use rtl433_bridge::discovery::{DiscoveryOptions, discover};
use rtl433_bridge::dispatch::Dispatcher;
use rtl433_bridge::reading::Reading;
use rtl433_bridge::sensor::{KeyGranularity, SensorState};
use rtl433_bridge::sink::{SinkError, SinkSet, StateSink};
use rtl433_bridge::source::{Diagnostic, ReadingSource};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "replay")]
#[command(about = "Replay a captured rtl_433 JSON-lines file")]
struct Cli {
    /// Capture file
    path: PathBuf,

    /// Replay speed multiplier relative to the recorded timestamps
    #[arg(long, default_value_t = 60.0)]
    speed: f64,

    /// Discovery window in recorded seconds
    #[arg(long, default_value_t = 60)]
    discovery_secs: u64,

    /// Sensor key: device-channel or channel
    #[arg(long, default_value_t = KeyGranularity::DeviceChannel)]
    granularity: KeyGranularity,
}

/// Logs every update.
struct LogSink;

#[async_trait]
impl StateSink for LogSink {
    fn name(&self) -> &str {
        "Log"
    }

    async fn on_update(&mut self, state: &SensorState, reading: &Reading) -> Result<(), SinkError> {
        info!(
            "Got temp from sensor {} at {}: {:.1}°C{}",
            state.key(),
            reading.timestamp(),
            state.temperature_celsius(),
            state
                .humidity()
                .map(|h| format!(" {:.0}%", h))
                .unwrap_or_default()
        );
        Ok(())
    }
}

/// Forward readings, sleeping for the recorded gap between them.
async fn pace(mut rx: mpsc::Receiver<Reading>, tx: mpsc::Sender<Reading>, speed: f64) {
    let mut previous: Option<NaiveDateTime> = None;
    while let Some(reading) = rx.recv().await {
        let observed = reading.observed_at();
        if let (Some(prev), Some(now)) = (previous, observed)
            && let Ok(gap) = (now - prev).to_std()
        {
            tokio::time::sleep(gap.div_f64(speed)).await;
        }
        if observed.is_some() {
            previous = observed;
        }
        if tx.send(reading).await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let speed = if cli.speed > 0.0 { cli.speed } else { 1.0 };

    let file = match tokio::fs::File::open(&cli.path).await {
        Ok(f) => f,
        Err(e) => {
            warn!("Cannot open {}: {}", cli.path.display(), e);
            std::process::exit(1);
        }
    };

    let (diag_tx, mut diag_rx) = mpsc::unbounded_channel();
    let (decoded, _source) = ReadingSource::new(BufReader::new(file))
        .with_diagnostics(diag_tx.clone())
        .spawn(64);
    let (paced_tx, mut readings) = mpsc::channel(64);
    tokio::spawn(pace(decoded, paced_tx, speed));

    let options = DiscoveryOptions {
        window: Duration::from_secs(cli.discovery_secs).div_f64(speed),
        granularity: cli.granularity,
        ..DiscoveryOptions::default()
    };
    let mut registry = discover(&mut readings, &options).await;
    if registry.is_empty() {
        warn!("No sensors detected");
        std::process::exit(1);
    }
    for key in registry.ordered_keys() {
        info!("Registered {}", key);
    }

    let mut sinks = SinkSet::new().with_sink(LogSink);
    let mut dispatcher = Dispatcher::new(cli.granularity).with_diagnostics(diag_tx);
    let stats = dispatcher.run(&mut readings, &mut registry, &mut sinks).await;

    let mut kinds: BTreeMap<&'static str, usize> = BTreeMap::new();
    while let Ok(diagnostic) = diag_rx.try_recv() {
        if let Diagnostic::UnknownSensor(key) = &diagnostic {
            info!("Unknown sensor {}", key);
        }
        *kinds.entry(diagnostic.kind()).or_default() += 1;
    }
    info!(
        "Replay finished: {} readings, {} updates, {} unknown",
        stats.received, stats.updated, stats.unknown
    );
    for (kind, count) in kinds {
        info!("  {}: {}", kind, count);
    }
}
