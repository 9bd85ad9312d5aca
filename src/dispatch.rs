//! Routing of readings to registered sensors.
//!
//! After discovery the dispatcher owns the read side of the reading channel
//! for the rest of the process. Every reading either updates exactly one
//! registered sensor and is handed to the sinks, or is reported as coming
//! from an unknown sensor and dropped.

use crate::reading::Reading;
use crate::registry::Registry;
use crate::sensor::{KeyGranularity, SensorKey};
use crate::sink::SinkSet;
use crate::source::{Diagnostic, DiagnosticSender, report};
use log::{debug, info, warn};
use tokio::sync::mpsc;

/// Result of dispatching one reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The sensor was updated; `delivered` sinks accepted the update.
    Updated { key: SensorKey, delivered: usize },
    /// No sensor with this key was discovered.
    UnknownSensor(SensorKey),
}

/// Counters kept across a dispatch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub updated: u64,
    pub unknown: u64,
    /// Sink deliveries that failed, summed over all sinks.
    pub sink_failures: u64,
}

pub struct Dispatcher {
    granularity: KeyGranularity,
    diagnostics: Option<DiagnosticSender>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// `granularity` must match the one used for discovery.
    pub fn new(granularity: KeyGranularity) -> Self {
        Self {
            granularity,
            diagnostics: None,
            stats: DispatchStats::default(),
        }
    }

    /// Report unknown sensors on `tx` as well as the log.
    pub fn with_diagnostics(mut self, tx: DiagnosticSender) -> Self {
        self.diagnostics = Some(tx);
        self
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Apply one reading to its sensor and notify the sinks.
    pub async fn dispatch(
        &mut self,
        reading: &Reading,
        registry: &mut Registry,
        sinks: &mut SinkSet,
    ) -> DispatchOutcome {
        self.stats.received += 1;
        let key = self.granularity.key_for(reading);

        let Some(state) = registry.get_mut(&key) else {
            self.stats.unknown += 1;
            info!("[Dispatch] Message from unknown sensor {}", key);
            report(self.diagnostics.as_ref(), Diagnostic::UnknownSensor(key.clone()));
            return DispatchOutcome::UnknownSensor(key);
        };

        state.apply(reading);
        self.stats.updated += 1;
        debug!(
            "[Dispatch] Sensor {}: {:.2}°C{}",
            key,
            state.temperature_celsius(),
            state
                .humidity()
                .map(|h| format!(", {:.0}%", h))
                .unwrap_or_default()
        );

        let delivered = sinks.deliver(state, reading).await;
        self.stats.sink_failures += (sinks.len() - delivered) as u64;
        DispatchOutcome::Updated { key, delivered }
    }

    /// Dispatch readings until the channel closes.
    pub async fn run(
        &mut self,
        readings: &mut mpsc::Receiver<Reading>,
        registry: &mut Registry,
        sinks: &mut SinkSet,
    ) -> DispatchStats {
        info!(
            "[Dispatch] Routing readings to {} sensor(s) and {} sink(s)",
            registry.len(),
            sinks.len()
        );

        while let Some(reading) = readings.recv().await {
            self.dispatch(&reading, registry, sinks).await;
        }

        warn!(
            "[Dispatch] Input ended after {} readings ({} updates, {} unknown)",
            self.stats.received, self.stats.updated, self.stats.unknown
        );
        self.stats
    }
}
