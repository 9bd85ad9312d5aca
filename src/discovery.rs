//! Time-bounded sensor discovery.
//!
//! Listens to the reading channel for a fixed window and registers every
//! distinct [`SensorKey`](crate::sensor::SensorKey) it sees. The window is
//! closed by its timer, or earlier if the source closes. Reading content never
//! ends discovery early.

use crate::reading::Reading;
use crate::registry::{Registry, RegistryBuilder};
use crate::sensor::{KeyGranularity, SensorProfile};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default length of the discovery window.
pub const DEFAULT_DISCOVERY_WINDOW: Duration = Duration::from_secs(60);

/// Settings for a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub window: Duration,
    pub granularity: KeyGranularity,
    pub profile: SensorProfile,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_DISCOVERY_WINDOW,
            granularity: KeyGranularity::default(),
            profile: SensorProfile::default(),
        }
    }
}

/// Consume readings for `options.window` and return the frozen registry.
///
/// The first reading seen for a key initializes its state; later readings
/// for that key are discarded until dispatch starts. If the source closes
/// before the timer fires, discovery ends with what it has seen so far.
pub async fn discover(
    readings: &mut mpsc::Receiver<Reading>,
    options: &DiscoveryOptions,
) -> Registry {
    info!(
        "[Discovery] Detecting sensors for {}s (key granularity: {})",
        options.window.as_secs_f32(),
        options.granularity
    );

    let mut builder = RegistryBuilder::new(options.profile.clone());
    let mut duplicates = 0u64;
    let deadline = tokio::time::sleep(options.window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            // Checked first so a busy channel cannot starve the timer
            biased;
            _ = &mut deadline => break,
            received = readings.recv() => match received {
                Some(reading) => {
                    let key = options.granularity.key_for(&reading);
                    if builder.observe(key.clone(), &reading) {
                        info!(
                            "[Discovery] Detected sensor {}: {:.2}°C",
                            key,
                            reading.temperature_celsius()
                        );
                    } else {
                        duplicates += 1;
                        debug!("[Discovery] Ignoring repeat reading for {}", key);
                    }
                }
                None => {
                    warn!("[Discovery] Input closed before the discovery window ended");
                    break;
                }
            },
        }
    }

    info!(
        "[Discovery] Done detecting sensors: {} found, {} repeat readings ignored",
        builder.len(),
        duplicates
    );
    builder.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn assert_window_elapsed(start: Instant, window: Duration) {
        let elapsed = start.elapsed();
        assert!(elapsed >= window, "returned early after {:?}", elapsed);
        assert!(elapsed < window + Duration::from_millis(10), "overran: {:?}", elapsed);
    }

    fn options(window: Duration) -> DiscoveryOptions {
        DiscoveryOptions {
            window,
            ..DiscoveryOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovers_keys_within_window() {
        let (tx, mut rx) = mpsc::channel(8);
        let producer = tokio::spawn(async move {
            tx.send(Reading::fahrenheit(0, 1, 50.0, None)).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(Reading::fahrenheit(0, 2, 60.0, None)).await.unwrap();
            // Stay silent past the end of the window
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(tx);
        });

        let mut opts = options(Duration::from_secs(2));
        opts.granularity = KeyGranularity::Channel;
        let start = Instant::now();
        let registry = discover(&mut rx, &opts).await;

        assert_window_elapsed(start, Duration::from_secs(2));
        let keys: Vec<_> = registry.ordered_keys().into_iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["1", "2"]);
        producer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_source_returns_empty_registry_on_time() {
        let (_tx, mut rx) = mpsc::channel::<Reading>(1);
        let start = Instant::now();

        let registry = discover(&mut rx, &options(Duration::from_secs(60))).await;

        assert!(registry.is_empty());
        assert_window_elapsed(start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_readings_keep_first_state() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Reading::fahrenheit(5, 1, 32.0, Some(20.0))).await.unwrap();
        tx.send(Reading::fahrenheit(5, 1, 212.0, Some(90.0))).await.unwrap();
        tx.send(Reading::fahrenheit(5, 1, 32.0, Some(20.0))).await.unwrap();

        let registry = discover(&mut rx, &options(Duration::from_secs(5))).await;

        assert_eq!(registry.len(), 1);
        let state = registry.primary().unwrap();
        assert_eq!(state.key().as_str(), "5-1");
        assert_eq!(state.temperature_celsius(), 0.0);
        assert_eq!(state.humidity(), Some(20.0));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readings_after_window_stay_queued() {
        let (tx, mut rx) = mpsc::channel(8);
        let producer = tokio::spawn(async move {
            tx.send(Reading::fahrenheit(1, 1, 50.0, None)).await.unwrap();
            tokio::time::sleep(Duration::from_secs(3)).await;
            tx.send(Reading::fahrenheit(2, 1, 50.0, None)).await.unwrap();
        });

        let registry = discover(&mut rx, &options(Duration::from_secs(2))).await;
        assert_eq!(registry.len(), 1);

        // The late reading is left for the dispatcher
        let late = rx.recv().await.unwrap();
        assert_eq!(late.device_id(), 2);
        producer.await.unwrap();
    }

    // Real clock: a paused clock cannot advance while the producer keeps
    // the channel full.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flooded_channel_still_closes_on_time() {
        let (tx, mut rx) = mpsc::channel(64);
        let producer = tokio::spawn(async move {
            let mut i = 0i64;
            while tx.send(Reading::fahrenheit(i % 7, 1, 50.0, None)).await.is_ok() {
                i += 1;
            }
        });

        let window = Duration::from_millis(300);
        let start = Instant::now();
        let registry = discover(&mut rx, &options(window)).await;
        let elapsed = start.elapsed();

        assert!(elapsed >= window, "returned early after {:?}", elapsed);
        assert!(elapsed < window + Duration::from_millis(250), "overran: {:?}", elapsed);
        assert_eq!(registry.len(), 7);

        drop(rx);
        producer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_source_ends_discovery_early() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Reading::fahrenheit(1, 1, 50.0, None)).await.unwrap();
        drop(tx);

        let start = Instant::now();
        let registry = discover(&mut rx, &options(Duration::from_secs(60))).await;

        assert_eq!(registry.len(), 1);
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
