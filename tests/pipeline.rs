//! End-to-end pipeline tests: source -> discovery -> dispatch -> sinks.

use rtl433_bridge::discovery::{DiscoveryOptions, discover};
use rtl433_bridge::dispatch::Dispatcher;
use rtl433_bridge::sensor::{KeyGranularity, SensorKey};
use rtl433_bridge::sink::{AccessoryBridge, SinkSet};
use rtl433_bridge::source::{Diagnostic, ReadingSource};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_test::io::Builder;

fn line(device: i64, channel: i64, temperature_f: f64, humidity: u8) -> Vec<u8> {
    format!(
        "{{\"time\": \"2021-03-14 09:26:53\", \"model\": \"Ambientweather-F007TH\", \"id\": {device}, \"channel\": {channel}, \"battery\": \"OK\", \"temperature_F\": {temperature_f}, \"humidity\": {humidity}}}\n"
    )
    .into_bytes()
}

#[tokio::test(start_paused = true)]
async fn test_discover_then_dispatch() {
    let mock = Builder::new()
        .read(&line(75, 2, 71.6, 38))
        .read(&line(12, 1, 50.0, 60))
        .read(b"garbage\n")
        .read(&line(75, 2, 80.0, 40))
        // Discovery window closes while the source is idle
        .wait(Duration::from_secs(5))
        .read(&line(75, 2, 32.0, 41))
        .read(&line(99, 3, 60.0, 50))
        .read(&line(12, 1, 212.0, 65))
        .build();

    let (diag_tx, mut diag_rx) = mpsc::unbounded_channel();
    let (mut readings, source) = ReadingSource::new(BufReader::new(mock))
        .with_diagnostics(diag_tx.clone())
        .spawn(4);

    let options = DiscoveryOptions {
        window: Duration::from_secs(2),
        granularity: KeyGranularity::DeviceChannel,
        ..DiscoveryOptions::default()
    };
    let mut registry = discover(&mut readings, &options).await;

    let keys: Vec<_> = registry.ordered_keys().into_iter().map(|k| k.to_string()).collect();
    assert_eq!(keys, ["12-1", "75-2"]);
    // First-seen reading wins during discovery
    let first = registry.get(&SensorKey::from("75-2")).unwrap();
    assert_eq!(first.temperature_celsius(), 22.0);

    let bridge = AccessoryBridge::from_registry(&registry);
    assert_eq!(bridge.primary().unwrap().key.as_str(), "12-1");
    let temperature = bridge.get(&SensorKey::from("75-2")).unwrap().temperature.clone();
    let humidity = bridge.get(&SensorKey::from("12-1")).unwrap().humidity.clone().unwrap();

    let mut sinks = SinkSet::new().with_sink(bridge);
    let mut dispatcher = Dispatcher::new(options.granularity).with_diagnostics(diag_tx);
    let stats = dispatcher.run(&mut readings, &mut registry, &mut sinks).await;
    source.await.unwrap();

    assert_eq!(stats.received, 3);
    assert_eq!(stats.updated, 2);
    assert_eq!(stats.unknown, 1);
    assert_eq!(stats.sink_failures, 0);

    assert_eq!(temperature.get_celsius(), 0.0);
    assert_eq!(humidity.get_percent(), 65.0);
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.get(&SensorKey::from("12-1")).unwrap().temperature_celsius(),
        100.0
    );

    let mut diagnostics = Vec::new();
    while let Ok(d) = diag_rx.try_recv() {
        diagnostics.push(d);
    }
    // The source may close before the dispatcher drains the channel
    let mut kinds: Vec<_> = diagnostics.iter().map(Diagnostic::kind).collect();
    kinds.sort_unstable();
    assert_eq!(kinds, ["decode", "source_closed", "unknown_sensor"]);
    assert!(diagnostics.contains(&Diagnostic::UnknownSensor(SensorKey::from("99-3"))));
}

#[tokio::test(start_paused = true)]
async fn test_silent_input_discovers_nothing() {
    let mock = Builder::new().wait(Duration::from_secs(120)).build();
    let (mut readings, source) = ReadingSource::new(BufReader::new(mock)).spawn(4);

    let options = DiscoveryOptions {
        window: Duration::from_secs(60),
        ..DiscoveryOptions::default()
    };
    let registry = discover(&mut readings, &options).await;

    assert!(registry.is_empty());
    source.abort();
}
