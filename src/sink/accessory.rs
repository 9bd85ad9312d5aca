//! Bridged accessory model.
//!
//! Exposes each discovered sensor as a bridged accessory with a temperature
//! endpoint and, when the sensor reports it, a humidity endpoint. Endpoint
//! values are stored the way smart-home bridges report them: temperature in
//! centidegrees Celsius (21.5°C is 2150) and humidity in centi-percent.
//!
//! The first accessory in key order is the bridge's primary accessory. Its
//! position must not change between restarts, so accessories are always laid
//! out from [`Registry::ordered_keys`](crate::registry::Registry::ordered_keys).

use super::{SinkError, StateSink};
use crate::reading::Reading;
use crate::registry::Registry;
use crate::sensor::{Bounds, SensorInfo, SensorKey, SensorState};
use async_trait::async_trait;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI16, AtomicU16, AtomicU32, Ordering};

/// Signal shared by every endpoint of a bridge.
pub type ChangeSignal = Signal<CriticalSectionRawMutex, ()>;

/// Wakes whoever exports endpoint values when one of them changes.
pub struct ChangeNotifier {
    signal: Arc<ChangeSignal>,
    endpoint_id: u16,
}

impl ChangeNotifier {
    pub fn new(signal: Arc<ChangeSignal>, endpoint_id: u16) -> Self {
        Self { signal, endpoint_id }
    }

    /// Endpoint this notifier belongs to.
    pub fn endpoint_id(&self) -> u16 {
        self.endpoint_id
    }

    /// Non-blocking.
    pub fn notify(&self) {
        self.signal.signal(());
    }
}

/// Type of an accessory endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Temperature measurement, centidegrees Celsius
    TemperatureSensor,
    /// Relative humidity measurement, centi-percent
    HumiditySensor,
}

fn centi(value: f64) -> f64 {
    (value * 100.0).round()
}

/// Centidegrees for an endpoint limit, saturating at the `i16` range.
fn centidegrees(celsius: f64) -> i16 {
    let scaled = centi(celsius) as i64;
    i16::try_from(scaled).unwrap_or_else(|_| {
        warn!("[Bridge] {}°C is outside the endpoint range, saturating", celsius);
        if scaled < 0 { i16::MIN } else { i16::MAX }
    })
}

/// Centi-percent for an endpoint limit, saturating at the `u16` range.
fn centipercent(percent: f64) -> u16 {
    let scaled = centi(percent) as i64;
    u16::try_from(scaled).unwrap_or_else(|_| {
        warn!("[Bridge] {}% is outside the endpoint range, saturating", percent);
        if scaled < 0 { 0 } else { u16::MAX }
    })
}

/// Temperature endpoint that can be updated from the dispatch loop and read
/// from any thread.
pub struct TemperatureEndpoint {
    /// Temperature in centidegrees Celsius (°C * 100)
    value: AtomicI16,
    /// Version counter for change detection
    version: AtomicU32,
    min_value: i16,
    max_value: i16,
    notifier: RwLock<Option<ChangeNotifier>>,
}

impl TemperatureEndpoint {
    pub fn new(initial_celsius: f64, bounds: Bounds) -> Self {
        Self {
            value: AtomicI16::new(centi(initial_celsius) as i16),
            version: AtomicU32::new(0),
            min_value: centidegrees(bounds.min),
            max_value: centidegrees(bounds.max),
            notifier: RwLock::new(None),
        }
    }

    pub fn get_celsius(&self) -> f64 {
        self.value.load(Ordering::SeqCst) as f64 / 100.0
    }

    pub fn get_centidegrees(&self) -> i16 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn min_centidegrees(&self) -> i16 {
        self.min_value
    }

    pub fn max_centidegrees(&self) -> i16 {
        self.max_value
    }

    /// Set the temperature. Increments the version and notifies only when the
    /// stored value changes.
    pub fn set_celsius(&self, celsius: f64) {
        let centidegrees = (centi(celsius) as i16).clamp(self.min_value, self.max_value);
        let old = self.value.swap(centidegrees, Ordering::SeqCst);
        if old != centidegrees {
            self.version.fetch_add(1, Ordering::SeqCst);
            if let Some(notifier) = self.notifier.read().as_ref() {
                notifier.notify();
            }
        }
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn set_notifier(&self, notifier: ChangeNotifier) {
        *self.notifier.write() = Some(notifier);
    }
}

/// Humidity endpoint, see [`TemperatureEndpoint`].
pub struct HumidityEndpoint {
    /// Humidity in centi-percent (% * 100)
    value: AtomicU16,
    version: AtomicU32,
    min_value: u16,
    max_value: u16,
    notifier: RwLock<Option<ChangeNotifier>>,
}

impl HumidityEndpoint {
    pub fn new(initial_percent: f64, bounds: Bounds) -> Self {
        Self {
            value: AtomicU16::new(centi(initial_percent) as u16),
            version: AtomicU32::new(0),
            min_value: centipercent(bounds.min),
            max_value: centipercent(bounds.max),
            notifier: RwLock::new(None),
        }
    }

    pub fn get_percent(&self) -> f64 {
        self.value.load(Ordering::SeqCst) as f64 / 100.0
    }

    pub fn get_centipercent(&self) -> u16 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn min_centipercent(&self) -> u16 {
        self.min_value
    }

    pub fn max_centipercent(&self) -> u16 {
        self.max_value
    }

    pub fn set_percent(&self, percent: f64) {
        let centipercent = (centi(percent) as u16).clamp(self.min_value, self.max_value);
        let old = self.value.swap(centipercent, Ordering::SeqCst);
        if old != centipercent {
            self.version.fetch_add(1, Ordering::SeqCst);
            if let Some(notifier) = self.notifier.read().as_ref() {
                notifier.notify();
            }
        }
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn set_notifier(&self, notifier: ChangeNotifier) {
        *self.notifier.write() = Some(notifier);
    }
}

/// One bridged accessory per discovered sensor.
pub struct Accessory {
    /// Bridge endpoint of the accessory (1-based, in key order)
    pub endpoint_id: u16,
    pub key: SensorKey,
    pub info: SensorInfo,
    pub temperature: Arc<TemperatureEndpoint>,
    pub humidity: Option<Arc<HumidityEndpoint>>,
}

impl Accessory {
    fn from_state(endpoint_id: u16, state: &SensorState, signal: &Arc<ChangeSignal>) -> Self {
        let temperature = Arc::new(TemperatureEndpoint::new(
            state.temperature_celsius(),
            state.temperature().bounds(),
        ));
        temperature.set_notifier(ChangeNotifier::new(signal.clone(), endpoint_id));

        let humidity = state.humidity_measurement().map(|m| {
            let endpoint = Arc::new(HumidityEndpoint::new(m.value(), m.bounds()));
            endpoint.set_notifier(ChangeNotifier::new(signal.clone(), endpoint_id));
            endpoint
        });

        Self {
            endpoint_id,
            key: state.key().clone(),
            info: state.info().clone(),
            temperature,
            humidity,
        }
    }

    /// Endpoint kinds exposed by this accessory.
    pub fn endpoint_kinds(&self) -> Vec<EndpointKind> {
        let mut kinds = vec![EndpointKind::TemperatureSensor];
        if self.humidity.is_some() {
            kinds.push(EndpointKind::HumiditySensor);
        }
        kinds
    }
}

/// Sink that keeps bridged accessories in sync with the registry.
pub struct AccessoryBridge {
    accessories: Vec<Accessory>,
    index: HashMap<SensorKey, usize>,
    changed: Arc<ChangeSignal>,
}

impl AccessoryBridge {
    /// Lay out one accessory per registry entry, in key order.
    ///
    /// Endpoint ids are `u16`; entries past the last id are not bridged.
    pub fn from_registry(registry: &Registry) -> Self {
        let changed = Arc::new(ChangeSignal::new());
        if registry.len() > usize::from(u16::MAX) {
            warn!(
                "[Bridge] {} sensors discovered, only the first {} are bridged",
                registry.len(),
                u16::MAX
            );
        }
        let accessories: Vec<Accessory> = registry
            .iter()
            .zip(1..=u16::MAX)
            .map(|(state, endpoint_id)| Accessory::from_state(endpoint_id, state, &changed))
            .collect();
        let index = accessories
            .iter()
            .enumerate()
            .map(|(i, accessory)| (accessory.key.clone(), i))
            .collect();

        let bridge = Self {
            accessories,
            index,
            changed,
        };
        if let Some(primary) = bridge.primary() {
            info!("[Bridge] Primary {}", primary.info.serial_number);
        }
        for secondary in bridge.secondaries() {
            info!("[Bridge] Secondary {}", secondary.info.serial_number);
        }
        bridge
    }

    pub fn accessories(&self) -> &[Accessory] {
        &self.accessories
    }

    pub fn get(&self, key: &SensorKey) -> Option<&Accessory> {
        self.index.get(key).map(|&i| &self.accessories[i])
    }

    pub fn primary(&self) -> Option<&Accessory> {
        self.accessories.first()
    }

    pub fn secondaries(&self) -> &[Accessory] {
        self.accessories.get(1..).unwrap_or_default()
    }

    /// Signal raised whenever any endpoint value changes.
    pub fn change_signal(&self) -> Arc<ChangeSignal> {
        self.changed.clone()
    }
}

#[async_trait]
impl StateSink for AccessoryBridge {
    fn name(&self) -> &str {
        "Bridge"
    }

    async fn on_update(
        &mut self,
        state: &SensorState,
        _reading: &Reading,
    ) -> Result<(), SinkError> {
        let accessory = self
            .get(state.key())
            .ok_or_else(|| SinkError::Publish(format!("no accessory for {}", state.key())))?;

        accessory.temperature.set_celsius(state.temperature_celsius());
        if let (Some(endpoint), Some(h)) = (&accessory.humidity, state.humidity()) {
            endpoint.set_percent(h);
        }
        debug!(
            "[Bridge] Endpoint {} now {:.1}°C",
            accessory.endpoint_id,
            accessory.temperature.get_celsius()
        );
        Ok(())
    }
}
