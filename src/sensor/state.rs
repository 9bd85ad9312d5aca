//! Live state for a registered sensor.

use super::key::SensorKey;
use crate::reading::Reading;
use serde::{Deserialize, Serialize};

/// Descriptive fields set once at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub name: String,
    pub serial_number: String,
    pub manufacturer: String,
    pub model: String,
}

/// Measurement kinds a sensor exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub temperature: bool,
    pub humidity: bool,
}

/// Allowed range and resolution of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Clamp into `[min, max]` and round to the nearest step.
    pub fn apply(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min, self.max);
        if self.step <= 0.0 {
            return clamped;
        }
        let per_unit = self.step.recip();
        ((clamped * per_unit).round() / per_unit).clamp(self.min, self.max)
    }
}

/// A bounded measurement value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    value: f64,
    bounds: Bounds,
}

impl Measurement {
    pub fn new(value: f64, bounds: Bounds) -> Self {
        Self {
            value: bounds.apply(value),
            bounds,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Store a new value and return what was actually kept.
    pub fn set(&mut self, value: f64) -> f64 {
        self.value = self.bounds.apply(value);
        self.value
    }
}

/// Name, manufacturer and bounds used to create [`SensorState`]s.
///
/// Bridged endpoints store centi-units, so temperature bounds beyond
/// ±327.67 °C and humidity bounds outside 0..655.35 % saturate there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    pub name: String,
    pub manufacturer: String,
    pub temperature: Bounds,
    pub humidity: Bounds,
}

impl Default for SensorProfile {
    fn default() -> Self {
        Self {
            name: "Temperature Sensor".to_string(),
            manufacturer: "Ambient Weather".to_string(),
            // Range of the bridged temperature endpoint
            temperature: Bounds::new(-40.0, 125.0, 0.1),
            humidity: Bounds::new(0.0, 100.0, 1.0),
        }
    }
}

/// Live state of one registered sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    key: SensorKey,
    info: SensorInfo,
    temperature: Measurement,
    humidity: Option<Measurement>,
}

impl SensorState {
    /// Synthesize state from the first reading seen for `key`.
    pub fn from_reading(key: SensorKey, reading: &Reading, profile: &SensorProfile) -> Self {
        let info = SensorInfo {
            name: profile.name.clone(),
            serial_number: format!("{}-{}", reading.device_id(), reading.channel()),
            manufacturer: profile.manufacturer.clone(),
            model: reading.model().to_string(),
        };
        Self {
            key,
            info,
            temperature: Measurement::new(reading.temperature_celsius(), profile.temperature),
            humidity: reading
                .humidity()
                .map(|h| Measurement::new(h, profile.humidity)),
        }
    }

    pub fn key(&self) -> &SensorKey {
        &self.key
    }

    pub fn info(&self) -> &SensorInfo {
        &self.info
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            temperature: true,
            humidity: self.humidity.is_some(),
        }
    }

    pub fn temperature_celsius(&self) -> f64 {
        self.temperature.value()
    }

    pub fn temperature(&self) -> &Measurement {
        &self.temperature
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity.as_ref().map(Measurement::value)
    }

    pub fn humidity_measurement(&self) -> Option<&Measurement> {
        self.humidity.as_ref()
    }

    /// Apply a reading's measurements.
    ///
    /// Humidity is only updated on sensors registered with humidity; readings
    /// without humidity leave the stored value untouched.
    pub fn apply(&mut self, reading: &Reading) {
        self.temperature.set(reading.temperature_celsius());
        if let (Some(measurement), Some(h)) = (self.humidity.as_mut(), reading.humidity()) {
            measurement.set(h);
        }
    }
}
