//! Parsed sensor observations.
//!
//! A [`Reading`] is one decoded line of `rtl_433 -F json` output. Readings are
//! validated when they are decoded and never change afterwards.

use chrono::NaiveDateTime;
use serde::Deserialize;
use thiserror::Error;

/// Timestamp layout used by rtl_433 for the `time` field.
const RTL433_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors raised while decoding a single input line.
#[derive(Debug, Error)]
pub enum ReadingError {
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record has no temperature field")]
    MissingTemperature,

    #[error("temperature is not a finite number: {0}")]
    NonFiniteTemperature(f64),

    #[error("humidity is not a finite number: {0}")]
    NonFiniteHumidity(f64),
}

/// Unit of [`Reading::temperature_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Fahrenheit,
    Celsius,
}

/// Wire shape of an rtl_433 record, before validation.
#[derive(Debug, Deserialize)]
struct RawReading {
    #[serde(default, alias = "id")]
    device: i64,
    #[serde(default)]
    channel: i64,
    #[serde(rename = "temperature_F", default)]
    temperature_f: Option<f64>,
    #[serde(rename = "temperature_C", default)]
    temperature_c: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    battery: String,
    #[serde(default)]
    time: String,
}

/// One sensor observation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawReading")]
pub struct Reading {
    device_id: i64,
    channel: i64,
    temperature_raw: f64,
    unit: TemperatureUnit,
    humidity: Option<f64>,
    model: String,
    battery_state: String,
    timestamp: String,
}

impl TryFrom<RawReading> for Reading {
    type Error = ReadingError;

    fn try_from(raw: RawReading) -> Result<Self, Self::Error> {
        let (temperature_raw, unit) = match (raw.temperature_f, raw.temperature_c) {
            (Some(f), _) => (f, TemperatureUnit::Fahrenheit),
            (None, Some(c)) => (c, TemperatureUnit::Celsius),
            (None, None) => return Err(ReadingError::MissingTemperature),
        };
        if !temperature_raw.is_finite() {
            return Err(ReadingError::NonFiniteTemperature(temperature_raw));
        }
        if let Some(h) = raw.humidity
            && !h.is_finite()
        {
            return Err(ReadingError::NonFiniteHumidity(h));
        }

        Ok(Self {
            device_id: raw.device,
            channel: raw.channel,
            temperature_raw,
            unit,
            humidity: raw.humidity,
            model: raw.model,
            battery_state: raw.battery,
            timestamp: raw.time,
        })
    }
}

impl Reading {
    /// Build a Fahrenheit reading directly, e.g. for tests and replays.
    pub fn fahrenheit(
        device_id: i64,
        channel: i64,
        temperature_f: f64,
        humidity: Option<f64>,
    ) -> Self {
        Self {
            device_id,
            channel,
            temperature_raw: temperature_f,
            unit: TemperatureUnit::Fahrenheit,
            humidity,
            model: String::new(),
            battery_state: String::new(),
            timestamp: String::new(),
        }
    }

    /// Attach the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Decode a single JSON line.
    pub fn from_json_line(line: &[u8]) -> Result<Self, ReadingError> {
        Ok(serde_json::from_slice(line)?)
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    pub fn channel(&self) -> i64 {
        self.channel
    }

    /// Temperature in the unit reported by the source.
    pub fn temperature_raw(&self) -> f64 {
        self.temperature_raw
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.unit
    }

    /// Temperature converted to degrees Celsius.
    pub fn temperature_celsius(&self) -> f64 {
        match self.unit {
            TemperatureUnit::Fahrenheit => fahrenheit_to_celsius(self.temperature_raw),
            TemperatureUnit::Celsius => self.temperature_raw,
        }
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn battery_state(&self) -> &str {
        &self.battery_state
    }

    /// Source-provided timestamp, passed through untouched.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Parse the source timestamp if it uses rtl_433's default layout.
    pub fn observed_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, RTL433_TIME_FORMAT).ok()
    }
}

/// Convert degrees Fahrenheit to degrees Celsius.
pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) / 1.8
}

#[cfg(test)]
mod tests {
    use super::*;

    const F007TH: &str = r#"{"time" : "2021-03-14 09:26:53", "model" : "Ambientweather-F007TH", "id" : 75, "channel" : 2, "battery_ok" : 1, "temperature_F" : 71.600, "humidity" : 38, "mic" : "CRC"}"#;

    #[test]
    fn test_decode_rtl433_line() {
        let reading = Reading::from_json_line(F007TH.as_bytes()).unwrap();
        assert_eq!(reading.device_id(), 75);
        assert_eq!(reading.channel(), 2);
        assert_eq!(reading.unit(), TemperatureUnit::Fahrenheit);
        assert_eq!(reading.humidity(), Some(38.0));
        assert_eq!(reading.model(), "Ambientweather-F007TH");
        assert!((reading.temperature_celsius() - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_device_field_and_battery() {
        let line = br#"{"device": 12, "channel": 1, "temperature_F": 50.0, "battery": "OK", "model": "F007TH"}"#;
        let reading = Reading::from_json_line(line).unwrap();
        assert_eq!(reading.device_id(), 12);
        assert_eq!(reading.battery_state(), "OK");
        assert_eq!(reading.humidity(), None);
        assert_eq!(reading.timestamp(), "");
    }

    #[test]
    fn test_decode_celsius_fallback() {
        let line = br#"{"id": 3, "channel": 1, "temperature_C": 21.5}"#;
        let reading = Reading::from_json_line(line).unwrap();
        assert_eq!(reading.unit(), TemperatureUnit::Celsius);
        assert_eq!(reading.temperature_celsius(), 21.5);
    }

    #[test]
    fn test_missing_temperature_is_rejected() {
        let line = br#"{"id": 3, "channel": 1, "humidity": 40}"#;
        let err = Reading::from_json_line(line).unwrap_err();
        assert!(err.to_string().contains("no temperature"));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(matches!(
            Reading::from_json_line(b"{\"id\": 3,"),
            Err(ReadingError::Json(_))
        ));
        assert!(Reading::from_json_line(br#"{"id": "x", "temperature_F": 1}"#).is_err());
    }

    #[test]
    fn test_fahrenheit_to_celsius() {
        assert_eq!(fahrenheit_to_celsius(32.0), 0.0);
        assert_eq!(fahrenheit_to_celsius(212.0), 100.0);
        assert!((fahrenheit_to_celsius(-40.0) + 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_observed_at() {
        let reading = Reading::from_json_line(F007TH.as_bytes()).unwrap();
        let at = reading.observed_at().unwrap();
        assert_eq!(at.to_string(), "2021-03-14 09:26:53");

        assert!(Reading::fahrenheit(1, 1, 60.0, None).observed_at().is_none());
    }
}
