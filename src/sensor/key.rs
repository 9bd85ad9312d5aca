//! Stable sensor identities derived from readings.

use crate::reading::Reading;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// Which identity fields of a reading make up a [`SensorKey`].
///
/// `Channel` is only safe when every transmitter in range uses a distinct
/// channel switch setting. Two sensors on the same channel collapse into one
/// key and overwrite each other's state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum KeyGranularity {
    /// `"{device}-{channel}"`. The device id changes when batteries are swapped.
    #[default]
    DeviceChannel,
    /// `"{channel}"`.
    Channel,
}

impl KeyGranularity {
    /// Derive the key for a reading.
    pub fn key_for(self, reading: &Reading) -> SensorKey {
        match self {
            KeyGranularity::DeviceChannel => {
                SensorKey(format!("{}-{}", reading.device_id(), reading.channel()))
            }
            KeyGranularity::Channel => SensorKey(reading.channel().to_string()),
        }
    }
}

/// Identity of a physical sensor.
///
/// Ordering is lexicographic on the key string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorKey(String);

impl SensorKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
