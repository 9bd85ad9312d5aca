//! Sensor identity and live state.
//!
//! A [`SensorKey`] names a physical transmitter; a [`SensorState`] holds its
//! descriptive info and the latest bounded measurements. Temperature-only and
//! thermo-hygrometer sensors share one state type and differ only in their
//! [`Capabilities`].

pub mod key;
pub mod state;

pub use key::{KeyGranularity, SensorKey};
pub use state::{Bounds, Capabilities, Measurement, SensorInfo, SensorProfile, SensorState};
