//! rtl433 bridge library.
//!
//! Discovers wireless thermo-hygrometers from a stream of rtl_433 JSON
//! records, then keeps their state current and republishes every update to
//! a bridged accessory model and, optionally, an MQTT broker.
//!
//! The pipeline runs in two phases over one reading channel:
//! [`discovery::discover`] builds a frozen [`registry::Registry`] within a
//! fixed window, then [`dispatch::Dispatcher`] routes every later reading to
//! its registered sensor for the rest of the process.

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod reading;
pub mod registry;
pub mod sensor;
pub mod sink;
pub mod source;
