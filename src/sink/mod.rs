//! Consumers of dispatched sensor updates.
//!
//! A [`StateSink`] is called once per successful dispatch with the updated
//! state and the reading that caused it. Sinks run inline on the dispatch
//! loop, so a slow sink slows dispatch rather than losing readings.

pub mod accessory;
pub mod mqtt;

pub use accessory::{
    Accessory, AccessoryBridge, ChangeNotifier, HumidityEndpoint, TemperatureEndpoint,
};
pub use mqtt::{MqttClient, MqttPublisher};

use crate::reading::Reading;
use crate::sensor::SensorState;
use async_trait::async_trait;
use log::{info, warn};
use thiserror::Error;

/// Errors reported by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink has lost its connection. The dispatcher reconnects once and retries.
    #[error("not connected")]
    NotConnected,

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("failed to encode update: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Receiver of per-sensor updates.
#[async_trait]
pub trait StateSink: Send {
    /// Name used in log messages.
    fn name(&self) -> &str;

    /// Called after `state` was updated from `reading`.
    async fn on_update(&mut self, state: &SensorState, reading: &Reading) -> Result<(), SinkError>;

    /// Try to restore a lost connection.
    async fn reconnect(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Deliver one update to `sink`, reconnecting once if it reports
/// [`SinkError::NotConnected`]. Failures are logged, never returned.
pub async fn deliver(sink: &mut dyn StateSink, state: &SensorState, reading: &Reading) -> bool {
    match sink.on_update(state, reading).await {
        Ok(()) => true,
        Err(SinkError::NotConnected) => {
            info!("[{}] Not connected, reconnecting", sink.name());
            if let Err(e) = sink.reconnect().await {
                warn!("[{}] Reconnect failed: {}", sink.name(), e);
                return false;
            }
            match sink.on_update(state, reading).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "[{}] Update for {} failed after reconnect: {}",
                        sink.name(),
                        state.key(),
                        e
                    );
                    false
                }
            }
        }
        Err(e) => {
            warn!("[{}] Update for {} failed: {}", sink.name(), state.key(), e);
            false
        }
    }
}

/// Fan-out over several sinks, called in the order they were added.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn StateSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl StateSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn StateSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver to every sink. Returns how many accepted the update.
    pub async fn deliver(&mut self, state: &SensorState, reading: &Reading) -> usize {
        let mut delivered = 0;
        for sink in &mut self.sinks {
            if deliver(sink.as_mut(), state, reading).await {
                delivered += 1;
            }
        }
        delivered
    }
}
