//! MQTT republishing of sensor updates.
//!
//! [`MqttClient`] owns the rumqttc event loop and tracks whether the broker
//! connection is up. [`MqttPublisher`] is the sink half: it publishes one JSON
//! message per update to `{prefix}/{key}`.

use super::{SinkError, StateSink};
use crate::config::MqttConfig;
use crate::reading::Reading;
use crate::sensor::SensorState;
use async_trait::async_trait;
use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Delay between reconnect attempts of the event loop.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// MQTT client with connection tracking.
pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
    connected: watch::Sender<bool>,
}

impl MqttClient {
    /// Create a new MQTT client from configuration.
    pub fn new(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);
        let (connected, _) = watch::channel(false);

        Self {
            client,
            event_loop,
            connected,
        }
    }

    /// Get a clone of the async client for publishing from other tasks.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Receiver that reflects the broker connection state.
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Build a sink that publishes through this client.
    pub fn publisher(&self, config: &MqttConfig) -> MqttPublisher {
        MqttPublisher {
            client: self.client(),
            connected: self.connection(),
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
            retain: config.retain,
            reconnect_timeout: Duration::from_secs(config.reconnect_timeout_secs),
        }
    }

    /// Spawn the event loop.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drive the connection until the task is aborted.
    ///
    /// rumqttc reconnects on the next poll after an error; this loop only
    /// paces those attempts and records the connection state.
    pub async fn run(mut self) {
        info!("[MQTT] Starting event loop");

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("[MQTT] Connected to broker");
                    self.connected.send_replace(true);
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    info!("[MQTT] Broker closed the connection");
                    self.connected.send_replace(false);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[MQTT] Connection error: {:?}", e);
                    self.connected.send_replace(false);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

/// Message body published for each update.
#[derive(Debug, Serialize)]
struct SensorUpdate<'a> {
    key: &'a str,
    name: &'a str,
    serial_number: &'a str,
    model: &'a str,
    temperature_c: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    humidity: Option<f64>,
    battery: &'a str,
    time: &'a str,
}

impl<'a> SensorUpdate<'a> {
    fn new(state: &'a SensorState, reading: &'a Reading) -> Self {
        let info = state.info();
        Self {
            key: state.key().as_str(),
            name: &info.name,
            serial_number: &info.serial_number,
            model: &info.model,
            temperature_c: state.temperature_celsius(),
            humidity: state.humidity(),
            battery: reading.battery_state(),
            time: reading.timestamp(),
        }
    }
}

/// Sink that republishes updates to an MQTT broker.
pub struct MqttPublisher {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    topic_prefix: String,
    retain: bool,
    reconnect_timeout: Duration,
}

impl MqttPublisher {
    /// Topic for a given state.
    pub fn topic_for(&self, state: &SensorState) -> String {
        format!("{}/{}", self.topic_prefix, state.key())
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

#[async_trait]
impl StateSink for MqttPublisher {
    fn name(&self) -> &str {
        "MQTT"
    }

    async fn on_update(&mut self, state: &SensorState, reading: &Reading) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }

        let topic = self.topic_for(state);
        let payload = serde_json::to_string(&SensorUpdate::new(state, reading))?;
        debug!("[MQTT] Publishing to {}: {}", topic, payload);
        self.client
            .publish(topic, QoS::AtMostOnce, self.retain, payload.into_bytes())
            .await
            .map_err(|e| SinkError::Publish(e.to_string()))
    }

    /// Wait for the event loop to re-establish the connection.
    async fn reconnect(&mut self) -> Result<(), SinkError> {
        let connected = self.connected.wait_for(|up| *up);
        match tokio::time::timeout(self.reconnect_timeout, connected).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SinkError::Publish("MQTT event loop stopped".to_string())),
            Err(_) => Err(SinkError::NotConnected),
        }
    }
}
