use crate::discovery::DiscoveryOptions;
use crate::sensor::{KeyGranularity, SensorProfile};
use crate::source::DEFAULT_MAX_CONSECUTIVE_ERRORS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Load environment variables from a .env file in the working directory.
/// Values may contain spaces without quotes; existing variables win.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

fn load_dotenv_from(env_path: &Path) {
    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        if std::env::var(key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(key, value) };
        }
    }
}

/// Split .env content into key/value pairs, skipping blanks and comments.
fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let mut value = value.trim();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            Some((key.trim(), value))
        })
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub input: InputConfig,
    pub discovery: DiscoveryConfig,
    pub sensor: SensorProfile,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Shell command whose stdout is read; stdin when unset
    pub command: Option<String>,
    pub channel_capacity: usize,
    pub max_consecutive_errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub window_secs: u64,
    pub granularity: KeyGranularity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub retain: bool,
    pub reconnect_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "rtl433-bridge".to_string(),
            username: None,
            password: None,
            topic_prefix: "rtl433".to_string(),
            retain: false,
            reconnect_timeout_secs: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: InputConfig {
                command: None,
                channel_capacity: 64,
                max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            },
            discovery: DiscoveryConfig {
                window_secs: 60,
                granularity: KeyGranularity::DeviceChannel,
            },
            sensor: SensorProfile::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(command) = std::env::var("INPUT_COMMAND")
            && !command.trim().is_empty()
        {
            config.input.command = Some(command);
        }
        if let Some(capacity) = env_parse("CHANNEL_CAPACITY") {
            config.input.channel_capacity = capacity;
        }
        if let Some(max) = env_parse("MAX_CONSECUTIVE_ERRORS") {
            config.input.max_consecutive_errors = max;
        }

        if let Some(secs) = env_parse("DISCOVERY_SECS") {
            config.discovery.window_secs = secs;
        }
        if let Some(granularity) = env_parse("KEY_GRANULARITY") {
            config.discovery.granularity = granularity;
        }

        if let Ok(name) = std::env::var("SENSOR_NAME") {
            config.sensor.name = name;
        }
        if let Ok(manufacturer) = std::env::var("SENSOR_MANUFACTURER") {
            config.sensor.manufacturer = manufacturer;
        }

        // MQTT configuration
        if let Some(enabled) = env_flag("MQTT_ENABLED") {
            config.mqtt.enabled = enabled;
        }
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
            config.mqtt.enabled = env_flag("MQTT_ENABLED").unwrap_or(true);
        }
        if let Some(port) = env_parse("MQTT_BROKER_PORT") {
            config.mqtt.broker_port = port;
        }
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Ok(prefix) = std::env::var("MQTT_TOPIC_PREFIX") {
            config.mqtt.topic_prefix = prefix;
        }
        if let Some(retain) = env_flag("MQTT_RETAIN") {
            config.mqtt.retain = retain;
        }
        if let Some(secs) = env_parse("MQTT_RECONNECT_TIMEOUT") {
            config.mqtt.reconnect_timeout_secs = secs;
        }

        config
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            window: Duration::from_secs(self.discovery.window_secs),
            granularity: self.discovery.granularity,
            profile: self.sensor.clone(),
        }
    }
}
