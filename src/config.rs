use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// How long the binary waits for `device` to announce itself.
    pub timeout_secs: u64,
    pub device: Option<String>,
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Environment lookup, injectable so tests never touch the process env.
trait Source {
    fn get(&self, key: &str) -> Option<String>;
}

struct ProcessEnv;

impl Source for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

fn env_required(src: &impl Source, key: &'static str) -> Result<String, ConfigError> {
    src.get(key).ok_or(ConfigError::Missing(key))
}

fn env_optional(src: &impl Source, key: &str) -> Option<String> {
    src.get(key).filter(|v| !v.is_empty())
}

fn env_or_default<T: FromStr>(
    src: &impl Source,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match src.get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&ProcessEnv)
    }

    fn load(src: &impl Source) -> Result<Self, ConfigError> {
        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required(src, "MQTT_BROKER_HOST")?,
                broker_port: env_or_default(src, "MQTT_BROKER_PORT", 1883)?,
                username: env_optional(src, "MQTT_USERNAME"),
                password: env_optional(src, "MQTT_PASSWORD"),
                client_id: env_optional(src, "MQTT_CLIENT_ID")
                    .unwrap_or_else(|| "pglab-mqtt".to_string()),
                keep_alive_secs: env_or_default(src, "MQTT_KEEP_ALIVE_SECS", 30)?,
            },
            discovery: DiscoveryConfig {
                timeout_secs: env_or_default(src, "PGLAB_DISCOVERY_TIMEOUT_SECS", 2)?,
                device: env_optional(src, "PGLAB_DEVICE"),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_host.trim().is_empty() {
            return Err(ConfigError::Empty("MQTT_BROKER_HOST"));
        }
        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::Zero("MQTT_KEEP_ALIVE_SECS"));
        }
        if self.discovery.timeout_secs == 0 {
            return Err(ConfigError::Zero("PGLAB_DISCOVERY_TIMEOUT_SECS"));
        }
        Ok(())
    }
}
