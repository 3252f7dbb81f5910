//! Configuration management for the bridge.

use crate::{BrandConfig, ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional tuning file.
pub const TUNING_FILE_ENV: &str = "MOWER_BRIDGE_TUNING";

/// Username/password pair. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Address and login of the local broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBrokerConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub tls: bool,
}

impl LocalBrokerConfig {
    /// Build the local broker config. Credentials are only kept when both
    /// parts are present, non-empty and not the literal `null`.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        let usable = |value: &str| !value.is_empty() && value != "null";
        let credentials = match (username, password) {
            (Some(username), Some(password)) if usable(&username) && usable(&password) => {
                Some(Credentials::new(username, password))
            }
            _ => None,
        };

        Self {
            host: host.into(),
            port,
            credentials,
            tls: false,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }
}

/// Timings, limits and fixed topic names. Every field has a default, so a
/// tuning file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// MQTT quality of service used for subscriptions and publishes.
    pub qos: u8,
    pub cloud_port: u16,
    pub cloud_keep_alive_secs: u64,
    pub local_keep_alive_secs: u64,
    pub reconnect_min_delay_secs: u64,
    pub reconnect_max_delay_secs: u64,
    pub token_refresh_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub http_max_attempts: u32,
    pub http_backoff_factor_secs: u64,
    pub http_max_backoff_secs: u64,
    pub http_timeout_secs: u64,
    /// Consecutive CONNACK refusals tolerated before a session gives up.
    pub broker_connect_max_failures: u32,
    pub availability_topic: String,
    pub local_client_id: String,
    pub discovery_prefix: String,
    pub shutdown_grace_secs: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            qos: 1,
            cloud_port: 443,
            cloud_keep_alive_secs: 45,
            local_keep_alive_secs: 45,
            reconnect_min_delay_secs: 10,
            reconnect_max_delay_secs: 300,
            token_refresh_interval_secs: 10,
            monitor_interval_secs: 1,
            http_max_attempts: 5,
            http_backoff_factor_secs: 3,
            http_max_backoff_secs: 120,
            http_timeout_secs: 30,
            broker_connect_max_failures: 3,
            availability_topic: "mower_mqtt_bridge/status".to_string(),
            local_client_id: "mower_mqtt_bridge".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            shutdown_grace_secs: 5,
        }
    }
}

impl Tuning {
    /// Load tuning from a JSON file and validate it.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let tuning: Tuning = serde_json::from_str(&content)?;
        tuning.validate()?;
        Ok(tuning)
    }

    /// Load from `path`, else from the file named by [`TUNING_FILE_ENV`],
    /// else use defaults.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match std::env::var(TUNING_FILE_ENV) {
            Ok(env_path) if !env_path.trim().is_empty() => {
                Self::load_from_file(Path::new(env_path.trim()))
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "qos must be 0, 1 or 2, got {}",
                self.qos
            )));
        }
        if self.reconnect_min_delay_secs == 0
            || self.reconnect_min_delay_secs > self.reconnect_max_delay_secs
        {
            return Err(ConfigError::Invalid(format!(
                "reconnect delay range {}..{} is empty",
                self.reconnect_min_delay_secs, self.reconnect_max_delay_secs
            )));
        }
        let non_zero = [
            ("cloud_keep_alive_secs", self.cloud_keep_alive_secs),
            ("local_keep_alive_secs", self.local_keep_alive_secs),
            ("token_refresh_interval_secs", self.token_refresh_interval_secs),
            ("monitor_interval_secs", self.monitor_interval_secs),
            ("http_max_attempts", u64::from(self.http_max_attempts)),
            ("http_timeout_secs", self.http_timeout_secs),
            (
                "broker_connect_max_failures",
                u64::from(self.broker_connect_max_failures),
            ),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        let topics = [
            ("availability_topic", &self.availability_topic),
            ("local_client_id", &self.local_client_id),
            ("discovery_prefix", &self.discovery_prefix),
        ];
        if let Some((name, _)) = topics.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("{name} must not be empty")));
        }
        Ok(())
    }

    pub fn cloud_keep_alive(&self) -> Duration {
        Duration::from_secs(self.cloud_keep_alive_secs)
    }

    pub fn local_keep_alive(&self) -> Duration {
        Duration::from_secs(self.local_keep_alive_secs)
    }

    pub fn reconnect_min_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_min_delay_secs)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.token_refresh_interval_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Complete runtime configuration of one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Log level name as given on the command line.
    pub log_level: String,
    pub brand: &'static BrandConfig,
    /// Cloud account login.
    pub account: Credentials,
    pub local: LocalBrokerConfig,
    pub tuning: Tuning,
}
