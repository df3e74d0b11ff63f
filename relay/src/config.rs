//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `relay.toml`.
//!     loads configuration from file or falls back to defaults, then applies
//!     environment overrides (STORE_URL, MQTT_HOST, MQTT_PORT, PORT).
//!
//! structure:
//!     - ServerConfig: where the http/ws listener binds.
//!     - StoreConfig: which reading store backs the relay.
//!     - MqttConfig: broker, topic and qos of the sensor subscription.
//!     - ApiConfig: bounds of the rest endpoints.
//!     - PushConfig: seed size and channel depth of the push channel.
//!     - DashboardConfig: buffer, gap and loading knobs of the dashboard core.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    /// file the config came from, none when running on defaults
    #[serde(skip)]
    pub source: Option<PathBuf>,
    #[serde(skip)]
    pub load_errors: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: "0.0.0.0".to_string(), port: 3000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// "memory" or a sqlite url such as "sqlite://telemetry.db"
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { url: "sqlite://telemetry.db".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub topic: String,
    /// 0, 1 or 2
    pub qos: u8,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_seconds: u64,
    pub reconnect_delay_ms: u64,
}

impl MqttConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 1883,
            topic: "sensores/suelo".to_string(),
            qos: 0,
            client_id: format!("soil-relay-{}", std::process::id()),
            username: None,
            password: None,
            keep_alive_seconds: 30,
            reconnect_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    /// size of /api/data/latest
    pub latest_count: usize,
    /// upper bound of /api/data/all
    pub all_limit: usize,
    /// upper bound of the `limit` parameter of /api/data/chunk
    pub max_chunk: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { latest_count: 10, all_limit: 5000, max_chunk: 1000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PushConfig {
    /// readings sent as `historico` when a viewer connects
    pub seed_count: usize,
    pub channel_capacity: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { seed_count: 50, channel_capacity: 256 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub static_dir: PathBuf,
    pub cors: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { static_dir: PathBuf::from("public"), cors: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_readings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_readings: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    /// relay base url used by the dashboard binary
    pub relay_url: String,
    pub max_points: usize,
    pub gap_ms: i64,
    pub block_ms: i64,
    pub block_yield_ms: u64,
    pub initial_days: i64,
    /// live mode shows only the newest n points, 0 shows the whole buffer
    pub trailing_points: usize,
    pub freshness_timeout_ms: i64,
    pub request_timeout_ms: u64,
    /// range windows kept by the client cache
    pub range_cache_windows: usize,
    pub zoom_debounce_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:3000".to_string(),
            max_points: 2000,
            gap_ms: 24 * 60 * 60 * 1000,
            block_ms: 3 * 24 * 60 * 60 * 1000,
            block_yield_ms: 10,
            initial_days: 7,
            trailing_points: 15,
            freshness_timeout_ms: 30_000,
            request_timeout_ms: 10_000,
            range_cache_windows: 512,
            zoom_debounce_ms: 40,
            reconnect_delay_ms: 2000,
        }
    }
}

impl RelayConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load with default fallback, then apply environment overrides.
    /// runs before logging is up, so problems are kept for `log_summary`
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("relay.toml"),
            PathBuf::from("..").join("config").join("relay.toml"),
        ];

        let mut load_errors = Vec::new();
        let mut config = None;
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(mut c) => {
                        c.source = Some(path.clone());
                        config = Some(c);
                        break;
                    }
                    Err(e) => load_errors.push(e.to_string()),
                }
            }
        }

        let mut config = config.unwrap_or_default();
        config.load_errors = load_errors;
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// env lookup is injected so tests do not touch the process environment
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("STORE_URL") {
            self.store.url = url;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|p| p.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    /// Print configuration summary
    pub fn log_summary(&self) {
        for e in &self.load_errors {
            tracing::warn!("[CONFIG] {}", e);
        }
        match &self.source {
            Some(path) => tracing::info!("[CONFIG] Loaded from {}", path.display()),
            None => tracing::warn!("[CONFIG] No config file found - using defaults"),
        }
        tracing::info!(
            bind = %format!("{}:{}", self.server.address, self.server.port),
            store = %self.store.url,
            mqtt = %format!("{}:{}/{}", self.mqtt.host, self.mqtt.port, self.mqtt.topic),
            mqtt_enabled = self.mqtt.enabled,
            log_level = %self.logging.level,
            "[CONFIG] relay configuration"
        );
    }
}
