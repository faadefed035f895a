//! Configuration System
//!
//! Handles loading client configuration from TOML files and environment
//! variables. Every service of a device (time index, blob stores, broker) is
//! reached on the same host; each section only carries what differs.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::index::InfluxConfig;
use crate::store::{ReductConfig, S3Config};
use crate::transport::{MqttLinkConfig, TransportConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub time_index: TimeIndexConfig,

    #[serde(default)]
    pub blob_store: BlobStoreConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Shared secret of every service on the device
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_user")]
    pub org: String,

    /// Use HTTPS for the HTTP services
    #[serde(default)]
    pub secure: bool,

    /// Worker threads of the client's I/O runtime
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_user() -> String {
    "panda".to_string()
}

fn default_io_threads() -> usize {
    2
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            password: String::new(),
            user: default_user(),
            org: default_user(),
            secure: false,
            io_threads: default_io_threads(),
        }
    }
}

/// InfluxDB time index settings
#[derive(Debug, Clone, Deserialize)]
pub struct TimeIndexConfig {
    #[serde(default = "default_influx_port")]
    pub port: u16,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_influx_port() -> u16 {
    8086
}

fn default_bucket() -> String {
    "data".to_string()
}

fn default_request_timeout() -> u64 {
    30_000
}

impl Default for TimeIndexConfig {
    fn default() -> Self {
        Self {
            port: default_influx_port(),
            bucket: default_bucket(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

/// Blob store candidates and selection
#[derive(Debug, Clone, Deserialize)]
pub struct BlobStoreConfig {
    #[serde(default = "default_reduct_port")]
    pub reduct_port: u16,

    #[serde(default = "default_minio_port")]
    pub minio_port: u16,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// How long each candidate gets to answer its liveness probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Default lifetime of a walk's query session
    #[serde(default = "default_query_ttl")]
    pub query_ttl_secs: u64,
}

fn default_reduct_port() -> u16 {
    8383
}

fn default_minio_port() -> u16 {
    9000
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_probe_timeout() -> u64 {
    5_000
}

fn default_query_ttl() -> u64 {
    60
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            reduct_port: default_reduct_port(),
            minio_port: default_minio_port(),
            bucket: default_bucket(),
            region: default_region(),
            probe_timeout_ms: default_probe_timeout(),
            request_timeout_ms: default_request_timeout(),
            query_ttl_secs: default_query_ttl(),
        }
    }
}

/// Broker settings
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Generated per client when unset
    pub client_id: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_reconnect_min")]
    pub reconnect_min_delay_ms: u64,

    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_delay_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_reconnect_min() -> u64 {
    1_000
}

fn default_reconnect_max() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            port: default_mqtt_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            reconnect_min_delay_ms: default_reconnect_min(),
            reconnect_max_delay_ms: default_reconnect_max(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Defaults for a device at `host`
    pub fn new(host: impl Into<String>, password: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.connection.host = host.into();
        config.connection.password = password.into();
        config
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("drift").join("client.toml")),
            Some(PathBuf::from("./drift.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply `DRIFT_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("DRIFT_HOST") {
            self.connection.host = host;
        }
        if let Some(password) = var("DRIFT_PASSWORD") {
            self.connection.password = password;
        }
        if let Some(user) = var("DRIFT_USER") {
            self.connection.user = user;
        }
        if let Some(org) = var("DRIFT_ORG") {
            self.connection.org = org;
        }
        if let Some(secure) = var("DRIFT_SECURE").and_then(|v| v.parse().ok()) {
            self.connection.secure = secure;
        }

        // Ports
        if let Some(port) = var("DRIFT_INFLUX_PORT").and_then(|v| v.parse().ok()) {
            self.time_index.port = port;
        }
        if let Some(port) = var("DRIFT_REDUCT_PORT").and_then(|v| v.parse().ok()) {
            self.blob_store.reduct_port = port;
        }
        if let Some(port) = var("DRIFT_MINIO_PORT").and_then(|v| v.parse().ok()) {
            self.blob_store.minio_port = port;
        }
        if let Some(port) = var("DRIFT_MQTT_PORT").and_then(|v| v.parse().ok()) {
            self.mqtt.port = port;
        }

        // Logging overrides
        if let Some(level) = var("DRIFT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("DRIFT_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject configurations no device would accept
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::Invalid("connection.host is empty".to_string()));
        }
        if self.connection.password.is_empty() {
            return Err(ConfigError::Invalid(
                "connection.password is required (or set DRIFT_PASSWORD)".to_string(),
            ));
        }
        if self.mqtt.reconnect_min_delay_ms > self.mqtt.reconnect_max_delay_ms {
            return Err(ConfigError::Invalid(
                "mqtt.reconnect_min_delay_ms exceeds reconnect_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    fn http_url(&self, port: u16) -> String {
        let scheme = if self.connection.secure { "https" } else { "http" };
        format!("{scheme}://{}:{port}", self.connection.host)
    }

    pub fn influx_config(&self) -> InfluxConfig {
        InfluxConfig {
            url: self.http_url(self.time_index.port),
            org: self.connection.org.clone(),
            token: self.connection.password.clone(),
            bucket: self.time_index.bucket.clone(),
            request_timeout_ms: self.time_index.request_timeout_ms,
        }
    }

    pub fn reduct_config(&self) -> ReductConfig {
        ReductConfig {
            url: self.http_url(self.blob_store.reduct_port),
            token: self.connection.password.clone(),
            bucket: self.blob_store.bucket.clone(),
            request_timeout_ms: self.blob_store.request_timeout_ms,
        }
    }

    pub fn s3_config(&self) -> S3Config {
        S3Config {
            endpoint: self.http_url(self.blob_store.minio_port),
            access_key: self.connection.user.clone(),
            secret_key: self.connection.password.clone(),
            bucket: self.blob_store.bucket.clone(),
            region: self.blob_store.region.clone(),
            request_timeout_ms: self.blob_store.request_timeout_ms,
        }
    }

    pub fn mqtt_link_config(&self) -> MqttLinkConfig {
        let defaults = MqttLinkConfig::default();
        MqttLinkConfig {
            uri: format!("mqtt://{}:{}", self.connection.host, self.mqtt.port),
            client_id: self.mqtt.client_id.clone().unwrap_or(defaults.client_id),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            request_capacity: defaults.request_capacity,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            reconnect_min_delay: Duration::from_millis(self.mqtt.reconnect_min_delay_ms),
            reconnect_max_delay: Duration::from_millis(self.mqtt.reconnect_max_delay_ms),
            connect_timeout: Duration::from_millis(self.mqtt.connect_timeout_ms),
            ..TransportConfig::default()
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.blob_store.probe_timeout_ms)
    }

    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.blob_store.query_ttl_secs)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Drift Client Configuration
#
# Environment variables override these settings:
# - DRIFT_HOST, DRIFT_PASSWORD, DRIFT_USER, DRIFT_ORG, DRIFT_SECURE
# - DRIFT_INFLUX_PORT, DRIFT_REDUCT_PORT, DRIFT_MINIO_PORT, DRIFT_MQTT_PORT
# - DRIFT_LOG_LEVEL, DRIFT_LOG_FORMAT

[connection]
# Hostname or IP of the device
host = "localhost"

# Password shared by every service of the device
password = ""

user = "panda"
org = "panda"

# Use HTTPS for InfluxDB, ReductStore and MinIO
secure = false

[time_index]
port = 8086
bucket = "data"
request_timeout_ms = 30000

[blob_store]
# Candidates in priority order: ReductStore, then MinIO
reduct_port = 8383
minio_port = 9000
bucket = "data"
region = "us-east-1"
probe_timeout_ms = 5000
request_timeout_ms = 30000

# Lifetime of a walk's query session (seconds)
query_ttl_secs = 60

[mqtt]
port = 1883
# client_id = "drift_client_custom"
keep_alive_secs = 60

# Reconnect backoff doubles from min to max
reconnect_min_delay_ms = 1000
reconnect_max_delay_ms = 30000
connect_timeout_ms = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
