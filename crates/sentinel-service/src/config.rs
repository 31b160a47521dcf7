//! Service configuration.
//!
//! One TOML file configures both roles of the `sentinel` binary. The edge
//! role reads `[edge]` and `[sync]`, the cloud role reads `[cloud]` and
//! `[thresholds]`. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! [edge]
//! buffer_path = "/var/lib/agro-sentinel/buffer.db"
//!
//! [sync]
//! endpoint = "http://cloud.example:8080"
//! interval_secs = 5
//! max_batch_size = 20
//!
//! [sync.probe]
//! kind = "tcp"
//! address = "8.8.8.8:53"
//!
//! [cloud]
//! bind = "0.0.0.0:8080"
//! reject_stale_updates = false
//!
//! [thresholds.humidity_rh]
//! min = 40.0
//! max = 80.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sentinel_core::{Backoff, GatewayOptions, SyncConfig, ThresholdConfig};

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Edge device settings.
    pub edge: EdgeConfig,
    /// Sync agent settings.
    pub sync: SyncSettings,
    /// Ingestion service settings.
    pub cloud: CloudConfig,
    /// Alert thresholds by metric name.
    pub thresholds: ThresholdConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self.to_toml()?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use sentinel_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.edge.validate());
        errors.extend(self.sync.validate());
        errors.extend(self.cloud.validate());
        errors.extend(validate_thresholds(&self.thresholds));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Edge device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Path of the durable buffer database.
    pub buffer_path: PathBuf,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            buffer_path: sentinel_store::default_buffer_path(),
        }
    }
}

impl EdgeConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.buffer_path.as_os_str().is_empty() {
            errors.push(ValidationError::new("edge.buffer_path", "buffer path cannot be empty"));
        }
        errors
    }
}

/// How the sync agent decides it is online.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeConfig {
    /// `GET` a URL; any HTTP response counts as online. Defaults to the
    /// ingestion service's health endpoint.
    Http {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Open a TCP connection to `address`.
    Tcp { address: String },
    /// Assume the link is always up and let publish failures do the talking.
    Always,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig::Http { url: None }
    }
}

/// Sync agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Base URL of the ingestion service.
    pub endpoint: String,
    /// Seconds between ticks.
    pub interval_secs: u64,
    /// Maximum records attempted per tick.
    pub max_batch_size: usize,
    /// Upper bound for one publish, in seconds.
    pub publish_timeout_secs: u64,
    /// Topic attached to every publish.
    pub topic: String,
    /// Connectivity check.
    pub probe: ProbeConfig,
    /// Timeout for the connectivity check, in seconds.
    pub probe_timeout_secs: u64,
    /// First backoff delay after a failed tick, in seconds.
    pub backoff_initial_secs: u64,
    /// Backoff cap, in seconds.
    pub backoff_max_secs: u64,
    /// Backoff growth per consecutive failure.
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to backoff delays.
    pub backoff_jitter: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            interval_secs: 5,
            max_batch_size: 20,
            publish_timeout_secs: 10,
            topic: sentinel_core::sync::DEFAULT_TOPIC.to_string(),
            probe: ProbeConfig::default(),
            probe_timeout_secs: 3,
            backoff_initial_secs: 5,
            backoff_max_secs: 300,
            backoff_multiplier: 2.0,
            backoff_jitter: true,
        }
    }
}

impl SyncSettings {
    /// Minimum allowed tick interval in seconds.
    pub const MIN_INTERVAL: u64 = 1;
    /// Maximum allowed tick interval in seconds (1 hour).
    pub const MAX_INTERVAL: u64 = 3600;
    /// Maximum records per tick.
    pub const MAX_BATCH: usize = 1000;

    /// Settings for the core sync agent.
    pub fn agent_config(&self) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_batch_size: self.max_batch_size,
            publish_timeout: Duration::from_secs(self.publish_timeout_secs),
            topic: self.topic.clone(),
            backoff: Backoff {
                initial_delay: Duration::from_secs(self.backoff_initial_secs),
                max_delay: Duration::from_secs(self.backoff_max_secs),
                multiplier: self.backoff_multiplier,
                jitter: self.backoff_jitter,
            },
        }
    }

    /// URL used by the HTTP probe.
    pub fn probe_url(&self) -> Option<String> {
        match &self.probe {
            ProbeConfig::Http { url: Some(url) } => Some(url.clone()),
            ProbeConfig::Http { url: None } => Some(format!(
                "{}/api/health",
                self.endpoint.trim_end_matches('/')
            )),
            _ => None,
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !is_http_url(&self.endpoint) {
            errors.push(ValidationError::new(
                "sync.endpoint",
                format!(
                    "invalid endpoint '{}': expected an http:// or https:// URL",
                    self.endpoint
                ),
            ));
        }

        if self.interval_secs < Self::MIN_INTERVAL {
            errors.push(ValidationError::new(
                "sync.interval_secs",
                format!(
                    "interval {} is too short (minimum {} second)",
                    self.interval_secs,
                    Self::MIN_INTERVAL
                ),
            ));
        } else if self.interval_secs > Self::MAX_INTERVAL {
            errors.push(ValidationError::new(
                "sync.interval_secs",
                format!(
                    "interval {} is too long (maximum {} seconds / 1 hour)",
                    self.interval_secs,
                    Self::MAX_INTERVAL
                ),
            ));
        }

        if self.max_batch_size == 0 || self.max_batch_size > Self::MAX_BATCH {
            errors.push(ValidationError::new(
                "sync.max_batch_size",
                format!("batch size must be between 1 and {}", Self::MAX_BATCH),
            ));
        }

        if self.publish_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "sync.publish_timeout_secs",
                "publish timeout must be at least 1 second",
            ));
        }

        if self.topic.trim().is_empty() {
            errors.push(ValidationError::new("sync.topic", "topic cannot be empty"));
        }

        match &self.probe {
            ProbeConfig::Http { url: Some(url) } if !is_http_url(url) => {
                errors.push(ValidationError::new(
                    "sync.probe.url",
                    format!("invalid probe URL '{}'", url),
                ));
            }
            ProbeConfig::Tcp { address } if !is_host_port(address) => {
                errors.push(ValidationError::new(
                    "sync.probe.address",
                    format!("invalid probe address '{}': expected 'host:port'", address),
                ));
            }
            _ => {}
        }

        if self.probe_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "sync.probe_timeout_secs",
                "probe timeout must be at least 1 second",
            ));
        }

        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            errors.push(ValidationError::new(
                "sync.backoff_multiplier",
                "backoff multiplier must be a number >= 1.0",
            ));
        }

        if self.backoff_max_secs < self.backoff_initial_secs {
            errors.push(ValidationError::new(
                "sync.backoff_max_secs",
                "backoff cap cannot be smaller than the initial delay",
            ));
        }

        errors
    }
}

/// Ingestion service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// State and history database path.
    pub database_path: PathBuf,
    /// Skip state updates from readings older than the stored state.
    pub reject_stale_updates: bool,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            database_path: sentinel_store::default_db_path(),
            reject_stale_updates: false,
        }
    }
}

impl CloudConfig {
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            reject_stale_updates: self.reject_stale_updates,
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new("cloud.bind", "bind address cannot be empty"));
        } else {
            match self.bind.rsplit_once(':') {
                None => errors.push(ValidationError::new(
                    "cloud.bind",
                    format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                )),
                Some((_, port)) => match port.parse::<u16>() {
                    Ok(0) => errors.push(ValidationError::new("cloud.bind", "port cannot be 0")),
                    Err(_) => errors.push(ValidationError::new(
                        "cloud.bind",
                        format!("invalid port '{}': must be a number 1-65535", port),
                    )),
                    Ok(_) => {}
                },
            }
        }

        if self.database_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "cloud.database_path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

fn validate_thresholds(thresholds: &ThresholdConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (metric, bound) in thresholds.iter() {
        let field = format!("thresholds.{}", metric);
        if bound.min.is_some_and(|v| !v.is_finite()) || bound.max.is_some_and(|v| !v.is_finite()) {
            errors.push(ValidationError::new(&field, "limits must be finite numbers"));
        }
        if let (Some(min), Some(max)) = (bound.min, bound.max)
            && min > max
        {
            errors.push(ValidationError::new(
                &field,
                format!("min ({}) is greater than max ({})", min, max),
            ));
        }
    }
    errors
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    rest.is_some_and(|host| !host.is_empty())
}

fn is_host_port(address: &str) -> bool {
    address
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p > 0))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `cloud.bind` or `thresholds.vpd_kpa`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agro-sentinel")
        .join("sentinel.toml")
}
