use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::buffer::OverflowPolicy;
use crate::types::{Accuracy, UNKNOWN_DEVICE_NAME};

/// Environment variable prefix, e.g. `LOCATION_SYNC_SAMPLE_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "LOCATION_SYNC";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// Storage key holding the device identity
    #[serde(default = "default_identity_key")]
    pub identity_key: String,

    /// Storage key holding the pending queue
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Seconds between scheduled samples (first sample runs at startup)
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    /// Upper bound on a single position request
    #[serde(default = "default_sample_timeout_secs")]
    pub sample_timeout_secs: u64,

    /// Upper bound on a single batch insert
    #[serde(default = "default_flush_timeout_secs")]
    pub flush_timeout_secs: u64,

    #[serde(default)]
    pub accuracy: Accuracy,

    /// Human-readable device name; `None` uses "Unknown Device"
    #[serde(default)]
    pub device_name: Option<String>,

    /// Maximum buffered records; `None` is unbounded
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// Consulted only when `queue_capacity` is set
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// HTTP sink settings, used by the `http` feature's `PostgrestSink`
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default = "default_remote_table")]
    pub table: String,
    pub api_key: String,
}

fn default_identity_key() -> String {
    "deviceId".to_string()
}

fn default_queue_key() -> String {
    "offlineLocations".to_string()
}

fn default_sample_interval_secs() -> u64 {
    3600
}

fn default_sample_timeout_secs() -> u64 {
    30
}

fn default_flush_timeout_secs() -> u64 {
    30
}

fn default_remote_table() -> String {
    "locations".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            identity_key: default_identity_key(),
            queue_key: default_queue_key(),
            sample_interval_secs: default_sample_interval_secs(),
            sample_timeout_secs: default_sample_timeout_secs(),
            flush_timeout_secs: default_flush_timeout_secs(),
            accuracy: Accuracy::default(),
            device_name: None,
            queue_capacity: None,
            overflow_policy: OverflowPolicy::default(),
            remote: None,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `LOCATION_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Self>()
            .and_then(Self::validated)
    }

    /// JSON file at `path`, overridden by `LOCATION_SYNC_*` environment
    /// variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Json))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Self>()
            .and_then(Self::validated)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<Self>(raw)
            .map_err(|e| ConfigError::Message(e.to_string()))
            .and_then(Self::validated)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval_secs == 0 {
            return Err(ConfigError::Message("sample_interval_secs must be positive".into()));
        }
        if self.sample_timeout_secs == 0 {
            return Err(ConfigError::Message("sample_timeout_secs must be positive".into()));
        }
        if self.flush_timeout_secs == 0 {
            return Err(ConfigError::Message("flush_timeout_secs must be positive".into()));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::Message("queue_capacity must be positive".into()));
        }
        if self.identity_key == self.queue_key {
            return Err(ConfigError::Message(
                "identity_key and queue_key must differ".into(),
            ));
        }
        Ok(())
    }

    fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_secs(self.sample_timeout_secs)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    /// Configured device name, or the "Unknown Device" sentinel.
    pub fn device_name(&self) -> &str {
        self.device_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}
