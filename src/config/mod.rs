//! Application configuration.
//!
//! Aggregates bus, queue, retention and supervision settings into a single
//! Config struct that can be loaded from YAML files or environment variables.

mod endpoints;
mod queue;

pub use endpoints::{
    EndpointTable, ProcessEndpoints, ProcessId, TransportKind, IPC_BACK_URL, IPC_FRONT_URL,
    TCP_BACK_BIND_URL, TCP_BACK_DIAL_URL, TCP_FRONT_BIND_URL, TCP_FRONT_DIAL_URL,
};
pub use queue::{QueueConfig, DEFAULT_RING_SLOTS};

use std::path::PathBuf;

use serde::Deserialize;

use crate::transport::{BusUrl, UrlError};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "procbus.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PROCBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PROCBUS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PROCBUS_LOG";

/// Errors from loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error(transparent)]
    Url(#[from] UrlError),

    #[error("Unknown process id {0}")]
    UnknownProcess(u8),

    #[error("Endpoint table needs one entry per process, got {0}")]
    EndpointTable(usize),
}

/// Proxy address overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub front_url: Option<BusUrl>,
    pub back_url: Option<BusUrl>,
}

/// Bus settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub transport: TransportKind,
    pub proxy: ProxyConfig,
    /// Explicit per-process endpoints in process-id order.
    pub endpoints: Option<Vec<ProcessEndpoints>>,
}

/// Recording directory size limit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub directory: Option<PathBuf>,
    pub max_size_kb: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_size_kb: 512 * 1024,
        }
    }
}

/// Process supervision settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Directory holding `<name>.pid` lock files.
    pub lock_dir: PathBuf,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub queue: QueueConfig,
    pub retention: RetentionConfig,
    pub process: ProcessConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `procbus.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }

    /// Front/back URLs the proxy binds.
    pub fn proxy_bind_urls(&self) -> Result<(BusUrl, BusUrl), ConfigError> {
        let (front, back) = self.bus.transport.proxy_bind_urls();
        self.with_overrides(front, back)
    }

    /// Front/back URLs endpoints dial.
    pub fn proxy_dial_urls(&self) -> Result<(BusUrl, BusUrl), ConfigError> {
        let (front, back) = self.bus.transport.proxy_dial_urls();
        self.with_overrides(front, back)
    }

    fn with_overrides(&self, front: &str, back: &str) -> Result<(BusUrl, BusUrl), ConfigError> {
        let front = match &self.bus.proxy.front_url {
            Some(url) => url.clone(),
            None => front.parse()?,
        };
        let back = match &self.bus.proxy.back_url {
            Some(url) => url.clone(),
            None => back.parse()?,
        };
        Ok((front, back))
    }

    /// Endpoint table: the explicit one if configured, otherwise every
    /// process dials the proxy.
    pub fn endpoint_table(&self) -> Result<EndpointTable, ConfigError> {
        match &self.bus.endpoints {
            Some(entries) => EndpointTable::from_entries(entries.clone()),
            None => {
                let (front, back) = self.proxy_dial_urls()?;
                EndpointTable::uniform(front, back)
            }
        }
    }

    /// URLs process `id` dials.
    pub fn endpoints_for(&self, id: ProcessId) -> Result<ProcessEndpoints, ConfigError> {
        Ok(self.endpoint_table()?.get(id).clone())
    }
}
