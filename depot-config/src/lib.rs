//! Layered configuration for Depot services.
//!
//! Later layers override earlier ones key by key:
//!
//! 1. built-in defaults
//! 2. a TOML, JSON or `.env` file
//! 3. a `.env` file in the working directory (loaded into the environment)
//! 4. `DEPOT_`-prefixed environment variables, `__` separating sections
//! 5. explicit overrides set on the [`ConfigBuilder`]
//!
//! ```
//! use depot_config::DepotConfig;
//!
//! let config = DepotConfig::builder()
//!     .without_env()
//!     .set("listener.concurrency", 8)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.listener.concurrency, 8);
//! assert_eq!(config.namespace.prefix, "tenant_");
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::{DEFAULT_PREFIX, EnvLoader};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const DATABASE_SCHEMES: &[&str] = &["postgres", "postgresql"];

/// `[database]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: usize,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 10,
            connect_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.url {
            ConfigValidator::has_scheme(url, DATABASE_SCHEMES, "database.url")?;
        }
        ConfigValidator::in_range(self.pool_size, 1, 1024, "database.pool_size")?;
        ConfigValidator::in_range(self.connect_timeout_secs, 1, 600, "database.connect_timeout_secs")
    }
}

/// `[namespace]`: how tenant identifiers map to database namespaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    pub prefix: String,
    pub suffix: String,
    pub default_namespace: String,
    pub max_length: usize,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            prefix: "tenant_".to_string(),
            suffix: "_schema".to_string(),
            default_namespace: "public".to_string(),
            max_length: 63,
        }
    }
}

impl Validate for NamespaceConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.prefix, "namespace.prefix")?;
        ConfigValidator::identifier_part(&self.prefix, "namespace.prefix")?;
        ConfigValidator::identifier_part(&self.suffix, "namespace.suffix")?;
        ConfigValidator::not_empty(&self.default_namespace, "namespace.default_namespace")?;
        ConfigValidator::in_range(self.max_length, 1, 63, "namespace.max_length")
    }
}

/// `[boundary]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    pub tenant_header: String,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            tenant_header: "x-tenant-id".to_string(),
        }
    }
}

/// `[listener.retry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            max_attempts: 8,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Validate for RetryConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::in_range(self.initial_delay_ms, 1, 3_600_000, "listener.retry.initial_delay_ms")?;
        ConfigValidator::in_range(self.multiplier, 1.0, 10.0, "listener.retry.multiplier")?;
        ConfigValidator::in_range(
            self.max_delay_ms,
            self.initial_delay_ms,
            3_600_000,
            "listener.retry.max_delay_ms",
        )?;
        ConfigValidator::in_range(self.max_attempts, 1, 100, "listener.retry.max_attempts")
    }
}

/// `[listener]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub channel: String,
    pub concurrency: usize,
    /// Accept events identified by pre-`kind` markers
    pub legacy_discriminators: bool,
    pub retry: RetryConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel: "tenant.provisioning".to_string(),
            concurrency: 4,
            legacy_discriminators: true,
            retry: RetryConfig::default(),
        }
    }
}

impl Validate for ListenerConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.channel, "listener.channel")?;
        ConfigValidator::in_range(self.concurrency, 1, 1024, "listener.concurrency")?;
        self.retry.validate()
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            color: true,
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    pub database: DatabaseConfig,
    pub namespace: NamespaceConfig,
    pub boundary: BoundaryConfig,
    pub listener: ListenerConfig,
    pub log: LogConfig,
}

impl DepotConfig {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Load from the standard layers, with an optional file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::builder().dotenv(true);
        if let Some(path) = path {
            builder = builder.file(path);
        }
        builder.build()
    }
}

impl Validate for DepotConfig {
    fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.namespace.validate()?;
        ConfigValidator::header_name(&self.boundary.tenant_header, "boundary.tenant_header")?;
        self.listener.validate()?;
        ConfigValidator::one_of(&self.log.level, LOG_LEVELS, "log.level")
    }
}

/// Assembles a [`DepotConfig`] from its layers
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    file: Option<PathBuf>,
    dotenv: bool,
    env: Option<EnvLoader>,
    overrides: Vec<(String, Value)>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            file: None,
            dotenv: false,
            env: Some(EnvLoader::default()),
            overrides: Vec::new(),
        }
    }

    /// Read a configuration file; the format follows the extension
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Load `.env` from the working directory into the environment first
    pub fn dotenv(mut self, enabled: bool) -> Self {
        self.dotenv = enabled;
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env = Some(EnvLoader::new(prefix));
        self
    }

    /// Ignore the process environment
    pub fn without_env(mut self) -> Self {
        self.env = None;
        self
    }

    /// Override one dotted key, e.g. `database.pool_size`
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<DepotConfig> {
        let mut tree = serde_json::to_value(DepotConfig::default())
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        if let Some(path) = &self.file {
            let loader = ConfigLoader::auto(path)?;
            let loader = match &self.env {
                Some(env) => loader.with_env_prefix(env.prefix()),
                None => loader,
            };
            merge(&mut tree, loader.load_file(path)?);
            debug!(path = %path.display(), "Configuration file loaded");
        }

        if self.dotenv {
            match dotenvy::dotenv() {
                Ok(path) => debug!(path = %path.display(), ".env loaded"),
                Err(e) if e.not_found() => {}
                Err(e) => return Err(ConfigError::LoadError(format!(".env: {e}"))),
            }
        }

        if let Some(env) = &self.env {
            merge(&mut tree, env.load());
        }

        for (key, value) in self.overrides {
            let mut overlay = value;
            for segment in key.rsplit('.') {
                let mut map = Map::new();
                map.insert(segment.to_string(), overlay);
                overlay = Value::Object(map);
            }
            merge(&mut tree, overlay);
        }

        let config: DepotConfig = serde_json::from_value(tree)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Deep-merge `overlay` into `base`; objects merge, everything else replaces
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
