//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod catalog;
mod limits;
mod sequence;
mod storage;

pub use catalog::{CatalogConfig, DEFAULT_OVERFETCH_FACTOR, DEFAULT_SHARD_COUNT};
pub use sequence::{SequenceConfig, SequenceStrategy};
pub use limits::{QueryConfig, DEFAULT_QUERY_LIMIT};
pub use storage::{DynamoConfig, SqliteConfig, StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "LOGSTACK_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "LOGSTACK";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "LOGSTACK_LOG";

use serde::Deserialize;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Sequence token strategy.
    pub sequence: SequenceConfig,
    /// Log catalog sharding.
    pub catalog: CatalogConfig,
    /// Query defaults.
    pub query: QueryConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
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

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no deployment can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog.shard_count == 0 {
            return Err(ConfigError::Invalid(
                "catalog.shard_count must be at least 1".to_string(),
            ));
        }
        if self.catalog.overfetch_factor == 0 {
            return Err(ConfigError::Invalid(
                "catalog.overfetch_factor must be at least 1".to_string(),
            ));
        }
        if self.query.default_limit == 0 {
            return Err(ConfigError::Invalid(
                "query.default_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing: in-memory storage, counter sequences.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                storage_type: StorageType::Memory,
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }
}
