//! Configuration Loader
//!
//! Environment-aware configuration loading. Layers the TOML files found in the
//! configuration directory and `EVENT_DELIVERY__*` environment variables over the
//! built-in defaults, then validates the result.

use super::error::{ConfigResult, ConfigurationError};
use super::DeliveryConfig;
use crate::constants::system::{CONFIG_ENV_PREFIX, CONFIG_ENV_SEPARATOR};
use ::config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_CONFIG_FILE: &str = "delivery.toml";
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Loaded and validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: DeliveryConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env_source(config_dir, environment, None)
    }

    /// Load configuration with an explicit set of environment variables
    ///
    /// `env_vars` replaces the process environment as the override source, which lets
    /// tests exercise overrides without touching global state.
    pub fn load_with_env_vars(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_vars: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env_source(config_dir, environment, Some(env_vars))
    }

    fn load_with_env_source(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));
        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let mut builder = Config::builder();
        for path in [
            config_directory.join(BASE_CONFIG_FILE),
            config_directory.join(format!("delivery.{environment}.toml")),
        ] {
            if let Some(contents) = Self::read_config_file_safely(&path)? {
                debug!("Applying configuration file: {}", path.display());
                builder = builder.add_source(File::from_str(&contents, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .prefix_separator(CONFIG_ENV_SEPARATOR)
                .separator(CONFIG_ENV_SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("reprocessor.subscriptions")
                .source(env_vars),
        );

        let config: DeliveryConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = %environment,
            max_concurrent = config.bulkhead.max_concurrent,
            failure_threshold = config.circuit_breaker.failure_threshold,
            max_attempts = config.retry.max_attempts,
            max_retries = config.dead_letter.max_retries,
            "⚙️ Delivery configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already built configuration, validating it
    pub fn from_config(config: DeliveryConfig, environment: &str) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        })
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON, for diagnostics
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    /// Detect current environment from environment variables
    fn detect_environment() -> String {
        crate::logging::get_environment().to_lowercase()
    }

    /// Read a configuration file if present, refusing oversized or non-regular files
    fn read_config_file_safely(path: &Path) -> ConfigResult<Option<String>> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigurationError::file_read_error(
                    path.display().to_string(),
                    e,
                ))
            }
        };

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                path.display().to_string(),
                "Configuration path must point to a regular file",
            ));
        }

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({} bytes > {} bytes limit)",
                    metadata.len(),
                    MAX_CONFIG_FILE_SIZE
                ),
            ));
        }

        std::fs::read_to_string(path)
            .map(Some)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }
}
