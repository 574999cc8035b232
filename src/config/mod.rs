//! # Delivery Configuration System
//!
//! File- and environment-driven configuration for the delivery core. Every section has
//! explicit defaults, a `validate()` that rejects values the runtime cannot honor, and a
//! conversion into the `Duration`-based runtime configuration its component takes.
//!
//! ## Sources (later wins)
//!
//! 1. Built-in defaults
//! 2. `config/delivery.toml`
//! 3. `config/delivery.<environment>.toml`
//! 4. `EVENT_DELIVERY__<SECTION>__<FIELD>` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_delivery::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let retries = manager.config().dead_letter.max_retries;
//! let breaker = manager.config().circuit_breaker.to_resilience_config();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::dead_letter::{
    DEFAULT_BATCH_SIZE, DEFAULT_FALLBACK_DIR, DEFAULT_HANDLER_TIMEOUT_SECONDS, DEFAULT_MAX_RETRIES,
    DEFAULT_PERMANENT_SUFFIX, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TOPIC_PREFIX,
    DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
};
use crate::constants::resilience::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_QUEUE, DEFAULT_RESET_TIMEOUT_SECONDS,
    DEFAULT_SEND_TIMEOUT_MS,
};
use crate::constants::system::DEFAULT_COMPONENT_NAME;
use crate::dead_letter::{DeadLetterTopics, ReprocessorConfig};
use crate::resilience::{BulkheadConfig, CircuitBreakerConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub bulkhead: BulkheadSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub retry: RetrySettings,
    pub broker: BrokerSettings,
    pub dead_letter: DeadLetterSettings,
    pub reprocessor: ReprocessorSettings,
}

impl DeliveryConfig {
    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.bulkhead.validate()?;
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.broker.validate()?;
        self.dead_letter.validate()?;
        self.reprocessor.validate()?;
        Ok(())
    }

    /// Reprocessor runtime configuration, including the dead-letter retry ceiling
    pub fn reprocessor_config(&self) -> ReprocessorConfig {
        self.reprocessor
            .to_reprocessor_config(self.dead_letter.max_retries)
    }
}

/// Admission limiter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadSettings {
    pub max_concurrent: usize,
    pub max_queue: usize,
    /// Waiting longer than this for a slot is `ResourceExhausted`; unset waits as long
    /// as the caller allows
    pub max_wait_ms: Option<u64>,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_queue: DEFAULT_MAX_QUEUE,
            max_wait_ms: None,
        }
    }
}

impl BulkheadSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        self.to_resilience_config()
            .validate()
            .map_err(|e| ConfigurationError::validation_error("bulkhead", e))
    }

    pub fn to_resilience_config(&self) -> BulkheadConfig {
        BulkheadConfig {
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
            max_wait: self.max_wait_ms.map(Duration::from_millis),
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout_seconds: DEFAULT_RESET_TIMEOUT_SECONDS,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        self.to_resilience_config()
            .validate()
            .map_err(|e| ConfigurationError::validation_error("circuit_breaker", e))
    }

    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_seconds),
        }
    }
}

/// Retry policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetrySettings {
    pub fn validate(&self) -> ConfigResult<()> {
        self.to_resilience_config()
            .validate()
            .map_err(|e| ConfigurationError::validation_error("retry", e))
    }

    pub fn to_resilience_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_factor: self.jitter_factor,
        }
    }
}

/// Broker client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Per-attempt send timeout
    pub send_timeout_ms: u64,
    /// Names the breaker and bulkhead in logs and metrics
    pub component_name: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            component_name: DEFAULT_COMPONENT_NAME.to_string(),
        }
    }
}

impl BrokerSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.send_timeout_ms == 0 {
            return Err(ConfigurationError::validation_error(
                "broker",
                "send_timeout_ms must be greater than 0",
            ));
        }
        if self.component_name.trim().is_empty() {
            return Err(ConfigurationError::validation_error(
                "broker",
                "component_name must not be empty",
            ));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Dead-letter routing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterSettings {
    pub topic_prefix: String,
    pub permanent_suffix: String,
    pub fallback_dir: PathBuf,
    /// Reprocessing attempts before a record is quarantined
    pub max_retries: u32,
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            permanent_suffix: DEFAULT_PERMANENT_SUFFIX.to_string(),
            fallback_dir: PathBuf::from(DEFAULT_FALLBACK_DIR),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl DeadLetterSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("topic_prefix", &self.topic_prefix),
            ("permanent_suffix", &self.permanent_suffix),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value.clone(),
                    "dead letter topic names need a non-empty prefix and suffix",
                ));
            }
        }
        if self.fallback_dir.as_os_str().is_empty() {
            return Err(ConfigurationError::validation_error(
                "dead_letter",
                "fallback_dir must not be empty",
            ));
        }
        Ok(())
    }

    pub fn topics(&self) -> DeadLetterTopics {
        DeadLetterTopics::new(self.topic_prefix.clone(), self.permanent_suffix.clone())
    }
}

/// Dead-letter reprocessor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReprocessorSettings {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub visibility_timeout_seconds: u64,
    /// Upper bound on one recovery handler call
    pub handler_timeout_seconds: u64,
    /// Dead-letter topics consumed even without a registered handler
    pub subscriptions: Vec<String>,
}

impl Default for ReprocessorSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            visibility_timeout_seconds: DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            handler_timeout_seconds: DEFAULT_HANDLER_TIMEOUT_SECONDS,
            subscriptions: Vec::new(),
        }
    }
}

impl ReprocessorSettings {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 {
            return Err(ConfigurationError::validation_error(
                "reprocessor",
                "batch_size must be greater than 0",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigurationError::validation_error(
                "reprocessor",
                "poll_interval_ms must be greater than 0",
            ));
        }
        if self.visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::validation_error(
                "reprocessor",
                "visibility_timeout_seconds must be greater than 0",
            ));
        }
        if self.handler_timeout_seconds == 0 {
            return Err(ConfigurationError::validation_error(
                "reprocessor",
                "handler_timeout_seconds must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn to_reprocessor_config(&self, max_retries: u32) -> ReprocessorConfig {
        ReprocessorConfig {
            max_retries,
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_seconds),
            handler_timeout: Duration::from_secs(self.handler_timeout_seconds),
            subscriptions: self.subscriptions.clone(),
        }
    }
}
