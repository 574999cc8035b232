//! # Resilience Configuration
//!
//! Runtime (`Duration`-based) configuration for the bulkhead, circuit breaker and retry
//! policy. File-level settings live in `crate::config` and convert into these via
//! `to_resilience_config()`.

use crate::constants::resilience::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_QUEUE, DEFAULT_RESET_TIMEOUT_SECONDS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before allowing a trial call
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Create configuration for broker publish operations
    pub fn for_broker() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: Duration::from_secs(DEFAULT_RESET_TIMEOUT_SECONDS),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.reset_timeout.is_zero() {
            return Err("reset_timeout must be greater than 0".to_string());
        }

        if self.reset_timeout > Duration::from_secs(300) {
            return Err("reset_timeout should not exceed 300 seconds".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::for_broker()
    }
}

/// Configuration for the admission limiter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadConfig {
    /// Hard cap on simultaneously executing operations
    pub max_concurrent: usize,

    /// Hard cap on operations waiting for a slot
    pub max_queue: usize,

    /// Longest a caller may wait for a slot before being rejected
    pub max_wait: Option<Duration>,
}

impl BulkheadConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".to_string());
        }

        if let Some(max_wait) = self.max_wait {
            if max_wait.is_zero() {
                return Err("max_wait must be greater than 0 when set".to_string());
            }
        }

        Ok(())
    }
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_queue: DEFAULT_MAX_QUEUE,
            max_wait: None,
        }
    }
}

/// Configuration for bounded exponential-backoff retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total calls allowed per execution, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each further attempt
    pub base_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Extra random delay as a fraction of the computed delay (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl RetryConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.max_delay < self.base_delay {
            return Err("max_delay must not be smaller than base_delay".to_string());
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("jitter_factor must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}
