//! # System Constants
//!
//! Default values and fixed names that define the operational boundaries of the
//! delivery core. Configuration defaults in [`crate::config`] are built from these.

/// Crate-wide names
pub mod system {
    pub const EVENT_DELIVERY_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Component name used for the broker's breaker and bulkhead
    pub const DEFAULT_COMPONENT_NAME: &str = "broker";

    /// Prefix of configuration environment variables
    pub const CONFIG_ENV_PREFIX: &str = "EVENT_DELIVERY";

    /// Separator between configuration sections in environment variable names
    pub const CONFIG_ENV_SEPARATOR: &str = "__";
}

/// Admission, breaker, retry and timeout defaults
pub mod resilience {
    pub const DEFAULT_MAX_CONCURRENT: usize = 5;
    pub const DEFAULT_MAX_QUEUE: usize = 50;

    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
    pub const DEFAULT_RESET_TIMEOUT_SECONDS: u64 = 30;

    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
    pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

    /// Per-attempt broker send timeout
    pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 10_000;
}

/// Dead-letter naming and reprocessing defaults
pub mod dead_letter {
    pub const DEFAULT_TOPIC_PREFIX: &str = "dlq";
    pub const DEFAULT_PERMANENT_SUFFIX: &str = "permanent";
    pub const DEFAULT_FALLBACK_DIR: &str = "/tmp/event_fallback";
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub const DEFAULT_BATCH_SIZE: usize = 100;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
    pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u64 = 30;
    pub const DEFAULT_HANDLER_TIMEOUT_SECONDS: u64 = 60;
}
