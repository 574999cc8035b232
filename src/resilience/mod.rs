//! # Resilience Module
//!
//! Fault tolerance primitives for publishing to a message broker. Each primitive is an
//! explicitly constructed instance scoped to one logical dependency, so a process can
//! run several independent breakers and bulkheads and tests can build isolated ones.
//!
//! ## Architecture
//!
//! - **Bulkhead**: bounds in-flight publishes and the number of callers waiting for a slot
//! - **Circuit Breaker**: stops calling a broker after consecutive failures
//! - **Retry Policy**: bounded exponential backoff with jitter for transient errors
//! - **Metrics**: breaker counters and the optional monitoring sink
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_delivery::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "broker",
//!     CircuitBreakerConfig {
//!         failure_threshold: 5,
//!         reset_timeout: Duration::from_secs(30),
//!     },
//! );
//!
//! if breaker.allow() {
//!     // call the broker, then report the outcome
//!     breaker.record_success();
//! }
//! ```

pub mod bulkhead;
pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod retry;

pub use bulkhead::{Bulkhead, BulkheadPermit, BulkheadSnapshot};
pub use circuit_breaker::{CallOutcome, CircuitAdmission, CircuitBreaker, CircuitState};
pub use config::{BulkheadConfig, CircuitBreakerConfig, RetryConfig};
pub use metrics::{
    CircuitBreakerMetrics, DeliveryMetricsSnapshot, InMemoryMonitoringSink, MonitoringSink,
    TracingMonitoringSink,
};
pub use retry::RetryPolicy;
