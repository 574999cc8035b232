#![allow(clippy::doc_markdown)] // Allow technical terms like DLQ, TOML in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Event Delivery
//!
//! Resilient publishing of domain events to a message broker, with dead-letter routing
//! and reprocessing for the events that could not be delivered.
//!
//! ## Overview
//!
//! Every publish passes through a bulkhead, a circuit breaker and a bounded retry policy
//! before it reaches the broker. Events that still cannot be delivered are wrapped in a
//! dead letter record and sent to a dead letter topic, or written to a local fallback
//! directory when the broker is unreachable altogether. A reprocessor later reads the
//! dead letter topics, hands each record to a registered recovery handler, and either
//! acknowledges it, requeues it with an incremented retry count, or quarantines it on a
//! permanent topic.
//!
//! ## Module Organization
//!
//! - [`resilience`] - Bulkhead, circuit breaker, retry policy and monitoring sinks
//! - [`messaging`] - Broker abstraction, envelopes, the delivery pipeline and publisher
//! - [`dead_letter`] - Routing, local fallback, recovery handlers and the reprocessor
//! - [`config`] - TOML and environment driven configuration
//! - [`bootstrap`] - Wires the components from configuration
//! - [`error`] - Delivery error taxonomy
//! - [`logging`] - Structured console and JSON file logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use event_delivery::{DeliveryConfig, DeliveryCore, InMemoryBroker};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! event_delivery::logging::init_structured_logging();
//!
//! let core = DeliveryCore::from_config(&DeliveryConfig::default(), Arc::new(InMemoryBroker::new()))?;
//! let receipt = core
//!     .publisher()
//!     .publish("user.registered", serde_json::json!({"user_id": 7}), None)
//!     .await?;
//!
//! println!("correlation id {}", receipt.correlation_id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod dead_letter;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod resilience;

pub use bootstrap::{DeliveryCore, ReprocessorHandle};
pub use config::{ConfigManager, ConfigurationError, DeliveryConfig};
pub use dead_letter::{
    DeadLetterReprocessor, DeadLetterRouter, DeadLetterTopics, FileFallbackStore,
    ProcessingSummary, RecoveryHandler, RouteOutcome,
};
pub use error::{DeliveryError, DeliveryResult, ErrorKind};
pub use messaging::{
    DeadLetterRecord, DeliveryPipeline, Envelope, EventPublisher, InMemoryBroker, MessageBroker,
    PublishOutcome, PublishReceipt,
};
pub use resilience::{
    Bulkhead, CircuitBreaker, CircuitState, InMemoryMonitoringSink, MonitoringSink, RetryPolicy,
};
