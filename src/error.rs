//! # Delivery Error Types
//!
//! Structured error handling for the delivery core using thiserror. Every failure carries
//! an explicit [`ErrorKind`] tag so that retry and dead-letter decisions are made by
//! inspecting the kind once, at the publisher boundary, instead of matching on error text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Categorical failure tag stored on dead-letter records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, timeout or broker-unavailable failure; retryable
    Transient,
    /// Malformed payload, authorization or similar; retrying cannot help
    Permanent,
    /// Bulkhead queue full
    ResourceExhausted,
    /// Circuit breaker rejected the call
    CircuitOpen,
    /// Neither the dead-letter topic nor local fallback storage accepted the record
    DeadLetterFailure,
    /// Operation cancelled or deadline reached before completion
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::DeadLetterFailure => "dead_letter_failure",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Comprehensive delivery error types
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    #[error("Transient broker error on {topic}: {message}")]
    Transient { topic: String, message: String },

    #[error("Broker send to {topic} timed out after {timeout_ms}ms")]
    Timeout { topic: String, timeout_ms: u64 },

    #[error("Permanent delivery error on {topic}: {message}")]
    Permanent { topic: String, message: String },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    #[error("Bulkhead {component} exhausted: {in_flight} in flight, {queued} queued (max queue {max_queue})")]
    ResourceExhausted {
        component: String,
        in_flight: usize,
        queued: usize,
        max_queue: usize,
    },

    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DeliveryError>,
    },

    #[error("Operation {operation} cancelled after {attempts} attempts")]
    Cancelled { operation: String, attempts: u32 },

    #[error("Event for {topic} may be lost (correlation id {correlation_id}): dead letter publish failed: {dead_letter_error}; fallback write failed: {fallback_error}")]
    DeadLetterFailure {
        topic: String,
        correlation_id: String,
        dead_letter_error: String,
        fallback_error: String,
    },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },
}

impl DeliveryError {
    /// Create a transient (retryable) broker error
    pub fn transient(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create a per-attempt timeout error
    pub fn timeout(topic: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            topic: topic.into(),
            timeout_ms,
        }
    }

    /// Create a permanent (non-retryable) error
    pub fn permanent(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a circuit open error
    pub fn circuit_open(component: impl Into<String>) -> Self {
        Self::CircuitOpen {
            component: component.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>, attempts: u32) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            attempts,
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } | Self::Timeout { .. } => ErrorKind::Transient,
            Self::Permanent { .. } | Self::Serialization { .. } | Self::Configuration { .. } => {
                ErrorKind::Permanent
            }
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::RetriesExhausted { source, .. } => source.kind(),
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::DeadLetterFailure { .. } => ErrorKind::DeadLetterFailure,
        }
    }

    /// Whether the retry policy may try again after this error
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Number of attempts recorded on this error, if it went through the retry policy
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } | Self::Cancelled { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        DeliveryError::serialization(err.to_string())
    }
}

/// Result type alias for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;
