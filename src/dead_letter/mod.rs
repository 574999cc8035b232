//! # Dead Letter Module
//!
//! Failure path of the delivery core. The [`DeadLetterRouter`] records undeliverable
//! events in a dead-letter topic, or in local fallback storage when the broker will not
//! take them. The [`DeadLetterReprocessor`] later replays those records through
//! registered [`RecoveryHandler`]s and quarantines records that keep failing.

pub mod fallback;
pub mod handler;
pub mod reprocessor;
pub mod router;

pub use fallback::{FallbackEntry, FallbackError, FallbackStore, FileFallbackStore, StoredFallback};
pub use handler::{handler_error_kind, HandlerError, HandlerResult, RecoveryHandler, RepublishHandler};
pub use reprocessor::{DeadLetterReprocessor, ProcessingSummary, ReprocessorConfig};
pub use router::{DeadLetterRouter, DeadLetterTopics, RouteOutcome};
