//! # Recovery Handlers
//!
//! A recovery handler re-executes the side effect of an event that ended up in a
//! dead-letter topic. Handlers are registered with the reprocessor per original topic.
//! Any async closure taking the original payload is a handler:
//!
//! ```rust,no_run
//! use event_delivery::dead_letter::{DeadLetterReprocessor, HandlerResult};
//! use serde_json::Value;
//!
//! fn register(reprocessor: &DeadLetterReprocessor) {
//!     reprocessor.register_handler("event.created", |payload: Value| async move {
//!         println!("re-indexing {payload}");
//!         HandlerResult::Ok(())
//!     });
//! }
//! ```
//!
//! Redelivery is at-least-once, so handlers must be idempotent.

use crate::error::{DeliveryError, ErrorKind};
use crate::messaging::{DeadLetterRecord, DeliveryPipeline};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type HandlerError = anyhow::Error;
pub type HandlerResult = Result<(), HandlerError>;

#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn recover(&self, record: &DeadLetterRecord) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> RecoveryHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn recover(&self, record: &DeadLetterRecord) -> HandlerResult {
        (self)(record.original_payload.clone()).await
    }
}

/// Error kind recorded for a failed handler
///
/// A `DeliveryError` anywhere in the chain decides the kind; anything else counts as
/// transient.
pub fn handler_error_kind(error: &HandlerError) -> ErrorKind {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<DeliveryError>())
        .map(DeliveryError::kind)
        .unwrap_or(ErrorKind::Transient)
}

/// Re-sends the original payload to its original topic (or a fixed target topic)
#[derive(Debug, Clone)]
pub struct RepublishHandler {
    pipeline: Arc<DeliveryPipeline>,
    target_topic: Option<String>,
}

impl RepublishHandler {
    pub fn new(pipeline: Arc<DeliveryPipeline>) -> Self {
        Self {
            pipeline,
            target_topic: None,
        }
    }

    pub fn with_target_topic(mut self, topic: impl Into<String>) -> Self {
        self.target_topic = Some(topic.into());
        self
    }
}

#[async_trait]
impl RecoveryHandler for RepublishHandler {
    async fn recover(&self, record: &DeadLetterRecord) -> HandlerResult {
        let topic = self
            .target_topic
            .as_deref()
            .unwrap_or(&record.original_topic);
        self.pipeline
            .send(
                topic,
                record.correlation_id.as_deref(),
                &record.original_payload,
                &CancellationToken::new(),
            )
            .await?;
        Ok(())
    }
}
