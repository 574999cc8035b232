//! # Dead Letter Router
//!
//! Turns a delivery failure into a durable [`DeadLetterRecord`]. The record is first
//! published to the dead-letter topic of its original topic through the same protected
//! pipeline the publisher uses. If that fails too, the record is written to local
//! fallback storage. Neither tier dead-letters again.
//!
//! When both tiers fail the router logs the loss and returns a `DeadLetterFailure`
//! describing both errors; it never panics or propagates a raw I/O error.

use crate::constants::dead_letter::{DEFAULT_PERMANENT_SUFFIX, DEFAULT_TOPIC_PREFIX};
use crate::dead_letter::fallback::{FallbackEntry, FallbackStore};
use crate::error::{DeliveryError, DeliveryResult};
use crate::messaging::{BrokerAck, DeadLetterRecord, DeliveryPipeline, Envelope};
use crate::resilience::MonitoringSink;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Naming rules for dead-letter and permanent-failure topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTopics {
    prefix: String,
    permanent_suffix: String,
}

impl Default for DeadLetterTopics {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX, DEFAULT_PERMANENT_SUFFIX)
    }
}

impl DeadLetterTopics {
    pub fn new(prefix: impl Into<String>, permanent_suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            permanent_suffix: permanent_suffix.into(),
        }
    }

    /// `<prefix>.<original_topic>`
    pub fn dead_letter_topic(&self, original_topic: &str) -> String {
        format!("{}.{}", self.prefix, original_topic)
    }

    /// `<prefix>.<original_topic>.<suffix>`
    pub fn permanent_topic(&self, original_topic: &str) -> String {
        self.permanent_topic_for_dead_letter(&self.dead_letter_topic(original_topic))
    }

    /// Permanent-failure sink of a dead-letter topic
    pub fn permanent_topic_for_dead_letter(&self, dead_letter_topic: &str) -> String {
        format!("{}.{}", dead_letter_topic, self.permanent_suffix)
    }
}

/// Where a dead-letter record was durably recorded
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stored_in", rename_all = "snake_case")]
pub enum RouteOutcome {
    DeadLettered {
        dead_letter_topic: String,
        ack: BrokerAck,
    },
    StoredLocally {
        path: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct DeadLetterRouter {
    pipeline: Arc<DeliveryPipeline>,
    fallback: Arc<dyn FallbackStore>,
    topics: DeadLetterTopics,
}

impl DeadLetterRouter {
    pub fn new(
        pipeline: Arc<DeliveryPipeline>,
        fallback: Arc<dyn FallbackStore>,
        topics: DeadLetterTopics,
    ) -> Self {
        Self {
            pipeline,
            fallback,
            topics,
        }
    }

    pub fn topics(&self) -> &DeadLetterTopics {
        &self.topics
    }

    pub fn fallback_store(&self) -> &Arc<dyn FallbackStore> {
        &self.fallback
    }

    fn sink(&self) -> &Arc<dyn MonitoringSink> {
        self.pipeline.monitoring_sink()
    }

    /// Record a failed envelope
    pub async fn route(
        &self,
        envelope: &Envelope,
        error: &DeliveryError,
        retry_count: u32,
        cancel: &CancellationToken,
    ) -> DeliveryResult<RouteOutcome> {
        let record = DeadLetterRecord::from_failure(envelope, error, retry_count);
        self.route_record(record, cancel).await
    }

    /// Record an already built dead-letter record
    pub async fn route_record(
        &self,
        record: DeadLetterRecord,
        cancel: &CancellationToken,
    ) -> DeliveryResult<RouteOutcome> {
        let dead_letter_topic = self.topics.dead_letter_topic(&record.original_topic);

        let dead_letter_error = match record.to_payload() {
            Ok(payload) => match self
                .pipeline
                .send(
                    &dead_letter_topic,
                    record.correlation_id.as_deref(),
                    &payload,
                    cancel,
                )
                .await
            {
                Ok(ack) => {
                    self.sink()
                        .record_dead_letter(&record.original_topic, record.error_kind);
                    info!(
                        topic = %record.original_topic,
                        dead_letter_topic = %dead_letter_topic,
                        correlation_id = ?record.correlation_id,
                        retry_count = record.retry_count,
                        error_kind = %record.error_kind,
                        "📮 Event dead-lettered"
                    );
                    return Ok(RouteOutcome::DeadLettered {
                        dead_letter_topic,
                        ack,
                    });
                }
                Err(e) => e,
            },
            Err(e) => e,
        };

        warn!(
            topic = %record.original_topic,
            dead_letter_topic = %dead_letter_topic,
            correlation_id = ?record.correlation_id,
            error = %dead_letter_error,
            "⚠️ Dead letter publish failed, writing local fallback"
        );

        let entry = FallbackEntry {
            stored_at: Utc::now(),
            dead_letter_topic,
            error: dead_letter_error.to_string(),
            record,
        };

        match self.fallback.store(&entry).await {
            Ok(path) => {
                self.sink().record_fallback(&entry.record.original_topic);
                self.sink()
                    .record_dead_letter(&entry.record.original_topic, entry.record.error_kind);
                warn!(
                    topic = %entry.record.original_topic,
                    path = %path.display(),
                    "💾 Dead letter record stored locally"
                );
                Ok(RouteOutcome::StoredLocally { path })
            }
            Err(fallback_error) => {
                error!(
                    topic = %entry.record.original_topic,
                    correlation_id = ?entry.record.correlation_id,
                    dead_letter_error = %dead_letter_error,
                    fallback_error = %fallback_error,
                    "💀 Dead letter publish and local fallback both failed"
                );
                Err(DeliveryError::DeadLetterFailure {
                    topic: entry.record.original_topic.clone(),
                    correlation_id: entry.record.correlation_id.clone().unwrap_or_default(),
                    dead_letter_error: dead_letter_error.to_string(),
                    fallback_error: fallback_error.to_string(),
                })
            }
        }
    }
}
