//! # Event Publisher
//!
//! The single entry point the event-producing flow calls. A publish either reaches the
//! broker, or is diverted to durable storage by the dead letter router and reported as
//! such; the caller only sees an error when the event may be lost (`DeadLetterFailure`)
//! or when it cancelled the publish itself (`Cancelled`).
//!
//! Failure handling is decided once, here, from the error kind:
//!
//! | Kind                | Action                        |
//! |---------------------|-------------------------------|
//! | `transient`         | retried in the pipeline, then dead-lettered |
//! | `permanent`         | dead-lettered without retry   |
//! | `resource_exhausted`| dead-lettered                 |
//! | `circuit_open`      | dead-lettered                 |
//! | `cancelled`         | returned to the caller        |

use crate::dead_letter::{DeadLetterRouter, RouteOutcome};
use crate::error::{DeliveryError, DeliveryResult, ErrorKind};
use crate::logging::{log_delivery_operation, log_error};
use crate::messaging::broker::BrokerAck;
use crate::messaging::envelope::Envelope;
use crate::messaging::pipeline::DeliveryPipeline;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Where a published event ended up
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Accepted by the broker on its primary topic
    Delivered(BrokerAck),
    /// Not delivered; durably recorded for reprocessing
    Diverted {
        error_kind: ErrorKind,
        route: RouteOutcome,
    },
}

/// Result of a publish that did not lose the event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub correlation_id: String,
    pub outcome: PublishOutcome,
}

impl PublishReceipt {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, PublishOutcome::Delivered(_))
    }

    pub fn ack(&self) -> Option<&BrokerAck> {
        match &self.outcome {
            PublishOutcome::Delivered(ack) => Some(ack),
            PublishOutcome::Diverted { .. } => None,
        }
    }
}

/// Publisher façade: protected send plus dead-letter routing
#[derive(Debug, Clone)]
pub struct EventPublisher {
    pipeline: Arc<DeliveryPipeline>,
    router: Arc<DeadLetterRouter>,
}

impl EventPublisher {
    pub fn new(pipeline: Arc<DeliveryPipeline>, router: Arc<DeadLetterRouter>) -> Self {
        Self { pipeline, router }
    }

    pub fn pipeline(&self) -> &Arc<DeliveryPipeline> {
        &self.pipeline
    }

    pub fn router(&self) -> &Arc<DeadLetterRouter> {
        &self.router
    }

    /// Publish `payload` to `topic`
    pub async fn publish(
        &self,
        topic: &str,
        payload: Value,
        correlation_id: Option<String>,
    ) -> DeliveryResult<PublishReceipt> {
        let envelope = match correlation_id {
            Some(id) => Envelope::new(topic, payload).with_correlation_id(id),
            None => Envelope::new(topic, payload),
        };
        self.publish_envelope(envelope, &CancellationToken::new())
            .await
    }

    /// Publish an envelope, observing `cancel` while waiting or retrying
    #[instrument(skip_all, fields(topic = %envelope.topic()))]
    pub async fn publish_envelope(
        &self,
        envelope: Envelope,
        cancel: &CancellationToken,
    ) -> DeliveryResult<PublishReceipt> {
        let envelope = envelope.ensure_correlation_id();
        let correlation_id = envelope.correlation_id().unwrap_or_default().to_string();

        let failure = match self
            .pipeline
            .send(
                envelope.topic(),
                Some(&correlation_id),
                envelope.payload(),
                cancel,
            )
            .await
        {
            Ok(ack) => {
                debug!(
                    correlation_id = %correlation_id,
                    message_id = ack.message_id,
                    "✅ Event published"
                );
                return Ok(PublishReceipt {
                    correlation_id,
                    outcome: PublishOutcome::Delivered(ack),
                });
            }
            Err(failure) => failure,
        };

        let error_kind = failure.kind();
        if error_kind == ErrorKind::Cancelled {
            info!(correlation_id = %correlation_id, "Publish cancelled by caller");
            return Err(failure);
        }

        match self.router.route(&envelope, &failure, 0, cancel).await {
            Ok(route) => {
                log_delivery_operation(
                    "publish",
                    envelope.topic(),
                    Some(&correlation_id),
                    "diverted",
                    Some(&error_kind.to_string()),
                );
                Ok(PublishReceipt {
                    correlation_id,
                    outcome: PublishOutcome::Diverted { error_kind, route },
                })
            }
            Err(terminal) => {
                log_error(
                    "publisher",
                    "publish",
                    &terminal.to_string(),
                    Some("💀 event may be lost: no durable record written"),
                );
                Err(terminal)
            }
        }
    }

    /// Whether a publish error means the event may have been lost
    pub fn is_event_lost(error: &DeliveryError) -> bool {
        error.kind() == ErrorKind::DeadLetterFailure
    }
}
