//! # Envelope and Dead Letter Record
//!
//! `Envelope` is a domain event wrapped for transport. It is built by the caller and
//! never mutated once handed to the publisher.
//!
//! `DeadLetterRecord` wraps an envelope that could not be delivered together with
//! failure metadata. Records are immutable; a re-delivery failure produces a new record
//! via [`DeadLetterRecord::next_attempt`] with `retry_count + 1`, so the count only grows.

use crate::error::{DeliveryError, DeliveryResult, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A domain event plus routing and correlation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    topic: String,
    payload: Value,
    correlation_id: Option<String>,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Assign a generated correlation id when the caller gave none
    pub fn ensure_correlation_id(mut self) -> Self {
        if self.correlation_id.is_none() {
            self.correlation_id = Some(Uuid::new_v4().to_string());
        }
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

/// An undeliverable envelope with failure metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_topic: String,
    pub original_payload: Value,
    pub error_message: String,
    pub error_kind: ErrorKind,
    pub retry_count: u32,
    pub first_failure_time: DateTime<Utc>,
    pub last_failure_time: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

impl DeadLetterRecord {
    /// Build the first record for a failed envelope
    pub fn from_failure(envelope: &Envelope, error: &DeliveryError, retry_count: u32) -> Self {
        let now = Utc::now();
        Self {
            original_topic: envelope.topic().to_string(),
            original_payload: envelope.payload().clone(),
            error_message: error.to_string(),
            error_kind: error.kind(),
            retry_count,
            first_failure_time: now,
            last_failure_time: now,
            correlation_id: envelope.correlation_id().map(str::to_string),
        }
    }

    /// Record for the next failed re-delivery of the same logical failure
    pub fn next_attempt(&self, error_message: impl Into<String>, error_kind: ErrorKind) -> Self {
        Self {
            original_topic: self.original_topic.clone(),
            original_payload: self.original_payload.clone(),
            error_message: error_message.into(),
            error_kind,
            retry_count: self.retry_count.saturating_add(1),
            first_failure_time: self.first_failure_time,
            last_failure_time: Utc::now(),
            correlation_id: self.correlation_id.clone(),
        }
    }

    /// Whether the reprocessor must quarantine this record instead of retrying it
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    /// Envelope carrying the original event, for re-publishing
    pub fn original_envelope(&self) -> Envelope {
        let envelope = Envelope::new(self.original_topic.clone(), self.original_payload.clone());
        match &self.correlation_id {
            Some(id) => envelope.with_correlation_id(id.clone()),
            None => envelope,
        }
    }

    pub fn to_payload(&self) -> DeliveryResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_payload(payload: &Value) -> DeliveryResult<Self> {
        Ok(serde_json::from_value(payload.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_correlation_id_generation() {
        let envelope = Envelope::new("event.created", json!({"id": 7})).ensure_correlation_id();
        let id = envelope.correlation_id().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok());

        // An existing id is kept
        let kept = envelope.ensure_correlation_id();
        assert_eq!(kept.correlation_id(), Some(id.as_str()));
    }

    #[test]
    fn test_record_from_failure() {
        let envelope =
            Envelope::new("event.created", json!({"id": 7})).with_correlation_id("evt-7");
        let error = DeliveryError::transient("event.created", "broker down");

        let record = DeadLetterRecord::from_failure(&envelope, &error, 0);
        assert_eq!(record.original_topic, "event.created");
        assert_eq!(record.original_payload, json!({"id": 7}));
        assert_eq!(record.error_kind, ErrorKind::Transient);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.first_failure_time, record.last_failure_time);
        assert_eq!(record.correlation_id.as_deref(), Some("evt-7"));
    }

    #[test]
    fn test_next_attempt_increments_and_keeps_first_failure() {
        let envelope = Envelope::new("event.created", json!({"id": 7}));
        let record = DeadLetterRecord::from_failure(
            &envelope,
            &DeliveryError::circuit_open("broker"),
            0,
        );

        let next = record.next_attempt("handler failed", ErrorKind::Transient);
        assert_eq!(next.retry_count, 1);
        assert_eq!(next.first_failure_time, record.first_failure_time);
        assert!(next.last_failure_time >= record.last_failure_time);
        assert_eq!(next.original_payload, record.original_payload);
        assert_eq!(next.error_kind, ErrorKind::Transient);
    }

    #[test]
    fn test_record_payload_shape() {
        let envelope =
            Envelope::new("event.created", json!({"title": "RustConf"})).with_correlation_id("c1");
        let record =
            DeadLetterRecord::from_failure(&envelope, &DeliveryError::timeout("event.created", 10), 2);

        let payload = record.to_payload().unwrap();
        assert_eq!(payload["original_topic"], "event.created");
        assert_eq!(payload["error_kind"], "transient");
        assert_eq!(payload["retry_count"], 2);

        let decoded = DeadLetterRecord::from_payload(&payload).unwrap();
        assert_eq!(decoded, record);
        assert!(decoded.is_exhausted(2));
        assert!(!decoded.is_exhausted(3));
    }
}
