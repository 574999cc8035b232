//! # Broker Client Interface
//!
//! The narrow interface this core consumes from a message broker. Every primary,
//! dead-letter and permanent-failure topic is reached through the same trait, so a
//! single implementation backs the whole delivery path.
//!
//! Implementations classify their own failures: connection loss, broker unavailability
//! and similar conditions come back as `DeliveryError::Transient`, rejected or malformed
//! messages as `DeliveryError::Permanent`. Per-attempt timeouts are applied by the
//! caller, not by the broker client.

use crate::error::DeliveryResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Broker acknowledgment for one accepted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAck {
    pub topic: String,
    pub message_id: i64,
    pub acknowledged_at: DateTime<Utc>,
}

/// A message read from a topic and claimed until its visibility timeout expires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub topic: String,
    pub message_id: i64,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    /// How many times this message has been handed out, including this read
    pub read_count: u32,
}

/// Message broker operations used by the publisher and the reprocessor
#[async_trait]
pub trait MessageBroker: Send + Sync + std::fmt::Debug {
    /// Send one payload to `topic`
    async fn send(&self, topic: &str, key: Option<&str>, payload: &Value)
        -> DeliveryResult<BrokerAck>;

    /// Claim up to `max_messages` visible messages from `topic`
    ///
    /// Claimed messages are hidden from other readers for `visibility_timeout` and
    /// become visible again unless acknowledged first.
    async fn receive(
        &self,
        topic: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> DeliveryResult<Vec<BrokerMessage>>;

    /// Commit a claimed message so it is never delivered again
    async fn acknowledge(&self, topic: &str, message_id: i64) -> DeliveryResult<()>;

    /// Short name of the implementation for logs
    fn broker_type(&self) -> &'static str;
}
