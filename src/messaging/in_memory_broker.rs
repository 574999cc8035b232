//! # In-Memory Broker
//!
//! [`MessageBroker`] implementation that keeps topics in memory with visibility-timeout
//! semantics. Used by the test suite and by local development wiring.
//!
//! ## Key Features
//!
//! - **Visibility Timeouts**: received messages stay claimed until acknowledged or until
//!   the timeout expires, after which they are handed out again
//! - **Fault Injection**: fail the next N sends, fail every send to a topic, or slow all
//!   sends down to exercise timeouts
//! - **Inspection**: per-topic send attempt counters and a non-claiming peek
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_delivery::error::DeliveryError;
//! use event_delivery::messaging::InMemoryBroker;
//!
//! let broker = InMemoryBroker::new();
//! broker.fail_next_sends(3, DeliveryError::transient("events", "connection reset"));
//! ```

use crate::error::{DeliveryError, DeliveryResult};
use crate::messaging::broker::{BrokerAck, BrokerMessage, MessageBroker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: i64,
    payload: Value,
    enqueued_at: DateTime<Utc>,
    invisible_until: Option<Instant>,
    read_count: u32,
}

#[derive(Debug, Default)]
struct TopicQueue {
    messages: VecDeque<StoredMessage>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct FaultPlan {
    next_sends: VecDeque<DeliveryError>,
    topics: HashMap<String, DeliveryError>,
    send_latency: Option<Duration>,
}

/// In-memory broker for tests and local development
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    topics: tokio::sync::Mutex<HashMap<String, TopicQueue>>,
    faults: Mutex<FaultPlan>,
    send_attempts: AtomicU64,
    send_attempts_by_topic: DashMap<String, u64>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` sends, to any topic, with `error`
    pub fn fail_next_sends(&self, count: usize, error: DeliveryError) {
        let mut faults = self.faults.lock();
        faults
            .next_sends
            .extend(std::iter::repeat(error).take(count));
    }

    /// Fail every send to `topic` with `error` until cleared
    pub fn fail_topic(&self, topic: impl Into<String>, error: DeliveryError) {
        self.faults.lock().topics.insert(topic.into(), error);
    }

    /// Delay every send by `latency` before it is accepted
    pub fn set_send_latency(&self, latency: Duration) {
        self.faults.lock().send_latency = Some(latency);
    }

    /// Remove all injected faults and latency
    pub fn clear_faults(&self) {
        *self.faults.lock() = FaultPlan::default();
    }

    /// Total send attempts, failed ones included
    pub fn send_attempts(&self) -> u64 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Send attempts to one topic, failed ones included
    pub fn send_attempts_for(&self, topic: &str) -> u64 {
        self.send_attempts_by_topic
            .get(topic)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Payloads currently stored on `topic`, claimed or not, oldest first
    pub async fn messages(&self, topic: &str) -> Vec<Value> {
        let topics = self.topics.lock().await;
        topics
            .get(topic)
            .map(|queue| queue.messages.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of unacknowledged messages on `topic`
    pub async fn depth(&self, topic: &str) -> usize {
        let topics = self.topics.lock().await;
        topics.get(topic).map(|q| q.messages.len()).unwrap_or(0)
    }

    fn injected_failure(&self, topic: &str) -> (Option<Duration>, Option<DeliveryError>) {
        let mut faults = self.faults.lock();
        let latency = faults.send_latency;
        let failure = faults
            .next_sends
            .pop_front()
            .or_else(|| faults.topics.get(topic).cloned());
        (latency, failure)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send(
        &self,
        topic: &str,
        _key: Option<&str>,
        payload: &Value,
    ) -> DeliveryResult<BrokerAck> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        *self
            .send_attempts_by_topic
            .entry(topic.to_string())
            .or_insert(0) += 1;

        let (latency, failure) = self.injected_failure(topic);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = failure {
            debug!(topic = topic, error = %error, "Injected send failure");
            return Err(error);
        }

        let mut topics = self.topics.lock().await;
        let queue = topics.entry(topic.to_string()).or_default();
        let message_id = queue.next_id;
        queue.next_id += 1;
        queue.messages.push_back(StoredMessage {
            id: message_id,
            payload: payload.clone(),
            enqueued_at: Utc::now(),
            invisible_until: None,
            read_count: 0,
        });

        Ok(BrokerAck {
            topic: topic.to_string(),
            message_id,
            acknowledged_at: Utc::now(),
        })
    }

    async fn receive(
        &self,
        topic: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> DeliveryResult<Vec<BrokerMessage>> {
        let mut topics = self.topics.lock().await;
        let Some(queue) = topics.get_mut(topic) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut claimed = Vec::new();
        for message in queue.messages.iter_mut() {
            if claimed.len() >= max_messages {
                break;
            }
            let visible = message.invisible_until.map_or(true, |until| until <= now);
            if !visible {
                continue;
            }
            message.invisible_until = Some(now + visibility_timeout);
            message.read_count += 1;
            claimed.push(BrokerMessage {
                topic: topic.to_string(),
                message_id: message.id,
                payload: message.payload.clone(),
                enqueued_at: message.enqueued_at,
                read_count: message.read_count,
            });
        }

        Ok(claimed)
    }

    async fn acknowledge(&self, topic: &str, message_id: i64) -> DeliveryResult<()> {
        let mut topics = self.topics.lock().await;
        let queue = topics.get_mut(topic).ok_or_else(|| {
            DeliveryError::permanent(topic, format!("unknown topic for message {message_id}"))
        })?;

        let position = queue
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| {
                DeliveryError::permanent(topic, format!("message {message_id} not found"))
            })?;
        queue.messages.remove(position);
        Ok(())
    }

    fn broker_type(&self) -> &'static str {
        "in_memory"
    }
}
