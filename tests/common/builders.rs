//! Test harness builder wiring a delivery core over the in-memory broker

#![allow(dead_code)] // Not every test binary uses every helper

use event_delivery::config::DeliveryConfig;
use event_delivery::dead_letter::StoredFallback;
use event_delivery::dead_letter::FallbackStore;
use event_delivery::messaging::{DeadLetterRecord, InMemoryBroker};
use event_delivery::resilience::InMemoryMonitoringSink;
use event_delivery::DeliveryCore;
use std::sync::Arc;
use tempfile::TempDir;

/// A delivery core plus the fakes behind it
pub struct DeliveryHarness {
    pub core: DeliveryCore,
    pub broker: Arc<InMemoryBroker>,
    pub sink: Arc<InMemoryMonitoringSink>,
    pub fallback_dir: TempDir,
}

impl DeliveryHarness {
    /// Dead-letter records currently stored on `topic`
    pub async fn dead_letters(&self, topic: &str) -> Vec<DeadLetterRecord> {
        self.broker
            .messages(topic)
            .await
            .iter()
            .map(|payload| DeadLetterRecord::from_payload(payload).expect("valid dead letter record"))
            .collect()
    }

    /// Records written to the local fallback directory
    pub async fn fallback_records(&self) -> Vec<StoredFallback> {
        self.core
            .router()
            .fallback_store()
            .pending(usize::MAX)
            .await
            .expect("list fallback records")
    }
}

/// Builder with fast timings suitable for tests
pub struct DeliveryHarnessBuilder {
    config: DeliveryConfig,
}

impl Default for DeliveryHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryHarnessBuilder {
    pub fn new() -> Self {
        let mut config = DeliveryConfig::default();
        config.retry.max_attempts = 3;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        config.retry.jitter_factor = 0.0;
        config.broker.send_timeout_ms = 1_000;
        config.circuit_breaker.reset_timeout_seconds = 60;
        config.reprocessor.poll_interval_ms = 10;
        config.reprocessor.visibility_timeout_seconds = 30;
        Self { config }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.retry.max_attempts = max_attempts;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.config.circuit_breaker.failure_threshold = threshold;
        self
    }

    pub fn with_bulkhead(mut self, max_concurrent: usize, max_queue: usize) -> Self {
        self.config.bulkhead.max_concurrent = max_concurrent;
        self.config.bulkhead.max_queue = max_queue;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.dead_letter.max_retries = max_retries;
        self
    }

    pub fn with_send_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.broker.send_timeout_ms = timeout_ms;
        self
    }

    pub fn with_subscription(mut self, dead_letter_topic: &str) -> Self {
        self.config
            .reprocessor
            .subscriptions
            .push(dead_letter_topic.to_string());
        self
    }

    pub fn build(mut self) -> DeliveryHarness {
        let fallback_dir = tempfile::tempdir().expect("create fallback dir");
        self.config.dead_letter.fallback_dir = fallback_dir.path().join("fallback");

        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(InMemoryMonitoringSink::new());
        let core = DeliveryCore::from_config_with_sink(&self.config, broker.clone(), sink.clone())
            .expect("valid test configuration");

        DeliveryHarness {
            core,
            broker,
            sink,
            fallback_dir,
        }
    }
}
