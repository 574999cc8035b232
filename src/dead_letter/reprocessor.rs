//! # Dead Letter Reprocessor
//!
//! Consumes dead-letter topics and replays each record through the recovery handler
//! registered for its original topic. Every record read ends in exactly one disposition
//! before it is acknowledged:
//!
//! - **Quarantined**: `retry_count >= max_retries`; the record is moved unchanged to the
//!   permanent-failure sink and the handler is not invoked
//! - **Skipped**: no handler is registered for the original topic; acknowledged with a
//!   warning, since retrying without a handler cannot succeed
//! - **Recovered**: the handler succeeded
//! - **Requeued**: the handler failed or ran past `handler_timeout`; a copy with
//!   `retry_count + 1` is routed through the dead letter router
//!
//! A handler still running when the reprocessor is cancelled is dropped and its message
//! left unacknowledged.
//!
//! Messages that do not decode as a dead-letter record are moved verbatim to the
//! permanent-failure sink. A message whose disposition could not be made durable (the
//! permanent sink or the re-route failed) is left unacknowledged and reappears after its
//! visibility timeout.

use crate::constants::dead_letter::{
    DEFAULT_BATCH_SIZE, DEFAULT_HANDLER_TIMEOUT_SECONDS, DEFAULT_MAX_RETRIES,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
};
use crate::dead_letter::handler::{handler_error_kind, HandlerResult, RecoveryHandler};
use crate::dead_letter::router::DeadLetterRouter;
use crate::error::{DeliveryError, DeliveryResult};
use crate::logging::log_dead_letter_operation;
use crate::messaging::{BrokerMessage, DeadLetterRecord, DeliveryPipeline};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runtime settings of the reprocessor
#[derive(Debug, Clone, PartialEq)]
pub struct ReprocessorConfig {
    pub max_retries: u32,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    pub handler_timeout: Duration,
    /// Dead-letter topics consumed in addition to those of registered handlers
    pub subscriptions: Vec<String>,
}

impl Default for ReprocessorConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECONDS),
            handler_timeout: Duration::from_secs(DEFAULT_HANDLER_TIMEOUT_SECONDS),
            subscriptions: Vec::new(),
        }
    }
}

/// Counters for one `process` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    /// Messages acknowledged in this pass
    pub processed: usize,
    pub recovered: usize,
    pub requeued: usize,
    pub quarantined: usize,
    pub skipped_without_handler: usize,
    pub malformed: usize,
    /// Messages read but left for redelivery
    pub unacknowledged: usize,
}

impl ProcessingSummary {
    pub fn total_read(&self) -> usize {
        self.processed + self.unacknowledged
    }

    fn merge(&mut self, other: ProcessingSummary) {
        self.processed += other.processed;
        self.recovered += other.recovered;
        self.requeued += other.requeued;
        self.quarantined += other.quarantined;
        self.skipped_without_handler += other.skipped_without_handler;
        self.malformed += other.malformed;
        self.unacknowledged += other.unacknowledged;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Recovered,
    Requeued,
    Quarantined,
    SkippedWithoutHandler,
    Malformed,
}

impl Disposition {
    fn label(self) -> &'static str {
        match self {
            Disposition::Recovered => "recovered",
            Disposition::Requeued => "requeued",
            Disposition::Quarantined => "quarantined",
            Disposition::SkippedWithoutHandler => "skipped_without_handler",
            Disposition::Malformed => "malformed",
        }
    }
}

pub struct DeadLetterReprocessor {
    pipeline: Arc<DeliveryPipeline>,
    router: Arc<DeadLetterRouter>,
    handlers: DashMap<String, Arc<dyn RecoveryHandler>>,
    config: ReprocessorConfig,
}

impl fmt::Debug for DeadLetterReprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterReprocessor")
            .field("handlers", &self.registered_topics())
            .field("config", &self.config)
            .finish()
    }
}

impl DeadLetterReprocessor {
    pub fn new(
        pipeline: Arc<DeliveryPipeline>,
        router: Arc<DeadLetterRouter>,
        config: ReprocessorConfig,
    ) -> Self {
        Self {
            pipeline,
            router,
            handlers: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &ReprocessorConfig {
        &self.config
    }

    /// Register the recovery handler for an original topic, replacing any previous one
    pub fn register_handler<H>(&self, topic: impl Into<String>, handler: H)
    where
        H: RecoveryHandler + 'static,
    {
        self.register_shared_handler(topic, Arc::new(handler));
    }

    pub fn register_shared_handler(
        &self,
        topic: impl Into<String>,
        handler: Arc<dyn RecoveryHandler>,
    ) {
        let topic = topic.into();
        debug!(topic = %topic, "Registering recovery handler");
        self.handlers.insert(topic, handler);
    }

    pub fn unregister_handler(&self, topic: &str) -> bool {
        self.handlers.remove(topic).is_some()
    }

    /// Original topics with a registered handler, sorted
    pub fn registered_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }

    /// Dead-letter topics consumed by `process`, sorted and deduplicated
    pub fn dead_letter_topics(&self) -> Vec<String> {
        let naming = self.router.topics();
        let mut topics: Vec<String> = self
            .handlers
            .iter()
            .map(|e| naming.dead_letter_topic(e.key()))
            .chain(self.config.subscriptions.iter().cloned())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Process up to `max_messages` dead-letter records
    pub async fn process(&self, max_messages: usize) -> DeliveryResult<ProcessingSummary> {
        self.process_with_cancellation(max_messages, &CancellationToken::new())
            .await
    }

    /// Process up to `max_messages` records, stopping between records once `cancel` fires
    pub async fn process_with_cancellation(
        &self,
        max_messages: usize,
        cancel: &CancellationToken,
    ) -> DeliveryResult<ProcessingSummary> {
        let mut summary = ProcessingSummary::default();

        for topic in self.dead_letter_topics() {
            let remaining = max_messages.saturating_sub(summary.total_read());
            if remaining == 0 || cancel.is_cancelled() {
                break;
            }

            let messages = self
                .pipeline
                .broker()
                .receive(&topic, remaining, self.config.visibility_timeout)
                .await?;

            for message in messages {
                if cancel.is_cancelled() {
                    // Claimed but untouched; visible again after the timeout
                    break;
                }
                summary.merge(self.process_message(message, cancel).await);
            }
        }

        if summary.total_read() > 0 {
            info!(
                processed = summary.processed,
                recovered = summary.recovered,
                requeued = summary.requeued,
                quarantined = summary.quarantined,
                skipped = summary.skipped_without_handler,
                malformed = summary.malformed,
                unacknowledged = summary.unacknowledged,
                "♻️ Dead letter batch processed"
            );
        }

        Ok(summary)
    }

    async fn process_message(
        &self,
        message: BrokerMessage,
        cancel: &CancellationToken,
    ) -> ProcessingSummary {
        let mut summary = ProcessingSummary::default();

        let disposition = match self.dispose(&message, cancel).await {
            Ok(disposition) => disposition,
            Err(e) => {
                warn!(
                    dead_letter_topic = %message.topic,
                    message_id = message.message_id,
                    error = %e,
                    "Dead letter disposition failed, leaving message for redelivery"
                );
                summary.unacknowledged = 1;
                return summary;
            }
        };

        if let Err(e) = self
            .pipeline
            .broker()
            .acknowledge(&message.topic, message.message_id)
            .await
        {
            error!(
                dead_letter_topic = %message.topic,
                message_id = message.message_id,
                disposition = disposition.label(),
                error = %e,
                "Failed to acknowledge dead letter message"
            );
            summary.unacknowledged = 1;
            return summary;
        }

        summary.processed = 1;
        match disposition {
            Disposition::Recovered => summary.recovered = 1,
            Disposition::Requeued => summary.requeued = 1,
            Disposition::Quarantined => summary.quarantined = 1,
            Disposition::SkippedWithoutHandler => summary.skipped_without_handler = 1,
            Disposition::Malformed => summary.malformed = 1,
        }
        summary
    }

    async fn dispose(
        &self,
        message: &BrokerMessage,
        cancel: &CancellationToken,
    ) -> DeliveryResult<Disposition> {
        let permanent_topic = self
            .router
            .topics()
            .permanent_topic_for_dead_letter(&message.topic);

        let record = match DeadLetterRecord::from_payload(&message.payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    dead_letter_topic = %message.topic,
                    message_id = message.message_id,
                    error = %e,
                    "🧪 Malformed dead letter message, moving to permanent sink"
                );
                self.pipeline
                    .send(&permanent_topic, None, &message.payload, cancel)
                    .await?;
                return Ok(Disposition::Malformed);
            }
        };

        if record.is_exhausted(self.config.max_retries) {
            self.pipeline
                .send(
                    &permanent_topic,
                    record.correlation_id.as_deref(),
                    &message.payload,
                    cancel,
                )
                .await?;
            log_dead_letter_operation(
                "quarantine",
                &record.original_topic,
                record.correlation_id.as_deref(),
                record.retry_count,
                "moved to permanent sink",
            );
            return Ok(Disposition::Quarantined);
        }

        let Some(handler) = self
            .handlers
            .get(&record.original_topic)
            .map(|entry| Arc::clone(entry.value()))
        else {
            warn!(
                topic = %record.original_topic,
                correlation_id = ?record.correlation_id,
                "⚠️ No recovery handler registered, dropping dead letter record"
            );
            return Ok(Disposition::SkippedWithoutHandler);
        };

        match self.recover(handler.as_ref(), &record, cancel).await? {
            Ok(()) => {
                log_dead_letter_operation(
                    "recover",
                    &record.original_topic,
                    record.correlation_id.as_deref(),
                    record.retry_count,
                    "handler succeeded",
                );
                Ok(Disposition::Recovered)
            }
            Err(handler_error) => {
                let next = record.next_attempt(
                    format!("{handler_error:#}"),
                    handler_error_kind(&handler_error),
                );
                log_dead_letter_operation(
                    "requeue",
                    &next.original_topic,
                    next.correlation_id.as_deref(),
                    next.retry_count,
                    "handler failed",
                );
                self.router.route_record(next, cancel).await?;
                Ok(Disposition::Requeued)
            }
        }
    }

    /// Run a handler bounded by `handler_timeout`
    ///
    /// A timeout is a handler failure. Cancellation is an error, so the message stays
    /// unacknowledged.
    async fn recover(
        &self,
        handler: &dyn RecoveryHandler,
        record: &DeadLetterRecord,
        cancel: &CancellationToken,
    ) -> DeliveryResult<HandlerResult> {
        let timeout = self.config.handler_timeout;
        tokio::select! {
            _ = cancel.cancelled() => {
                Err(DeliveryError::cancelled(
                    format!("recover {}", record.original_topic),
                    0,
                ))
            }
            outcome = tokio::time::timeout(timeout, handler.recover(record)) => {
                Ok(outcome.unwrap_or_else(|_| {
                    warn!(
                        topic = %record.original_topic,
                        correlation_id = ?record.correlation_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "⏱️ Recovery handler timed out"
                    );
                    Err(DeliveryError::timeout(
                        &record.original_topic,
                        timeout.as_millis() as u64,
                    )
                    .into())
                }))
            }
        }
    }

    /// Hand locally stored records back to their dead-letter topics
    ///
    /// Stops at the first send failure, since the broker is evidently still unhealthy.
    /// Returns the number of records re-published; their files are removed.
    pub async fn drain_fallback(&self, max_files: usize) -> DeliveryResult<usize> {
        let store = self.router.fallback_store();
        let pending = store.pending(max_files).await.map_err(|e| {
            DeliveryError::permanent("fallback", format!("listing fallback records: {e}"))
        })?;

        let token = CancellationToken::new();
        let mut drained = 0;
        for stored in pending {
            let payload = stored.entry.record.to_payload()?;
            if let Err(e) = self
                .pipeline
                .send(
                    &stored.entry.dead_letter_topic,
                    stored.entry.record.correlation_id.as_deref(),
                    &payload,
                    &token,
                )
                .await
            {
                warn!(
                    path = %stored.path.display(),
                    error = %e,
                    "Fallback drain stopped, broker still unavailable"
                );
                break;
            }

            if let Err(e) = store.remove(&stored.path).await {
                // Re-published already; a leftover file means one duplicate later
                warn!(path = %stored.path.display(), error = %e, "Failed to remove drained fallback file");
            }
            drained += 1;
        }

        if drained > 0 {
            info!(drained = drained, "💾 Fallback records re-published");
        }
        Ok(drained)
    }

    /// Process batches every poll interval until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            topics = ?self.dead_letter_topics(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "🚀 Dead letter reprocessor started"
        );

        while !cancel.is_cancelled() {
            if let Err(e) = self.drain_fallback(self.config.batch_size).await {
                warn!(error = %e, "Fallback drain failed");
            }

            match self
                .process_with_cancellation(self.config.batch_size, &cancel)
                .await
            {
                Ok(summary) if summary.total_read() == 0 => debug!("No dead letters to process"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Dead letter batch failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("🛑 Dead letter reprocessor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::{DeadLetterTopics, FileFallbackStore};
    use crate::error::ErrorKind;
    use crate::messaging::{Envelope, InMemoryBroker, MessageBroker};
    use crate::resilience::{
        Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, RetryConfig,
        RetryPolicy, TracingMonitoringSink,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn succeed() -> crate::dead_letter::HandlerResult {
        Ok(())
    }

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        reprocessor: DeadLetterReprocessor,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(InMemoryBroker::new());
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(DeliveryPipeline::new(
            broker.clone(),
            Arc::new(Bulkhead::new("broker", BulkheadConfig::default())),
            Arc::new(CircuitBreaker::new("broker", CircuitBreakerConfig::default())),
            RetryPolicy::new(RetryConfig {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                jitter_factor: 0.0,
            }),
            Duration::from_secs(1),
            Arc::new(TracingMonitoringSink),
        ));
        let router = Arc::new(DeadLetterRouter::new(
            Arc::clone(&pipeline),
            Arc::new(FileFallbackStore::new(dir.path())),
            DeadLetterTopics::default(),
        ));
        let reprocessor = DeadLetterReprocessor::new(
            pipeline,
            router,
            ReprocessorConfig {
                max_retries: 3,
                visibility_timeout: Duration::from_millis(200),
                handler_timeout: Duration::from_millis(100),
                ..ReprocessorConfig::default()
            },
        );
        Fixture {
            broker,
            reprocessor,
            _dir: dir,
        }
    }

    async fn seed(broker: &InMemoryBroker, retry_count: u32) -> DeadLetterRecord {
        let record = DeadLetterRecord::from_failure(
            &Envelope::new("event.created", json!({"id": 1})).with_correlation_id("evt-1"),
            &DeliveryError::transient("event.created", "down"),
            retry_count,
        );
        broker
            .send("dlq.event.created", None, &record.to_payload().unwrap())
            .await
            .unwrap();
        record
    }

    #[tokio::test]
    async fn test_dead_letter_topics_include_subscriptions() {
        let mut f = fixture();
        f.reprocessor.config.subscriptions = vec!["dlq.orders".to_string()];
        f.reprocessor
            .register_handler("event.created", |_: Value| async { succeed() });
        f.reprocessor
            .register_handler("orders", |_: Value| async { succeed() });

        assert_eq!(
            f.reprocessor.dead_letter_topics(),
            vec!["dlq.event.created".to_string(), "dlq.orders".to_string()]
        );
        assert!(f.reprocessor.unregister_handler("orders"));
        assert_eq!(f.reprocessor.registered_topics(), vec!["event.created".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_failure_requeues_with_incremented_count() {
        let f = fixture();
        seed(&f.broker, 1).await;
        f.reprocessor.register_handler("event.created", |_: Value| async {
            Err(anyhow::anyhow!("search index unavailable"))
        });

        let summary = f.reprocessor.process(10).await.unwrap();
        assert_eq!(summary.requeued, 1);
        assert_eq!(summary.processed, 1);

        let remaining = f.broker.messages("dlq.event.created").await;
        assert_eq!(remaining.len(), 1);
        let requeued = DeadLetterRecord::from_payload(&remaining[0]).unwrap();
        assert_eq!(requeued.retry_count, 2);
        assert_eq!(requeued.error_kind, ErrorKind::Transient);
        assert!(requeued.error_message.contains("search index unavailable"));
    }

    #[tokio::test]
    async fn test_malformed_message_goes_to_permanent_sink() {
        let f = fixture();
        f.broker
            .send("dlq.event.created", None, &json!({"garbage": true}))
            .await
            .unwrap();
        f.reprocessor
            .register_handler("event.created", |_: Value| async { succeed() });

        let summary = f.reprocessor.process(10).await.unwrap();
        assert_eq!(summary.malformed, 1);
        assert_eq!(f.broker.depth("dlq.event.created").await, 0);
        assert_eq!(
            f.broker.messages("dlq.event.created.permanent").await,
            vec![json!({"garbage": true})]
        );
    }

    #[tokio::test]
    async fn test_failed_quarantine_leaves_message_unacknowledged() {
        let f = fixture();
        seed(&f.broker, 3).await;
        f.broker.fail_topic(
            "dlq.event.created.permanent",
            DeliveryError::transient("dlq.event.created.permanent", "down"),
        );
        f.reprocessor
            .register_handler("event.created", |_: Value| async { succeed() });

        let summary = f.reprocessor.process(10).await.unwrap();
        assert_eq!(summary.unacknowledged, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(f.broker.depth("dlq.event.created").await, 1);
    }

    #[tokio::test]
    async fn test_respects_max_messages() {
        let f = fixture();
        for _ in 0..3 {
            seed(&f.broker, 0).await;
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        f.reprocessor.register_handler("event.created", move |_: Value| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                succeed()
            }
        });

        let summary = f.reprocessor.process(2).await.unwrap();
        assert_eq!(summary.recovered, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.broker.depth("dlq.event.created").await, 1);
    }

    #[tokio::test]
    async fn test_handler_timeout_requeues_record() {
        let f = fixture();
        seed(&f.broker, 0).await;
        f.reprocessor.register_handler("event.created", |_: Value| async {
            std::future::pending::<()>().await;
            succeed()
        });

        let summary = f.reprocessor.process(10).await.unwrap();
        assert_eq!(summary.requeued, 1);

        let remaining = f.broker.messages("dlq.event.created").await;
        assert_eq!(remaining.len(), 1);
        let requeued = DeadLetterRecord::from_payload(&remaining[0]).unwrap();
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(requeued.error_kind, ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_handler_and_leaves_message() {
        let mut f = fixture();
        f.reprocessor.config.handler_timeout = Duration::from_secs(60);
        seed(&f.broker, 0).await;
        f.reprocessor.register_handler("event.created", |_: Value| async {
            std::future::pending::<()>().await;
            succeed()
        });

        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let summary = tokio::time::timeout(
            Duration::from_secs(1),
            f.reprocessor.process_with_cancellation(10, &token),
        )
        .await
        .unwrap()
        .unwrap();
        canceller.await.unwrap();

        assert_eq!(summary.unacknowledged, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(f.broker.depth("dlq.event.created").await, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let f = fixture();
        seed(&f.broker, 0).await;
        let reprocessor = Arc::new(f.reprocessor);
        reprocessor.register_handler("event.created", |_: Value| async { succeed() });

        let token = CancellationToken::new();
        let handle = {
            let reprocessor = Arc::clone(&reprocessor);
            let token = token.clone();
            tokio::spawn(async move { reprocessor.run(token).await })
        };

        while f.broker.depth("dlq.event.created").await > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
