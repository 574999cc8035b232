//! # Delivery Pipeline
//!
//! Protected broker send used by every outbound path: the publisher, the dead letter
//! router, and republishing recovery handlers. Each call goes through, strictly in this
//! order:
//!
//! 1. `Bulkhead::acquire` (may wait, may fail with `ResourceExhausted`)
//! 2. `CircuitBreaker::check` (fails fast with `CircuitOpen`)
//! 3. `RetryPolicy::execute` around the raw broker send, each attempt bounded by the
//!    per-attempt send timeout
//! 4. `CircuitBreaker::settle` with the admission from step 2
//! 5. bulkhead release, on every exit path, by dropping the permit
//!
//! The pipeline never dead-letters. Whatever fails here is returned to the caller, which
//! keeps the dead letter router free of recursion.

use crate::error::{DeliveryError, DeliveryResult, ErrorKind};
use crate::messaging::broker::{BrokerAck, MessageBroker};
use crate::resilience::{
    Bulkhead, CallOutcome, CircuitAdmission, CircuitBreaker, MonitoringSink, RetryPolicy,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Settles a breaker admission exactly once
///
/// A call dropped before reporting an outcome (its future was cancelled) releases a
/// half-open trial slot instead of leaving the breaker stuck.
struct BreakerAdmission<'a> {
    breaker: &'a CircuitBreaker,
    ticket: CircuitAdmission,
    settled: bool,
}

impl<'a> BreakerAdmission<'a> {
    fn settle(mut self, error: Option<&DeliveryError>) {
        self.settled = true;
        let outcome = match error {
            None => CallOutcome::Success,
            Some(e) if e.kind() == ErrorKind::Cancelled => CallOutcome::Abandoned,
            Some(_) => CallOutcome::Failure,
        };
        self.breaker.settle(self.ticket, outcome);
    }
}

impl Drop for BreakerAdmission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.ticket, CallOutcome::Abandoned);
        }
    }
}

/// Bulkhead, breaker and retry composed around one broker
#[derive(Debug, Clone)]
pub struct DeliveryPipeline {
    broker: Arc<dyn MessageBroker>,
    bulkhead: Arc<Bulkhead>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    send_timeout: Duration,
    sink: Arc<dyn MonitoringSink>,
}

impl DeliveryPipeline {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        bulkhead: Arc<Bulkhead>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        send_timeout: Duration,
        sink: Arc<dyn MonitoringSink>,
    ) -> Self {
        Self {
            broker,
            bulkhead,
            breaker,
            retry,
            send_timeout,
            sink,
        }
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    pub fn bulkhead(&self) -> &Arc<Bulkhead> {
        &self.bulkhead
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn monitoring_sink(&self) -> &Arc<dyn MonitoringSink> {
        &self.sink
    }

    /// Send `payload` to `topic` through the protection chain
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> DeliveryResult<BrokerAck> {
        let _permit = match self.bulkhead.acquire(cancel).await {
            Ok(permit) => permit,
            Err(error) => {
                debug!(topic = topic, error = %error, "Bulkhead refused send");
                return Err(error);
            }
        };

        let ticket = match self.breaker.check() {
            Ok(ticket) => ticket,
            Err(error) => {
                self.sink.record_rejection(self.breaker.name(), error.kind());
                return Err(error);
            }
        };
        let admission = BreakerAdmission {
            breaker: &self.breaker,
            ticket,
            settled: false,
        };

        let started = Instant::now();
        let broker = &self.broker;
        let send_timeout = self.send_timeout;
        let result = self
            .retry
            .execute(topic, cancel, move |_attempt| async move {
                match tokio::time::timeout(send_timeout, broker.send(topic, key, payload)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(DeliveryError::timeout(
                        topic,
                        send_timeout.as_millis() as u64,
                    )),
                }
            })
            .await;

        admission.settle(result.as_ref().err());
        self.sink
            .record_publish(topic, result.is_ok(), started.elapsed());

        if let Err(error) = &result {
            warn!(
                topic = topic,
                error_kind = %error.kind(),
                attempts = error.attempts(),
                error = %error,
                "📭 Broker send failed"
            );
        }
        result
    }
}
