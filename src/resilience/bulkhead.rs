//! # Bulkhead (Admission Limiter)
//!
//! Bounds concurrent in-flight operations with a semaphore and bounds the number of
//! callers waiting for a slot with a ledger kept under a mutex. A caller that finds the
//! waiting queue full is rejected immediately with `ResourceExhausted`; nothing is ever
//! queued without bound or silently dropped.
//!
//! Slots are released by dropping the returned [`BulkheadPermit`], so release happens on
//! every exit path, including futures dropped mid-flight.

use crate::error::{DeliveryError, DeliveryResult, ErrorKind};
use crate::resilience::{BulkheadConfig, MonitoringSink, TracingMonitoringSink};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct BulkheadLedger {
    in_flight: usize,
    queued: usize,
    rejected_total: u64,
}

/// Point-in-time view of a bulkhead's ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkheadSnapshot {
    pub in_flight: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub rejected_total: u64,
}

/// Concurrency and queue-depth limiter shared by all publishes of one publisher
#[derive(Debug)]
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    ledger: Arc<Mutex<BulkheadLedger>>,
    sink: Arc<dyn MonitoringSink>,
}

/// A held concurrency slot; dropping it releases the slot
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
    ledger: Arc<Mutex<BulkheadLedger>>,
}

impl BulkheadPermit {
    /// Release the slot now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        let mut ledger = self.ledger.lock();
        ledger.in_flight = ledger.in_flight.saturating_sub(1);
    }
}

/// Decrements the waiting count however the wait ends
struct QueueSlot {
    ledger: Arc<Mutex<BulkheadLedger>>,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        let mut ledger = self.ledger.lock();
        ledger.queued = ledger.queued.saturating_sub(1);
    }
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self::with_sink(name, config, Arc::new(TracingMonitoringSink))
    }

    pub fn with_sink(
        name: impl Into<String>,
        config: BulkheadConfig,
        sink: Arc<dyn MonitoringSink>,
    ) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            ledger: Arc::new(Mutex::new(BulkheadLedger::default())),
            config,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for a concurrency slot
    ///
    /// Fails immediately with `ResourceExhausted` when `max_queue` callers are already
    /// waiting, fails with `ResourceExhausted` when `max_wait` elapses, and fails with
    /// `Cancelled` as soon as `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> DeliveryResult<BulkheadPermit> {
        if cancel.is_cancelled() {
            return Err(DeliveryError::cancelled("bulkhead_acquire", 0));
        }

        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(self.admit(permit));
        }

        let _slot = {
            let mut ledger = self.ledger.lock();
            if ledger.queued >= self.config.max_queue {
                ledger.rejected_total += 1;
                let err = DeliveryError::ResourceExhausted {
                    component: self.name.clone(),
                    in_flight: ledger.in_flight,
                    queued: ledger.queued,
                    max_queue: self.config.max_queue,
                };
                drop(ledger);
                warn!(component = %self.name, "🚧 Bulkhead queue full, rejecting");
                self.sink
                    .record_rejection(&self.name, ErrorKind::ResourceExhausted);
                return Err(err);
            }
            ledger.queued += 1;
            QueueSlot {
                ledger: Arc::clone(&self.ledger),
            }
        };

        debug!(component = %self.name, "Waiting for bulkhead slot");

        let wait = Arc::clone(&self.semaphore).acquire_owned();
        let acquired = match self.config.max_wait {
            Some(max_wait) => tokio::select! {
                res = tokio::time::timeout(max_wait, wait) => match res {
                    Ok(permit) => permit,
                    Err(_) => return Err(self.wait_expired()),
                },
                _ = cancel.cancelled() => {
                    return Err(DeliveryError::cancelled("bulkhead_acquire", 0));
                }
            },
            None => tokio::select! {
                permit = wait => permit,
                _ = cancel.cancelled() => {
                    return Err(DeliveryError::cancelled("bulkhead_acquire", 0));
                }
            },
        };

        // The semaphore is never closed
        let permit = acquired
            .map_err(|e| DeliveryError::configuration(self.name.clone(), e.to_string()))?;
        Ok(self.admit(permit))
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        self.ledger.lock().in_flight += 1;
        BulkheadPermit {
            _permit: permit,
            ledger: Arc::clone(&self.ledger),
        }
    }

    fn wait_expired(&self) -> DeliveryError {
        let mut ledger = self.ledger.lock();
        ledger.rejected_total += 1;
        let err = DeliveryError::ResourceExhausted {
            component: self.name.clone(),
            in_flight: ledger.in_flight,
            // This caller is still counted until its queue slot drops
            queued: ledger.queued.saturating_sub(1),
            max_queue: self.config.max_queue,
        };
        drop(ledger);
        warn!(component = %self.name, "⏱️ Bulkhead wait expired, rejecting");
        self.sink
            .record_rejection(&self.name, ErrorKind::ResourceExhausted);
        err
    }

    pub fn snapshot(&self) -> BulkheadSnapshot {
        let ledger = self.ledger.lock();
        BulkheadSnapshot {
            in_flight: ledger.in_flight,
            queued: ledger.queued,
            max_concurrent: self.config.max_concurrent,
            max_queue: self.config.max_queue,
            rejected_total: ledger.rejected_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    fn bulkhead(max_concurrent: usize, max_queue: usize) -> Arc<Bulkhead> {
        Arc::new(Bulkhead::new(
            "test",
            BulkheadConfig {
                max_concurrent,
                max_queue,
                max_wait: None,
            },
        ))
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let bulkhead = bulkhead(2, 0);
        let token = CancellationToken::new();

        let first = bulkhead.acquire(&token).await.unwrap();
        let second = bulkhead.acquire(&token).await.unwrap();
        assert_eq!(bulkhead.snapshot().in_flight, 2);

        first.release();
        assert_eq!(bulkhead.snapshot().in_flight, 1);
        drop(second);
        assert_eq!(bulkhead.snapshot().in_flight, 0);
    }

    #[tokio::test]
    async fn test_rejects_when_queue_full() {
        let bulkhead = bulkhead(1, 1);
        let token = CancellationToken::new();

        let held = bulkhead.acquire(&token).await.unwrap();

        let waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            let token = token.clone();
            tokio::spawn(async move { bulkhead.acquire(&token).await.map(|_| ()) })
        };

        while bulkhead.snapshot().queued < 1 {
            sleep(Duration::from_millis(1)).await;
        }

        let rejected = bulkhead.acquire(&token).await;
        assert!(matches!(
            rejected,
            Err(DeliveryError::ResourceExhausted { queued: 1, .. })
        ));
        assert_eq!(bulkhead.snapshot().rejected_total, 1);

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(bulkhead.snapshot(), BulkheadSnapshot {
            in_flight: 0,
            queued: 0,
            max_concurrent: 1,
            max_queue: 1,
            rejected_total: 1,
        });
    }

    #[tokio::test]
    async fn test_zero_queue_rejects_immediately() {
        let bulkhead = bulkhead(1, 0);
        let token = CancellationToken::new();

        let _held = bulkhead.acquire(&token).await.unwrap();
        let err = bulkhead.acquire(&token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let bulkhead = bulkhead(1, 4);
        let token = CancellationToken::new();
        let _held = bulkhead.acquire(&token).await.unwrap();

        let waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            let token = token.clone();
            tokio::spawn(async move { bulkhead.acquire(&token).await.map(|_| ()) })
        };

        while bulkhead.snapshot().queued < 1 {
            sleep(Duration::from_millis(1)).await;
        }
        token.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(bulkhead.snapshot().queued, 0);
    }

    #[tokio::test]
    async fn test_max_wait_expires() {
        let bulkhead = Bulkhead::new(
            "test",
            BulkheadConfig {
                max_concurrent: 1,
                max_queue: 4,
                max_wait: Some(Duration::from_millis(20)),
            },
        );
        let token = CancellationToken::new();
        let _held = bulkhead.acquire(&token).await.unwrap();

        let err = bulkhead.acquire(&token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(bulkhead.snapshot().queued, 0);
    }
}
