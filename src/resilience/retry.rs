//! # Retry Policy
//!
//! Bounded exponential-backoff retries for a single operation. Only transient errors are
//! retried; anything else surfaces after the attempt that produced it. The delay after
//! attempt `n` is `min(max_delay, base_delay * 2^(n-1))` stretched by up to
//! `jitter_factor` and capped at `max_delay` again, which keeps the schedule
//! non-decreasing for any jitter factor in `[0, 1]`.

use crate::error::{DeliveryError, DeliveryResult};
use crate::resilience::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry policy wrapping one logical operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the attempt following `attempt` (1-based), without jitter
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let nanos = self
            .config
            .base_delay
            .as_nanos()
            .saturating_mul(1u128 << exponent)
            .min(self.config.max_delay.as_nanos());
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Delay before the attempt following `attempt` (1-based), with random jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, fastrand::f64())
    }

    /// Delay with an explicit jitter sample in `[0, 1)`
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        let extra = base.mul_f64(jitter.clamp(0.0, 1.0) * self.config.jitter_factor);
        base.saturating_add(extra).min(self.config.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of attempts, or
    /// `cancel` fires
    ///
    /// The operation receives the 1-based attempt number. Exhaustion returns
    /// `RetriesExhausted` wrapping the last error; cancellation (between or during
    /// attempts) returns `Cancelled` with the number of attempts started.
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> DeliveryResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = DeliveryResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(DeliveryError::cancelled(operation_name, attempt));
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DeliveryError::cancelled(operation_name, attempt));
                }
                result = operation(attempt) => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempt = attempt,
                            "♻️ Operation recovered after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_transient() {
                debug!(
                    operation = operation_name,
                    attempt = attempt,
                    error_kind = %error.kind(),
                    "Non-transient error, not retrying"
                );
                return Err(error);
            }

            if attempt >= self.config.max_attempts {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %error,
                    "❌ Retries exhausted"
                );
                return Err(DeliveryError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                operation = operation_name,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "🔁 Retrying after transient error"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DeliveryError::cancelled(operation_name, attempt));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            jitter_factor: 0.5,
        })
    }

    #[test]
    fn test_delay_schedule_doubles_and_caps() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter_factor: 0.0,
        });

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
        });

        let low = policy.delay_with_jitter(2, 0.0);
        let high = policy.delay_with_jitter(2, 0.999);
        assert_eq!(low, Duration::from_millis(200));
        assert!(high > low);
        assert!(high <= Duration::from_millis(240));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result = policy(3)
            .execute("send", &token, |_| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DeliveryError::transient("events", "broker unavailable"))
                    } else {
                        Ok("ack")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ack");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let err = policy(3)
            .execute("send", &token, |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DeliveryError::timeout("events", 10))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let err = policy(5)
            .execute("send", &token, |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DeliveryError::permanent("events", "malformed"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, DeliveryError::Permanent { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_next_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let slow = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
        });

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let err = slow
            .execute("send", &token, |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DeliveryError::transient("events", "reset"))
                }
            })
            .await
            .unwrap_err();

        canceller.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, DeliveryError::Cancelled { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let token = CancellationToken::new();
        token.cancel();

        let err = policy(3)
            .execute("send", &token, |_| async { Ok::<_, DeliveryError>(()) })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), Some(0));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
