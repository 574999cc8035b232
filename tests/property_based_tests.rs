mod common;

use common::strategies::*;
use event_delivery::dead_letter::FileFallbackStore;
use event_delivery::messaging::{DeadLetterRecord, Envelope};
use event_delivery::resilience::{
    Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy,
};
use event_delivery::{DeliveryError, ErrorKind};
use proptest::prelude::*;
use std::cell::Cell;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

proptest! {
    /// Property: Backoff never shrinks between attempts and never exceeds the cap
    #[test]
    fn retry_delays_are_non_decreasing_and_capped(config in retry_config_strategy()) {
        let policy = RetryPolicy::new(config.clone());
        let mut previous = Duration::ZERO;
        for attempt in 1..=16 {
            let delay = policy.base_delay_for_attempt(attempt);
            prop_assert!(delay >= previous, "attempt {} delay {:?} < {:?}", attempt, delay, previous);
            prop_assert!(delay <= config.max_delay);
            previous = delay;
        }
    }

    /// Property: Jitter only lengthens a delay, by at most the configured fraction
    #[test]
    fn jittered_delay_stays_within_bounds(
        config in retry_config_strategy(),
        attempt in 1u32..12,
        jitter in 0.0f64..1.0,
    ) {
        let policy = RetryPolicy::new(config.clone());
        let base = policy.base_delay_for_attempt(attempt).as_secs_f64();
        let delay = policy.delay_with_jitter(attempt, jitter).as_secs_f64();
        let spread = base * config.jitter_factor;

        prop_assert!(delay <= config.max_delay.as_secs_f64() + 1e-9);
        prop_assert!(delay >= base - 1e-9);
        prop_assert!(delay <= base + spread + 1e-9);
    }

    /// Property: A permanently failing operation runs exactly `max_attempts` times
    #[test]
    fn retry_executes_at_most_max_attempts(max_attempts in 1u32..6) {
        let policy = RetryPolicy::new(event_delivery::resilience::RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter_factor: 0.0,
        });
        let calls = Cell::new(0u32);

        let result: Result<(), DeliveryError> = tokio_test::block_on(policy.execute(
            "property",
            &CancellationToken::new(),
            |_attempt| {
                calls.set(calls.get() + 1);
                async { Err(DeliveryError::transient("topic", "down")) }
            },
        ));

        prop_assert_eq!(calls.get(), max_attempts);
        let err = result.unwrap_err();
        prop_assert_eq!(err.attempts(), Some(max_attempts));
        prop_assert_eq!(err.kind(), ErrorKind::Transient);
    }

    /// Property: The breaker opens exactly at the failure threshold
    #[test]
    fn breaker_opens_exactly_at_threshold(threshold in 1u32..20) {
        let breaker = CircuitBreaker::new(
            "property",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(60),
            },
        );

        for _ in 1..threshold {
            breaker.record_failure();
            prop_assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure();
        prop_assert_eq!(breaker.state(), CircuitState::Open);
        prop_assert!(!breaker.allow());
    }

    /// Property: A success resets the consecutive failure count
    #[test]
    fn breaker_success_resets_failure_streak(threshold in 2u32..20) {
        let breaker = CircuitBreaker::new(
            "property",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(60),
            },
        );

        for _ in 0..3 {
            for _ in 1..threshold {
                breaker.record_failure();
            }
            breaker.record_success();
        }
        prop_assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Property: With every slot held and the queue full, the next caller is rejected
    #[test]
    fn bulkhead_rejects_beyond_queue_capacity(max_concurrent in 1usize..5, max_queue in 0usize..5) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let bulkhead = std::sync::Arc::new(Bulkhead::new(
                "property",
                BulkheadConfig { max_concurrent, max_queue, max_wait: None },
            ));
            let cancel = CancellationToken::new();

            let mut held = Vec::new();
            for _ in 0..max_concurrent {
                held.push(bulkhead.acquire(&cancel).await.unwrap());
            }

            let mut waiters = Vec::new();
            for _ in 0..max_queue {
                let bulkhead = bulkhead.clone();
                let cancel = cancel.clone();
                waiters.push(tokio::spawn(async move { bulkhead.acquire(&cancel).await.map(drop) }));
            }
            while bulkhead.snapshot().queued < max_queue {
                tokio::task::yield_now().await;
            }

            let rejected = bulkhead.acquire(&cancel).await;
            assert!(matches!(rejected, Err(DeliveryError::ResourceExhausted { .. })));
            assert_eq!(bulkhead.snapshot().in_flight, max_concurrent);

            drop(held);
            for waiter in waiters {
                assert!(waiter.await.unwrap().is_ok());
            }
            assert_eq!(bulkhead.snapshot().in_flight, 0);
        });
    }

    /// Property: Every correlation id maps to one file directly inside the fallback directory
    #[test]
    fn fallback_paths_stay_inside_directory(id in correlation_id_strategy()) {
        let store = FileFallbackStore::new("/var/lib/fallback");
        let path = store.path_for(Some(&id));

        prop_assert_eq!(path.parent(), Some(store.directory()));
        let name = path.file_name().and_then(|n| n.to_str()).unwrap();
        prop_assert!(name.ends_with(".json"));
        prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
        prop_assert!(!name.starts_with('.'));
    }

    /// Property: Requeued records keep their identity and count attempts
    #[test]
    fn next_attempt_preserves_identity(
        topic in topic_strategy(),
        payload in payload_strategy(),
        retry_count in 0u32..100,
    ) {
        let envelope = Envelope::new(topic.clone(), payload.clone()).ensure_correlation_id();
        let record = DeadLetterRecord::from_failure(
            &envelope,
            &DeliveryError::circuit_open("broker"),
            retry_count,
        );
        let next = record.next_attempt("handler failed", ErrorKind::Transient);

        prop_assert_eq!(next.retry_count, retry_count + 1);
        prop_assert_eq!(&next.original_topic, &topic);
        prop_assert_eq!(&next.original_payload, &payload);
        prop_assert_eq!(next.first_failure_time, record.first_failure_time);
        prop_assert_eq!(&next.correlation_id, &record.correlation_id);
        prop_assert!(next.last_failure_time >= record.last_failure_time);
    }
}
