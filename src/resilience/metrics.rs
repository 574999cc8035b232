//! # Delivery Metrics
//!
//! Circuit breaker counters and the optional monitoring sink. Sinks observe circuit state
//! transitions, publish outcomes and latency, dead-letter routing and fallback writes.
//! They are side effects only: nothing in the delivery path reads them back, so running
//! without a real sink never changes behavior.

use crate::error::ErrorKind;
use crate::resilience::CircuitState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls that were allowed through
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls
    pub failure_count: u64,

    /// Calls rejected without invoking the protected operation
    pub rejected_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Number of open transitions since creation
    pub times_opened: u64,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
            times_opened: 0,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Failures: {} | Rejected: {} | Failure rate: {:.1}%",
            self.current_state,
            self.total_calls,
            self.failure_count,
            self.rejected_count,
            self.failure_rate * 100.0
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for delivery observations
pub trait MonitoringSink: Send + Sync + std::fmt::Debug {
    /// Record circuit breaker state transition
    fn record_state_transition(&self, component: &str, from: CircuitState, to: CircuitState);

    /// Record the outcome and latency of one publish through the pipeline
    fn record_publish(&self, topic: &str, success: bool, latency: Duration);

    /// Record a record routed to a dead-letter topic
    fn record_dead_letter(&self, original_topic: &str, error_kind: ErrorKind);

    /// Record a record written to local fallback storage
    fn record_fallback(&self, original_topic: &str);

    /// Record an admission or breaker rejection
    fn record_rejection(&self, component: &str, error_kind: ErrorKind);
}

/// Sink that turns observations into tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitoringSink;

impl MonitoringSink for TracingMonitoringSink {
    fn record_state_transition(&self, component: &str, from: CircuitState, to: CircuitState) {
        tracing::info!(
            component = component,
            from_state = %from,
            to_state = %to,
            "Circuit breaker state transition"
        );
    }

    fn record_publish(&self, topic: &str, success: bool, latency: Duration) {
        tracing::debug!(
            topic = topic,
            success = success,
            latency_ms = latency.as_millis() as u64,
            "Publish observed"
        );
    }

    fn record_dead_letter(&self, original_topic: &str, error_kind: ErrorKind) {
        tracing::debug!(
            topic = original_topic,
            error_kind = %error_kind,
            "Dead letter observed"
        );
    }

    fn record_fallback(&self, original_topic: &str) {
        tracing::debug!(topic = original_topic, "Fallback write observed");
    }

    fn record_rejection(&self, component: &str, error_kind: ErrorKind) {
        tracing::debug!(
            component = component,
            error_kind = %error_kind,
            "Rejection observed"
        );
    }
}

/// Point-in-time copy of the counters kept by [`InMemoryMonitoringSink`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryMetricsSnapshot {
    pub publish_success: u64,
    pub publish_failure: u64,
    pub total_latency: Duration,
    pub dead_letters_by_topic: HashMap<String, u64>,
    pub dead_letters_by_kind: HashMap<ErrorKind, u64>,
    pub fallback_writes: u64,
    pub rejections: u64,
    pub transitions: Vec<(String, CircuitState, CircuitState)>,
}

impl DeliveryMetricsSnapshot {
    /// Average publish latency across every observed publish
    pub fn average_latency(&self) -> Duration {
        let total = self.publish_success + self.publish_failure;
        if total == 0 {
            return Duration::ZERO;
        }
        self.total_latency / total as u32
    }

    /// Total dead-lettered records across topics
    pub fn total_dead_letters(&self) -> u64 {
        self.dead_letters_by_topic.values().sum()
    }
}

/// Counting sink, useful for health endpoints and tests
#[derive(Debug, Default)]
pub struct InMemoryMonitoringSink {
    publish_success: AtomicU64,
    publish_failure: AtomicU64,
    total_latency_micros: AtomicU64,
    dead_letters_by_topic: DashMap<String, u64>,
    dead_letters_by_kind: DashMap<ErrorKind, u64>,
    fallback_writes: AtomicU64,
    rejections: AtomicU64,
    transitions: parking_lot::Mutex<Vec<(String, CircuitState, CircuitState)>>,
}

impl InMemoryMonitoringSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current counters
    pub fn snapshot(&self) -> DeliveryMetricsSnapshot {
        DeliveryMetricsSnapshot {
            publish_success: self.publish_success.load(Ordering::Relaxed),
            publish_failure: self.publish_failure.load(Ordering::Relaxed),
            total_latency: Duration::from_micros(self.total_latency_micros.load(Ordering::Relaxed)),
            dead_letters_by_topic: self
                .dead_letters_by_topic
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            dead_letters_by_kind: self
                .dead_letters_by_kind
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            fallback_writes: self.fallback_writes.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            transitions: self.transitions.lock().clone(),
        }
    }
}

impl MonitoringSink for InMemoryMonitoringSink {
    fn record_state_transition(&self, component: &str, from: CircuitState, to: CircuitState) {
        self.transitions
            .lock()
            .push((component.to_string(), from, to));
    }

    fn record_publish(&self, _topic: &str, success: bool, latency: Duration) {
        if success {
            self.publish_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publish_failure.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_dead_letter(&self, original_topic: &str, error_kind: ErrorKind) {
        *self
            .dead_letters_by_topic
            .entry(original_topic.to_string())
            .or_insert(0) += 1;
        *self.dead_letters_by_kind.entry(error_kind).or_insert(0) += 1;
    }

    fn record_fallback(&self, _original_topic: &str) {
        self.fallback_writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejection(&self, _component: &str, _error_kind: ErrorKind) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_metrics_creation() {
        let metrics = CircuitBreakerMetrics::new();

        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.current_state, CircuitState::Closed);
        assert!(metrics.is_healthy());
    }

    #[test]
    fn test_metrics_health_calculation() {
        let mut metrics = CircuitBreakerMetrics::new();

        metrics.failure_rate = 0.05;
        assert!(metrics.is_healthy());

        metrics.failure_rate = 0.15;
        assert!(!metrics.is_healthy());

        metrics.current_state = CircuitState::Open;
        metrics.failure_rate = 0.0;
        assert!(!metrics.is_healthy());

        metrics.current_state = CircuitState::HalfOpen;
        assert!(metrics.is_healthy());
    }

    #[test]
    fn test_in_memory_sink_counts() {
        let sink = InMemoryMonitoringSink::new();

        sink.record_publish("event.created", true, Duration::from_millis(4));
        sink.record_publish("event.created", false, Duration::from_millis(8));
        sink.record_dead_letter("event.created", ErrorKind::Transient);
        sink.record_dead_letter("event.created", ErrorKind::CircuitOpen);
        sink.record_fallback("event.created");
        sink.record_state_transition("broker", CircuitState::Closed, CircuitState::Open);

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.publish_success, 1);
        assert_eq!(snapshot.publish_failure, 1);
        assert_eq!(snapshot.average_latency(), Duration::from_millis(6));
        assert_eq!(snapshot.total_dead_letters(), 2);
        assert_eq!(
            snapshot.dead_letters_by_kind.get(&ErrorKind::CircuitOpen),
            Some(&1)
        );
        assert_eq!(snapshot.fallback_writes, 1);
        assert_eq!(
            snapshot.transitions,
            vec![(
                "broker".to_string(),
                CircuitState::Closed,
                CircuitState::Open
            )]
        );
    }
}
