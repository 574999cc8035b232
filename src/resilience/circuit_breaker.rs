//! # Circuit Breaker Implementation
//!
//! Provides fault isolation for one logical dependency (one broker connection).
//! Classic three-state breaker: Closed (normal operation), Open (failing fast), and
//! Half-Open (a single trial call tests recovery).
//!
//! All state lives behind one mutex so that the half-open single-trial rule holds under
//! concurrency: of any number of callers racing through `allow()` after the reset timeout,
//! exactly one is let through.
//!
//! Callers that hold on to the [`CircuitAdmission`] returned by [`CircuitBreaker::admit`]
//! and report through [`CircuitBreaker::settle`] get the stricter rule: only the trial
//! itself can close or re-open a half-open breaker. Outcomes of calls admitted before the
//! breaker opened are counted but decide nothing.

use crate::error::{DeliveryError, DeliveryResult};
use crate::resilience::{
    CircuitBreakerConfig, CircuitBreakerMetrics, MonitoringSink, TracingMonitoringSink,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - one trial call allowed
    HalfOpen,
}

impl CircuitState {
    /// Numeric form for gauges (0=closed, 1=open, 2=half-open)
    pub fn gauge_value(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Ticket for one call let through by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitAdmission {
    trial: Option<u64>,
}

impl CircuitAdmission {
    /// Whether this call is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

/// How an admitted call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// Ended without a verdict (cancelled)
    Abandoned,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// Id of the most recent half-open trial
    trial_id: u64,
    metrics: CircuitBreakerMetrics,
}

impl BreakerInner {
    /// Whether an outcome reported with `admission` decides the half-open trial
    ///
    /// Untracked outcomes (`None`) are taken as the trial's.
    fn decides_trial(&self, admission: Option<CircuitAdmission>) -> bool {
        match admission {
            None => self.trial_in_flight,
            Some(admission) => self.trial_in_flight && admission.trial == Some(self.trial_id),
        }
    }

    fn open(&mut self) -> CircuitState {
        let from = self.state;
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.trial_in_flight = false;
        self.metrics.times_opened += 1;
        from
    }

    fn close(&mut self) -> CircuitState {
        let from = self.state;
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.trial_in_flight = false;
        self.consecutive_failures = 0;
        from
    }
}

/// Circuit breaker guarding one dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    /// State, counters and timestamps under one lock
    inner: Mutex<BreakerInner>,

    /// Observer for state transitions
    sink: Arc<dyn MonitoringSink>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker that reports transitions through tracing
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_sink(name, config, Arc::new(TracingMonitoringSink))
    }

    /// Create a new circuit breaker reporting transitions to the given sink
    pub fn with_sink(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        sink: Arc<dyn MonitoringSink>,
    ) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                trial_id: 0,
                metrics: CircuitBreakerMetrics::new(),
            }),
            sink,
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may proceed right now
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open and admits the
    /// caller as its single trial. While that trial is outstanding every other caller is
    /// rejected exactly as if the breaker were open.
    pub fn allow(&self) -> bool {
        self.admit().is_some()
    }

    /// Like [`allow`](Self::allow), returning the ticket to [`settle`](Self::settle) with
    pub fn admit(&self) -> Option<CircuitAdmission> {
        let mut transition = None;
        let admission = {
            let mut inner = self.inner.lock();
            let admission = match inner.state {
                CircuitState::Closed => Some(CircuitAdmission { trial: None }),
                CircuitState::Open => {
                    let elapsed = inner
                        .opened_at
                        .map(|opened| opened.elapsed() >= self.config.reset_timeout)
                        .unwrap_or(true);
                    if elapsed {
                        inner.state = CircuitState::HalfOpen;
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        Some(Self::start_trial(&mut inner))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        None
                    } else {
                        Some(Self::start_trial(&mut inner))
                    }
                }
            };

            if admission.is_some() {
                inner.metrics.total_calls += 1;
            } else {
                inner.metrics.rejected_count += 1;
            }
            admission
        };

        if let Some((from, to)) = transition {
            info!(
                component = %self.name,
                "🟡 Circuit breaker half-open (testing recovery)"
            );
            self.sink.record_state_transition(&self.name, from, to);
        }

        admission
    }

    fn start_trial(inner: &mut BreakerInner) -> CircuitAdmission {
        inner.trial_in_flight = true;
        inner.trial_id += 1;
        CircuitAdmission {
            trial: Some(inner.trial_id),
        }
    }

    /// Like [`admit`](Self::admit), returning `CircuitOpen` on rejection
    pub fn check(&self) -> DeliveryResult<CircuitAdmission> {
        match self.admit() {
            Some(admission) => Ok(admission),
            None => {
                debug!(component = %self.name, "Circuit breaker rejected call");
                Err(DeliveryError::circuit_open(&self.name))
            }
        }
    }

    /// Report how the call behind `admission` ended
    pub fn settle(&self, admission: CircuitAdmission, outcome: CallOutcome) {
        match outcome {
            CallOutcome::Success => self.on_success(Some(admission)),
            CallOutcome::Failure => self.on_failure(Some(admission)),
            CallOutcome::Abandoned => self.on_abandoned(Some(admission)),
        }
    }

    /// Record a successful protected call
    ///
    /// While half-open the success is taken as the trial's and closes the breaker.
    pub fn record_success(&self) {
        self.on_success(None);
    }

    /// Record a failed protected call
    pub fn record_failure(&self) {
        self.on_failure(None);
    }

    /// Release an admitted call that ended without a verdict (cancelled)
    ///
    /// Counters are untouched; a half-open trial slot is freed for the next caller.
    pub fn record_abandoned(&self) {
        self.on_abandoned(None);
    }

    fn on_success(&self, admission: Option<CircuitAdmission>) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.metrics.success_count += 1;

            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                CircuitState::HalfOpen if inner.decides_trial(admission) => {
                    Some((inner.close(), CircuitState::Closed))
                }
                CircuitState::HalfOpen | CircuitState::Open => {
                    debug!(component = %self.name, state = %inner.state, "Stale success ignored");
                    None
                }
            }
        };

        if let Some((from, to)) = transition {
            info!(component = %self.name, "🟢 Circuit breaker closed (recovered)");
            self.sink.record_state_transition(&self.name, from, to);
        }
    }

    fn on_failure(&self, admission: Option<CircuitAdmission>) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.metrics.failure_count += 1;

            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        Some((inner.open(), CircuitState::Open, inner.consecutive_failures))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen if inner.decides_trial(admission) => {
                    inner.consecutive_failures += 1;
                    Some((inner.open(), CircuitState::Open, inner.consecutive_failures))
                }
                CircuitState::HalfOpen | CircuitState::Open => None,
            }
        };

        if let Some((from, to, consecutive_failures)) = transition {
            error!(
                component = %self.name,
                consecutive_failures = consecutive_failures,
                failure_threshold = self.config.failure_threshold,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "🔴 Circuit breaker opened (failing fast)"
            );
            self.sink.record_state_transition(&self.name, from, to);
        }
    }

    fn on_abandoned(&self, admission: Option<CircuitAdmission>) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.decides_trial(admission) {
            inner.trial_in_flight = false;
        }
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let from = self.inner.lock().open();
        if from != CircuitState::Open {
            self.sink
                .record_state_transition(&self.name, from, CircuitState::Open);
        }
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let from = self.inner.lock().close();
        if from != CircuitState::Closed {
            self.sink
                .record_state_transition(&self.name, from, CircuitState::Closed);
        }
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let mut snapshot = inner.metrics.clone();
        snapshot.current_state = inner.state;
        snapshot.consecutive_failures = u64::from(inner.consecutive_failures);

        let completed = snapshot.success_count + snapshot.failure_count;
        if completed > 0 {
            snapshot.failure_rate = snapshot.failure_count as f64 / completed as f64;
        }

        snapshot
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        let metrics = self.metrics();
        if metrics.current_state != CircuitState::Closed {
            return false;
        }

        if metrics.total_calls < 10 {
            // Too few calls to judge
            return true;
        }

        metrics.is_healthy()
    }
}
