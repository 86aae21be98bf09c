//! Circuit breaker guarding a single transport.
//!
//! Retries absorb blips inside one delivery. The breaker works across
//! deliveries: once a transport has failed `failure_threshold` deliveries in
//! a row it stops being called at all, so unrelated notifications fail fast
//! instead of queueing up behind a dead endpoint.
//!
//! # State Machine
//!
//! ```text
//!                   ┌──────────────────────────┐
//!                   │          CLOSED          │
//!                   │ ● every call allowed     │
//!                   │ ● success resets count   │
//!                   └──────────────────────────┘
//!                     │                      ▲
//!     threshold       │                      │ trial succeeds
//!     consecutive     │                      │
//!     failures        ▼                      │
//!   ┌──────────────────────────┐    ┌──────────────────────────┐
//!   │           OPEN           │    │        HALF_OPEN         │
//!   │ ● calls rejected, no I/O │───▶│ ● exactly one trial call │
//!   │                          │    │                          │
//!   └──────────────────────────┘    └──────────────────────────┘
//!          ▲        reset timeout elapsed          │
//!          └───────────────────────────────────────┘
//!                      trial fails (cooldown restarts)
//! ```
//!
//! All transitions happen under one lock, so two concurrent callers can
//! never both claim the half-open trial.
//!
//! Outcomes are reported with the [`Admission`] they were made under. Only
//! the current trial can close or reopen a half-open circuit, and a call let
//! through before the circuit last opened no longer counts once it has.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use herald_core::{CircuitState, Clock, TransportKind};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DeliveryError, Result};

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failed deliveries that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(60) }
    }
}

/// How a call was let through. Handed back when recording the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; the caller may retry as usual.
    Normal {
        /// Closed period the call was admitted in.
        generation: u64,
    },
    /// The single half-open probe; the caller gets one attempt.
    Trial {
        /// Trial number. A reissued trial gets a new one.
        trial: u64,
    },
}

impl Admission {
    /// Whether this is the half-open probe.
    pub fn is_trial(self) -> bool {
        matches!(self, Self::Trial { .. })
    }
}

/// Live breaker state.
#[derive(Debug, Clone)]
pub struct CircuitStats {
    /// Current state.
    pub state: CircuitState,
    /// Failed deliveries since the last success.
    pub consecutive_failures: u32,
    /// When the circuit last opened (monotonic).
    pub opened_at: Option<Instant>,
    /// When the circuit last opened (wall clock).
    pub opened_at_utc: Option<DateTime<Utc>>,
    /// When the outstanding half-open trial was handed out.
    pub trial_started_at: Option<Instant>,
    /// Bumped every time the circuit opens.
    pub generation: u64,
    /// Number of the most recently issued trial.
    pub trial: u64,
}

impl CircuitStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            opened_at_utc: None,
            trial_started_at: None,
            generation: 0,
            trial: 0,
        }
    }
}

/// Read-only view of a breaker for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    /// Transport the breaker guards.
    pub transport: TransportKind,
    /// Current state.
    pub state: CircuitState,
    /// Failed deliveries since the last success.
    pub consecutive_failures: u32,
    /// When the circuit last opened.
    pub opened_at: Option<DateTime<Utc>>,
}

/// Circuit breaker for one transport.
#[derive(Debug)]
pub struct CircuitBreaker {
    transport: TransportKind,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    stats: Mutex<CircuitStats>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(transport: TransportKind, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { transport, config, clock, stats: Mutex::new(CircuitStats::new()) }
    }

    /// Transport this breaker guards.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Asks to make a call.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and
    /// hands this caller the trial. A trial that never reported back is
    /// considered abandoned after another cooldown.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::CircuitOpen` when the call must not be made.
    pub async fn try_acquire(&self) -> Result<Admission> {
        let now = self.clock.now();
        let mut stats = self.stats.lock().await;

        match stats.state {
            CircuitState::Closed => Ok(Admission::Normal { generation: stats.generation }),
            CircuitState::Open => {
                let cooled_down = stats
                    .opened_at
                    .is_none_or(|opened| now.duration_since(opened) >= self.config.reset_timeout);
                if cooled_down {
                    self.transition_to_half_open(&mut stats);
                    Ok(Self::issue_trial(&mut stats, now))
                } else {
                    Err(DeliveryError::circuit_open(self.transport))
                }
            },
            CircuitState::HalfOpen => {
                let abandoned = stats.trial_started_at.is_none_or(|started| {
                    now.duration_since(started) >= self.config.reset_timeout
                });
                if abandoned {
                    Ok(Self::issue_trial(&mut stats, now))
                } else {
                    Err(DeliveryError::circuit_open(self.transport))
                }
            },
        }
    }

    /// Records a delivered message made under `admission`.
    pub async fn record_success(&self, admission: Admission) {
        let mut stats = self.stats.lock().await;
        if !self.is_current(&stats, admission) {
            return;
        }
        match admission {
            Admission::Normal { .. } => stats.consecutive_failures = 0,
            Admission::Trial { .. } => self.transition_to_closed(&mut stats),
        }
    }

    /// Records a failed delivery made under `admission`.
    pub async fn record_failure(&self, admission: Admission) {
        let now = self.clock.now();
        let mut stats = self.stats.lock().await;
        if !self.is_current(&stats, admission) {
            return;
        }
        stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);

        let trips = match admission {
            Admission::Normal { .. } => {
                stats.consecutive_failures >= self.config.failure_threshold
            },
            Admission::Trial { .. } => true,
        };
        if trips {
            self.transition_to_open(&mut stats, now);
        }
    }

    /// Whether an outcome made under `admission` may still move the state.
    fn is_current(&self, stats: &CircuitStats, admission: Admission) -> bool {
        let current = match (stats.state, admission) {
            (CircuitState::Closed, Admission::Normal { generation }) => {
                generation == stats.generation
            },
            (CircuitState::HalfOpen, Admission::Trial { trial }) => trial == stats.trial,
            _ => false,
        };
        if !current {
            debug!(
                transport = %self.transport,
                state = %stats.state,
                ?admission,
                "ignoring outcome of a call admitted before the last transition"
            );
        }
        current
    }

    fn issue_trial(stats: &mut CircuitStats, now: Instant) -> Admission {
        stats.trial = stats.trial.wrapping_add(1);
        stats.trial_started_at = Some(now);
        Admission::Trial { trial: stats.trial }
    }

    /// Current state without applying any pending transition.
    pub async fn snapshot(&self) -> CircuitSnapshot {
        let stats = self.stats.lock().await;
        CircuitSnapshot {
            transport: self.transport,
            state: stats.state,
            consecutive_failures: stats.consecutive_failures,
            opened_at: stats.opened_at_utc,
        }
    }

    /// Forces a state, for tests and operator overrides.
    pub async fn force_state(&self, state: CircuitState) {
        let now = self.clock.now();
        let mut stats = self.stats.lock().await;
        match state {
            CircuitState::Closed => self.transition_to_closed(&mut stats),
            CircuitState::Open => self.transition_to_open(&mut stats, now),
            CircuitState::HalfOpen => {
                stats.state = CircuitState::HalfOpen;
                stats.trial_started_at = None;
            },
        }
    }

    fn transition_to_open(&self, stats: &mut CircuitStats, now: Instant) {
        let reset_timeout_ms =
            u64::try_from(self.config.reset_timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(
            transport = %self.transport,
            consecutive_failures = stats.consecutive_failures,
            reset_timeout_ms,
            "circuit breaker opening"
        );
        stats.state = CircuitState::Open;
        stats.generation = stats.generation.wrapping_add(1);
        stats.opened_at = Some(now);
        stats.opened_at_utc = Some(self.clock.now_utc());
        stats.trial_started_at = None;
    }

    fn transition_to_half_open(&self, stats: &mut CircuitStats) {
        info!(transport = %self.transport, "circuit breaker half-open, allowing trial call");
        stats.state = CircuitState::HalfOpen;
    }

    fn transition_to_closed(&self, stats: &mut CircuitStats) {
        info!(transport = %self.transport, "circuit breaker closing, transport recovered");
        *stats = CircuitStats {
            generation: stats.generation,
            trial: stats.trial,
            ..CircuitStats::new()
        };
    }
}

/// Reset timeout expressed as a duration, clamped so it is never zero.
pub(crate) fn reset_timeout_from_millis(millis: u64) -> Duration {
    Duration::from_millis(millis.max(1))
}
