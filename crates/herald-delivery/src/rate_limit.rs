//! Minimum-interval admission for outbound sends.
//!
//! Every delivery passes the gate once, before its retry loop starts.
//! Callers reserve the next free slot under a short lock and then sleep
//! outside it, so concurrent callers queue up one interval apart without
//! holding the lock while they wait.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use herald_core::Clock;
use tokio::sync::Mutex;
use tracing::debug;

/// Spaces sends at least `min_interval` apart.
#[derive(Debug)]
pub struct AdmissionGate {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    next_slot: Mutex<Option<Instant>>,
}

impl AdmissionGate {
    /// Creates a gate. A zero interval admits everything immediately.
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { min_interval, clock, next_slot: Mutex::new(None) }
    }

    /// Configured spacing.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits for this caller's slot and returns how long it waited.
    pub async fn admit(&self) -> Duration {
        if self.min_interval.is_zero() {
            return Duration::ZERO;
        }

        let wait = {
            let mut next_slot = self.next_slot.lock().await;
            let now = self.clock.now();
            let slot = match *next_slot {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next_slot = Some(slot + self.min_interval);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
            debug!(wait_ms, "rate limit wait");
            self.clock.sleep(wait).await;
        }
        wait
    }
}
