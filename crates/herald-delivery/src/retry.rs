//! Bounded retries with full-jitter exponential backoff.
//!
//! A single [`RetryPolicy::execute`] call runs an operation until it
//! succeeds, until the classifier calls an error permanent, or until
//! `max_retries` retries have been spent. Retry `n` (0-indexed) waits a delay
//! drawn uniformly from `[0, min(max_delay, base_delay * 2^n)]`.
//!
//! ```text
//! attempt 1 ──fail──▶ sleep U(0, base)      ──▶ attempt 2
//! attempt 2 ──fail──▶ sleep U(0, 2·base)    ──▶ attempt 3
//! attempt k ──fail──▶ sleep U(0, min(max, base·2^(k-1))) ...
//! ```
//!
//! The worst case a caller can block for is `max_retries * max_delay`.

use std::{future::Future, time::Duration};

use herald_core::Clock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DeliveryError, ErrorCategory, Result};

/// Exponent ceiling; `2^20 * base` is far beyond any sane `max_delay`.
const MAX_EXPONENT: u32 = 20;

/// Retry configuration for a single delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Jitter window for the first retry; doubles for each later retry.
    pub base_delay: Duration,

    /// Ceiling for any single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The operation succeeded.
    Success,
    /// Failed with an error worth retrying.
    TransientFailure,
    /// Failed with an error that will not go away on retry.
    PermanentFailure,
}

/// Record of one attempt inside a retry loop. Lives only as long as the
/// enclosing [`RetryOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// Wait taken before this attempt started.
    pub delay_before: Duration,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Error code for failed attempts.
    pub error_code: Option<String>,
}

/// Result of [`RetryPolicy::execute`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final value or the last error.
    pub result: Result<T>,
    /// Every attempt made, in order.
    pub attempts: Vec<DeliveryAttempt>,
    /// Whether the loop stopped because retries ran out.
    pub exhausted: bool,
}

impl<T> RetryOutcome<T> {
    /// Number of attempts that reached the operation.
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }
}

impl RetryPolicy {
    /// Builds a policy from millisecond settings.
    pub fn from_millis(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Same delays, no retries. Used for the half-open probe.
    pub fn single_attempt(&self) -> Self {
        Self { max_retries: 0, ..self.clone() }
    }

    /// Attempts the loop may make, including the first.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Upper bound of the jitter window before retry `retry` (0-indexed).
    pub fn backoff_cap(&self, retry: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(retry.min(MAX_EXPONENT));
        std::cmp::min(self.base_delay.saturating_mul(multiplier), self.max_delay)
    }

    /// Wait before retry `retry` following `error`.
    ///
    /// A `Retry-After` from the endpoint replaces the jittered delay but is
    /// still capped at `max_delay`.
    pub fn delay_for(&self, retry: u32, error: &DeliveryError) -> Duration {
        if let Some(seconds) = error.retry_after_seconds() {
            return std::cmp::min(Duration::from_secs(seconds), self.max_delay);
        }
        full_jitter(self.backoff_cap(retry))
    }

    /// Runs `operation` under this policy.
    ///
    /// `operation` receives the 1-based attempt number. `classify` returns
    /// `true` for errors worth retrying; a `false` ends the loop immediately.
    pub async fn execute<T, F, Fut, C>(
        &self,
        clock: &dyn Clock,
        mut operation: F,
        classify: C,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&DeliveryError) -> bool,
    {
        let total = self.total_attempts();
        let mut attempts = Vec::new();
        let mut delay = Duration::ZERO;
        let mut attempt_number = 1;

        loop {
            if attempt_number > 1 {
                clock.sleep(delay).await;
            }

            match operation(attempt_number).await {
                Ok(value) => {
                    attempts.push(DeliveryAttempt {
                        attempt_number,
                        delay_before: delay,
                        outcome: AttemptOutcome::Success,
                        error_code: None,
                    });
                    return RetryOutcome { result: Ok(value), attempts, exhausted: false };
                },
                Err(error) => {
                    let retryable = classify(&error);
                    attempts.push(DeliveryAttempt {
                        attempt_number,
                        delay_before: delay,
                        outcome: if retryable {
                            AttemptOutcome::TransientFailure
                        } else {
                            AttemptOutcome::PermanentFailure
                        },
                        error_code: Some(error.code()),
                    });

                    if !retryable {
                        debug!(
                            attempt = attempt_number,
                            error_code = %error.code(),
                            category = %ErrorCategory::from(&error),
                            "permanent delivery error, not retrying"
                        );
                        return RetryOutcome { result: Err(error), attempts, exhausted: false };
                    }

                    if attempt_number >= total {
                        warn!(
                            attempts = attempt_number,
                            error_code = %error.code(),
                            "delivery retries exhausted"
                        );
                        return RetryOutcome { result: Err(error), attempts, exhausted: true };
                    }

                    delay = self.delay_for(attempt_number - 1, &error);
                    debug!(
                        attempt = attempt_number,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error_code = %error.code(),
                        "transient delivery error, retrying"
                    );
                    attempt_number += 1;
                },
            }
        }
    }
}

/// Uniform draw from `[0, cap]` at millisecond resolution.
fn full_jitter(cap: Duration) -> Duration {
    let cap_ms = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX);
    if cap_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=cap_ms))
}
