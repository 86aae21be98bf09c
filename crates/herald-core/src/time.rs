//! Clock abstraction for the delivery pipeline.
//!
//! Every timing decision in the notifier (rate-limit admission, backoff
//! sleeps, circuit cooldowns, thread timestamps) is taken through a [`Clock`]
//! so tests can drive the whole engine on virtual time.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use chrono::{DateTime, Utc};

/// Boxed sleep future returned by [`Clock::sleep`].
pub type Sleep<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Source of monotonic time, wall-clock time and sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant used for interval arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock time used for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Suspends the caller for `duration`.
    fn sleep(&self, duration: Duration) -> Sleep<'_>;

    /// Wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Production clock backed by the OS and the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock for deterministic tests.
///
/// Sleeping advances the clock instead of waiting, so a retry sequence with
/// multi-second backoff completes instantly while still observing the
/// delays. Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    slept_ns: Arc<AtomicU64>,
    base_instant: Instant,
    base_system: SystemTime,
}

impl TestClock {
    /// Creates a test clock anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock anchored at `start`.
    pub fn with_start_time(start: SystemTime) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            slept_ns: Arc::new(AtomicU64::new(0)),
            base_instant: Instant::now(),
            base_system: start,
        }
    }

    /// Moves time forward without recording it as sleep.
    pub fn advance(&self, duration: Duration) {
        self.elapsed_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }

    /// Total time spent in [`Clock::sleep`] across all clones.
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        self.base_system + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        self.slept_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
