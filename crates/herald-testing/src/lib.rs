//! Test infrastructure for deterministic notifier tests.
//!
//! Provides a scripted transport, a recording thread store, event fixtures
//! and a [`TestEnv`] that wires them to a real [`Notifier`] on a virtual
//! clock, so retry backoff and circuit cooldowns run instantly.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use herald_delivery::{Notifier, NotifierConfig};

pub mod fixtures;
pub mod store;
pub mod transport;

pub use herald_core::TestClock;
pub use store::{RecordingThreadStore, StoreCall};
pub use transport::{
    MockResponse, MockTransport, RecordedSend, ALERTS_CHANNEL, BUDGET_CHANNEL, DEFAULT_CHANNEL,
};

/// Notifier wired to test doubles.
pub struct TestEnv {
    /// Virtual clock shared with the notifier.
    pub clock: TestClock,
    /// Transport the notifier sends through.
    pub transport: Arc<MockTransport>,
    /// Store receiving thread hooks.
    pub store: Arc<RecordingThreadStore>,
    /// Notifier under test.
    pub notifier: Notifier,
}

impl TestEnv {
    /// Rich mock transport, default test config.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts a builder.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder {
            config: test_config(),
            transport: MockTransport::rich(),
            store: RecordingThreadStore::new(),
        }
    }

    /// Moves the virtual clock forward.
    pub fn advance(&self, duration: Duration) {
        self.clock.advance(duration);
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestEnv`].
pub struct TestEnvBuilder {
    config: NotifierConfig,
    transport: MockTransport,
    store: RecordingThreadStore,
}

impl TestEnvBuilder {
    /// Replaces the notifier configuration.
    #[must_use]
    pub fn config(mut self, config: NotifierConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the transport.
    #[must_use]
    pub fn transport(mut self, transport: MockTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Replaces the thread store.
    #[must_use]
    pub fn store(mut self, store: RecordingThreadStore) -> Self {
        self.store = store;
        self
    }

    /// Builds the environment.
    ///
    /// # Panics
    ///
    /// Panics if the configuration does not validate.
    pub fn build(self) -> TestEnv {
        let clock = TestClock::new();
        let transport = Arc::new(self.transport);
        let store = Arc::new(self.store);
        let notifier = Notifier::builder(self.config)
            .clock(Arc::new(clock.clone()))
            .transport(transport.clone())
            .thread_store(store.clone())
            .build()
            .unwrap_or_else(|e| panic!("invalid test notifier config: {e}"));
        TestEnv { clock, transport, store, notifier }
    }
}

/// Config with short delays: 100 ms spacing, 100 ms base backoff, three
/// retries, circuit opening after three failed deliveries with a 1 s
/// cooldown.
pub fn test_config() -> NotifierConfig {
    NotifierConfig {
        min_interval_ms: 100,
        max_retries: 3,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
        circuit_threshold: 3,
        circuit_reset_ms: 1_000,
        ..NotifierConfig::default()
    }
}
