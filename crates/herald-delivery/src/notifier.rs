//! The notification façade.
//!
//! [`Notifier::notify`] takes a domain event all the way to the chat
//! platform:
//!
//! ```text
//! event ─▶ render ─▶ redact ─▶ circuit check ─▶ rate-limit wait
//!       ─▶ retry loop { transport.send } ─▶ thread registry ─▶ mirrors
//! ```
//!
//! It never returns an error. Every failure, from missing credentials to an
//! exhausted retry budget, is folded into the returned [`DeliveryResult`].
//!
//! Threaded notifies for one conversation key run one at a time, so the
//! first message creates the thread and every later one replies to it.

use std::{collections::HashMap, sync::Arc};

use futures::future::join_all;
use herald_core::{
    ChannelRole, Clock, Event, RealClock, Severity, Terminal, ThreadHandle, TransportKind,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    circuit::{CircuitBreaker, CircuitSnapshot},
    client::HttpClient,
    config::NotifierConfig,
    error::{DeliveryError, ErrorCategory, Result},
    rate_limit::AdmissionGate,
    redact::{PatternRedactor, Redactor},
    render::{render, render_summary, RenderedMessage},
    retry::{RetryOutcome, RetryPolicy},
    threads::{NoopThreadStore, ThreadRegistry, ThreadStore},
    transport::{RichTransport, SendOptions, SendReceipt, Transport, WebhookTransport},
};

/// Reason reported for every send the notifier refuses to attempt.
pub const DISABLED_REASON: &str = "disabled";

/// How a delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The message reached the chat platform.
    Delivered,
    /// Every allowed attempt failed, or the failure was permanent.
    Failed,
    /// The transport's circuit was open; nothing was sent.
    CircuitOpen,
    /// Notifications are switched off or not configured.
    Disabled,
}

/// Outcome of a summary posted outside the thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorOutcome {
    /// Channel the summary went to.
    pub channel: ChannelRole,
    /// Whether it was delivered.
    pub success: bool,
    /// Error code when it was not.
    pub error_code: Option<String>,
}

/// Result of a notify or send call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// Whether the message was delivered.
    pub success: bool,
    /// How the delivery ended.
    pub status: DeliveryStatus,
    /// Why it did not succeed: `disabled`, or the final error message.
    pub reason: Option<String>,
    /// Stable code of the final error, e.g. `circuit_open`, `invalid_auth`.
    pub error_code: Option<String>,
    /// Transport used, if any.
    pub transport: Option<TransportKind>,
    /// Logical channel the message was routed to.
    pub channel: ChannelRole,
    /// Concrete channel the message landed in, when known.
    pub channel_id: Option<String>,
    /// Thread the message belongs to, when threaded.
    pub thread_id: Option<String>,
    /// Attempts that reached the transport. Zero when nothing was sent.
    pub attempts: u32,
    /// Whether the retry budget ran out.
    pub exhausted: bool,
    /// Summaries posted outside the thread.
    pub mirrored: Vec<MirrorOutcome>,
    /// Identifies this delivery in logs and request headers.
    pub delivery_id: Uuid,
}

impl DeliveryResult {
    fn disabled(delivery_id: Uuid, channel: ChannelRole) -> Self {
        Self {
            success: false,
            status: DeliveryStatus::Disabled,
            reason: Some(DISABLED_REASON.to_string()),
            error_code: Some(DISABLED_REASON.to_string()),
            transport: None,
            channel,
            channel_id: None,
            thread_id: None,
            attempts: 0,
            exhausted: false,
            mirrored: Vec::new(),
            delivery_id,
        }
    }

    fn from_outcome(
        delivery_id: Uuid,
        transport: TransportKind,
        channel: ChannelRole,
        outcome: &RetryOutcome<SendReceipt>,
    ) -> Self {
        let base = Self {
            success: false,
            status: DeliveryStatus::Failed,
            reason: None,
            error_code: None,
            transport: Some(transport),
            channel,
            channel_id: None,
            thread_id: None,
            attempts: outcome.attempt_count(),
            exhausted: outcome.exhausted,
            mirrored: Vec::new(),
            delivery_id,
        };
        match &outcome.result {
            Ok(receipt) => Self {
                success: true,
                status: DeliveryStatus::Delivered,
                channel_id: receipt.channel_id.clone(),
                thread_id: receipt.thread_id.clone(),
                ..base
            },
            Err(error) => Self {
                status: if matches!(error, DeliveryError::CircuitOpen { .. }) {
                    DeliveryStatus::CircuitOpen
                } else {
                    DeliveryStatus::Failed
                },
                reason: Some(error.to_string()),
                error_code: Some(error.code()),
                ..base
            },
        }
    }
}

/// Result of [`Notifier::test_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionResult {
    /// Whether the active transport answered correctly.
    pub ok: bool,
    /// Transport that was checked.
    pub transport: Option<TransportKind>,
    /// Human-readable outcome.
    pub detail: String,
    /// Error code on failure.
    pub error_code: Option<String>,
}

/// Read-only snapshot for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotifierStatus {
    /// Whether notify will attempt deliveries.
    pub enabled: bool,
    /// Active transport.
    pub transport: Option<TransportKind>,
    /// Why the notifier is disabled.
    pub disabled_reason: Option<String>,
    /// Breaker state for every transport.
    pub circuits: Vec<CircuitSnapshot>,
    /// Conversations with a live thread.
    pub open_threads: usize,
}

/// One breaker per transport, whether or not the transport is active.
#[derive(Debug)]
struct Breakers {
    rich: CircuitBreaker,
    webhook: CircuitBreaker,
}

impl Breakers {
    fn get(&self, kind: TransportKind) -> &CircuitBreaker {
        match kind {
            TransportKind::Rich => &self.rich,
            TransportKind::Webhook => &self.webhook,
        }
    }
}

/// Builds a [`Notifier`] with injected collaborators.
pub struct NotifierBuilder {
    config: NotifierConfig,
    clock: Option<Arc<dyn Clock>>,
    redactor: Option<Arc<dyn Redactor>>,
    store: Option<Arc<dyn ThreadStore>>,
    transport: Option<Arc<dyn Transport>>,
}

impl NotifierBuilder {
    /// Uses `clock` for rate limiting, backoff, cooldowns and timestamps.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the default [`PatternRedactor`].
    #[must_use]
    pub fn redactor(mut self, redactor: Arc<dyn Redactor>) -> Self {
        self.redactor = Some(redactor);
        self
    }

    /// Keeps `store` in step with the thread registry.
    #[must_use]
    pub fn thread_store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `transport` instead of the one credentials would select.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates the configuration and builds the notifier.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` for invalid settings or
    /// an HTTP client that cannot be built. Missing credentials are not an
    /// error; the notifier reports itself disabled instead.
    pub fn build(self) -> Result<Notifier> {
        let Self { config, clock, redactor, store, transport } = self;
        config.validate()?;

        let clock = clock.unwrap_or_else(|| Arc::new(RealClock::new()));
        let redactor = redactor.unwrap_or_else(|| Arc::new(PatternRedactor::new()));
        let store = store.unwrap_or_else(|| Arc::new(NoopThreadStore));

        let transport = match transport {
            Some(transport) => Some(transport),
            None if config.enabled => transport_from_config(&config)?,
            None => None,
        };
        let disabled_reason = if !config.enabled {
            Some("notifications disabled by configuration".to_string())
        } else if transport.is_none() {
            Some("no chat bot token or webhook URL configured".to_string())
        } else {
            None
        };
        let transport = transport.filter(|_| config.enabled);

        let circuit_config = config.to_circuit_config();
        let breakers = Breakers {
            rich: CircuitBreaker::new(TransportKind::Rich, circuit_config.clone(), clock.clone()),
            webhook: CircuitBreaker::new(TransportKind::Webhook, circuit_config, clock.clone()),
        };

        match (&transport, &disabled_reason) {
            (Some(transport), _) => info!(
                transport = %transport.kind(),
                config = ?config,
                "notifier ready"
            ),
            (None, Some(reason)) => warn!(reason = %reason, "notifier disabled"),
            (None, None) => {},
        }

        Ok(Notifier {
            retry_policy: config.to_retry_policy(),
            gate: AdmissionGate::new(config.min_interval(), clock.clone()),
            threads: ThreadRegistry::new(store, clock.clone()),
            transport,
            disabled_reason,
            breakers,
            redactor,
            clock,
        })
    }
}

fn transport_from_config(config: &NotifierConfig) -> Result<Option<Arc<dyn Transport>>> {
    let transport: Arc<dyn Transport> = match (config.preferred_transport(), config.bot_token()) {
        (Some(TransportKind::Rich), Some(token)) => Arc::new(RichTransport::new(
            HttpClient::new(config.to_client_config())?,
            config.api_base_url.clone(),
            token,
            config.channels.clone(),
        )),
        (Some(TransportKind::Webhook), _) => Arc::new(WebhookTransport::new(
            HttpClient::new(config.to_client_config())?,
            config.webhooks.clone(),
        )),
        _ => return Ok(None),
    };
    Ok(Some(transport))
}

/// Delivers events to the chat platform.
///
/// Construct once at startup and share behind an `Arc`; every method takes
/// `&self` and is safe to call concurrently.
pub struct Notifier {
    transport: Option<Arc<dyn Transport>>,
    disabled_reason: Option<String>,
    breakers: Breakers,
    retry_policy: RetryPolicy,
    gate: AdmissionGate,
    threads: ThreadRegistry,
    redactor: Arc<dyn Redactor>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("transport", &self.transport.as_ref().map(|t| t.kind()))
            .field("disabled_reason", &self.disabled_reason)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// Notifier with the real clock, default redactor and no thread store.
    ///
    /// # Errors
    ///
    /// See [`NotifierBuilder::build`].
    pub fn new(config: NotifierConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Starts a builder for injecting collaborators.
    pub fn builder(config: NotifierConfig) -> NotifierBuilder {
        NotifierBuilder { config, clock: None, redactor: None, store: None, transport: None }
    }

    /// Delivers `event`, threading it by conversation key when possible.
    pub async fn notify(&self, event: &Event) -> DeliveryResult {
        let delivery_id = Uuid::new_v4();
        let span = info_span!(
            "notify",
            %delivery_id,
            kind = event.kind().name(),
            conversation_key = event.conversation_key().unwrap_or(""),
        );

        async {
            let channel = event.channel();
            let Some(transport) = self.transport.as_ref() else {
                debug!("notifier disabled, dropping event");
                return DeliveryResult::disabled(delivery_id, channel);
            };

            let message = self.redactor.redact(render(event));

            let result = match event.conversation_key() {
                Some(key) if transport.supports_threads() => {
                    self.notify_threaded(transport, event, key, &message, delivery_id).await
                },
                key => {
                    if key.is_some() {
                        debug!(
                            transport = %transport.kind(),
                            "transport cannot thread, sending unthreaded"
                        );
                    }
                    let outcome = self
                        .deliver(transport, &message, channel, SendOptions::new(delivery_id))
                        .await;
                    if let (Ok(_), Some(key), Some(Terminal::Completed)) =
                        (&outcome.result, key, event.kind().terminal())
                    {
                        self.threads.clear(key).await;
                    }
                    DeliveryResult::from_outcome(delivery_id, transport.kind(), channel, &outcome)
                },
            };

            log_result(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn notify_threaded(
        &self,
        transport: &Arc<dyn Transport>,
        event: &Event,
        key: &str,
        message: &RenderedMessage,
        delivery_id: Uuid,
    ) -> DeliveryResult {
        let channel = message.channel;
        let guard = self.threads.lock_conversation(key).await;

        let existing = self.threads.get(key).await;
        let options = match &existing {
            Some(thread) => SendOptions::new(delivery_id)
                .in_thread(thread.thread_id.clone(), thread.channel_id.clone()),
            None => SendOptions::new(delivery_id),
        };

        let outcome = self.deliver(transport, message, channel, options).await;
        let mut result =
            DeliveryResult::from_outcome(delivery_id, transport.kind(), channel, &outcome);

        let Ok(receipt) = &outcome.result else {
            return result;
        };

        match &existing {
            Some(thread) => {
                self.threads.increment(key).await;
                result.thread_id = Some(thread.thread_id.clone());
            },
            None => match (&receipt.thread_id, &receipt.channel_id) {
                (Some(thread_id), Some(channel_id)) => {
                    self.threads.set(key, thread_id.clone(), channel_id.clone()).await;
                },
                _ => warn!(conversation_key = key, "delivered without a thread reference"),
            },
        }

        if event.kind().terminal() == Some(Terminal::Completed) {
            self.threads.clear(key).await;
        }
        drop(guard);

        if let Some(thread) = existing {
            result.mirrored = self.mirror(transport, event, &thread, delivery_id).await;
        }
        result
    }

    /// Posts one-line summaries of a threaded reply where people will see
    /// them: terminal events to the severity channel, critical events to
    /// alerts when the thread lives elsewhere.
    async fn mirror(
        &self,
        transport: &Arc<dyn Transport>,
        event: &Event,
        thread: &ThreadHandle,
        delivery_id: Uuid,
    ) -> Vec<MirrorOutcome> {
        let mut roles = Vec::new();
        if event.kind().terminal().is_some() {
            roles.push(ChannelRole::for_severity(event.severity()));
        }
        if event.severity() == Severity::Critical
            && !roles.contains(&ChannelRole::Alerts)
            && transport.channel_id(ChannelRole::Alerts).as_deref()
                != Some(thread.channel_id.as_str())
        {
            roles.push(ChannelRole::Alerts);
        }

        let mut mirrored = Vec::with_capacity(roles.len());
        for role in roles {
            let summary = self.redactor.redact(render_summary(event, role));
            let options = SendOptions::new(delivery_id);
            let outcome = self.deliver(transport, &summary, role, options).await;
            let error_code = outcome.result.as_ref().err().map(DeliveryError::code);
            if let Some(code) = &error_code {
                warn!(channel = %role, error_code = %code, "mirror delivery failed");
            }
            mirrored.push(MirrorOutcome {
                channel: role,
                success: error_code.is_none(),
                error_code,
            });
        }
        mirrored
    }

    /// Circuit check, admission, then the retry loop. One breaker outcome
    /// is recorded per call.
    async fn deliver(
        &self,
        transport: &Arc<dyn Transport>,
        message: &RenderedMessage,
        role: ChannelRole,
        options: SendOptions,
    ) -> RetryOutcome<SendReceipt> {
        let kind = transport.kind();
        let breaker = self.breakers.get(kind);

        let admission = match breaker.try_acquire().await {
            Ok(admission) => admission,
            Err(error) => {
                debug!(transport = %kind, "circuit open, failing fast");
                return RetryOutcome { result: Err(error), attempts: Vec::new(), exhausted: false };
            },
        };

        self.gate.admit().await;

        let policy = if admission.is_trial() {
            self.retry_policy.single_attempt()
        } else {
            self.retry_policy.clone()
        };
        let transport: &dyn Transport = transport.as_ref();
        let outcome = policy
            .execute(
                self.clock.as_ref(),
                |attempt| {
                    let options = options.clone().attempt(attempt);
                    let span =
                        info_span!("transport_send", transport = %kind, channel = %role, attempt);
                    async move { transport.send(message, role, &options).await }.instrument(span)
                },
                DeliveryError::is_retryable,
            )
            .await;

        match &outcome.result {
            Ok(_) => breaker.record_success(admission).await,
            Err(error) if ErrorCategory::from(error) == ErrorCategory::Configuration => {
                debug!(transport = %kind, "configuration error not counted against circuit");
            },
            Err(_) => breaker.record_failure(admission).await,
        }
        outcome
    }

    async fn send_unthreaded(&self, message: RenderedMessage) -> DeliveryResult {
        let delivery_id = Uuid::new_v4();
        let channel = message.channel;
        let Some(transport) = self.transport.as_ref() else {
            return DeliveryResult::disabled(delivery_id, channel);
        };
        let message = self.redactor.redact(message);
        let outcome =
            self.deliver(transport, &message, channel, SendOptions::new(delivery_id)).await;
        let result = DeliveryResult::from_outcome(delivery_id, transport.kind(), channel, &outcome);
        log_result(&result);
        result
    }

    /// Sends plain text to `channel`.
    pub async fn send_text(&self, channel: ChannelRole, text: &str) -> DeliveryResult {
        self.send_unthreaded(RenderedMessage::plain(text, channel)).await
    }

    /// Sends caller-built blocks with a text fallback to `channel`.
    pub async fn send_rich(
        &self,
        channel: ChannelRole,
        text: &str,
        blocks: Value,
    ) -> DeliveryResult {
        self.send_unthreaded(RenderedMessage::rich(text, blocks, channel)).await
    }

    /// Checks the active transport's credentials and reachability.
    pub async fn test_connection(&self) -> ConnectionResult {
        let Some(transport) = self.transport.as_ref() else {
            return ConnectionResult {
                ok: false,
                transport: None,
                detail: self.disabled_reason.clone().unwrap_or_else(|| DISABLED_REASON.to_string()),
                error_code: Some(DISABLED_REASON.to_string()),
            };
        };

        match transport.test_connection().await {
            Ok(detail) => {
                info!(transport = %transport.kind(), detail = %detail, "connection test passed");
                ConnectionResult {
                    ok: true,
                    transport: Some(transport.kind()),
                    detail,
                    error_code: None,
                }
            },
            Err(error) => {
                warn!(
                    transport = %transport.kind(),
                    error_code = %error.code(),
                    "connection test failed"
                );
                ConnectionResult {
                    ok: false,
                    transport: Some(transport.kind()),
                    detail: error.to_string(),
                    error_code: Some(error.code()),
                }
            },
        }
    }

    /// Current enablement, transport, breaker states and thread count.
    pub async fn status(&self) -> NotifierStatus {
        let circuits =
            join_all(TransportKind::ALL.iter().map(|kind| self.breakers.get(*kind).snapshot()))
                .await;
        NotifierStatus {
            enabled: self.transport.is_some(),
            transport: self.transport.as_ref().map(|transport| transport.kind()),
            disabled_reason: self.disabled_reason.clone(),
            circuits,
            open_threads: self.threads.len().await,
        }
    }

    /// Imports thread handles persisted before a restart.
    pub async fn load_threads(&self, snapshot: HashMap<String, ThreadHandle>) -> usize {
        self.threads.load_all(snapshot).await
    }

    /// Imports a JSON thread snapshot persisted before a restart.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::PersistenceError` when the snapshot does not
    /// parse.
    pub async fn load_threads_json(&self, raw: &str) -> Result<usize> {
        self.threads.load_json(raw).await
    }

    /// Thread for a conversation, if one is open.
    pub async fn thread(&self, conversation_key: &str) -> Option<ThreadHandle> {
        self.threads.get(conversation_key).await
    }

    /// Every open thread, for persisting across restarts.
    pub async fn thread_snapshot(&self) -> HashMap<String, ThreadHandle> {
        self.threads.snapshot().await
    }

    /// Ends a conversation without sending anything.
    pub async fn close_conversation(&self, conversation_key: &str) -> Option<ThreadHandle> {
        self.threads.clear(conversation_key).await
    }

    /// Breaker for `kind`.
    pub fn circuit(&self, kind: TransportKind) -> &CircuitBreaker {
        self.breakers.get(kind)
    }
}

fn log_result(result: &DeliveryResult) {
    match result.status {
        DeliveryStatus::Delivered => info!(
            channel = %result.channel,
            attempts = result.attempts,
            thread_id = result.thread_id.as_deref().unwrap_or(""),
            "notification delivered"
        ),
        DeliveryStatus::Disabled => {},
        DeliveryStatus::CircuitOpen | DeliveryStatus::Failed => warn!(
            channel = %result.channel,
            attempts = result.attempts,
            exhausted = result.exhausted,
            error_code = result.error_code.as_deref().unwrap_or(""),
            "notification not delivered"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use herald_core::{CircuitState, EventKind, TestClock};

    use super::*;

    #[derive(Debug)]
    struct StubTransport {
        calls: AtomicU32,
        error: Option<DeliveryError>,
    }

    impl StubTransport {
        fn ok() -> Arc<Self> {
            Arc::new(Self { calls: AtomicU32::new(0), error: None })
        }

        fn failing(error: DeliveryError) -> Arc<Self> {
            Arc::new(Self { calls: AtomicU32::new(0), error: Some(error) })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Rich
        }

        fn supports_threads(&self) -> bool {
            true
        }

        async fn send(
            &self,
            _message: &RenderedMessage,
            _role: ChannelRole,
            _options: &SendOptions,
        ) -> Result<SendReceipt> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match &self.error {
                Some(error) => Err(error.clone()),
                None => Ok(SendReceipt {
                    thread_id: Some(format!("1700000000.{n:06}")),
                    channel_id: Some("C0DEFAULT".into()),
                }),
            }
        }

        async fn test_connection(&self) -> Result<String> {
            Ok("stub".into())
        }
    }

    fn config() -> NotifierConfig {
        NotifierConfig {
            min_interval_ms: 0,
            base_delay_ms: 10,
            max_delay_ms: 100,
            ..Default::default()
        }
    }

    fn notifier(config: NotifierConfig, transport: Arc<StubTransport>) -> Notifier {
        Notifier::builder(config)
            .clock(Arc::new(TestClock::new()))
            .transport(transport)
            .build()
            .unwrap()
    }

    fn event() -> Event {
        Event::new(EventKind::from_parts("wave.started", serde_json::Map::new()))
    }

    #[tokio::test]
    async fn disabled_by_configuration_sends_nothing() {
        let transport = StubTransport::ok();
        let notifier = notifier(NotifierConfig { enabled: false, ..config() }, transport.clone());

        let result = notifier.notify(&event().in_conversation("wave-1")).await;

        assert_eq!(result.status, DeliveryStatus::Disabled);
        assert_eq!(result.reason.as_deref(), Some(DISABLED_REASON));
        assert_eq!(transport.calls(), 0);
        assert!(notifier.thread("wave-1").await.is_none());

        let status = notifier.status().await;
        assert_eq!(status.circuits.len(), TransportKind::ALL.len());
        for circuit in &status.circuits {
            assert_eq!(circuit.state, CircuitState::Closed);
            assert_eq!(circuit.consecutive_failures, 0);
            assert!(circuit.opened_at.is_none());
        }
    }

    #[tokio::test]
    async fn finished_conversations_release_their_locks() {
        let notifier = notifier(config(), StubTransport::ok());
        let done = Event::from_json(&serde_json::json!({ "kind": "story_completed" }))
            .unwrap()
            .in_conversation("STORY-1");

        notifier.notify(&event().in_conversation("STORY-1")).await;
        notifier.notify(&done).await;

        assert!(notifier.thread("STORY-1").await.is_none());
        assert_eq!(notifier.threads.locked_conversations(), 0);
    }

    #[tokio::test]
    async fn missing_credentials_disable_with_reason() {
        let notifier = Notifier::builder(config()).build().unwrap();

        let status = notifier.status().await;
        assert!(!status.enabled);
        assert!(status.transport.is_none());
        assert!(status.disabled_reason.unwrap().contains("no chat bot token"));

        let connection = notifier.test_connection().await;
        assert!(!connection.ok);
        assert_eq!(connection.error_code.as_deref(), Some(DISABLED_REASON));

        let result = notifier.send_text(ChannelRole::Default, "hello").await;
        assert_eq!(result.status, DeliveryStatus::Disabled);
    }

    #[test]
    fn invalid_settings_fail_build() {
        let err = Notifier::new(NotifierConfig { circuit_threshold: 0, ..config() }).unwrap_err();
        assert!(matches!(err, DeliveryError::ConfigurationError { .. }));
    }

    #[tokio::test]
    async fn status_lists_a_circuit_per_transport() {
        let notifier = notifier(config(), StubTransport::ok());
        let status = notifier.status().await;

        assert!(status.enabled);
        assert_eq!(status.transport, Some(TransportKind::Rich));
        let kinds: Vec<_> = status.circuits.iter().map(|c| c.transport).collect();
        assert_eq!(kinds, TransportKind::ALL.to_vec());
        assert!(status.circuits.iter().all(|c| c.state == CircuitState::Closed));
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_attempts() {
        let transport = StubTransport::ok();
        let notifier = notifier(config(), transport.clone());
        notifier.circuit(TransportKind::Rich).force_state(CircuitState::Open).await;

        let result = notifier.notify(&event()).await;

        assert_eq!(result.status, DeliveryStatus::CircuitOpen);
        assert_eq!(result.error_code.as_deref(), Some("circuit_open"));
        assert_eq!(result.attempts, 0);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let transport = StubTransport::failing(DeliveryError::api("invalid_auth"));
        let notifier = notifier(config(), transport.clone());

        let result = notifier.notify(&event()).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert!(!result.exhausted);
        assert_eq!(result.error_code.as_deref(), Some("invalid_auth"));
        let snapshot = notifier.circuit(TransportKind::Rich).snapshot().await;
        assert_eq!(snapshot.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn configuration_errors_do_not_trip_the_circuit() {
        let transport = StubTransport::failing(DeliveryError::configuration("no channel"));
        let notifier = notifier(NotifierConfig { circuit_threshold: 1, ..config() }, transport);

        notifier.notify(&event()).await;

        let snapshot = notifier.circuit(TransportKind::Rich).snapshot().await;
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn result_serializes_status_in_snake_case() {
        let notifier = notifier(config(), StubTransport::ok());
        notifier.circuit(TransportKind::Rich).force_state(CircuitState::Open).await;

        let value = serde_json::to_value(notifier.notify(&event()).await).unwrap();
        assert_eq!(value["status"], "circuit_open");
        assert_eq!(value["success"], false);
    }
}
