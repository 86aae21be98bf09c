//! Scripted in-process transport.
//!
//! Responses are taken from a queue in order; once the queue is empty every
//! send succeeds. Every call is recorded for assertions.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use herald_core::{ChannelRole, TransportKind};
use herald_delivery::{
    DeliveryError, RenderedMessage, Result, SendOptions, SendReceipt, Transport,
};
use tokio::sync::Mutex;

/// Channel ID the mock resolves the default role to.
pub const DEFAULT_CHANNEL: &str = "C0DEFAULT";
/// Channel ID the mock resolves the alerts role to.
pub const ALERTS_CHANNEL: &str = "C0ALERTS";
/// Channel ID the mock resolves the budget role to.
pub const BUDGET_CHANNEL: &str = "C0BUDGET";

/// What the next send does.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Succeed with a fresh thread reference.
    Success,
    /// Succeed without returning a thread reference.
    SuccessWithoutThread,
    /// Fail with the given error.
    Failure(DeliveryError),
}

/// One recorded call to [`Transport::send`].
#[derive(Debug, Clone)]
pub struct RecordedSend {
    /// Message as it reached the transport, after redaction.
    pub message: RenderedMessage,
    /// Role the notifier routed to.
    pub role: ChannelRole,
    /// Thread, channel and attempt details.
    pub options: SendOptions,
}

impl RecordedSend {
    /// Whether this send was a reply in an existing thread.
    pub fn is_reply(&self) -> bool {
        self.options.thread_id.is_some()
    }
}

/// In-process transport with scripted outcomes.
#[derive(Debug)]
pub struct MockTransport {
    kind: TransportKind,
    threads: bool,
    channels: HashMap<ChannelRole, String>,
    script: Mutex<VecDeque<MockResponse>>,
    sends: Mutex<Vec<RecordedSend>>,
    connection_error: Option<DeliveryError>,
    next_ts: AtomicU32,
}

impl MockTransport {
    /// Thread-capable chat API stand-in with a channel for every role.
    pub fn rich() -> Self {
        let channels = HashMap::from([
            (ChannelRole::Default, DEFAULT_CHANNEL.to_string()),
            (ChannelRole::Alerts, ALERTS_CHANNEL.to_string()),
            (ChannelRole::Budget, BUDGET_CHANNEL.to_string()),
        ]);
        Self {
            kind: TransportKind::Rich,
            threads: true,
            channels,
            script: Mutex::new(VecDeque::new()),
            sends: Mutex::new(Vec::new()),
            connection_error: None,
            next_ts: AtomicU32::new(1),
        }
    }

    /// Webhook stand-in: no threads, no channel IDs.
    pub fn webhook() -> Self {
        Self {
            kind: TransportKind::Webhook,
            threads: false,
            channels: HashMap::new(),
            ..Self::rich()
        }
    }

    /// Queues `response` for the next unscripted send.
    #[must_use]
    pub fn then(mut self, response: MockResponse) -> Self {
        self.script.get_mut().push_back(response);
        self
    }

    /// Queues `response` `times` times.
    #[must_use]
    pub fn then_times(mut self, response: MockResponse, times: usize) -> Self {
        self.script.get_mut().extend(std::iter::repeat_n(response, times));
        self
    }

    /// Makes `test_connection` fail with `error`.
    #[must_use]
    pub fn with_connection_error(mut self, error: DeliveryError) -> Self {
        self.connection_error = Some(error);
        self
    }

    /// Drops the channel mapping for `role`.
    #[must_use]
    pub fn without_channel(mut self, role: ChannelRole) -> Self {
        self.channels.remove(&role);
        self
    }

    /// Queues `response` on a shared transport.
    pub async fn push(&self, response: MockResponse) {
        self.script.lock().await.push_back(response);
    }

    /// Every send so far, in call order.
    pub async fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().await.clone()
    }

    /// Number of sends so far.
    pub async fn send_count(&self) -> usize {
        self.sends.lock().await.len()
    }

    /// Sends that were replies in an existing thread.
    pub async fn replies(&self) -> Vec<RecordedSend> {
        self.sends().await.into_iter().filter(RecordedSend::is_reply).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn supports_threads(&self) -> bool {
        self.threads
    }

    fn channel_id(&self, role: ChannelRole) -> Option<String> {
        self.channels.get(&role).cloned()
    }

    async fn send(
        &self,
        message: &RenderedMessage,
        role: ChannelRole,
        options: &SendOptions,
    ) -> Result<SendReceipt> {
        self.sends.lock().await.push(RecordedSend {
            message: message.clone(),
            role,
            options: options.clone(),
        });
        // Let concurrent notifies interleave at the network boundary.
        tokio::task::yield_now().await;

        let response = self.script.lock().await.pop_front().unwrap_or(MockResponse::Success);
        if !self.threads {
            return match response {
                MockResponse::Failure(error) => Err(error),
                _ => Ok(SendReceipt::default()),
            };
        }

        let channel_id = options
            .channel_id
            .clone()
            .or_else(|| self.channel_id(role))
            .ok_or_else(|| DeliveryError::api("channel_not_found"))?;
        match response {
            MockResponse::Success => {
                let n = self.next_ts.fetch_add(1, Ordering::SeqCst);
                Ok(SendReceipt {
                    thread_id: Some(format!("1700000000.{n:06}")),
                    channel_id: Some(channel_id),
                })
            },
            MockResponse::SuccessWithoutThread => {
                Ok(SendReceipt { thread_id: None, channel_id: Some(channel_id) })
            },
            MockResponse::Failure(error) => Err(error),
        }
    }

    async fn test_connection(&self) -> Result<String> {
        match &self.connection_error {
            Some(error) => Err(error.clone()),
            None => Ok(format!("mock {} transport ready", self.kind)),
        }
    }
}
