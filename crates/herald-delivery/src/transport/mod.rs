//! Delivery paths to the chat platform.
//!
//! A [`Transport`] performs exactly one network call per `send`. Retries,
//! circuit breaking and rate limiting all live above it in the notifier, so
//! both implementations share one reliability layer.

use std::fmt;

use async_trait::async_trait;
use herald_core::{ChannelRole, TransportKind};
use uuid::Uuid;

use crate::{error::Result, render::RenderedMessage};

pub mod rich;
pub mod webhook;

pub use rich::RichTransport;
pub use webhook::WebhookTransport;

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    /// Parent message to reply to. Ignored by transports without threads.
    pub thread_id: Option<String>,
    /// Concrete channel that overrides the role's configured channel, e.g.
    /// the channel an existing thread lives in.
    pub channel_id: Option<String>,
    /// Identifies the logical delivery across retries.
    pub delivery_id: Uuid,
    /// 1-based attempt number within the delivery.
    pub attempt: u32,
}

impl SendOptions {
    /// Options for a top-level message.
    pub fn new(delivery_id: Uuid) -> Self {
        Self { thread_id: None, channel_id: None, delivery_id, attempt: 1 }
    }

    /// Reply in `thread_id`, posted to `channel_id`.
    #[must_use]
    pub fn in_thread(
        mut self,
        thread_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        self.thread_id = Some(thread_id.into());
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Same options for another attempt.
    #[must_use]
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// What a successful send reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Reference for replies. Always `None` for transports without threads.
    pub thread_id: Option<String>,
    /// Channel the message landed in, when the transport knows it.
    pub channel_id: Option<String>,
}

/// One way of getting a message to the chat platform.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Whether sends return a thread reference and accept replies.
    fn supports_threads(&self) -> bool;

    /// Channel ID a role resolves to, for transports addressed by channel.
    fn channel_id(&self, role: ChannelRole) -> Option<String> {
        let _ = role;
        None
    }

    /// Sends one message to the destination configured for `role`.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the single network call, or
    /// `ConfigurationError` when `role` has no destination.
    async fn send(
        &self,
        message: &RenderedMessage,
        role: ChannelRole,
        options: &SendOptions,
    ) -> Result<SendReceipt>;

    /// Checks credentials and reachability. Returns a human-readable detail.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the check.
    async fn test_connection(&self) -> Result<String>;
}
