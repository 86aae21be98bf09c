//! Thread handles, transport kinds and circuit states.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::{CoreError, Result};

/// Delivery path a message takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Token-authenticated chat API addressed by channel ID. Supports threads.
    Rich,
    /// Incoming webhook addressed by URL. No thread support.
    Webhook,
}

impl TransportKind {
    /// Both transports, in preference order.
    pub const ALL: [Self; 2] = [Self::Rich, Self::Webhook];
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rich => write!(f, "rich"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

/// State of a transport's circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without touching the network.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Link between a conversation key and the chat thread that carries it.
///
/// `thread_id` is an opaque token. Chat APIs hand out values such as
/// `1712345678.123456` that look numeric; they are kept as strings so no
/// precision is lost and equality against the remote side holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadHandle {
    /// Caller-supplied conversation key, e.g. a story ID.
    pub conversation_key: String,
    /// Parent message reference replies attach to.
    #[serde(deserialize_with = "thread_id_from_json")]
    pub thread_id: String,
    /// Channel the thread lives in.
    pub channel_id: String,
    /// Messages sent into the thread, including the parent. Always at least 1.
    pub message_count: u32,
    /// When the parent message was posted.
    pub created_at: DateTime<Utc>,
    /// When the last reply was posted.
    pub updated_at: DateTime<Utc>,
}

impl ThreadHandle {
    /// Handle for a freshly posted parent message.
    pub fn new(
        conversation_key: impl Into<String>,
        thread_id: impl Into<String>,
        channel_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_key: conversation_key.into(),
            thread_id: thread_id.into(),
            channel_id: channel_id.into(),
            message_count: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Parses a persisted `conversation_key -> handle` snapshot.
///
/// The conversation key inside each handle is taken from the map key so the
/// two can never disagree.
pub fn parse_thread_snapshot(raw: &str) -> Result<HashMap<String, ThreadHandle>> {
    #[derive(Deserialize)]
    struct StoredHandle {
        #[serde(deserialize_with = "thread_id_from_json")]
        thread_id: String,
        channel_id: String,
        #[serde(default = "one")]
        message_count: u32,
        created_at: DateTime<Utc>,
        #[serde(default)]
        updated_at: Option<DateTime<Utc>>,
    }

    fn one() -> u32 {
        1
    }

    let stored: HashMap<String, StoredHandle> = serde_json::from_str(raw)?;
    stored
        .into_iter()
        .map(|(key, handle)| {
            if handle.thread_id.is_empty() {
                return Err(CoreError::invalid(format!("thread for `{key}` has an empty id")));
            }
            let thread = ThreadHandle {
                conversation_key: key.clone(),
                thread_id: handle.thread_id,
                channel_id: handle.channel_id,
                message_count: handle.message_count.max(1),
                created_at: handle.created_at,
                updated_at: handle.updated_at.unwrap_or(handle.created_at),
            };
            Ok((key, thread))
        })
        .collect()
}

/// Accepts a thread ID stored either as a string or as a bare JSON number.
fn thread_id_from_json<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Box::<RawValue>::deserialize(deserializer)?;
    thread_id_text(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("thread_id must be a string or number, got {raw}"))
    })
}

/// Text of a thread ID as it appeared on the wire.
///
/// Numbers are taken from the source text rather than parsed, so
/// `1712345678.000100` keeps its trailing zeros.
pub fn thread_id_text(raw: &RawValue) -> Option<String> {
    let text = raw.get().trim();
    match text.as_bytes().first()? {
        b'"' => serde_json::from_str(text).ok(),
        b'-' | b'0'..=b'9' => Some(text.to_string()),
        _ => None,
    }
}
