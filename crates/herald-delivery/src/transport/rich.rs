//! Token-authenticated chat API transport.
//!
//! Posts through `chat.postMessage`, addressed by channel ID. The message
//! timestamp the API returns is the thread reference for later replies.
//!
//! The API reports most failures as HTTP 200 with `{"ok": false, "error":
//! "<code>"}`; those surface as [`DeliveryError::ApiError`] carrying the
//! code, which [`DeliveryError::is_retryable`] classifies.

use async_trait::async_trait;
use herald_core::{thread_id_text, ChannelRole, TransportKind};
use serde::Deserialize;
use serde_json::{json, value::RawValue, Value};
use tracing::{debug, warn};

use super::{SendOptions, SendReceipt, Transport};
use crate::{
    client::HttpClient,
    config::RoleTargets,
    error::{DeliveryError, Result},
    render::RenderedMessage,
};

/// Chat API transport.
pub struct RichTransport {
    client: HttpClient,
    api_base_url: String,
    token: String,
    channels: RoleTargets,
}

impl std::fmt::Debug for RichTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RichTransport")
            .field("api_base_url", &self.api_base_url)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// Fields of a chat API response this transport reads.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<Box<RawValue>>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    team: Option<String>,
}

impl RichTransport {
    /// Creates a transport posting to `api_base_url` with `token`.
    pub fn new(
        client: HttpClient,
        api_base_url: impl Into<String>,
        token: impl Into<String>,
        channels: RoleTargets,
    ) -> Self {
        let api_base_url = api_base_url.into().trim_end_matches('/').to_string();
        Self { client, api_base_url, token: token.into(), channels }
    }

    async fn call(&self, method: &str, body: &Value, options: &SendOptions) -> Result<ApiResponse> {
        let url = format!("{}/{method}", self.api_base_url);
        let response = self
            .client
            .post_json(&url, Some(&self.token), body, options.delivery_id, options.attempt)
            .await?;

        let parsed: ApiResponse = response.json().inspect_err(|e| {
            warn!(method, error = %e, "unexpected chat api response shape");
        })?;

        if !parsed.ok {
            let code = parsed.error.unwrap_or_else(|| "unknown_error".to_string());
            debug!(method, error_code = %code, "chat api rejected request");
            return Err(DeliveryError::api(code));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Transport for RichTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rich
    }

    fn supports_threads(&self) -> bool {
        true
    }

    fn channel_id(&self, role: ChannelRole) -> Option<String> {
        self.channels.resolve(role).map(str::to_string)
    }

    async fn send(
        &self,
        message: &RenderedMessage,
        role: ChannelRole,
        options: &SendOptions,
    ) -> Result<SendReceipt> {
        let channel = options
            .channel_id
            .clone()
            .or_else(|| self.channel_id(role))
            .ok_or_else(|| {
                DeliveryError::configuration(format!("no channel configured for role {role}"))
            })?;

        let mut body = json!({ "channel": channel, "text": message.text });
        if let Some(blocks) = &message.blocks {
            body["blocks"] = blocks.clone();
        }
        if let Some(thread_id) = &options.thread_id {
            body["thread_ts"] = json!(thread_id);
        }

        let response = self.call("chat.postMessage", &body, options).await?;

        let thread_id = response.ts.as_deref().and_then(opaque_id);
        if thread_id.is_none() {
            warn!(channel = %channel, "message posted but response carried no ts");
        }
        Ok(SendReceipt { thread_id, channel_id: Some(response.channel.unwrap_or(channel)) })
    }

    async fn test_connection(&self) -> Result<String> {
        let options = SendOptions::new(uuid::Uuid::new_v4());
        let response = self.call("auth.test", &json!({}), &options).await?;
        Ok(format!(
            "authenticated as {} in {}",
            response.user.as_deref().unwrap_or("unknown user"),
            response.team.as_deref().unwrap_or("unknown workspace"),
        ))
    }
}

/// Message timestamps are opaque strings; a numeric one is kept verbatim.
fn opaque_id(raw: &RawValue) -> Option<String> {
    thread_id_text(raw).filter(|id| !id.is_empty())
}
