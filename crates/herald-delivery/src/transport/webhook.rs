//! Incoming-webhook fallback transport.
//!
//! One JSON POST of `{text, blocks}` to the URL configured for the role.
//! Webhook responses carry no message reference, so this transport cannot
//! thread; the notifier degrades threaded events to plain sends.

use async_trait::async_trait;
use herald_core::{ChannelRole, TransportKind};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::{SendOptions, SendReceipt, Transport};
use crate::{
    client::HttpClient,
    config::RoleTargets,
    error::{DeliveryError, Result},
    render::RenderedMessage,
};

/// Text posted by [`Transport::test_connection`].
const CONNECTION_TEST_TEXT: &str = "herald connection test";

/// Webhook transport.
#[derive(Debug)]
pub struct WebhookTransport {
    client: HttpClient,
    urls: RoleTargets,
}

impl WebhookTransport {
    /// Creates a transport posting to `urls`.
    pub fn new(client: HttpClient, urls: RoleTargets) -> Self {
        Self { client, urls }
    }

    fn url(&self, role: ChannelRole) -> Result<&str> {
        self.urls.resolve(role).ok_or_else(|| {
            DeliveryError::configuration(format!("no webhook URL configured for role {role}"))
        })
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Webhook
    }

    fn supports_threads(&self) -> bool {
        false
    }

    async fn send(
        &self,
        message: &RenderedMessage,
        role: ChannelRole,
        options: &SendOptions,
    ) -> Result<SendReceipt> {
        if options.thread_id.is_some() {
            debug!(channel = %role, "webhook transport ignores thread reference");
        }
        let url = self.url(role)?;
        self.client
            .post_json(url, None, &message.webhook_payload(), options.delivery_id, options.attempt)
            .await?;
        Ok(SendReceipt::default())
    }

    async fn test_connection(&self) -> Result<String> {
        let url = self.url(ChannelRole::Default)?;
        let body = json!({ "text": CONNECTION_TEST_TEXT });
        self.client.post_json(url, None, &body, Uuid::new_v4(), 1).await?;
        Ok("webhook accepted test message".to_string())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::ClientConfig;

    fn transport(server: &MockServer, alerts: bool) -> WebhookTransport {
        WebhookTransport::new(
            HttpClient::new(ClientConfig::default()).unwrap(),
            RoleTargets {
                default: Some(format!("{}/hooks/default", server.uri())),
                alerts: alerts.then(|| format!("{}/hooks/alerts", server.uri())),
                budget: None,
            },
        )
    }

    #[tokio::test]
    async fn posts_text_and_blocks_without_thread_reference() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hooks/alerts"))
            .and(matchers::body_json(json!({ "text": "boom", "blocks": [] })))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let message = RenderedMessage::rich("boom", json!([]), ChannelRole::Alerts);
        let options = SendOptions::new(Uuid::new_v4()).in_thread("1.1", "C1");
        let receipt =
            transport(&server, true).send(&message, ChannelRole::Alerts, &options).await.unwrap();

        assert_eq!(receipt, SendReceipt::default());
    }

    #[tokio::test]
    async fn missing_role_falls_back_to_default_url() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/hooks/default"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let message = RenderedMessage::plain("spend", ChannelRole::Budget);
        transport(&server, false)
            .send(&message, ChannelRole::Budget, &SendOptions::new(Uuid::new_v4()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn revoked_webhook_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
            .mount(&server)
            .await;

        let message = RenderedMessage::plain("x", ChannelRole::Default);
        let err = transport(&server, false)
            .send(&message, ChannelRole::Default, &SendOptions::new(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "http_404");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn connection_test_posts_to_default_url() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/hooks/default"))
            .and(matchers::body_json(json!({ "text": CONNECTION_TEST_TEXT })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        assert!(transport(&server, false).test_connection().await.is_ok());
    }

    #[tokio::test]
    async fn no_urls_is_a_configuration_error() {
        let transport = WebhookTransport::new(
            HttpClient::new(ClientConfig::default()).unwrap(),
            RoleTargets::default(),
        );
        let err = transport.test_connection().await.unwrap_err();
        assert!(matches!(err, DeliveryError::ConfigurationError { .. }));
    }
}
