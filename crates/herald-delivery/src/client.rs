//! Shared HTTP client for both transports.
//!
//! Owns the connection pool and timeouts, and turns HTTP-level failures into
//! [`DeliveryError`]s so retry and circuit breaker decisions can be made
//! without looking at raw responses.

use std::{collections::HashMap, time::Duration};

use reqwest::{header::HeaderMap, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DeliveryError, Result};

/// Largest response body kept in full.
const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Error bodies are cut to this size before they land in an error.
const MAX_ERROR_BODY_SIZE: usize = 1024;

/// Retry-After used when the header is present but unparseable.
const DEFAULT_RETRY_AFTER: u64 = 60;

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Redirects followed before giving up.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("herald/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 3,
        }
    }
}

/// Response to a successful (2xx) request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated if oversized.
    pub body: String,
    /// Round-trip time.
    pub duration: Duration,
}

impl HttpResponse {
    /// Parses the body as JSON straight from the response text.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ApiError` with code `invalid_response` when the
    /// body is not JSON of the expected shape.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            warn!(error = %e, "response body is not JSON");
            DeliveryError::api("invalid_response")
        })
    }
}

/// Pooled HTTP client used by the transports.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpClient {
    /// Builds a client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if reqwest rejects the
    /// settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Posts a JSON body and classifies the response.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the request exceeds the configured timeout
    /// - `NetworkError` for connection failures
    /// - `RateLimited` for 429, carrying `Retry-After` when present
    /// - `ClientError` for other 4xx
    /// - `ServerError` for 5xx
    pub async fn post_json(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        body: &Value,
        delivery_id: Uuid,
        attempt: u32,
    ) -> Result<HttpResponse> {
        let start_time = std::time::Instant::now();

        let mut request = self
            .client
            .post(url)
            .json(body)
            .header("X-Herald-Delivery-Id", delivery_id.to_string())
            .header("X-Herald-Delivery-Attempt", attempt.to_string());
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                // Webhook URLs embed their secret.
                let e = e.without_url();
                warn!(
                    duration_ms = millis(start_time.elapsed()),
                    error = %e,
                    "request failed"
                );
                if e.is_timeout() {
                    return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                }
                if e.is_connect() {
                    return Err(DeliveryError::network(format!("connection failed: {e}")));
                }
                return Err(DeliveryError::network(e.to_string()));
            },
        };

        let duration = start_time.elapsed();
        let status = response.status();
        debug!(
            status = status.as_u16(),
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "received response"
        );

        let retry_after = extract_retry_after_seconds(&extract_headers(response.headers()));
        let body = read_body(response).await;

        match status {
            s if s.is_success() => Ok(HttpResponse { status_code: s.as_u16(), body, duration }),
            StatusCode::TOO_MANY_REQUESTS => Err(DeliveryError::rate_limited(retry_after)),
            s if s.is_server_error() => {
                Err(DeliveryError::server_error(s.as_u16(), truncate(&body, MAX_ERROR_BODY_SIZE)))
            },
            s => Err(DeliveryError::client_error(s.as_u16(), truncate(&body, MAX_ERROR_BODY_SIZE))),
        }
    }
}

async fn read_body(response: Response) -> String {
    match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
            format!("{}... (truncated)", String::from_utf8_lossy(&bytes[..MAX_ERROR_BODY_SIZE]))
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(error = %e, "failed to read response body");
            format!("[failed to read response body: {e}]")
        },
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

/// Lower-cased header map.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(key, value)| {
            value.to_str().ok().map(|value| (key.as_str().to_lowercase(), value.to_string()))
        })
        .collect()
}

/// Extracts the retry-after delay from response headers.
///
/// Supports both the seconds form and the HTTP-date form. A header that
/// parses as neither yields a 60 second default.
pub fn extract_retry_after_seconds<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
) -> Option<u64> {
    let retry_after = headers.get("retry-after")?.trim();

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(date_time) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let now = chrono::Utc::now();
        let retry_time = date_time.with_timezone(&chrono::Utc);
        if retry_time > now {
            if let Ok(wait) = retry_time.signed_duration_since(now).to_std() {
                return Some(wait.as_secs());
            }
        }
        return Some(0);
    }

    Some(DEFAULT_RETRY_AFTER)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
