//! Error types for notification delivery.
//!
//! Every failure a transport can report is a [`DeliveryError`]. The notifier
//! never returns these to its caller directly; they are classified for retry
//! and circuit breaker decisions and then folded into a
//! [`DeliveryResult`](crate::notifier::DeliveryResult).

use std::fmt;

use herald_core::TransportKind;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Chat API error codes that will not succeed on retry: bad or revoked
/// credentials, missing permissions, unknown destinations.
const PERMANENT_API_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "no_permission",
    "missing_scope",
    "not_allowed_token_type",
    "channel_not_found",
    "not_in_channel",
    "is_archived",
    "user_not_found",
];

/// Errors raised while delivering a notification.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Connection could not be established or was dropped.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Request took longer than the configured timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Endpoint asked us to slow down.
    #[error("rate limited by chat platform")]
    RateLimited {
        /// Seconds to wait, when the endpoint said so
        retry_after_seconds: Option<u64>,
    },

    /// HTTP 4xx other than 429.
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// HTTP 5xx.
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Chat API answered `ok: false`.
    #[error("chat api error: {code}")]
    ApiError {
        /// Error code reported by the API, e.g. `channel_not_found`
        code: String,
    },

    /// Transport's circuit breaker rejected the call.
    #[error("circuit breaker open for {transport} transport")]
    CircuitOpen {
        /// Transport whose circuit is open
        transport: TransportKind,
    },

    /// Transport cannot serve the request as configured.
    #[error("invalid notifier configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// A thread persistence hook failed.
    #[error("thread persistence failed: {message}")]
    PersistenceError {
        /// Message from the durable store
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a rate limit error.
    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a chat API error from its error code.
    pub fn api(code: impl Into<String>) -> Self {
        Self::ApiError { code: code.into() }
    }

    /// Creates a circuit open error.
    pub fn circuit_open(transport: TransportKind) -> Self {
        Self::CircuitOpen { transport }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceError { message: message.into() }
    }

    /// Whether the same request could succeed if sent again.
    ///
    /// Authentication, authorization and not-found failures are permanent and
    /// fail fast. Timeouts, rate limits, server errors and transient network
    /// errors are retried. Circuit, configuration and persistence errors are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::ServerError { .. } => true,

            Self::ClientError { status_code, .. } => !matches!(status_code, 401 | 403 | 404 | 410),

            Self::ApiError { code } => !PERMANENT_API_CODES.contains(&code.as_str()),

            Self::CircuitOpen { .. }
            | Self::ConfigurationError { .. }
            | Self::PersistenceError { .. } => false,
        }
    }

    /// Delay the endpoint asked for, if any.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => *retry_after_seconds,
            _ => None,
        }
    }

    /// Stable error code surfaced to callers.
    ///
    /// Chat API errors report the API's own code.
    pub fn code(&self) -> String {
        match self {
            Self::NetworkError { .. } => "network_error".to_string(),
            Self::Timeout { .. } => "timeout".to_string(),
            Self::RateLimited { .. } => "rate_limited".to_string(),
            Self::ClientError { status_code, .. } => format!("http_{status_code}"),
            Self::ServerError { status_code, .. } => format!("http_{status_code}"),
            Self::ApiError { code } => code.clone(),
            Self::CircuitOpen { .. } => "circuit_open".to_string(),
            Self::ConfigurationError { .. } => "configuration_error".to_string(),
            Self::PersistenceError { .. } => "persistence_error".to_string(),
        }
    }
}

/// Category of delivery error for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// Rejected request: 4xx or API error code.
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Rate limiting.
    RateLimit,
    /// Circuit breaker protection.
    Circuit,
    /// Configuration problems.
    Configuration,
    /// Durable thread store.
    Persistence,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } | DeliveryError::ApiError { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::CircuitOpen { .. } => Self::Circuit,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::PersistenceError { .. } => Self::Persistence,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Circuit => write!(f, "circuit"),
            Self::Configuration => write!(f, "configuration"),
            Self::Persistence => write!(f, "persistence"),
        }
    }
}
