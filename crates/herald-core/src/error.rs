//! Error types for event parsing and snapshot import.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while turning caller input into domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input did not have the expected shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JSON could not be parsed.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates an invalid input error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
