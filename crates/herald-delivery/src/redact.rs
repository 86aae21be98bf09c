//! Secret scrubbing applied to every outbound message.
//!
//! Agent output ends up in notifications verbatim, and agents handle
//! credentials. Everything that leaves the process passes a [`Redactor`]
//! first: the text fallback and every string nested inside the blocks.

use std::fmt;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::{
    error::{DeliveryError, Result},
    render::RenderedMessage,
};

/// Replacement for a masked secret.
pub const REDACTED: &str = "[REDACTED]";

/// Built-in credential shapes and their replacements.
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    // Chat bot, user and app tokens.
    (r"xox[abeoprs]-[A-Za-z0-9-]{10,}", REDACTED),
    (r"xapp-[A-Za-z0-9-]{10,}", REDACTED),
    (r"https://hooks\.slack\.com/services/[A-Za-z0-9_/-]+", REDACTED),
    // GitHub tokens.
    (r"gh[pousr]_[A-Za-z0-9]{36,}", REDACTED),
    (r"github_pat_[A-Za-z0-9_]{22,}", REDACTED),
    // LLM provider style keys.
    (r"sk-(?:ant-|proj-)?[A-Za-z0-9_-]{20,}", REDACTED),
    // AWS access key IDs.
    (r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b", REDACTED),
    (r"(?i)\b(bearer)\s+[A-Za-z0-9._~+/=-]{8,}", "$1 [REDACTED]"),
    (
        r#"(?i)\b(password|passwd|secret|token|api_key|apikey|access_key)\s*([=:])\s*[^\s"',;]+"#,
        "$1$2[REDACTED]",
    ),
];

/// Removes credential-shaped substrings from a message.
///
/// Implementations must be pure: same input, same output, no I/O.
pub trait Redactor: Send + Sync + fmt::Debug {
    /// Returns the message with secrets masked.
    fn redact(&self, message: RenderedMessage) -> RenderedMessage;
}

/// Regex-based [`Redactor`].
#[derive(Clone)]
pub struct PatternRedactor {
    patterns: Vec<(Regex, String)>,
}

impl fmt::Debug for PatternRedactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRedactor").field("patterns", &self.patterns.len()).finish()
    }
}

impl PatternRedactor {
    /// Redactor with the built-in credential patterns.
    pub fn new() -> Self {
        let patterns = BUILTIN_PATTERNS
            .iter()
            .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
                Ok(regex) => Some((regex, (*replacement).to_string())),
                Err(e) => {
                    warn!(pattern, error = %e, "skipping invalid redaction pattern");
                    None
                },
            })
            .collect();
        Self { patterns }
    }

    /// Adds a pattern whose matches are replaced with `[REDACTED]`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the pattern does not
    /// compile.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            DeliveryError::configuration(format!("invalid redaction pattern `{pattern}`: {e}"))
        })?;
        self.patterns.push((regex, REDACTED.to_string()));
        Ok(self)
    }

    /// Masks secrets in a single string.
    pub fn redact_str(&self, input: &str) -> String {
        let mut output = input.to_string();
        for (regex, replacement) in &self.patterns {
            if regex.is_match(&output) {
                output = regex.replace_all(&output, replacement.as_str()).into_owned();
            }
        }
        output
    }

    fn redact_value(&self, value: &mut Value) {
        match value {
            Value::String(text) => *text = self.redact_str(text),
            Value::Array(items) => items.iter_mut().for_each(|item| self.redact_value(item)),
            Value::Object(map) => map.values_mut().for_each(|item| self.redact_value(item)),
            Value::Null | Value::Bool(_) | Value::Number(_) => {},
        }
    }
}

impl Default for PatternRedactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor for PatternRedactor {
    fn redact(&self, mut message: RenderedMessage) -> RenderedMessage {
        message.text = self.redact_str(&message.text);
        if let Some(blocks) = message.blocks.as_mut() {
            self.redact_value(blocks);
        }
        message
    }
}
