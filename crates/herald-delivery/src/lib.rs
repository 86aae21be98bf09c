//! Outbound notification delivery for the wave orchestration portal.
//!
//! This crate turns domain events into chat messages and gets them to the
//! chat platform despite rate limits, flaky networks and outages.
//!
//! # Architecture
//!
//! [`Notifier`] is the single entry point. Each notify call runs the same
//! pipeline:
//!
//! 1. **Render** - Event becomes a text fallback plus rich blocks
//! 2. **Redact** - Credential-shaped substrings are masked
//! 3. **Circuit Check** - The transport's breaker may fail the call fast
//! 4. **Admission** - Sends are spaced by a minimum interval
//! 5. **Retry** - Transient failures back off with full jitter
//! 6. **Threading** - Replies join the conversation's thread
//!
//! Two transports sit underneath: the token-authenticated chat API, which
//! supports threads, and incoming webhooks, which do not.
//!
//! # Example
//!
//! ```no_run
//! use herald_core::{Event, EventKind};
//! use herald_delivery::{Notifier, NotifierConfig};
//!
//! # async fn example() -> herald_delivery::Result<()> {
//! let notifier = Notifier::new(NotifierConfig::default())?;
//! let event = Event::new(EventKind::WaveStarted { wave_id: "w-1".into(), story_count: 4 })
//!     .in_conversation("wave-w-1");
//!
//! let result = notifier.notify(&event).await;
//! println!("delivered: {}", result.success);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod client;
pub mod config;
pub mod error;
pub mod notifier;
pub mod rate_limit;
pub mod redact;
pub mod render;
pub mod retry;
pub mod threads;
pub mod transport;

pub use circuit::{Admission, CircuitBreaker, CircuitConfig, CircuitSnapshot};
pub use client::{ClientConfig, HttpClient};
pub use config::{NotifierConfig, RoleTargets};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use notifier::{
    ConnectionResult, DeliveryResult, DeliveryStatus, MirrorOutcome, Notifier, NotifierBuilder,
    NotifierStatus,
};
pub use rate_limit::AdmissionGate;
pub use redact::{PatternRedactor, Redactor};
pub use render::{render, render_summary, RenderedMessage};
pub use retry::{RetryOutcome, RetryPolicy};
pub use threads::{ConversationGuard, NoopThreadStore, ThreadRegistry, ThreadStore};
pub use transport::{RichTransport, SendOptions, SendReceipt, Transport, WebhookTransport};
