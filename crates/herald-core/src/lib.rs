//! Core domain types for the herald notifier.
//!
//! Defines the events the orchestration portal reports, the thread handles
//! that group related messages, and the clock abstraction the delivery
//! engine runs on. Nothing in this crate touches the network.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{ChannelRole, Event, EventKind, GateStatus, Severity, Terminal};
pub use models::{
    parse_thread_snapshot, thread_id_text, CircuitState, ThreadHandle, TransportKind,
};
pub use time::{Clock, RealClock, TestClock};
