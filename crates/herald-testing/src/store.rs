//! Thread store that records hook calls.

use async_trait::async_trait;
use herald_core::ThreadHandle;
use herald_delivery::{DeliveryError, Result, ThreadStore};
use tokio::sync::Mutex;

/// A hook call seen by [`RecordingThreadStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `on_thread_created`.
    Created {
        /// Conversation key.
        key: String,
        /// Handle passed to the hook.
        handle: ThreadHandle,
    },
    /// `on_thread_updated`.
    Updated {
        /// Conversation key.
        key: String,
        /// Handle passed to the hook.
        handle: ThreadHandle,
    },
}

/// Records every hook call; optionally fails each one after recording it.
#[derive(Debug, Default)]
pub struct RecordingThreadStore {
    calls: Mutex<Vec<StoreCall>>,
    fail: bool,
}

impl RecordingThreadStore {
    /// Store whose hooks succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose hooks record and then fail.
    pub fn failing() -> Self {
        Self { calls: Mutex::new(Vec::new()), fail: true }
    }

    /// Calls so far, in order.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().await.clone()
    }

    /// The most recent handle passed to any hook for `key`.
    pub async fn latest(&self, key: &str) -> Option<ThreadHandle> {
        self.calls.lock().await.iter().rev().find_map(|call| match call {
            StoreCall::Created { key: k, handle } | StoreCall::Updated { key: k, handle }
                if k == key =>
            {
                Some(handle.clone())
            },
            _ => None,
        })
    }

    async fn record(&self, call: StoreCall) -> Result<()> {
        self.calls.lock().await.push(call);
        if self.fail {
            return Err(DeliveryError::persistence("recording store set to fail"));
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for RecordingThreadStore {
    async fn on_thread_created(&self, key: &str, handle: &ThreadHandle) -> Result<()> {
        self.record(StoreCall::Created { key: key.to_string(), handle: handle.clone() }).await
    }

    async fn on_thread_updated(&self, key: &str, handle: &ThreadHandle) -> Result<()> {
        self.record(StoreCall::Updated { key: key.to_string(), handle: handle.clone() }).await
    }
}
