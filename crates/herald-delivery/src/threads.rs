//! Conversation key to chat thread index.
//!
//! The registry is the in-memory source of truth for which thread a
//! conversation lives in. A durable store can follow along through the
//! [`ThreadStore`] hooks, and hand the handles back at startup through
//! [`ThreadRegistry::load_all`].
//!
//! Handles never expire; a conversation's entry lives until the caller
//! clears it. Per-conversation locks are different: one exists only while
//! somebody holds or waits for it.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use async_trait::async_trait;
use herald_core::{parse_thread_snapshot, Clock, ThreadHandle};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{DeliveryError, Result};

/// Durable store kept in step with the registry.
///
/// Hook failures are logged and otherwise ignored; they never fail the
/// delivery that triggered them.
#[async_trait]
pub trait ThreadStore: Send + Sync + fmt::Debug {
    /// Called after a new thread was registered.
    async fn on_thread_created(&self, conversation_key: &str, handle: &ThreadHandle) -> Result<()>;

    /// Called after a reply was counted.
    async fn on_thread_updated(&self, conversation_key: &str, handle: &ThreadHandle) -> Result<()>;
}

/// Store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopThreadStore;

#[async_trait]
impl ThreadStore for NoopThreadStore {
    async fn on_thread_created(&self, _: &str, _: &ThreadHandle) -> Result<()> {
        Ok(())
    }

    async fn on_thread_updated(&self, _: &str, _: &ThreadHandle) -> Result<()> {
        Ok(())
    }
}

type ConversationLocks = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Exclusive hold on one conversation. Releasing the last interest in a
/// conversation drops its lock entry.
#[derive(Debug)]
pub struct ConversationGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: ConversationLocks,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        // Waiters clone the entry under the map lock, so a count of one
        // after releasing means nobody else is interested.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// In-memory thread index with persistence hooks.
#[derive(Debug)]
pub struct ThreadRegistry {
    threads: Mutex<HashMap<String, ThreadHandle>>,
    conversation_locks: ConversationLocks,
    store: Arc<dyn ThreadStore>,
    clock: Arc<dyn Clock>,
}

impl ThreadRegistry {
    /// Creates an empty registry.
    pub fn new(store: Arc<dyn ThreadStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            conversation_locks: Arc::default(),
            store,
            clock,
        }
    }

    /// Handle for `key`, if the conversation has a thread.
    pub async fn get(&self, key: &str) -> Option<ThreadHandle> {
        self.threads.lock().await.get(key).cloned()
    }

    /// Registers the thread a conversation's first message created.
    pub async fn set(
        &self,
        key: &str,
        thread_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> ThreadHandle {
        let handle = ThreadHandle::new(key, thread_id, channel_id, self.clock.now_utc());
        let replaced = self.threads.lock().await.insert(key.to_string(), handle.clone());
        if replaced.is_some() {
            warn!(conversation_key = key, "replaced existing thread handle");
        }
        debug!(conversation_key = key, thread_id = %handle.thread_id, "thread created");

        if let Err(e) = self.store.on_thread_created(key, &handle).await {
            warn!(conversation_key = key, error = %e, "thread store create hook failed");
        }
        handle
    }

    /// Counts one more message in `key`'s thread.
    ///
    /// Returns `None` when the conversation has no thread.
    pub async fn increment(&self, key: &str) -> Option<ThreadHandle> {
        let now = self.clock.now_utc();
        let handle = {
            let mut threads = self.threads.lock().await;
            let handle = threads.get_mut(key)?;
            handle.message_count = handle.message_count.saturating_add(1);
            handle.updated_at = now;
            handle.clone()
        };

        if let Err(e) = self.store.on_thread_updated(key, &handle).await {
            warn!(conversation_key = key, error = %e, "thread store update hook failed");
        }
        Some(handle)
    }

    /// Drops `key` from the index. The durable record is left alone.
    pub async fn clear(&self, key: &str) -> Option<ThreadHandle> {
        let removed = self.threads.lock().await.remove(key);
        if removed.is_some() {
            debug!(conversation_key = key, "thread cleared");
        }
        removed
    }

    /// Bulk-imports handles persisted by an earlier process.
    ///
    /// Entries already known in memory win over the snapshot. Hooks are not
    /// called for imported handles. Returns how many were imported.
    pub async fn load_all(&self, snapshot: HashMap<String, ThreadHandle>) -> usize {
        let mut threads = self.threads.lock().await;
        let mut imported = 0;
        for (key, mut handle) in snapshot {
            if handle.thread_id.is_empty() || threads.contains_key(&key) {
                continue;
            }
            handle.conversation_key.clone_from(&key);
            handle.message_count = handle.message_count.max(1);
            threads.insert(key, handle);
            imported += 1;
        }
        debug!(imported, total = threads.len(), "thread snapshot loaded");
        imported
    }

    /// Parses a JSON snapshot and imports it.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::PersistenceError` when the snapshot does not
    /// parse.
    pub async fn load_json(&self, raw: &str) -> Result<usize> {
        let snapshot = parse_thread_snapshot(raw)
            .map_err(|e| DeliveryError::persistence(format!("invalid thread snapshot: {e}")))?;
        Ok(self.load_all(snapshot).await)
    }

    /// Copy of every handle, for exporting.
    pub async fn snapshot(&self) -> HashMap<String, ThreadHandle> {
        self.threads.lock().await.clone()
    }

    /// Number of open threads.
    pub async fn len(&self) -> usize {
        self.threads.lock().await.len()
    }

    /// Whether no conversation has a thread.
    pub async fn is_empty(&self) -> bool {
        self.threads.lock().await.is_empty()
    }

    /// Serializes work on one conversation.
    ///
    /// Hold the guard across lookup, send and registry update so two
    /// concurrent first messages cannot both create a thread.
    pub async fn lock_conversation(&self, key: &str) -> ConversationGuard {
        let lock = {
            let mut locks = self.conversation_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.to_string()).or_default().clone()
        };
        ConversationGuard {
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: self.conversation_locks.clone(),
        }
    }

    /// Conversations that currently have a lock entry.
    pub fn locked_conversations(&self) -> usize {
        self.conversation_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
