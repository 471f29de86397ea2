//! C12 — Session lock manager: per-conversation exclusive execution.
//!
//! Every externally-invoked use case acquires an exclusive lock keyed by
//! conversation id for its entire flow (§4.C12). Locks are created lazily on
//! first use; a periodic cleanup removes currently-unheld locks once the
//! table passes a soft cap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::ConversationId;

/// Soft cap on tracked locks before `cleanup_unheld` is worth calling (§4.C12).
pub const SOFT_CAP: usize = 10_000;

#[derive(Default)]
pub struct SessionLockManager {
    locks: Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>,
}

impl SessionLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, conversation_id: &ConversationId) -> Arc<AsyncMutex<()>> {
        let mut table = self.locks.lock().expect("session lock table poisoned");
        table
            .entry(conversation_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the exclusive lock for `conversation_id`. Held for the whole
    /// use-case flow; within one conversation this enforces strict FIFO by
    /// arrival (§5).
    pub async fn acquire(&self, conversation_id: &ConversationId) -> OwnedMutexGuard<()> {
        let lock = self.get_or_create(conversation_id);
        lock.lock_owned().await
    }

    pub fn tracked_count(&self) -> usize {
        self.locks.lock().expect("session lock table poisoned").len()
    }

    /// Drop table entries that are both unheld and past `SOFT_CAP` in total
    /// count. `Arc::strong_count == 1` means only the table holds a reference,
    /// i.e. no in-flight use case currently owns that conversation's lock.
    pub fn cleanup_unheld(&self) -> usize {
        let mut table = self.locks.lock().expect("session lock table poisoned");
        if table.len() <= SOFT_CAP {
            return 0;
        }
        let before = table.len();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - table.len()
    }
}
