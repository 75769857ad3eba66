//! # Outstanding correlated requests.
//!
//! [`PendingTable`] maps correlation ids to the oneshot sender that completes
//! the caller's future. The caller owns the deadline: when it gives up it calls
//! [`PendingTable::forget`], and a late response for that id becomes unmatched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{IpcError, ShardError};

type Reply = oneshot::Sender<Result<Value, ShardError>>;

/// Table of outstanding requests for one shard and one request kind.
#[derive(Default)]
pub struct PendingTable {
    counter: AtomicU64,
    entries: Mutex<HashMap<String, Reply>>,
}

impl PendingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh correlation id and stores a pending entry for it.
    ///
    /// Ids combine a per-table counter with 32 random bits, so they never
    /// repeat within a shard's lifetime and are unlikely to collide with ids
    /// from a previous execution context.
    pub fn register(&self) -> (String, oneshot::Receiver<Result<Value, ShardError>>) {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::rng().random();
        let id = format!("{seq:x}-{salt:08x}");

        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(id.clone(), tx);
        (id, rx)
    }

    /// Completes the request `id`.
    ///
    /// Returns [`IpcError::Unmatched`] if nothing is waiting for it (already
    /// timed out, or never issued).
    pub fn resolve(&self, id: &str, outcome: Result<Value, ShardError>) -> Result<(), IpcError> {
        let tx = self
            .entries
            .lock()
            .remove(id)
            .ok_or_else(|| IpcError::Unmatched { id: id.to_owned() })?;
        // Receiver gone means the caller stopped waiting; nothing to do.
        let _ = tx.send(outcome);
        Ok(())
    }

    /// Drops the entry for `id` without completing it.
    pub fn forget(&self, id: &str) {
        self.entries.lock().remove(id);
    }

    /// Fails every outstanding request with the error produced by `err`.
    ///
    /// Returns how many requests were rejected.
    pub fn reject_all(&self, err: impl Fn() -> ShardError) -> usize {
        let drained: Vec<Reply> = self.entries.lock().drain().map(|(_, tx)| tx).collect();
        let n = drained.len();
        for tx in drained {
            let _ = tx.send(Err(err()));
        }
        n
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_unique() {
        let table = PendingTable::new();
        let (a, _ra) = table.register();
        let (b, _rb) = table.register();
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn resolve_completes_the_waiter() {
        let table = PendingTable::new();
        let (id, rx) = table.register();
        table.resolve(&id, Ok(json!(5))).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), json!(5));
        assert!(table.is_empty());
    }

    #[test]
    fn late_response_is_unmatched() {
        let table = PendingTable::new();
        let (id, _rx) = table.register();
        table.forget(&id);
        let err = table.resolve(&id, Ok(Value::Null)).unwrap_err();
        assert_eq!(err.as_label(), "ipc_unmatched");
    }

    #[tokio::test]
    async fn reject_all_fails_every_waiter() {
        let table = PendingTable::new();
        let (_, r1) = table.register();
        let (_, r2) = table.register();

        assert_eq!(table.reject_all(|| ShardError::Killed { shard: 4 }), 2);
        for rx in [r1, r2] {
            let err = rx.await.unwrap().unwrap_err();
            assert_eq!(err.as_label(), "shard_killed");
        }
        assert_eq!(table.reject_all(|| ShardError::Killed { shard: 4 }), 0);
    }
}
