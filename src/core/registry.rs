//! # Shard registry: the fleet's id → shard map.
//!
//! Insertion order is spawn order. Replacing an id keeps its position, so
//! iteration (and therefore broadcast result order) stays stable across respawns.
//!
//! ## Rules
//! - One entry per id
//! - Structural changes (insert/remove/drain) come from the owning manager only
//! - Readers get cloned `Arc<Shard>` handles and never hold the lock across `.await`

use std::sync::Arc;

use parking_lot::RwLock;

use crate::shard::Shard;

/// Ordered map of shards owned by one manager.
#[derive(Default)]
pub struct ShardRegistry {
    shards: RwLock<Vec<Arc<Shard>>>,
}

impl ShardRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Shard with `id`, if present.
    pub fn get(&self, id: u32) -> Option<Arc<Shard>> {
        self.shards.read().iter().find(|s| s.id() == id).cloned()
    }

    /// Inserts `shard`, replacing an existing entry with the same id in place.
    ///
    /// Returns the replaced shard.
    pub fn insert(&self, shard: Arc<Shard>) -> Option<Arc<Shard>> {
        let mut shards = self.shards.write();
        match shards.iter_mut().find(|s| s.id() == shard.id()) {
            Some(slot) => Some(std::mem::replace(slot, shard)),
            None => {
                shards.push(shard);
                None
            }
        }
    }

    /// Removes and returns the shard with `id`.
    pub fn remove(&self, id: u32) -> Option<Arc<Shard>> {
        let mut shards = self.shards.write();
        let pos = shards.iter().position(|s| s.id() == id)?;
        Some(shards.remove(pos))
    }

    /// True if `id` is present.
    pub fn contains(&self, id: u32) -> bool {
        self.shards.read().iter().any(|s| s.id() == id)
    }

    /// Ids in spawn order.
    pub fn ids(&self) -> Vec<u32> {
        self.shards.read().iter().map(|s| s.id()).collect()
    }

    /// Shard handles in spawn order.
    pub fn snapshot(&self) -> Vec<Arc<Shard>> {
        self.shards.read().clone()
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.read().len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.shards.read().is_empty()
    }

    /// Highest id present.
    pub fn max_id(&self) -> Option<u32> {
        self.shards.read().iter().map(|s| s.id()).max()
    }

    /// Removes and returns every shard.
    pub fn drain(&self) -> Vec<Arc<Shard>> {
        std::mem::take(&mut *self.shards.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerEntry;
    use crate::events::Bus;
    use crate::host::{WorkerLink, worker_fn};
    use crate::shard::ShardParams;
    use std::time::Duration;

    fn shard(id: u32) -> Arc<Shard> {
        let entry = WorkerEntry::Thread(worker_fn(|_link: WorkerLink| async {}));
        Shard::new(
            id,
            ShardParams {
                shard_count: 4,
                token: None,
                eval_timeout: Duration::from_secs(1),
            },
            entry.host(),
            Bus::new(4),
        )
    }

    #[test]
    fn replace_keeps_position() {
        let reg = ShardRegistry::new();
        for id in [2, 0, 1] {
            assert!(reg.insert(shard(id)).is_none());
        }
        let old = reg.insert(shard(0));
        assert!(old.is_some());
        assert_eq!(reg.ids(), vec![2, 0, 1]);
        assert_eq!(reg.max_id(), Some(2));
    }

    #[test]
    fn remove_and_drain() {
        let reg = ShardRegistry::new();
        reg.insert(shard(0));
        reg.insert(shard(1));
        assert_eq!(reg.remove(0).map(|s| s.id()), Some(0));
        assert!(reg.remove(0).is_none());
        assert!(reg.contains(1));
        assert_eq!(reg.drain().len(), 1);
        assert!(reg.is_empty());
    }
}
