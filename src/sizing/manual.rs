//! # Manual sizing: a fixed count, optionally an explicit id list.
//!
//! The count is the fleet-wide total announced to workers; the list picks
//! which of those ids this manager runs.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ShardError;
use crate::sizing::SizingStrategy;

#[derive(Debug)]
struct ManualState {
    count: u32,
    list: Option<Vec<u32>>,
}

/// Fixed shard count with an optional explicit id list overriding `0..count`.
#[derive(Debug)]
pub struct ManualStrategy {
    state: Mutex<ManualState>,
}

impl ManualStrategy {
    /// Runs ids `0..count`.
    pub fn new(count: u32) -> Self {
        Self {
            state: Mutex::new(ManualState { count, list: None }),
        }
    }

    /// Runs exactly `list` instead of `0..count`.
    pub fn with_list(self, list: Vec<u32>) -> Self {
        self.state.lock().list = Some(list);
        self
    }

    /// Current count.
    pub fn shard_count(&self) -> u32 {
        self.state.lock().count
    }

    /// Current explicit list, if any.
    pub fn shard_list(&self) -> Option<Vec<u32>> {
        self.state.lock().list.clone()
    }

    /// Changes the count. Zero is rejected.
    pub fn set_shard_count(&self, count: u32) -> Result<(), ShardError> {
        if count < 1 {
            return Err(ShardError::Config {
                reason: "shard count must be at least 1".into(),
            });
        }
        self.state.lock().count = count;
        tracing::info!(count, "manual shard count updated");
        Ok(())
    }

    /// Replaces the explicit list.
    pub fn set_shard_list(&self, list: Vec<u32>) {
        tracing::info!(?list, "manual shard list updated");
        self.state.lock().list = Some(list);
    }

    /// Adds `id` to the list (materializing `0..count` first if no list is set).
    pub fn add_shard(&self, id: u32) {
        let mut st = self.state.lock();
        let count = st.count;
        let list = st.list.get_or_insert_with(|| (0..count).collect());
        if !list.contains(&id) {
            list.push(id);
            tracing::info!(shard = id, "added shard to manual list");
        }
    }

    /// Removes `id` from the list; no-op without a list.
    pub fn remove_shard(&self, id: u32) {
        let mut st = self.state.lock();
        let Some(list) = st.list.as_mut() else {
            return;
        };
        if let Some(pos) = list.iter().position(|&x| x == id) {
            list.remove(pos);
            tracing::info!(shard = id, "removed shard from manual list");
        }
    }
}

#[async_trait]
impl SizingStrategy for ManualStrategy {
    fn name(&self) -> &'static str {
        "manual"
    }

    async fn target_count(&self) -> Result<u32, ShardError> {
        Ok(self.state.lock().count)
    }

    fn distribute(&self, count: u32) -> Vec<u32> {
        match &self.state.lock().list {
            Some(list) => list.clone(),
            None => (0..count).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_sequence_and_explicit_list() {
        let s = ManualStrategy::new(3);
        assert_eq!(s.target_count().await.unwrap(), 3);
        assert_eq!(s.distribute(3), vec![0, 1, 2]);

        let s = ManualStrategy::new(8).with_list(vec![4, 7]);
        assert_eq!(s.target_count().await.unwrap(), 8);
        assert_eq!(s.distribute(8), vec![4, 7]);
    }

    #[test]
    fn incremental_edits() {
        let s = ManualStrategy::new(2);
        s.remove_shard(0);
        assert_eq!(s.shard_list(), None);

        s.add_shard(5);
        s.add_shard(5);
        assert_eq!(s.shard_list(), Some(vec![0, 1, 5]));
        s.remove_shard(1);
        assert_eq!(s.distribute(2), vec![0, 5]);

        assert!(s.set_shard_count(0).is_err());
        s.set_shard_count(4).unwrap();
        assert_eq!(s.shard_count(), 4);
    }
}
