//! # Sizing strategy contract.
//!
//! A [`SizingStrategy`] answers two questions for a shard manager: how many
//! shards to run, and which ids. The dynamic strategy additionally drives a
//! control loop that resizes the fleet through [`ScaleTarget`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ShardError;
use crate::events::Bus;
use crate::monitor::StatsSnapshot;

/// Outcome of one scaling evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Grow the fleet to `to` shards.
    Up { from: u32, to: u32 },
    /// Shrink the fleet to `to` shards.
    Down { from: u32, to: u32 },
    /// Leave the fleet as is.
    Hold,
}

/// Fleet operations a scaling loop is allowed to perform.
///
/// Implemented by [`ShardManager`](crate::ShardManager).
#[async_trait]
pub trait ScaleTarget: Send + Sync + 'static {
    /// Ids currently in the fleet, in spawn order.
    fn shard_ids(&self) -> Vec<u32>;

    /// Fresh stats snapshot of the fleet.
    async fn collect_stats(&self) -> StatsSnapshot;

    /// Spawns shard `id`, announcing `total` as the fleet size.
    async fn add_shard(&self, id: u32, total: u32) -> Result<(), ShardError>;

    /// Kills and forgets shard `id`.
    async fn remove_shard(&self, id: u32) -> Result<(), ShardError>;

    /// Bus scaling events are published on.
    fn bus(&self) -> Bus;
}

/// Policy deciding fleet size and shard id distribution.
#[async_trait]
pub trait SizingStrategy: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Total shard count the fleet should run.
    async fn target_count(&self) -> Result<u32, ShardError>;

    /// Ordered ids for a fleet of `count` shards.
    fn distribute(&self, count: u32) -> Vec<u32> {
        (0..count).collect()
    }

    /// Called once the fleet is up. Strategies with a control loop start it here.
    fn start(&self, _target: Arc<dyn ScaleTarget>) {}

    /// Stops whatever [`start`](Self::start) began.
    fn stop(&self) {}
}

/// Clamps `n` into `[min, max]`; `max < min` yields `min`.
pub(crate) fn clamp(n: u32, min: u32, max: u32) -> u32 {
    n.min(max).max(min)
}
