//! # Cluster manager configuration.

use std::time::Duration;

use crate::config::{ManagerConfig, ShardCount};

/// Configuration for a [`ClusterManager`](crate::ClusterManager).
///
/// `manager` is the template every cluster's shard manager is built from;
/// its `total_shards` and `shard_list` are overwritten per cluster.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Template for each cluster's shard manager.
    pub manager: ManagerConfig,
    /// Fleet-wide shard count.
    pub total_shards: ShardCount,
    /// Contiguous shards per cluster.
    pub shards_per_cluster: u32,
    /// Gap between bringing up consecutive clusters.
    pub cluster_delay: Duration,
}

impl ClusterConfig {
    /// `total_shards = Auto`, two shards per cluster, 5s between clusters.
    pub fn new(manager: ManagerConfig) -> Self {
        Self {
            manager,
            total_shards: ShardCount::Auto,
            shards_per_cluster: 2,
            cluster_delay: Duration::from_secs(5),
        }
    }
}
