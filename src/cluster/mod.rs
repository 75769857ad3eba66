//! Clusters: fleets of fleets.
//!
//! A [`ClusterManager`] splits `[0, total)` into contiguous slices of
//! `shards_per_cluster` ids and runs one [`ShardManager`](crate::ShardManager)
//! per slice. Clusters come up one after another; every event of a cluster's
//! bus is re-published on the cluster manager's bus tagged with the cluster id.
//!
//! ```text
//! ClusterManager
//!   ├─► cluster 0: ShardManager { shards 0, 1 }  ──events──┐
//!   ├─► cluster 1: ShardManager { shards 2, 3 }  ──events──┼──► Bus (event.cluster = Some(c))
//!   └─► cluster 2: ShardManager { shards 4 }     ──events──┘
//! ```

mod config;
mod manager;

pub use config::ClusterConfig;
pub use manager::ClusterManager;
