//! Fleet observation: liveness probing and statistics.
//!
//! - [`HealthMonitor`] probes live shards on an interval and raises
//!   `ShardHealthy` / `ShardSlow` / `ShardUnhealthy` / `ShardDead`.
//! - [`StatsAggregator`] collects per-shard metrics into [`StatsSnapshot`]s
//!   with a bounded history and windowed averages.
//!
//! Both are owned by a [`ShardManager`](crate::ShardManager) and stop when it is destroyed.

mod health;
mod stats;

pub use health::{HealthMonitor, ShardHealth};
pub use stats::{AveragedTotals, ShardStats, StatsAggregator, StatsSnapshot, StatsTotals};
