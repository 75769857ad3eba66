//! Fleet events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by shards, shard managers, the health
//! monitor, the stats aggregator, the dynamic sizing loop and cluster managers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: shard pumps, `ShardManager`, `HealthMonitor`, `StatsAggregator`,
//!   `DynamicStrategy`, `ClusterManager`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `ShardManager` (death → respawn), its `SubscriberSet`,
//!   `ClusterManager` forwarders, and callers of `Bus::wait_for`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
