//! Sizing: how many shards to run and which ids.
//!
//! ## Contents
//! - [`SizingStrategy`] the contract every variant implements
//! - [`ManualStrategy`], [`AutoStrategy`], [`DynamicStrategy`], [`ClusterStrategy`]
//! - [`ScaleTarget`] fleet capability the dynamic loop scales through
//! - [`SizingOracle`] external recommendation source, with [`HttpSizingOracle`] and [`StaticOracle`]
//! - entity hashing helpers: [`shard_for_entity`], [`optimal_shards`], [`distribute_entities`]

mod auto;
mod cluster;
mod dynamic;
mod manual;
mod oracle;
mod strategy;

pub use auto::{AutoConfig, AutoStrategy};
pub use cluster::{BalancedCluster, ClusterLoad, ClusterSlice, ClusterStrategy, LoadRecommendation};
pub use dynamic::{DynamicConfig, DynamicStrategy};
pub use manual::ManualStrategy;
pub use oracle::{
    DEFAULT_API_BASE, GatewayInfo, HttpSizingOracle, SessionStartLimit, SizingOracle,
    StaticOracle, distribute_entities, optimal_shards, shard_for_entity,
};
pub use strategy::{ScaleDecision, ScaleTarget, SizingStrategy};
