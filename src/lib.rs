//! # shardvisor
//!
//! **Shardvisor** runs one logical realtime client as a fleet of shards. Each
//! shard lives in its own execution context (a child process or a dedicated
//! thread) and talks to the orchestrator over a private control channel. The
//! crate spawns shards with anti-burst pacing, keeps them alive, watches their
//! health, aggregates their stats and sizes the fleet.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                        ┌──────────────────────────────┐
//!                        │ ClusterManager (optional)    │
//!                        │ contiguous id slices         │
//!                        └──────┬───────────────┬───────┘
//!                               ▼               ▼
//! ┌────────────────────────────────────┐   ┌────────────────────────┐
//! │ ShardManager                       │   │ ShardManager           │
//! │ - Bus (broadcast events)           │   │ ...                    │
//! │ - ShardRegistry (spawn order)      │   └────────────────────────┘
//! │ - HealthMonitor / StatsAggregator  │
//! │ - SizingStrategy                   │
//! │ - SubscriberSet (user callbacks)   │
//! └──────┬──────────────────┬──────────┘
//!        ▼                  ▼
//!   ┌──────────┐       ┌──────────┐
//!   │ Shard 0  │       │ Shard 1  │     state machine + pending request tables
//!   └────┬─────┘       └────┬─────┘
//!        ▼                  ▼
//!   ControlChannel     ControlChannel   WorkerHost: ProcessHost | ThreadHost
//!        ▼                  ▼
//!     worker             worker         speaks {"type": ...} JSON messages
//! ```
//!
//! ### Shard lifecycle
//! ```text
//! Created ─► Spawning ─ready─► Ready ⇄ Disconnected / Reconnecting
//!               │                │
//!               │ timeout/exit   │ exit ─► ShardDeath ─► respawn (RespawnPolicy::OnDeath)
//!               ▼                ▼
//!              Dead             Dead            kill() ─► Killed (terminal until respawn)
//! ```
//!
//! ## Features
//! | Area            | Description                                                   | Key types / traits                                   |
//! |-----------------|---------------------------------------------------------------|------------------------------------------------------|
//! | **Fleet**       | Sequential spawn, broadcast/eval, respawn on death            | [`ShardManager`], [`ManagerConfig`]                  |
//! | **Shards**      | Control protocol, correlated eval/fetch with timeouts         | [`Shard`], [`ShardState`], [`Script`]                |
//! | **Hosts**       | Process (NDJSON over stdio) or thread execution contexts      | [`WorkerHost`], [`ProcessHost`], [`ThreadHost`]      |
//! | **Monitoring**  | Health probes with failure thresholds, stats with history     | [`HealthMonitor`], [`StatsAggregator`]               |
//! | **Sizing**      | Manual, oracle-driven, load-driven and clustered sizing       | [`SizingStrategy`], [`SizingOracle`]                 |
//! | **Clusters**    | Groups of shard managers over contiguous id ranges            | [`ClusterManager`], [`ClusterConfig`]                |
//! | **Events**      | Typed fleet events and non-blocking subscribers               | [`Event`], [`EventKind`], [`Subscribe`]              |
//! | **Errors**      | Typed faults with stable labels                               | [`ShardError`], [`ClusterError`], [`IpcError`]       |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use shardvisor::{ManagerConfig, ShardManager, WorkerLink, WorkerRequest, worker_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let worker = worker_fn(|mut link: WorkerLink| async move {
//!         let _ = link.ready();
//!         while let Some(req) = link.recv().await {
//!             if let WorkerRequest::Eval { id, .. } = req {
//!                 let _ = link.reply_eval(id, Ok(json!(link.env().shard_id)));
//!             }
//!         }
//!     });
//!
//!     let mut cfg = ManagerConfig::thread(worker);
//!     cfg.total_shards = 4.into();
//!     cfg.spawn_delay = Duration::from_millis(100);
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn shardvisor::Subscribe>> = vec![Arc::new(shardvisor::LogWriter)];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn shardvisor::Subscribe>> = Vec::new();
//!
//!     let manager = ShardManager::builder(cfg).with_subscribers(subs).build()?;
//!     manager.spawn().await?;
//!
//!     for (shard, value) in manager.broadcast_eval("shard id").await {
//!         println!("shard {shard}: {:?}", value?);
//!     }
//!     manager.run_until_shutdown().await?;
//!     Ok(())
//! }
//! ```
mod cluster;
mod config;
mod core;
mod error;
mod events;
mod host;
mod ipc;
mod monitor;
mod policies;
mod shard;
mod sizing;
mod subscribers;

// ---- Public re-exports ----

pub use cluster::{ClusterConfig, ClusterManager};
pub use config::{HealthConfig, ManagerConfig, ShardCount, StatsConfig, WorkerEntry};
pub use crate::core::{ShardManager, ShardManagerBuilder, ShardRegistry, ShardResults};
pub use error::{ClusterError, IpcError, OracleError, ShardError, TimeoutError};
pub use events::{Bus, Event, EventKind};
pub use host::{
    ControlChannel, HostEvent, ProcessHost, ThreadHost, WorkerEnv, WorkerFn, WorkerHost,
    WorkerLink, WorkerRequest, worker_fn,
};
pub use ipc::{Inbound, LogLevel, Outbound, PendingTable, Script};
pub use monitor::{
    AveragedTotals, HealthMonitor, ShardHealth, ShardStats, StatsAggregator, StatsSnapshot,
    StatsTotals,
};
pub use policies::{BackoffPolicy, JitterPolicy, RespawnPolicy};
pub use shard::{Shard, ShardState};
pub use sizing::{
    AutoConfig, AutoStrategy, BalancedCluster, ClusterLoad, ClusterSlice, ClusterStrategy,
    DEFAULT_API_BASE, DynamicConfig, DynamicStrategy, GatewayInfo, HttpSizingOracle,
    LoadRecommendation, ManualStrategy, ScaleDecision, ScaleTarget, SessionStartLimit,
    SizingOracle, SizingStrategy, StaticOracle, distribute_entities, optimal_shards,
    shard_for_entity,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: built-in subscriber rendering events through `tracing`.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
