//! Fleet core: the shard manager and what it owns.
//!
//! The public API from this module is [`ShardManager`] (built through
//! [`ShardManagerBuilder`]), which sequences spawning, fans requests out and
//! respawns dead shards.
//!
//! Internal modules:
//! - [`manager`]: spawn sequencing, broadcast, respawn, scaling hooks;
//! - [`builder`]: wiring of bus, subscribers, host and sizing strategy;
//! - [`registry`]: ordered id → shard map shared with the monitors;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod manager;
mod registry;
mod shutdown;

pub use builder::ShardManagerBuilder;
pub use manager::{ShardManager, ShardResults};
pub use registry::ShardRegistry;
