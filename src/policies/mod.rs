//! Respawn policies.
//!
//! This module groups the knobs that control **whether** a dead shard is
//! brought back and **how long** the fleet waits before doing so.
//!
//! ## Contents
//! - [`RespawnPolicy`] whether shard death triggers a respawn (never / on death)
//! - [`BackoffPolicy`] grace delay before a respawn, growing with consecutive respawns
//! - [`JitterPolicy`]  randomization of that delay to spread simultaneous respawns
//!
//! ## Quick wiring
//! ```text
//! ManagerConfig { respawn: RespawnPolicy, respawn_backoff: BackoffPolicy, .. }
//!      └─► ShardManager uses:
//!           - respawn to decide whether ShardDeath / ShardDead schedules a respawn
//!           - respawn_backoff.next(streak) as the grace delay before re-spawning
//! ```
//!
//! ## Defaults
//! - `RespawnPolicy::OnDeath`.
//! - `BackoffPolicy::default()` → first=5s, factor=1.0 (constant grace), max=60s, jitter=None.

mod backoff;
mod jitter;
mod respawn;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use respawn::RespawnPolicy;
