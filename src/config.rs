//! # Shard manager configuration.
//!
//! Provides [`ManagerConfig`] and the per-component settings it embeds
//! ([`HealthConfig`], [`StatsConfig`]).
//!
//! ## Sentinel values
//! - `spawn_delay = 0s` → shards are spawned back to back (no anti-burst gap)
//! - `StatsConfig::interval = None` → stats are only collected on demand
//! - `shard_list = None` → ids come from the sizing strategy (`0..count` by default)

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ShardError;
use crate::host::{ProcessHost, ThreadHost, WorkerFn, WorkerHost};
use crate::ipc::Script;
use crate::policies::{BackoffPolicy, RespawnPolicy};

/// How many shards the fleet should run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShardCount {
    /// Ask the sizing strategy (and through it, the sizing oracle).
    #[default]
    Auto,
    /// Exactly this many.
    Fixed(u32),
}

impl From<u32> for ShardCount {
    fn from(n: u32) -> Self {
        ShardCount::Fixed(n)
    }
}

/// Where worker code comes from.
#[derive(Clone)]
pub enum WorkerEntry {
    /// Separate OS process.
    Process {
        /// Program to execute.
        program: PathBuf,
        /// Arguments passed to every worker.
        args: Vec<String>,
    },
    /// Rust worker function on a dedicated thread.
    Thread(WorkerFn),
}

impl WorkerEntry {
    /// Process entry with no extra arguments.
    pub fn process(program: impl Into<PathBuf>) -> Self {
        WorkerEntry::Process {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Builds the host matching this entry.
    pub(crate) fn host(&self) -> Arc<dyn WorkerHost> {
        match self {
            WorkerEntry::Process { program, args } => {
                Arc::new(ProcessHost::new(program.clone(), args.clone()))
            }
            WorkerEntry::Thread(f) => Arc::new(ThreadHost::new(f.clone())),
        }
    }
}

impl fmt::Debug for WorkerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerEntry::Process { program, args } => f
                .debug_struct("Process")
                .field("program", program)
                .field("args", args)
                .finish(),
            WorkerEntry::Thread(_) => f.write_str("Thread(<fn>)"),
        }
    }
}

/// Health monitor settings.
///
/// A probe is a trivial remote evaluation; a shard that fails `max_failures`
/// probes in a row is declared dead.
#[derive(Clone, Debug)]
pub struct HealthConfig {
    /// Time between probe rounds.
    pub interval: Duration,
    /// Deadline for a single probe.
    pub timeout: Duration,
    /// Consecutive failures that declare a shard dead.
    pub max_failures: u32,
    /// Successful probes slower than this also raise `ShardSlow`.
    pub slow_threshold: Duration,
    /// What the probe evaluates.
    pub probe: Script,
}

impl Default for HealthConfig {
    /// `interval = 30s`, `timeout = 10s`, `max_failures = 3`, `slow_threshold = 5s`,
    /// probe `Date.now()`.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            max_failures: 3,
            slow_threshold: Duration::from_secs(5),
            probe: Script::snippet("Date.now()"),
        }
    }
}

/// Stats aggregator settings.
#[derive(Clone, Debug)]
pub struct StatsConfig {
    /// Snapshots kept in history; the oldest is evicted past this.
    pub max_history: usize,
    /// Auto-collect period, started once the fleet is ready.
    pub interval: Option<Duration>,
    /// Deadline for a single shard's answer.
    pub timeout: Duration,
    /// What each shard is asked to evaluate.
    pub request: Script,
}

impl Default for StatsConfig {
    /// `max_history = 100`, no auto-collect, `timeout = 10s`, request `stats()`.
    fn default() -> Self {
        Self {
            max_history: 100,
            interval: None,
            timeout: Duration::from_secs(10),
            request: Script::invoke("stats"),
        }
    }
}

/// Configuration for one [`ShardManager`](crate::ShardManager).
///
/// ## Field semantics
/// - `spawn_delay`: gap between consecutive spawns (never after the last one)
/// - `spawn_timeout`: deadline for a worker to report `ready`
/// - `eval_timeout`: default deadline for `evaluate`/`fetch`
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Worker code.
    pub entry: WorkerEntry,
    /// Fleet size.
    pub total_shards: ShardCount,
    /// Explicit ids to run instead of `0..count`.
    pub shard_list: Option<Vec<u32>>,
    /// Credentials passed to workers and to the HTTP sizing oracle.
    pub token: Option<String>,
    /// Whether death schedules a respawn.
    pub respawn: RespawnPolicy,
    /// Grace delay before a respawn.
    pub respawn_backoff: BackoffPolicy,
    /// Anti-burst gap between spawns.
    pub spawn_delay: Duration,
    /// Per-shard spawn deadline.
    pub spawn_timeout: Duration,
    /// Default request deadline.
    pub eval_timeout: Duration,
    /// Event bus capacity.
    pub bus_capacity: usize,
    /// Health monitor settings.
    pub health: HealthConfig,
    /// Stats aggregator settings.
    pub stats: StatsConfig,
}

impl ManagerConfig {
    /// Configuration with defaults for everything but the worker entry:
    ///
    /// - `total_shards = Auto`, `respawn = OnDeath`, flat 5s respawn grace
    /// - `spawn_delay = 5.5s`, `spawn_timeout = 30s`, `eval_timeout = 10s`
    /// - `bus_capacity = 1024`
    pub fn new(entry: WorkerEntry) -> Self {
        Self {
            entry,
            total_shards: ShardCount::Auto,
            shard_list: None,
            token: None,
            respawn: RespawnPolicy::default(),
            respawn_backoff: BackoffPolicy::default(),
            spawn_delay: Duration::from_millis(5500),
            spawn_timeout: Duration::from_secs(30),
            eval_timeout: Duration::from_secs(10),
            bus_capacity: 1024,
            health: HealthConfig::default(),
            stats: StatsConfig::default(),
        }
    }

    /// Process-mode configuration.
    pub fn process(program: impl Into<PathBuf>) -> Self {
        Self::new(WorkerEntry::process(program))
    }

    /// Thread-mode configuration.
    pub fn thread(entry: WorkerFn) -> Self {
        Self::new(WorkerEntry::Thread(entry))
    }

    /// Fails fast on a configuration that can never launch a worker.
    pub fn validate(&self) -> Result<(), ShardError> {
        match &self.entry {
            WorkerEntry::Process { program, .. } if program.as_os_str().is_empty() => {
                Err(ShardError::MissingEntry)
            }
            _ => Ok(()),
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_is_rejected() {
        let cfg = ManagerConfig::process("");
        assert!(matches!(cfg.validate(), Err(ShardError::MissingEntry)));
        assert!(ManagerConfig::process("/usr/bin/worker").validate().is_ok());
    }

    #[test]
    fn defaults_follow_the_documented_values() {
        let cfg = ManagerConfig::process("worker");
        assert_eq!(cfg.spawn_delay, Duration::from_millis(5500));
        assert_eq!(cfg.health.max_failures, 3);
        assert_eq!(cfg.stats.max_history, 100);
        assert!(cfg.respawn.is_enabled());
        assert_eq!(cfg.total_shards, ShardCount::Auto);
    }
}
