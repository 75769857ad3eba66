//! Error types used by the shardvisor runtime.
//!
//! This module defines the fault taxonomy of the fleet:
//!
//! - [`ShardError`]: failures of a single shard (spawn, evaluate, send, lifecycle).
//! - [`ClusterError`]: failures of the cluster layer (unknown cluster, cluster spawn).
//! - [`IpcError`]: malformed or unmatched traffic on a control channel.
//! - [`TimeoutError`]: a generic deadline was exceeded.
//! - [`OracleError`]: the external sizing oracle could not produce a usable answer.
//!
//! Every type provides `as_label` for logs/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a shard or by fleet operations on shards.
///
/// Evaluate and probe timeouts are local faults: the fleet converts them into
/// per-shard failure records and never treats them as fatal.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ShardError {
    /// No worker code was configured; raised at construction.
    #[error("no worker entry provided")]
    MissingEntry,

    /// The worker host could not start an execution context.
    #[error("shard {shard} failed to launch: {reason}")]
    Launch {
        /// Shard id.
        shard: u32,
        /// Host-specific failure description.
        reason: String,
    },

    /// No `ready` message arrived before the spawn deadline.
    #[error("shard {shard} took too long to spawn (timeout {timeout:?})")]
    SpawnTimeout {
        /// Shard id.
        shard: u32,
        /// The spawn deadline that elapsed.
        timeout: Duration,
    },

    /// The execution context terminated before it reported `ready`.
    #[error("shard {shard} died during spawn (code {code:?})")]
    DiedDuringSpawn {
        /// Shard id.
        shard: u32,
        /// Exit code, if the context reported one.
        code: Option<i32>,
    },

    /// A correlated request (eval or fetch) got no answer in time.
    #[error("eval timeout on shard {shard} after {timeout:?}")]
    EvalTimeout {
        /// Shard id.
        shard: u32,
        /// The request deadline that elapsed.
        timeout: Duration,
    },

    /// The control channel is not connected (never spawned, killed, or closed).
    #[error("shard {shard} control channel not connected")]
    NotConnected {
        /// Shard id.
        shard: u32,
    },

    /// The shard was killed while the request was outstanding.
    #[error("shard {shard} was killed")]
    Killed {
        /// Shard id.
        shard: u32,
    },

    /// The execution context terminated while the request was outstanding.
    #[error("shard {shard} died (code {code:?})")]
    Died {
        /// Shard id.
        shard: u32,
        /// Exit code, if the context reported one.
        code: Option<i32>,
    },

    /// The worker answered with an error.
    #[error("shard {shard} returned error: {message}")]
    Remote {
        /// Shard id.
        shard: u32,
        /// Error message reported by the worker.
        message: String,
    },

    /// A second `spawn()` was issued while one is in flight.
    #[error("already spawning shards")]
    AlreadySpawning,

    /// A configuration value can never work (zero shard count, missing oracle).
    #[error("invalid configuration: {reason}")]
    Config {
        /// What is wrong.
        reason: String,
    },

    /// The shard id is not present in the fleet.
    #[error("shard {shard} not found")]
    NotFound {
        /// Shard id.
        shard: u32,
    },

    /// Protocol-level failure on the control channel.
    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// The sizing oracle refused or failed to produce a shard count.
    #[error(transparent)]
    Sizing(#[from] OracleError),
}

impl ShardError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use shardvisor::ShardError;
    ///
    /// let err = ShardError::NotConnected { shard: 3 };
    /// assert_eq!(err.as_label(), "shard_not_connected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ShardError::MissingEntry => "shard_missing_entry",
            ShardError::Launch { .. } => "shard_launch_failed",
            ShardError::SpawnTimeout { .. } => "shard_spawn_timeout",
            ShardError::DiedDuringSpawn { .. } => "shard_died_during_spawn",
            ShardError::EvalTimeout { .. } => "shard_eval_timeout",
            ShardError::NotConnected { .. } => "shard_not_connected",
            ShardError::Killed { .. } => "shard_killed",
            ShardError::Died { .. } => "shard_died",
            ShardError::Remote { .. } => "shard_remote_error",
            ShardError::AlreadySpawning => "shard_already_spawning",
            ShardError::Config { .. } => "shard_invalid_config",
            ShardError::NotFound { .. } => "shard_not_found",
            ShardError::Ipc(e) => e.as_label(),
            ShardError::Sizing(e) => e.as_label(),
        }
    }

    /// Returns the shard id the error refers to, if any.
    pub fn shard(&self) -> Option<u32> {
        match self {
            ShardError::Launch { shard, .. }
            | ShardError::SpawnTimeout { shard, .. }
            | ShardError::DiedDuringSpawn { shard, .. }
            | ShardError::EvalTimeout { shard, .. }
            | ShardError::NotConnected { shard }
            | ShardError::Killed { shard }
            | ShardError::Died { shard, .. }
            | ShardError::Remote { shard, .. }
            | ShardError::NotFound { shard } => Some(*shard),
            _ => None,
        }
    }

    /// True for deadline-driven failures (spawn or request timeouts).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ShardError::SpawnTimeout { .. } | ShardError::EvalTimeout { .. }
        )
    }
}

/// # Errors produced by the cluster layer.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The cluster id is not managed by this cluster manager.
    #[error("cluster {cluster} not found")]
    UnknownCluster {
        /// Cluster id.
        cluster: u32,
    },

    /// `spawn()` was called on a cluster manager that already spawned.
    #[error("clusters already spawned")]
    AlreadySpawned,

    /// A cluster's shard manager failed to come up.
    #[error("cluster {cluster} failed to spawn: {source}")]
    Spawn {
        /// Cluster id.
        cluster: u32,
        /// Underlying shard failure.
        #[source]
        source: ShardError,
    },

    /// A shard-level failure surfaced through the cluster API.
    #[error(transparent)]
    Shard(#[from] ShardError),
}

impl ClusterError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ClusterError::UnknownCluster { .. } => "cluster_unknown",
            ClusterError::AlreadySpawned => "cluster_already_spawned",
            ClusterError::Spawn { .. } => "cluster_spawn_failed",
            ClusterError::Shard(e) => e.as_label(),
        }
    }
}

/// # Errors on the control channel protocol.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum IpcError {
    /// Inbound payload is not a protocol message.
    #[error("malformed message: {reason}")]
    Malformed {
        /// What was wrong with the payload.
        reason: String,
    },

    /// A response arrived for a correlation id that is not outstanding.
    #[error("unmatched response id {id}")]
    Unmatched {
        /// Correlation id carried by the response.
        id: String,
    },

    /// Outbound message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport is closed.
    #[error("control channel closed")]
    Closed,
}

impl IpcError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            IpcError::Malformed { .. } => "ipc_malformed",
            IpcError::Unmatched { .. } => "ipc_unmatched",
            IpcError::Encode(_) => "ipc_encode",
            IpcError::Closed => "ipc_closed",
        }
    }
}

/// # Generic deadline exceeded.
#[derive(Error, Debug, Clone)]
#[error("{operation} timed out after {timeout:?}")]
pub struct TimeoutError {
    /// Operation that was waiting.
    pub operation: String,
    /// The deadline that elapsed.
    pub timeout: Duration,
}

impl TimeoutError {
    /// Creates a new timeout error for `operation`.
    pub fn new(operation: impl Into<String>, timeout: Duration) -> Self {
        Self {
            operation: operation.into(),
            timeout,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        "timeout"
    }
}

/// # Errors produced by the external sizing oracle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum OracleError {
    /// Transport-level HTTP failure.
    #[error("oracle request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The oracle answered with an error status.
    #[error("oracle api error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message reported by the oracle.
        message: String,
    },

    /// Not enough session starts remain to bring up the recommended fleet.
    #[error(
        "not enough session starts remaining ({remaining}/{required}); reset in {reset_after:?}"
    )]
    SessionLimit {
        /// Session starts left in the current window.
        remaining: u32,
        /// Session starts the recommendation needs.
        required: u32,
        /// Time until the window resets.
        reset_after: Duration,
    },

    /// The oracle response could not be decoded.
    #[error("oracle response decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

impl OracleError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            OracleError::Http(_) => "oracle_http",
            OracleError::Api { .. } => "oracle_api",
            OracleError::SessionLimit { .. } => "oracle_session_limit",
            OracleError::Decode(_) => "oracle_decode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classification() {
        assert!(
            ShardError::EvalTimeout {
                shard: 1,
                timeout: Duration::from_millis(5)
            }
            .is_timeout()
        );
        assert!(!ShardError::Killed { shard: 1 }.is_timeout());
    }

    #[test]
    fn shard_id_is_exposed() {
        assert_eq!(ShardError::Died { shard: 7, code: None }.shard(), Some(7));
        assert_eq!(ShardError::AlreadySpawning.shard(), None);
    }

    #[test]
    fn wrapped_errors_keep_their_label() {
        let err: ShardError = IpcError::Closed.into();
        assert_eq!(err.as_label(), "ipc_closed");

        let err: ClusterError = ShardError::MissingEntry.into();
        assert_eq!(err.as_label(), "shard_missing_entry");
    }

    #[test]
    fn session_limit_message_mentions_budget() {
        let err = OracleError::SessionLimit {
            remaining: 2,
            required: 8,
            reset_after: Duration::from_secs(60),
        };
        assert!(err.to_string().contains("2/8"));
    }
}
