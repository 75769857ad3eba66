//! # Shard lifecycle states.

use std::fmt;

/// Lifecycle state of a [`Shard`](crate::Shard).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShardState {
    /// Constructed, never launched.
    Created,
    /// Execution context launched, waiting for `ready`.
    Spawning,
    /// Worker reported `ready`.
    Ready,
    /// Advisory: worker lost its upstream connection.
    Disconnected,
    /// Advisory: worker is reconnecting upstream.
    Reconnecting,
    /// Execution context terminated or never became ready.
    Dead,
    /// Stopped by an explicit kill.
    Killed,
}

impl ShardState {
    /// True while the worker is up (advisory sub-states included).
    ///
    /// Requests are accepted in every live state.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ShardState::Ready | ShardState::Disconnected | ShardState::Reconnecting
        )
    }

    /// True for `Dead` and `Killed`.
    pub fn is_stopped(&self) -> bool {
        matches!(self, ShardState::Dead | ShardState::Killed)
    }

    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardState::Created => "created",
            ShardState::Spawning => "spawning",
            ShardState::Ready => "ready",
            ShardState::Disconnected => "disconnected",
            ShardState::Reconnecting => "reconnecting",
            ShardState::Dead => "dead",
            ShardState::Killed => "killed",
        }
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
