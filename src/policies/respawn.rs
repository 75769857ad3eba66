//! # Respawn policy for shard managers.

/// Policy controlling whether a shard that died on its own is brought back.
///
/// Explicit kills are never undone by this policy; `Killed` is terminal
/// until a caller requests a respawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RespawnPolicy {
    /// Death only raises `ShardDeath` on the bus; the operator decides.
    Never,
    /// Death (or a health verdict of dead) schedules a respawn (default).
    #[default]
    OnDeath,
}

impl RespawnPolicy {
    /// True when death should schedule a respawn.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        matches!(self, RespawnPolicy::OnDeath)
    }
}

impl From<bool> for RespawnPolicy {
    fn from(enabled: bool) -> Self {
        if enabled {
            RespawnPolicy::OnDeath
        } else {
            RespawnPolicy::Never
        }
    }
}
