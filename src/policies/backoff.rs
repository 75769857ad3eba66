//! # Respawn grace delay.
//!
//! [`BackoffPolicy`] computes how long a shard manager waits between killing a
//! shard and spawning it again. The delay for the `n`-th consecutive respawn of
//! the same shard is `first × factor^n`, clamped to `max`, then jittered.
//!
//! With the default `factor = 1.0` every respawn waits a flat 5 seconds.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use shardvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(8),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(2), Duration::from_secs(4));
//! assert_eq!(backoff.next(10), Duration::from_secs(8));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Respawn delay policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first respawn.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth factor per consecutive respawn (`1.0` keeps the delay flat).
    pub factor: f64,
    /// Randomization applied after clamping.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 5s`, `max = 60s`, `factor = 1.0`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(5),
            max: Duration::from_secs(60),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Flat delay with no growth and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay for the given consecutive respawn number (0-indexed).
    ///
    /// The base is derived from `attempt` alone, so jitter never feeds back
    /// into later delays.
    pub fn next(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.factor == 1.0 {
            return self.jitter.apply(self.first.min(self.max));
        }
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_flat_five_seconds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..5 {
            assert_eq!(policy.next(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn grows_then_caps() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(3), Duration::from_millis(800));
        assert_eq!(policy.next(4), Duration::from_secs(1));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(2),
            factor: 1.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.next(0), Duration::from_secs(2));
    }

    #[test]
    fn fixed_ignores_attempts() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(30));
        assert_eq!(policy.next(7), Duration::from_millis(30));
    }
}
