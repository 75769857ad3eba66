//! # Auto sizing: the oracle's recommendation, clamped.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ShardError;
use crate::monitor::StatsSnapshot;
use crate::sizing::strategy::clamp;
use crate::sizing::{SizingOracle, SizingStrategy, optimal_shards};

/// Settings for [`AutoStrategy`].
#[derive(Clone, Debug)]
pub struct AutoConfig {
    /// Target load per shard.
    pub guilds_per_shard: u64,
    /// Lower bound for the shard count.
    pub min_shards: u32,
    /// Upper bound for the shard count.
    pub max_shards: u32,
}

impl Default for AutoConfig {
    /// `guilds_per_shard = 1000`, `min_shards = 1`, `max_shards = 16`.
    fn default() -> Self {
        Self {
            guilds_per_shard: 1000,
            min_shards: 1,
            max_shards: 16,
        }
    }
}

/// Asks the sizing oracle and clamps the answer to `[min_shards, max_shards]`.
///
/// Oracle failures (including an exhausted session budget) are returned to
/// the caller; the fleet does not start with a guessed size.
pub struct AutoStrategy {
    cfg: AutoConfig,
    oracle: Arc<dyn SizingOracle>,
}

impl AutoStrategy {
    /// Creates the strategy.
    pub fn new(cfg: AutoConfig, oracle: Arc<dyn SizingOracle>) -> Self {
        Self { cfg, oracle }
    }

    /// True when average load per shard exceeds 1.2 × the target.
    pub fn should_rescale(&self, snapshot: &StatsSnapshot, current: u32) -> bool {
        if current == 0 {
            return false;
        }
        let avg = snapshot.totals.guilds as f64 / f64::from(current);
        let over = avg > self.cfg.guilds_per_shard as f64 * 1.2;
        if over {
            tracing::warn!(avg, target = self.cfg.guilds_per_shard, "average load per shard exceeds threshold");
        }
        over
    }

    /// Clamped shard count for a total load of `guilds`.
    pub fn optimal_for(&self, guilds: u64) -> u32 {
        clamp(
            optimal_shards(guilds, self.cfg.guilds_per_shard),
            self.cfg.min_shards,
            self.cfg.max_shards,
        )
    }
}

#[async_trait]
impl SizingStrategy for AutoStrategy {
    fn name(&self) -> &'static str {
        "auto"
    }

    async fn target_count(&self) -> Result<u32, ShardError> {
        let recommended = self.oracle.recommended_shards().await?;
        let count = clamp(recommended, self.cfg.min_shards, self.cfg.max_shards);
        tracing::info!(recommended, count, "auto strategy calculated shard count");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ShardStats;
    use crate::sizing::StaticOracle;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn strategy(recommended: u32) -> AutoStrategy {
        AutoStrategy::new(AutoConfig::default(), Arc::new(StaticOracle::new(recommended)))
    }

    #[tokio::test]
    async fn recommendation_is_clamped() {
        assert_eq!(strategy(40).target_count().await.unwrap(), 16);
        assert_eq!(strategy(3).target_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_refuses_to_size() {
        let oracle = StaticOracle::new(4).with_session_limit(1, Duration::from_secs(30));
        let s = AutoStrategy::new(AutoConfig::default(), Arc::new(oracle));
        let err = s.target_count().await.unwrap_err();
        assert_eq!(err.as_label(), "oracle_session_limit");
    }

    #[test]
    fn rescale_above_120_percent() {
        let s = strategy(1);
        let shards: BTreeMap<u32, ShardStats> = (0..2)
            .map(|id| (id, ShardStats { guilds: 1300, ..Default::default() }))
            .collect();
        let snap = StatsSnapshot::from_shards(shards, Duration::ZERO);
        assert!(s.should_rescale(&snap, 2));
        assert!(!s.should_rescale(&snap, 3));
        assert_eq!(s.optimal_for(2600), 3);
        assert_eq!(s.optimal_for(0), 1);
    }
}
