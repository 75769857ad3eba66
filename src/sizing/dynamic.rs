//! # Dynamic sizing: oracle-sized start, load-driven resizing afterwards.
//!
//! ```text
//! every check_interval:
//!   snapshot = target.collect_stats()
//!   avg      = totals.guilds / current
//!   threshold = guilds_per_shard × scale_threshold
//!   avg > threshold                          → Up   (one shard at a time, settle between)
//!   avg < 0.5 × threshold && current > min   → Down (highest ids first, settle between)
//! ```
//!
//! The loop owns a cancellation token; [`SizingStrategy::stop`] ends it between
//! steps. A failed step publishes `ScaleStepFailed` and the remaining steps run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ShardError;
use crate::events::{Event, EventKind};
use crate::monitor::StatsSnapshot;
use crate::sizing::strategy::clamp;
use crate::sizing::{ScaleDecision, ScaleTarget, SizingOracle, SizingStrategy, optimal_shards};

/// Settings for [`DynamicStrategy`].
#[derive(Clone, Debug)]
pub struct DynamicConfig {
    /// Target load per shard.
    pub guilds_per_shard: u64,
    /// Time between scaling checks.
    pub check_interval: Duration,
    /// Fraction of `guilds_per_shard` that triggers a scale-up.
    pub scale_threshold: f64,
    /// Lower bound for the shard count.
    pub min_shards: u32,
    /// Upper bound for the shard count.
    pub max_shards: u32,
    /// Pause after each added shard.
    pub scale_up_settle: Duration,
    /// Pause after each removed shard.
    pub scale_down_settle: Duration,
}

impl Default for DynamicConfig {
    /// `guilds_per_shard = 1000`, `check_interval = 5min`, `scale_threshold = 0.8`,
    /// `min_shards = 1`, `max_shards = 32`, settle 5s up / 2s down.
    fn default() -> Self {
        Self {
            guilds_per_shard: 1000,
            check_interval: Duration::from_secs(300),
            scale_threshold: 0.8,
            min_shards: 1,
            max_shards: 32,
            scale_up_settle: Duration::from_secs(5),
            scale_down_settle: Duration::from_secs(2),
        }
    }
}

/// Oracle-sized strategy with a load-driven scaling loop.
#[derive(Clone)]
pub struct DynamicStrategy {
    cfg: DynamicConfig,
    oracle: Arc<dyn SizingOracle>,
    monitor: Arc<Mutex<Option<CancellationToken>>>,
}

impl DynamicStrategy {
    /// Creates the strategy.
    pub fn new(cfg: DynamicConfig, oracle: Arc<dyn SizingOracle>) -> Self {
        Self {
            cfg,
            oracle,
            monitor: Arc::new(Mutex::new(None)),
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &DynamicConfig {
        &self.cfg
    }

    /// True while the scaling loop runs.
    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Clamped shard count for a total load of `guilds`.
    pub fn optimal_for(&self, guilds: u64) -> u32 {
        clamp(
            optimal_shards(guilds, self.cfg.guilds_per_shard),
            self.cfg.min_shards,
            self.cfg.max_shards,
        )
    }

    /// Pure scaling decision for a fleet of `current` shards.
    pub fn decide(&self, snapshot: &StatsSnapshot, current: u32) -> ScaleDecision {
        if current == 0 {
            return ScaleDecision::Hold;
        }
        let total = snapshot.totals.guilds;
        let avg = total as f64 / f64::from(current);
        let threshold = self.cfg.guilds_per_shard as f64 * self.cfg.scale_threshold;
        let optimal = self.optimal_for(total);

        if avg > threshold {
            let to = optimal.max(current + 1).min(self.cfg.max_shards);
            if to > current {
                return ScaleDecision::Up { from: current, to };
            }
        } else if avg < threshold * 0.5 && current > self.cfg.min_shards {
            let to = optimal.min(current - 1).max(self.cfg.min_shards);
            if to < current {
                return ScaleDecision::Down { from: current, to };
            }
        }
        ScaleDecision::Hold
    }

    /// Runs one check: collect stats, decide, apply.
    pub async fn check_and_scale(&self, target: &dyn ScaleTarget) -> ScaleDecision {
        let current = target.shard_ids().len() as u32;
        let snapshot = target.collect_stats().await;
        let decision = self.decide(&snapshot, current);

        match decision {
            ScaleDecision::Up { from, to } => {
                tracing::info!(from, to, guilds = snapshot.totals.guilds, "scaling up");
                self.scale_up(target, to).await;
            }
            ScaleDecision::Down { from, to } => {
                tracing::info!(from, to, guilds = snapshot.totals.guilds, "scaling down");
                self.scale_down(target, to).await;
            }
            ScaleDecision::Hold => {
                tracing::debug!(current, guilds = snapshot.totals.guilds, "fleet size holds");
            }
        }
        decision
    }

    /// Adds shards one at a time until the fleet has `to` shards.
    ///
    /// New ids continue after the highest existing id.
    pub async fn scale_up(&self, target: &dyn ScaleTarget, to: u32) {
        let ids = target.shard_ids();
        let current = ids.len() as u32;
        let first = ids.iter().max().map_or(0, |m| m + 1);
        let steps = to.saturating_sub(current);

        for (n, id) in (first..first + steps).enumerate() {
            match target.add_shard(id, to).await {
                Ok(()) => tracing::info!(shard = id, "spawned shard while scaling up"),
                Err(e) => self.step_failed(target, id, &e),
            }
            if (n as u32) + 1 < steps {
                tokio::time::sleep(self.cfg.scale_up_settle).await;
            }
        }
        let size = target.shard_ids().len() as u32;
        target
            .bus()
            .publish(Event::new(EventKind::ScaledUp).with_target(size));
    }

    /// Removes the highest ids one at a time until the fleet has `to` shards.
    pub async fn scale_down(&self, target: &dyn ScaleTarget, to: u32) {
        let mut ids = target.shard_ids();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        let steps = (ids.len() as u32).saturating_sub(to) as usize;

        for (n, id) in ids.into_iter().take(steps).enumerate() {
            match target.remove_shard(id).await {
                Ok(()) => tracing::info!(shard = id, "killed shard while scaling down"),
                Err(e) => self.step_failed(target, id, &e),
            }
            if n + 1 < steps {
                tokio::time::sleep(self.cfg.scale_down_settle).await;
            }
        }
        let size = target.shard_ids().len() as u32;
        target
            .bus()
            .publish(Event::new(EventKind::ScaledDown).with_target(size));
    }

    fn step_failed(&self, target: &dyn ScaleTarget, id: u32, e: &ShardError) {
        tracing::error!(shard = id, error = %e, "scale step failed");
        target.bus().publish(
            Event::new(EventKind::ScaleStepFailed)
                .with_shard(id)
                .with_reason(e.to_string()),
        );
    }
}

#[async_trait]
impl SizingStrategy for DynamicStrategy {
    fn name(&self) -> &'static str {
        "dynamic"
    }

    async fn target_count(&self) -> Result<u32, ShardError> {
        let recommended = self.oracle.recommended_shards().await?;
        let count = clamp(recommended, self.cfg.min_shards, self.cfg.max_shards);
        tracing::info!(recommended, count, "dynamic strategy calculated shard count");
        Ok(count)
    }

    fn start(&self, target: Arc<dyn ScaleTarget>) {
        let token = {
            let mut slot = self.monitor.lock();
            if slot.is_some() {
                tracing::warn!("dynamic monitoring already started");
                return;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        let me = self.clone();
        let period = self.cfg.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(?period, "started dynamic scaling monitoring");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = me.check_and_scale(target.as_ref()) => {}
                        }
                    }
                }
            }
            tracing::info!("stopped dynamic scaling monitoring");
        });
    }

    fn stop(&self) {
        if let Some(token) = self.monitor.lock().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::monitor::ShardStats;
    use crate::sizing::StaticOracle;
    use std::collections::BTreeMap;

    fn strategy(min: u32, max: u32) -> DynamicStrategy {
        DynamicStrategy::new(
            DynamicConfig {
                min_shards: min,
                max_shards: max,
                scale_up_settle: Duration::ZERO,
                scale_down_settle: Duration::ZERO,
                ..Default::default()
            },
            Arc::new(StaticOracle::new(2)),
        )
    }

    fn snapshot(per_shard: &[u64]) -> StatsSnapshot {
        let shards: BTreeMap<u32, ShardStats> = per_shard
            .iter()
            .enumerate()
            .map(|(i, &g)| (i as u32, ShardStats { guilds: g, ..Default::default() }))
            .collect();
        StatsSnapshot::from_shards(shards, Duration::ZERO)
    }

    #[test]
    fn overload_scales_up_past_current() {
        let s = strategy(1, 32);
        // 900 per shard > 800 threshold, optimal = ceil(1800 / 1000) = 2
        assert_eq!(
            s.decide(&snapshot(&[900, 900]), 2),
            ScaleDecision::Up { from: 2, to: 3 }
        );
        assert_eq!(
            s.decide(&snapshot(&[3000, 3000]), 2),
            ScaleDecision::Up { from: 2, to: 6 }
        );
    }

    #[test]
    fn underload_scales_down_never_below_min() {
        let s = strategy(2, 32);
        assert_eq!(
            s.decide(&snapshot(&[10, 10, 10, 10]), 4),
            ScaleDecision::Down { from: 4, to: 2 }
        );
        assert_eq!(s.decide(&snapshot(&[10, 10]), 2), ScaleDecision::Hold);
    }

    #[test]
    fn ceiling_and_band_hold() {
        let s = strategy(1, 2);
        assert_eq!(s.decide(&snapshot(&[5000, 5000]), 2), ScaleDecision::Hold);
        assert_eq!(s.decide(&snapshot(&[600, 600]), 2), ScaleDecision::Hold);
        assert_eq!(s.decide(&snapshot(&[]), 0), ScaleDecision::Hold);
    }

    struct FakeFleet {
        ids: Mutex<Vec<u32>>,
        guilds: u64,
        fail: Option<u32>,
        bus: Bus,
    }

    #[async_trait]
    impl ScaleTarget for FakeFleet {
        fn shard_ids(&self) -> Vec<u32> {
            self.ids.lock().clone()
        }

        async fn collect_stats(&self) -> StatsSnapshot {
            let n = self.ids.lock().len().max(1) as u64;
            snapshot(&vec![self.guilds / n; n as usize])
        }

        async fn add_shard(&self, id: u32, _total: u32) -> Result<(), ShardError> {
            if self.fail == Some(id) {
                return Err(ShardError::SpawnTimeout { shard: id, timeout: Duration::ZERO });
            }
            self.ids.lock().push(id);
            Ok(())
        }

        async fn remove_shard(&self, id: u32) -> Result<(), ShardError> {
            self.ids.lock().retain(|&x| x != id);
            Ok(())
        }

        fn bus(&self) -> Bus {
            self.bus.clone()
        }
    }

    #[tokio::test]
    async fn failed_step_does_not_abort_scale_up() {
        let bus = Bus::new(32);
        let mut rx = bus.subscribe();
        let fleet = FakeFleet {
            ids: Mutex::new(vec![0, 1]),
            guilds: 6000,
            fail: Some(3),
            bus,
        };
        let s = strategy(1, 32);

        let decision = s.check_and_scale(&fleet).await;
        assert_eq!(decision, ScaleDecision::Up { from: 2, to: 6 });
        assert_eq!(fleet.shard_ids(), vec![0, 1, 2, 4, 5]);

        let failed = rx.recv().await.unwrap();
        assert!(failed.is(EventKind::ScaleStepFailed, 3));
        let done = rx.recv().await.unwrap();
        assert_eq!(done.kind, EventKind::ScaledUp);
        assert_eq!(done.target, Some(5));
    }

    #[tokio::test]
    async fn scale_down_removes_highest_ids_first() {
        let fleet = FakeFleet {
            ids: Mutex::new(vec![0, 1, 2, 3]),
            guilds: 40,
            fail: None,
            bus: Bus::new(8),
        };
        let s = strategy(2, 32);
        s.check_and_scale(&fleet).await;
        assert_eq!(fleet.shard_ids(), vec![0, 1]);
    }
}
