//! # Health monitor.
//!
//! Probes every live shard on a fixed interval with a trivial remote
//! evaluation and keeps a consecutive-failure counter per shard.
//!
//! ```text
//! tick ─► check()
//!          ├─► probe shard 0 ──ok──► failures = 0, ShardHealthy (+ ShardSlow if > slow_threshold)
//!          ├─► probe shard 1 ──err─► failures += 1, ShardUnhealthy
//!          │                          └─ failures == max ─► ShardDead, failures = 0
//!          └─► ...   (join_all, each probe bounded by its own timeout)
//! ```
//!
//! ## Rules
//! - A tick that fires while the previous check is still running is skipped
//! - `ShardDead` is the only signal the owning manager respawns on
//! - Shards that are spawning, dead or killed are not probed

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::HealthConfig;
use crate::core::ShardRegistry;
use crate::error::ShardError;
use crate::events::{Bus, Event, EventKind};

/// Health of one shard as seen by the monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShardHealth {
    /// Consecutive failed probes.
    pub failures: u32,
    /// `failures < max_failures`.
    pub healthy: bool,
}

/// Periodic liveness prober.
pub struct HealthMonitor {
    cfg: HealthConfig,
    registry: Arc<ShardRegistry>,
    bus: Bus,
    failures: Mutex<HashMap<u32, u32>>,
    checking: AtomicBool,
    running: Mutex<Option<CancellationToken>>,
    root: CancellationToken,
}

impl HealthMonitor {
    pub(crate) fn new(
        cfg: HealthConfig,
        registry: Arc<ShardRegistry>,
        bus: Bus,
        root: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            registry,
            bus,
            failures: Mutex::new(HashMap::new()),
            checking: AtomicBool::new(false),
            running: Mutex::new(None),
            root,
        })
    }

    /// Starts probing every `interval`. A second call while running is ignored.
    pub fn start(self: &Arc<Self>) {
        let token = {
            let mut slot = self.running.lock();
            if slot.is_some() {
                return;
            }
            let token = self.root.child_token();
            *slot = Some(token.clone());
            token
        };

        let me = Arc::clone(self);
        let period = self.cfg.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let me = Arc::clone(&me);
                        tokio::spawn(async move { me.check().await });
                    }
                }
            }
            tracing::debug!("health monitor stopped");
        });
        tracing::info!(interval = ?period, "health monitor started");
    }

    /// Stops probing. Counters are kept.
    pub fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
        }
    }

    /// True while the probe loop runs.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Runs one probe round over all live shards.
    ///
    /// Returns the ids declared dead in this round. Returns nothing if another
    /// round is still in progress.
    pub async fn check(&self) -> Vec<u32> {
        if self.checking.swap(true, Ordering::AcqRel) {
            tracing::debug!("health check still running; tick skipped");
            return Vec::new();
        }
        let _guard = CheckGuard(&self.checking);

        let shards: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|s| s.state().is_live())
            .collect();

        let outcomes = join_all(shards.iter().map(|shard| async move {
            let started = Instant::now();
            let result = shard.evaluate(self.cfg.probe.clone(), self.cfg.timeout).await;
            (shard.id(), result.map(|_| started.elapsed()))
        }))
        .await;

        let dead = outcomes
            .into_iter()
            .filter_map(|(id, outcome)| match outcome {
                Ok(latency) => {
                    self.record_success(id, latency);
                    None
                }
                Err(e) => self.record_failure(id, &e).then_some(id),
            })
            .collect();
        dead
    }

    fn record_success(&self, id: u32, latency: Duration) {
        self.failures.lock().insert(id, 0);
        self.bus.publish(
            Event::new(EventKind::ShardHealthy)
                .with_shard(id)
                .with_latency(latency),
        );
        if latency > self.cfg.slow_threshold {
            tracing::warn!(shard = id, latency_ms = latency.as_millis() as u64, "shard responding slowly");
            self.bus.publish(
                Event::new(EventKind::ShardSlow)
                    .with_shard(id)
                    .with_latency(latency),
            );
        }
    }

    /// Returns true when the failure reaches the dead threshold.
    fn record_failure(&self, id: u32, err: &ShardError) -> bool {
        let failures = {
            let mut map = self.failures.lock();
            let n = map.entry(id).or_insert(0);
            *n += 1;
            *n
        };
        tracing::warn!(shard = id, failures, max = self.cfg.max_failures, error = %err, "health check failed");
        self.bus.publish(
            Event::new(EventKind::ShardUnhealthy)
                .with_shard(id)
                .with_failures(failures)
                .with_reason(err.to_string()),
        );

        if failures < self.cfg.max_failures.max(1) {
            return false;
        }
        tracing::error!(shard = id, failures, "shard declared dead");
        self.bus.publish(
            Event::new(EventKind::ShardDead)
                .with_shard(id)
                .with_failures(failures),
        );
        self.failures.lock().insert(id, 0);
        true
    }

    /// Health of shard `id`.
    pub fn shard_health(&self, id: u32) -> ShardHealth {
        let failures = self.failures.lock().get(&id).copied().unwrap_or(0);
        ShardHealth {
            failures,
            healthy: failures < self.cfg.max_failures.max(1),
        }
    }

    /// Health of every shard in the fleet.
    pub fn all_health(&self) -> BTreeMap<u32, ShardHealth> {
        self.registry
            .ids()
            .into_iter()
            .map(|id| (id, self.shard_health(id)))
            .collect()
    }

    /// Clears the counter of `id`, or of every shard.
    pub fn reset(&self, id: Option<u32>) {
        match id {
            Some(id) => {
                self.failures.lock().remove(&id);
            }
            None => self.failures.lock().clear(),
        }
    }
}

/// Clears the in-progress flag even when a round is dropped mid-flight.
struct CheckGuard<'a>(&'a AtomicBool);

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
