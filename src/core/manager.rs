//! # ShardManager: owns a fleet of shards and keeps it alive.
//!
//! The [`ShardManager`] owns the event bus, the shard registry, a
//! [`HealthMonitor`], a [`StatsAggregator`] and a [`SizingStrategy`]. It spawns
//! shards strictly one after another, fans requests out to all of them, and
//! respawns shards that die when the respawn policy allows it.
//!
//! ## High-level architecture
//! ```text
//! spawn():
//!   count = Fixed(n) | strategy.target_count()
//!   ids   = cfg.shard_list | strategy.distribute(count)
//!   for id in ids:                                  (sequential, anti-burst)
//!       Shard::new ─► ShardCreated
//!       shard.spawn(timeout) ─► ShardSpawning ─► ShardReady
//!       sleep(spawn_delay)                          (not after the last one)
//!   FleetReady ─► health.start() ─► stats auto-collect ─► strategy.start(self)
//!
//! Event flow:
//!   Shard pumps / HealthMonitor / StatsAggregator ── publish ──► Bus
//!                                                                │
//!                                                       manager listener
//!                                                 ┌──────────────┴──────────────┐
//!                                                 ▼                             ▼
//!                                        SubscriberSet::emit       ShardDeath / ShardDead
//!                                                                 └─► respawn_shard(id)   (if enabled)
//!
//! destroy():
//!   strategy.stop() ─► root token cancelled (health, stats, listener) ─► kill every shard
//! ```
//!
//! ## Rules
//! - A second `spawn()` while one is in flight fails with [`ShardError::AlreadySpawning`]
//! - A failed spawn fails the whole call; shards spawned before it are kept
//! - Broadcast results follow registry (spawn) order
//! - Concurrent respawn requests for the same shard coalesce into one

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::{ManagerConfig, ShardCount};
use crate::core::{ShardRegistry, shutdown};
use crate::error::ShardError;
use crate::events::{Bus, Event, EventKind};
use crate::host::WorkerHost;
use crate::ipc::Script;
use crate::monitor::{HealthMonitor, StatsAggregator, StatsSnapshot};
use crate::shard::{Shard, ShardParams, ShardState};
use crate::sizing::{ScaleTarget, SizingStrategy};
use crate::subscribers::SubscriberSet;

/// Per-shard outcome of a fleet-wide request, in registry order.
pub type ShardResults<T> = Vec<(u32, Result<T, ShardError>)>;

pub(crate) struct Inner {
    pub(crate) cfg: ManagerConfig,
    pub(crate) host: Arc<dyn WorkerHost>,
    pub(crate) bus: Bus,
    pub(crate) registry: Arc<ShardRegistry>,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) stats: Arc<StatsAggregator>,
    pub(crate) strategy: Arc<dyn SizingStrategy>,
    pub(crate) token: CancellationToken,
    spawning: AtomicBool,
    fleet_total: AtomicU32,
    respawning: Mutex<HashSet<u32>>,
    streaks: Mutex<HashMap<u32, u32>>,
}

/// Supervisor of one fleet of shards. Cheap to clone.
#[derive(Clone)]
pub struct ShardManager {
    inner: Arc<Inner>,
}

/// Resets the in-flight spawn flag on every exit path.
struct SpawnGuard<'a>(&'a AtomicBool);

impl Drop for SpawnGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ShardManager {
    pub(crate) fn from_parts(
        cfg: ManagerConfig,
        host: Arc<dyn WorkerHost>,
        strategy: Arc<dyn SizingStrategy>,
        bus: Bus,
        subs: SubscriberSet,
    ) -> Self {
        let token = CancellationToken::new();
        let registry = ShardRegistry::new();
        let health = HealthMonitor::new(
            cfg.health.clone(),
            Arc::clone(&registry),
            bus.clone(),
            token.clone(),
        );
        let stats = StatsAggregator::new(
            cfg.stats.clone(),
            Arc::clone(&registry),
            bus.clone(),
            token.clone(),
        );

        let inner = Arc::new(Inner {
            cfg,
            host,
            bus,
            registry,
            health,
            stats,
            strategy,
            token,
            spawning: AtomicBool::new(false),
            fleet_total: AtomicU32::new(0),
            respawning: Mutex::new(HashSet::new()),
            streaks: Mutex::new(HashMap::new()),
        });
        spawn_listener(Arc::downgrade(&inner), subs);
        Self { inner }
    }

    /// Spawns the configured fleet with the configured delay and timeout.
    ///
    /// Returns the spawned ids in spawn order.
    pub async fn spawn(&self) -> Result<Vec<u32>, ShardError> {
        let cfg = &self.inner.cfg;
        self.spawn_with(cfg.total_shards, cfg.spawn_delay, cfg.spawn_timeout)
            .await
    }

    /// Spawns `count` shards one at a time, waiting `delay` between spawns and
    /// at most `timeout` for each shard to report ready.
    ///
    /// Fails on the first shard that does not come up; shards spawned before it
    /// stay in the fleet.
    pub async fn spawn_with(
        &self,
        count: impl Into<ShardCount>,
        delay: Duration,
        timeout: Duration,
    ) -> Result<Vec<u32>, ShardError> {
        if self
            .inner
            .spawning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ShardError::AlreadySpawning);
        }
        let _guard = SpawnGuard(&self.inner.spawning);

        let total = match count.into() {
            ShardCount::Fixed(0) => {
                return Err(ShardError::Config {
                    reason: "shard count must be at least 1".into(),
                });
            }
            ShardCount::Fixed(n) => n,
            ShardCount::Auto => self.inner.strategy.target_count().await?,
        };
        let ids = match &self.inner.cfg.shard_list {
            Some(list) => list.clone(),
            None => self.inner.strategy.distribute(total),
        };
        self.inner.fleet_total.store(total, Ordering::Release);

        tracing::info!(
            total,
            shards = ids.len(),
            strategy = self.inner.strategy.name(),
            mode = self.inner.host.mode(),
            "spawning shards"
        );

        for (n, &id) in ids.iter().enumerate() {
            if let Err(e) = self.spawn_shard(id, total, timeout).await {
                tracing::error!(shard = id, error = %e, "failed to spawn shard");
                return Err(e);
            }
            if n + 1 < ids.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        tracing::info!(shards = ids.len(), "all shards spawned");
        self.inner
            .bus
            .publish(Event::new(EventKind::FleetReady).with_target(ids.len() as u32));

        self.inner.health.start();
        if let Some(interval) = self.inner.cfg.stats.interval {
            self.inner.stats.start_auto_collect(interval);
        }
        self.inner.strategy.start(Arc::new(self.clone()));
        Ok(ids)
    }

    /// Creates (or replaces) shard `id` and waits until it is ready.
    async fn spawn_shard(&self, id: u32, total: u32, timeout: Duration) -> Result<Arc<Shard>, ShardError> {
        let params = ShardParams {
            shard_count: total,
            token: self.inner.cfg.token.clone(),
            eval_timeout: self.inner.cfg.eval_timeout,
        };
        let shard = Shard::new(id, params, Arc::clone(&self.inner.host), self.inner.bus.clone());
        if let Some(old) = self.inner.registry.insert(Arc::clone(&shard)) {
            old.kill();
        }
        self.inner
            .bus
            .publish(Event::new(EventKind::ShardCreated).with_shard(id));

        shard.spawn(timeout).await?;
        Ok(shard)
    }

    /// Kills shard `id`, waits the respawn grace delay and spawns it again.
    ///
    /// A call for a shard that is already being respawned returns the shard
    /// without starting a second respawn.
    pub async fn respawn_shard(&self, id: u32) -> Result<Arc<Shard>, ShardError> {
        let shard = self
            .inner
            .registry
            .get(id)
            .ok_or(ShardError::NotFound { shard: id })?;
        if !self.inner.respawning.lock().insert(id) {
            tracing::debug!(shard = id, "respawn already in progress");
            return Ok(shard);
        }

        let attempt = {
            let mut streaks = self.inner.streaks.lock();
            let n = streaks.entry(id).or_insert(0);
            let attempt = *n;
            *n = n.saturating_add(1);
            attempt
        };
        let delay = self.inner.cfg.respawn_backoff.next(attempt);
        tracing::info!(shard = id, ?delay, attempt, "respawning shard");
        self.inner.bus.publish(
            Event::new(EventKind::RespawnScheduled)
                .with_shard(id)
                .with_delay(delay)
                .with_reason(format!("attempt={attempt}")),
        );

        let res = self.kill_wait_spawn(&shard, delay).await;
        self.inner.respawning.lock().remove(&id);
        self.inner.health.reset(Some(id));

        res.map(|()| shard)
    }

    async fn kill_wait_spawn(&self, shard: &Arc<Shard>, delay: Duration) -> Result<(), ShardError> {
        shard.kill();
        tokio::select! {
            _ = self.inner.token.cancelled() => {
                return Err(ShardError::Killed { shard: shard.id() });
            }
            _ = tokio::time::sleep(delay) => {}
        }
        let res = shard.spawn(self.inner.cfg.spawn_timeout).await;
        if self.inner.token.is_cancelled() {
            shard.kill();
        }
        res
    }

    /// Respawns every shard in registry order, waiting `shard_delay` between them.
    ///
    /// Stops at the first failure.
    pub async fn respawn_all(&self, shard_delay: Duration) -> Result<(), ShardError> {
        tracing::info!("respawning all shards");
        let ids = self.inner.registry.ids();
        for (n, &id) in ids.iter().enumerate() {
            self.respawn_shard(id).await?;
            if n + 1 < ids.len() {
                tokio::time::sleep(shard_delay).await;
            }
        }
        tracing::info!(shards = ids.len(), "all shards respawned");
        Ok(())
    }

    /// Kills shard `id`. It stays in the fleet in the `Killed` state.
    pub fn kill_shard(&self, id: u32) -> Result<(), ShardError> {
        let shard = self
            .inner
            .registry
            .get(id)
            .ok_or(ShardError::NotFound { shard: id })?;
        shard.kill();
        Ok(())
    }

    /// Sends a free-form message to shard `id`.
    pub fn send_to(&self, id: u32, message: Value) -> Result<(), ShardError> {
        self.inner
            .registry
            .get(id)
            .ok_or(ShardError::NotFound { shard: id })?
            .send(message)
    }

    /// Sends a `broadcast` envelope to every shard.
    pub fn broadcast(&self, message: Value) -> ShardResults<()> {
        self.inner
            .registry
            .snapshot()
            .iter()
            .map(|shard| (shard.id(), shard.broadcast(message.clone())))
            .collect()
    }

    /// Evaluates `script` on every shard concurrently.
    ///
    /// A failing shard yields an error entry; the others are unaffected.
    pub async fn broadcast_eval(&self, script: impl Into<Script>) -> ShardResults<Value> {
        let script = script.into();
        let shards = self.inner.registry.snapshot();
        join_all(shards.iter().map(|shard| {
            let script = script.clone();
            async move { (shard.id(), shard.eval(script).await) }
        }))
        .await
    }

    /// Fetches client property `prop` from every shard concurrently.
    pub async fn fetch_client_values(&self, prop: &str) -> ShardResults<Value> {
        let shards = self.inner.registry.snapshot();
        join_all(
            shards
                .iter()
                .map(|shard| async move { (shard.id(), shard.fetch_client_value(prop).await) }),
        )
        .await
    }

    /// Shard `id`, if present.
    pub fn shard(&self, id: u32) -> Option<Arc<Shard>> {
        self.inner.registry.get(id)
    }

    /// Ids in spawn order.
    pub fn shard_ids(&self) -> Vec<u32> {
        self.inner.registry.ids()
    }

    /// State of every shard.
    pub fn states(&self) -> BTreeMap<u32, ShardState> {
        self.inner
            .registry
            .snapshot()
            .iter()
            .map(|s| (s.id(), s.state()))
            .collect()
    }

    /// Fleet-wide total announced to workers by the last spawn.
    pub fn total_shards(&self) -> u32 {
        self.inner.fleet_total.load(Ordering::Acquire)
    }

    /// True while a `spawn()` is in flight.
    pub fn is_spawning(&self) -> bool {
        self.inner.spawning.load(Ordering::Acquire)
    }

    /// Event bus of this fleet.
    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// Health monitor of this fleet.
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.inner.health
    }

    /// Stats aggregator of this fleet.
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.inner.stats
    }

    /// Sizing strategy of this fleet.
    pub fn strategy(&self) -> &Arc<dyn SizingStrategy> {
        &self.inner.strategy
    }

    /// Configuration this manager was built with.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.cfg
    }

    /// Stops every background loop and kills every shard.
    pub async fn destroy(&self) {
        tracing::info!("destroying shard manager");
        self.inner.strategy.stop();
        self.inner.health.stop();
        self.inner.stats.stop_auto_collect();
        self.inner.token.cancel();

        let shards = self.inner.registry.drain();
        for shard in &shards {
            shard.kill();
        }
        tracing::info!(shards = shards.len(), "shard manager destroyed");
    }

    /// Runs until an OS termination signal arrives, then destroys the fleet.
    pub async fn run_until_shutdown(&self) -> std::io::Result<()> {
        let signal = tokio::select! {
            res = shutdown::wait_for_shutdown_signal() => res,
            _ = self.inner.token.cancelled() => Ok(()),
        };
        self.inner
            .bus
            .publish(Event::new(EventKind::ShutdownRequested));
        self.destroy().await;
        signal
    }
}

#[async_trait]
impl ScaleTarget for ShardManager {
    fn shard_ids(&self) -> Vec<u32> {
        self.inner.registry.ids()
    }

    async fn collect_stats(&self) -> StatsSnapshot {
        self.inner.stats.collect().await
    }

    /// Adds shard `id`; a shard that does not come up is taken out again.
    async fn add_shard(&self, id: u32, total: u32) -> Result<(), ShardError> {
        match self.spawn_shard(id, total, self.inner.cfg.spawn_timeout).await {
            Ok(_) => {
                self.inner.fleet_total.fetch_max(total, Ordering::AcqRel);
                Ok(())
            }
            Err(e) => {
                if let Some(shard) = self.inner.registry.remove(id) {
                    shard.kill();
                }
                self.inner.health.reset(Some(id));
                Err(e)
            }
        }
    }

    async fn remove_shard(&self, id: u32) -> Result<(), ShardError> {
        let shard = self
            .inner
            .registry
            .remove(id)
            .ok_or(ShardError::NotFound { shard: id })?;
        shard.kill();
        self.inner.health.reset(Some(id));
        self.inner.streaks.lock().remove(&id);
        let _ = self
            .inner
            .fleet_total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        Ok(())
    }

    fn bus(&self) -> Bus {
        self.inner.bus.clone()
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("shards", &self.inner.registry.ids())
            .field("strategy", &self.inner.strategy.name())
            .field("mode", &self.inner.host.mode())
            .finish()
    }
}

/// Forwards bus events to subscribers and reacts to shard death.
///
/// Holds only a weak reference so a dropped manager is not kept alive.
fn spawn_listener(inner: Weak<Inner>, subs: SubscriberSet) {
    let Some(strong) = inner.upgrade() else {
        return;
    };
    let mut rx = strong.bus.subscribe();
    let token = strong.token.clone();
    drop(strong);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => {
                        if !matches!(ev.kind, EventKind::SubscriberOverflow | EventKind::SubscriberPanicked) {
                            subs.emit(&ev);
                        }
                        let Some(inner) = inner.upgrade() else { break };
                        on_event(ShardManager { inner }, &ev);
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "manager listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = token.cancelled() => break,
            }
        }
        subs.shutdown().await;
    });
}

fn on_event(manager: ShardManager, ev: &Event) {
    let Some(id) = ev.shard else {
        return;
    };
    match ev.kind {
        EventKind::ShardDeath | EventKind::ShardDead => {
            if !manager.inner.cfg.respawn.is_enabled() {
                return;
            }
            tokio::spawn(async move {
                if let Err(e) = manager.respawn_shard(id).await {
                    tracing::error!(shard = id, error = %e, "respawn failed");
                }
            });
        }
        EventKind::ShardHealthy => {
            manager.inner.streaks.lock().remove(&id);
        }
        _ => {}
    }
}
