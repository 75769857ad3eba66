//! # Cluster supervisor.
//!
//! [`ClusterManager`] splits the fleet into contiguous slices (see
//! [`ClusterStrategy`]) and runs one [`ShardManager`] per slice.
//!
//! ```text
//! spawn():
//!   total ─► partition ─► for each slice, in order:
//!     build manager ─► register ─► forward its bus ─► ClusterCreated
//!     manager.spawn() ─► ClusterReady ─► sleep(cluster_delay)
//!   FleetReady
//!
//! forwarding: cluster bus events ─► with_cluster(id) ─► cluster manager bus ─► subscribers
//! ```
//!
//! A cluster manager spawns once; a second `spawn()` fails with
//! [`ClusterError::AlreadySpawned`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterConfig;
use crate::config::ShardCount;
use crate::core::{ShardManager, ShardResults};
use crate::error::{ClusterError, ShardError};
use crate::events::{Bus, Event, EventKind};
use crate::host::WorkerHost;
use crate::ipc::Script;
use crate::shard::Shard;
use crate::sizing::{ClusterStrategy, HttpSizingOracle, SizingOracle, SizingStrategy};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Supervisor of several shard managers, one per cluster.
pub struct ClusterManager {
    cfg: ClusterConfig,
    bus: Bus,
    strategy: ClusterStrategy,
    host: Option<Arc<dyn WorkerHost>>,
    subscribers: Mutex<Option<Vec<Arc<dyn Subscribe>>>>,
    clusters: RwLock<BTreeMap<u32, ShardManager>>,
    spawned: AtomicBool,
    token: CancellationToken,
}

impl ClusterManager {
    /// Creates a cluster manager. Nothing runs until [`spawn`](Self::spawn).
    ///
    /// With `Auto` sizing the HTTP oracle is used when the template carries a token.
    pub fn new(cfg: ClusterConfig) -> Self {
        let mut strategy = ClusterStrategy::new(cfg.shards_per_cluster);
        if let Some(token) = &cfg.manager.token {
            strategy = strategy.with_oracle(Arc::new(HttpSizingOracle::new(token.clone())));
        }
        Self {
            bus: Bus::new(cfg.manager.bus_capacity_clamped()),
            cfg,
            strategy,
            host: None,
            subscribers: Mutex::new(None),
            clusters: RwLock::new(BTreeMap::new()),
            spawned: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    /// Subscribers receiving every cluster's events (tagged with the cluster id).
    pub fn with_subscribers(self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        *self.subscribers.lock() = Some(subscribers);
        self
    }

    /// Replaces the partitioning strategy.
    pub fn with_strategy(mut self, strategy: ClusterStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Worker host shared by every cluster.
    pub fn with_host(mut self, host: Arc<dyn WorkerHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Oracle used to size an `Auto` fleet.
    pub fn with_oracle(mut self, oracle: Arc<dyn SizingOracle>) -> Self {
        self.strategy = self.strategy.with_oracle(oracle);
        self
    }

    /// Brings every cluster up, one after another.
    ///
    /// Each cluster's manager is registered before it spawns, so a failed
    /// cluster stays inspectable. Returns the cluster ids.
    ///
    /// Only the first call spawns; later calls fail with
    /// [`ClusterError::AlreadySpawned`] and leave the running clusters alone.
    pub async fn spawn(&self) -> Result<Vec<u32>, ClusterError> {
        if self.spawned.swap(true, Ordering::AcqRel) {
            return Err(ClusterError::AlreadySpawned);
        }
        self.attach_subscribers();

        let total = match self.cfg.total_shards {
            ShardCount::Fixed(0) => {
                return Err(ShardError::Config {
                    reason: "shard count must be at least 1".into(),
                }
                .into());
            }
            ShardCount::Fixed(n) => n,
            ShardCount::Auto => self.strategy.target_count().await?,
        };
        let slices = self.strategy.partition(total);
        tracing::info!(clusters = slices.len(), total, "spawning clusters");

        for (n, slice) in slices.iter().enumerate() {
            let cluster = slice.cluster;
            tracing::info!(cluster, shards = ?slice.shards, "spawning cluster");

            let mut mcfg = self.cfg.manager.clone();
            mcfg.total_shards = ShardCount::Fixed(total);
            mcfg.shard_list = Some(slice.shards.clone());

            let mut builder = ShardManager::builder(mcfg);
            if let Some(host) = &self.host {
                builder = builder.with_host(Arc::clone(host));
            }
            let manager = builder
                .build()
                .map_err(|source| ClusterError::Spawn { cluster, source })?;

            self.forward(cluster, &manager);
            self.clusters.write().insert(cluster, manager.clone());
            self.bus.publish(
                Event::new(EventKind::ClusterCreated)
                    .with_cluster(cluster)
                    .with_target(slice.shards.len() as u32),
            );

            manager.spawn().await.map_err(|source| {
                tracing::error!(cluster, error = %source, "cluster failed to spawn");
                ClusterError::Spawn { cluster, source }
            })?;
            self.bus
                .publish(Event::new(EventKind::ClusterReady).with_cluster(cluster));

            if n + 1 < slices.len() {
                tokio::time::sleep(self.cfg.cluster_delay).await;
            }
        }

        self.bus
            .publish(Event::new(EventKind::FleetReady).with_target(total));
        Ok(slices.into_iter().map(|s| s.cluster).collect())
    }

    fn attach_subscribers(&self) {
        let Some(subs) = self.subscribers.lock().take() else {
            return;
        };
        let set = SubscriberSet::new(subs, self.bus.clone());
        let mut rx = self.bus.subscribe();
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Ok(ev) if matches!(ev.kind, EventKind::SubscriberOverflow | EventKind::SubscriberPanicked) => {}
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
            set.shutdown().await;
        });
    }

    /// Re-publishes every event of `manager` on this bus tagged with `cluster`.
    fn forward(&self, cluster: u32, manager: &ShardManager) {
        let mut rx = manager.bus().subscribe();
        let out = self.bus.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => out.publish(ev.with_cluster(cluster)),
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!(cluster, skipped = n, "cluster forwarder lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    fn managers(&self) -> Vec<(u32, ShardManager)> {
        self.clusters
            .read()
            .iter()
            .map(|(id, m)| (*id, m.clone()))
            .collect()
    }

    /// Sends a `broadcast` envelope to every shard of every cluster.
    pub fn broadcast(&self, message: Value) -> ShardResults<()> {
        self.managers()
            .into_iter()
            .flat_map(|(_, m)| m.broadcast(message.clone()))
            .collect()
    }

    /// Evaluates `script` on every shard of every cluster concurrently.
    ///
    /// Results are flattened in cluster order, then shard order.
    pub async fn broadcast_eval(&self, script: impl Into<Script>) -> ShardResults<Value> {
        let script = script.into();
        let managers = self.managers();
        join_all(managers.iter().map(|(_, m)| m.broadcast_eval(script.clone())))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Shard manager of `cluster`.
    pub fn get_cluster(&self, cluster: u32) -> Result<ShardManager, ClusterError> {
        self.clusters
            .read()
            .get(&cluster)
            .cloned()
            .ok_or(ClusterError::UnknownCluster { cluster })
    }

    /// Every shard keyed by id, with its owning cluster.
    pub fn all_shards(&self) -> BTreeMap<u32, (u32, Arc<Shard>)> {
        let mut out = BTreeMap::new();
        for (cluster, manager) in self.managers() {
            for id in manager.shard_ids() {
                if let Some(shard) = manager.shard(id) {
                    out.insert(id, (cluster, shard));
                }
            }
        }
        out
    }

    /// Respawns every shard of `cluster` with the template's spawn delay.
    pub async fn respawn_cluster(&self, cluster: u32) -> Result<(), ClusterError> {
        let manager = self.get_cluster(cluster)?;
        manager.respawn_all(self.cfg.manager.spawn_delay).await?;
        Ok(())
    }

    /// Cluster ids, ascending.
    pub fn cluster_ids(&self) -> Vec<u32> {
        self.clusters.read().keys().copied().collect()
    }

    /// Partitioning strategy in use.
    pub fn strategy(&self) -> &ClusterStrategy {
        &self.strategy
    }

    /// Bus carrying every cluster's events.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Destroys every cluster concurrently.
    pub async fn destroy(&self) {
        tracing::info!("destroying all clusters");
        let managers = std::mem::take(&mut *self.clusters.write());
        join_all(managers.values().map(|m| m.destroy())).await;
        self.token.cancel();
        tracing::info!(clusters = managers.len(), "all clusters destroyed");
    }
}
