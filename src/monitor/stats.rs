//! # Fleet statistics.
//!
//! [`StatsAggregator`] asks every shard for a metric record concurrently, folds
//! the answers into an immutable [`StatsSnapshot`] and keeps a bounded history.
//!
//! ```text
//! collect()
//!   ├─► shard 0: evaluate(request) ─► ShardStats      (failure → zeroed record + error)
//!   ├─► shard 1: evaluate(request) ─► ShardStats
//!   └─► ...                            join_all
//!        └─► StatsSnapshot { shards, totals } ─► history (oldest evicted) ─► StatsCollected
//! ```
//!
//! Totals are sums, except `ping` which is the mean over shards that answered.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::StatsConfig;
use crate::core::ShardRegistry;
use crate::events::{Bus, Event, EventKind};

/// Metrics reported by one shard. Missing fields default to zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardStats {
    /// Guilds (or equivalent units of load) served.
    pub guilds: u64,
    /// Users visible to the shard.
    pub users: u64,
    /// Channels visible to the shard.
    pub channels: u64,
    /// Upstream latency in milliseconds.
    pub ping: f64,
    /// Heap in use, bytes. Accepts a number or `{"heapUsed": n}`.
    #[serde(deserialize_with = "memory_bytes")]
    pub memory: u64,
    /// Client uptime in milliseconds.
    pub uptime: u64,
    /// Whether the client declares itself ready.
    pub ready: bool,
    /// Set when the shard could not be asked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShardStats {
    /// Zeroed record tagged with `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// True if the shard answered.
    pub fn responded(&self) -> bool {
        self.error.is_none()
    }
}

fn memory_bytes<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    fn as_u64(v: &Value) -> u64 {
        v.as_u64()
            .or_else(|| v.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0)
    }
    let v = Value::deserialize(d)?;
    Ok(match &v {
        Value::Object(map) => map.get("heapUsed").map_or(0, as_u64),
        other => as_u64(other),
    })
}

/// Fleet-wide sums.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StatsTotals {
    /// Sum of guilds.
    pub guilds: u64,
    /// Sum of users.
    pub users: u64,
    /// Sum of channels.
    pub channels: u64,
    /// Sum of memory, bytes.
    pub memory: u64,
    /// Mean ping over shards that answered; 0 when none did.
    pub ping: f64,
}

impl StatsTotals {
    fn fold<'a>(records: impl Iterator<Item = &'a ShardStats>) -> Self {
        let mut totals = StatsTotals::default();
        let mut responders = 0u32;
        for r in records {
            totals.guilds += r.guilds;
            totals.users += r.users;
            totals.channels += r.channels;
            totals.memory += r.memory;
            if r.responded() {
                totals.ping += r.ping;
                responders += 1;
            }
        }
        if responders > 0 {
            totals.ping /= f64::from(responders);
        }
        totals
    }
}

/// One immutable collection result.
#[derive(Clone, Debug)]
pub struct StatsSnapshot {
    /// Wall-clock time of collection.
    pub at: SystemTime,
    /// Aggregator uptime at collection.
    pub uptime: Duration,
    /// Per-shard records keyed by shard id.
    pub shards: BTreeMap<u32, ShardStats>,
    /// Fleet totals.
    pub totals: StatsTotals,
    taken: Instant,
}

impl StatsSnapshot {
    /// Builds a snapshot from per-shard records, computing totals.
    pub fn from_shards(shards: BTreeMap<u32, ShardStats>, uptime: Duration) -> Self {
        let totals = StatsTotals::fold(shards.values());
        Self {
            at: SystemTime::now(),
            uptime,
            shards,
            totals,
            taken: Instant::now(),
        }
    }

    /// Time since collection.
    pub fn age(&self) -> Duration {
        self.taken.elapsed()
    }
}

/// Totals averaged over a window of snapshots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AveragedTotals {
    /// Snapshots in the window.
    pub samples: usize,
    /// Mean guilds.
    pub guilds: f64,
    /// Mean users.
    pub users: f64,
    /// Mean channels.
    pub channels: f64,
    /// Mean memory, bytes.
    pub memory: f64,
    /// Mean of the per-snapshot mean ping.
    pub ping: f64,
}

/// Collects, aggregates and remembers fleet statistics.
pub struct StatsAggregator {
    cfg: StatsConfig,
    registry: Arc<ShardRegistry>,
    bus: Bus,
    history: Mutex<VecDeque<StatsSnapshot>>,
    started: Instant,
    auto: Mutex<Option<CancellationToken>>,
    root: CancellationToken,
}

impl StatsAggregator {
    pub(crate) fn new(
        cfg: StatsConfig,
        registry: Arc<ShardRegistry>,
        bus: Bus,
        root: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            registry,
            bus,
            history: Mutex::new(VecDeque::new()),
            started: Instant::now(),
            auto: Mutex::new(None),
            root,
        })
    }

    /// Time since the aggregator was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Asks every shard for its metrics and records the snapshot.
    ///
    /// Never fails: a shard that does not answer contributes a zeroed record
    /// tagged with the error.
    pub async fn collect(&self) -> StatsSnapshot {
        let shards = self.registry.snapshot();
        let request = &self.cfg.request;
        let timeout = self.cfg.timeout;

        let records = join_all(shards.iter().map(|shard| async move {
            let record = match shard.evaluate(request.clone(), timeout).await {
                Ok(v) => serde_json::from_value::<ShardStats>(v)
                    .unwrap_or_else(|e| ShardStats::failed(format!("bad stats record: {e}"))),
                Err(e) => {
                    tracing::error!(shard = shard.id(), error = %e, "failed to collect stats for shard");
                    ShardStats::failed(e.to_string())
                }
            };
            (shard.id(), record)
        }))
        .await;

        let snapshot = StatsSnapshot::from_shards(records.into_iter().collect(), self.uptime());
        self.push(snapshot.clone());

        let payload = serde_json::to_value(&snapshot.totals).unwrap_or(Value::Null);
        self.bus.publish(
            Event::new(EventKind::StatsCollected)
                .with_target(snapshot.shards.len() as u32)
                .with_payload(payload),
        );
        snapshot
    }

    fn push(&self, snapshot: StatsSnapshot) {
        let cap = self.cfg.max_history.max(1);
        let mut history = self.history.lock();
        history.push_back(snapshot);
        while history.len() > cap {
            history.pop_front();
        }
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<StatsSnapshot> {
        self.history.lock().back().cloned()
    }

    /// Every retained snapshot, oldest first.
    pub fn history(&self) -> Vec<StatsSnapshot> {
        self.history.lock().iter().cloned().collect()
    }

    /// Averages totals over snapshots taken within the last `window`.
    ///
    /// Returns `None` if no snapshot falls in the window.
    pub fn average_over(&self, window: Duration) -> Option<AveragedTotals> {
        let history = self.history.lock();
        let recent: Vec<&StatsTotals> = history
            .iter()
            .filter(|s| s.age() <= window)
            .map(|s| &s.totals)
            .collect();
        if recent.is_empty() {
            return None;
        }
        let n = recent.len() as f64;
        let mean = |f: fn(&StatsTotals) -> f64| recent.iter().map(|t| f(t)).sum::<f64>() / n;
        Some(AveragedTotals {
            samples: recent.len(),
            guilds: mean(|t| t.guilds as f64),
            users: mean(|t| t.users as f64),
            channels: mean(|t| t.channels as f64),
            memory: mean(|t| t.memory as f64),
            ping: mean(|t| t.ping),
        })
    }

    /// Collects every `interval` until stopped or the owning manager is destroyed.
    ///
    /// A second call while running is ignored.
    pub fn start_auto_collect(self: &Arc<Self>, interval: Duration) {
        let token = {
            let mut slot = self.auto.lock();
            if slot.is_some() {
                return;
            }
            let token = self.root.child_token();
            *slot = Some(token.clone());
            token
        };

        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        me.collect().await;
                    }
                }
            }
            tracing::debug!("stats auto-collect stopped");
        });
        tracing::info!(?interval, "stats auto-collect started");
    }

    /// Stops [`start_auto_collect`](Self::start_auto_collect).
    pub fn stop_auto_collect(&self) {
        if let Some(token) = self.auto.lock().take() {
            token.cancel();
        }
    }

    /// True while auto-collect runs.
    pub fn is_auto_collecting(&self) -> bool {
        self.auto.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_accepts_partial_and_nested_memory() {
        let r: ShardStats = serde_json::from_value(json!({
            "guilds": 12,
            "memory": {"heapUsed": 2048, "rss": 9999},
            "ready": true
        }))
        .unwrap();
        assert_eq!(r.guilds, 12);
        assert_eq!(r.memory, 2048);
        assert_eq!(r.users, 0);
        assert!(r.ready);

        let r: ShardStats = serde_json::from_value(json!({"memory": 512})).unwrap();
        assert_eq!(r.memory, 512);
    }

    #[test]
    fn totals_sum_counts_and_average_ping_over_responders() {
        let mut shards = BTreeMap::new();
        shards.insert(0, ShardStats { guilds: 10, users: 100, ping: 40.0, memory: 5, ..Default::default() });
        shards.insert(1, ShardStats { guilds: 20, users: 50, ping: 60.0, memory: 7, ..Default::default() });
        shards.insert(2, ShardStats::failed("timeout"));

        let snap = StatsSnapshot::from_shards(shards, Duration::ZERO);
        assert_eq!(snap.totals.guilds, 30);
        assert_eq!(snap.totals.users, 150);
        assert_eq!(snap.totals.memory, 12);
        assert_eq!(snap.totals.ping, 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_bounded_and_windowed() {
        let cfg = StatsConfig {
            max_history: 2,
            ..Default::default()
        };
        let agg = StatsAggregator::new(cfg, ShardRegistry::new(), Bus::new(8), CancellationToken::new());

        agg.collect().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        agg.collect().await;
        agg.collect().await;
        assert_eq!(agg.history().len(), 2);

        let avg = agg.average_over(Duration::from_secs(10)).unwrap();
        assert_eq!(avg.samples, 2);
        assert_eq!(avg.guilds, 0.0);
        assert!(agg.latest().is_some());
    }
}
