//! # Fleet events emitted by shards, shard managers, monitors and clusters.
//!
//! The [`EventKind`] enum classifies event types across five groups:
//! - **Shard lifecycle**: creation, readiness, advisory connectivity, death, kill
//! - **Fleet**: fleet-wide readiness and scheduled respawns
//! - **Health/stats**: probe outcomes and stats snapshots
//! - **Scaling**: steps taken by the dynamic sizing loop
//! - **Cluster**: cluster creation and readiness
//!
//! The [`Event`] struct carries optional metadata such as the shard and cluster
//! ids, reasons, probe latency and free-form payloads from the worker.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use shardvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ShardUnhealthy)
//!     .with_shard(4)
//!     .with_reason("probe timed out")
//!     .with_failures(2);
//!
//! assert_eq!(ev.kind, EventKind::ShardUnhealthy);
//! assert_eq!(ev.shard, Some(4));
//! assert_eq!(ev.failures, Some(2));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use serde_json::Value;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of fleet events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` (subscriber name and panic info).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` (subscriber name and cause).
    SubscriberOverflow,

    // === Shard lifecycle ===
    /// A shard object was created and is about to launch its execution context.
    ///
    /// Sets: `shard`.
    ShardCreated,

    /// The execution context is starting; waiting for `ready`.
    ///
    /// Sets: `shard`, `target` (shard count handed to the worker).
    ShardSpawning,

    /// The worker reported `ready` for the first time after a spawn.
    ///
    /// Sets: `shard`.
    ShardReady,

    /// The worker reported `ready` again after a disconnect/reconnect.
    ///
    /// Sets: `shard`.
    ShardResumed,

    /// Advisory: the worker lost its upstream connection.
    ///
    /// Sets: `shard`.
    ShardDisconnected,

    /// Advisory: the worker is re-establishing its upstream connection.
    ///
    /// Sets: `shard`.
    ShardReconnecting,

    /// The execution context terminated unexpectedly.
    ///
    /// Sets: `shard`, `code` (exit code, if any).
    ShardDeath,

    /// The shard was killed by an explicit operator/fleet action.
    ///
    /// Sets: `shard`.
    ShardKilled,

    /// Non-fatal shard error (malformed traffic, host error).
    ///
    /// Sets: `shard`, `reason`.
    ShardError,

    /// Free-form worker message passed through unchanged.
    ///
    /// Sets: `shard`, `payload`.
    ShardMessage,

    /// Worker pushed a `stats` message.
    ///
    /// Sets: `shard`, `payload`.
    ShardStats,

    // === Fleet ===
    /// `spawn()` completed: every requested shard is ready.
    ///
    /// Sets: `target` (number of shards spawned).
    FleetReady,

    /// A respawn was scheduled for a shard.
    ///
    /// Sets: `shard`, `delay_ms`, `reason`.
    RespawnScheduled,

    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    // === Health ===
    /// Health probe succeeded.
    ///
    /// Sets: `shard`, `latency_ms`.
    ShardHealthy,

    /// Health probe succeeded but slower than the configured threshold.
    ///
    /// Sets: `shard`, `latency_ms`.
    ShardSlow,

    /// Health probe failed or timed out.
    ///
    /// Sets: `shard`, `failures`, `reason`.
    ShardUnhealthy,

    /// Consecutive probe failures reached the configured maximum.
    ///
    /// Sets: `shard`, `failures`.
    ShardDead,

    // === Stats ===
    /// A stats snapshot was collected.
    ///
    /// Sets: `target` (number of shards in the snapshot), `payload` (totals).
    StatsCollected,

    // === Scaling ===
    /// Dynamic sizing added shards.
    ///
    /// Sets: `target` (new shard count).
    ScaledUp,

    /// Dynamic sizing removed shards.
    ///
    /// Sets: `target` (new shard count).
    ScaledDown,

    /// One scale step failed; the remaining steps continue.
    ///
    /// Sets: `shard`, `reason`.
    ScaleStepFailed,

    // === Cluster ===
    /// A cluster's shard manager was created.
    ///
    /// Sets: `cluster`, `target` (number of shards in the cluster).
    ClusterCreated,

    /// Every shard of a cluster is ready.
    ///
    /// Sets: `cluster`.
    ClusterReady,
}

impl EventKind {
    /// True for kinds that describe a shard's own lifecycle.
    pub fn is_shard_lifecycle(&self) -> bool {
        matches!(
            self,
            EventKind::ShardCreated
                | EventKind::ShardSpawning
                | EventKind::ShardReady
                | EventKind::ShardResumed
                | EventKind::ShardDisconnected
                | EventKind::ShardReconnecting
                | EventKind::ShardDeath
                | EventKind::ShardKilled
                | EventKind::ShardError
        )
    }
}

/// Fleet event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Shard id, if applicable.
    pub shard: Option<u32>,
    /// Owning cluster id, set when the event was re-emitted by a cluster manager.
    pub cluster: Option<u32>,
    /// Human-readable reason (errors, log details, etc.).
    pub reason: Option<Arc<str>>,
    /// Observed round-trip latency in milliseconds.
    pub latency_ms: Option<u64>,
    /// Consecutive failure count.
    pub failures: Option<u32>,
    /// Exit code of a terminated execution context.
    pub code: Option<i32>,
    /// Shard count (fleet size, scale target, or shards handed to a worker).
    pub target: Option<u32>,
    /// Delay before a scheduled action, in milliseconds.
    pub delay_ms: Option<u64>,
    /// Structured payload (worker messages, stats).
    pub payload: Option<Arc<Value>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            shard: None,
            cluster: None,
            reason: None,
            latency_ms: None,
            failures: None,
            code: None,
            target: None,
            delay_ms: None,
            payload: None,
        }
    }

    /// Attaches a shard id.
    #[inline]
    pub fn with_shard(mut self, shard: u32) -> Self {
        self.shard = Some(shard);
        self
    }

    /// Attaches a cluster id.
    #[inline]
    pub fn with_cluster(mut self, cluster: u32) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a latency (stored as milliseconds).
    #[inline]
    pub fn with_latency(mut self, d: Duration) -> Self {
        self.latency_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches a failure count.
    #[inline]
    pub fn with_failures(mut self, n: u32) -> Self {
        self.failures = Some(n);
        self
    }

    /// Attaches an exit code.
    #[inline]
    pub fn with_code(mut self, code: Option<i32>) -> Self {
        self.code = code;
        self
    }

    /// Attaches a shard count.
    #[inline]
    pub fn with_target(mut self, n: u32) -> Self {
        self.target = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches a structured payload.
    #[inline]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }

    /// True if this event is of `kind` and concerns `shard`.
    #[inline]
    pub fn is(&self, kind: EventKind, shard: u32) -> bool {
        self.kind == kind && self.shard == Some(shard)
    }
}
