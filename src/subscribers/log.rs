//! Built-in subscriber rendering fleet events as `tracing` records.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that logs every fleet event through `tracing`.
///
/// Enabled via the `logging` feature. Lifecycle noise goes to `debug`,
/// failures to `warn`/`error`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let shard = e.shard;
        let cluster = e.cluster;
        let reason = e.reason.as_deref();

        match e.kind {
            EventKind::ShardCreated | EventKind::ShardSpawning => {
                tracing::debug!(?shard, ?cluster, kind = ?e.kind, target = ?e.target, "shard lifecycle");
            }
            EventKind::ShardReady | EventKind::ShardResumed => {
                tracing::info!(?shard, ?cluster, kind = ?e.kind, "shard ready");
            }
            EventKind::ShardDisconnected | EventKind::ShardReconnecting => {
                tracing::info!(?shard, ?cluster, kind = ?e.kind, "shard connectivity changed");
            }
            EventKind::ShardDeath => {
                tracing::warn!(?shard, ?cluster, code = ?e.code, "shard died");
            }
            EventKind::ShardKilled => {
                tracing::info!(?shard, ?cluster, "shard killed");
            }
            EventKind::ShardError => {
                tracing::warn!(?shard, ?cluster, ?reason, "shard error");
            }
            EventKind::ShardMessage | EventKind::ShardStats => {
                tracing::trace!(?shard, ?cluster, kind = ?e.kind, payload = ?e.payload, "shard message");
            }
            EventKind::FleetReady => {
                tracing::info!(?cluster, shards = ?e.target, "fleet ready");
            }
            EventKind::RespawnScheduled => {
                tracing::info!(?shard, ?cluster, delay_ms = ?e.delay_ms, ?reason, "respawn scheduled");
            }
            EventKind::ShutdownRequested => {
                tracing::info!("shutdown requested");
            }
            EventKind::ShardHealthy => {
                tracing::trace!(?shard, latency_ms = ?e.latency_ms, "shard healthy");
            }
            EventKind::ShardSlow => {
                tracing::warn!(?shard, latency_ms = ?e.latency_ms, "shard slow");
            }
            EventKind::ShardUnhealthy => {
                tracing::warn!(?shard, failures = ?e.failures, ?reason, "shard unhealthy");
            }
            EventKind::ShardDead => {
                tracing::error!(?shard, failures = ?e.failures, "shard dead");
            }
            EventKind::StatsCollected => {
                tracing::debug!(shards = ?e.target, "stats collected");
            }
            EventKind::ScaledUp | EventKind::ScaledDown => {
                tracing::info!(kind = ?e.kind, shards = ?e.target, "fleet scaled");
            }
            EventKind::ScaleStepFailed => {
                tracing::warn!(?shard, ?reason, "scale step failed");
            }
            EventKind::ClusterCreated => {
                tracing::info!(?cluster, shards = ?e.target, "cluster created");
            }
            EventKind::ClusterReady => {
                tracing::info!(?cluster, "cluster ready");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                tracing::warn!(kind = ?e.kind, ?reason, "subscriber fault");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
