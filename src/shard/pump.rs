//! # Inbound message pump.
//!
//! One pump task runs per execution context. It stops when the context's
//! terminate token is cancelled (kill, respawn, spawn timeout) or when the
//! host reports the context gone, whichever comes first.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ShardError;
use crate::events::{Event, EventKind};
use crate::host::HostEvent;
use crate::ipc::{Inbound, LogLevel};
use crate::shard::{Shard, ShardState};

pub(super) async fn run(
    shard: Arc<Shard>,
    epoch: u64,
    mut inbound: mpsc::UnboundedReceiver<HostEvent>,
    terminate: CancellationToken,
) {
    loop {
        let ev = tokio::select! {
            biased;
            _ = terminate.cancelled() => return,
            ev = inbound.recv() => ev,
        };
        match ev {
            Some(HostEvent::Message(raw)) => match Inbound::parse(raw) {
                Ok(msg) => handle(&shard, msg),
                Err(e) => malformed(&shard, e.to_string()),
            },
            Some(HostEvent::Malformed(reason)) => malformed(&shard, reason),
            Some(HostEvent::Exited(code)) => {
                shard.on_exit(epoch, code);
                return;
            }
            None => {
                shard.on_exit(epoch, None);
                return;
            }
        }
    }
}

fn handle(shard: &Shard, msg: Inbound) {
    let id = shard.id();
    match msg {
        Inbound::Ready => {
            let prev = shard.transition(
                |s| {
                    matches!(
                        s,
                        ShardState::Spawning | ShardState::Disconnected | ShardState::Reconnecting
                    )
                },
                ShardState::Ready,
            );
            match prev {
                Some(ShardState::Spawning) => {
                    tracing::info!(shard = id, "shard ready");
                    shard
                        .bus()
                        .publish(Event::new(EventKind::ShardReady).with_shard(id));
                }
                Some(_) => {
                    tracing::info!(shard = id, "shard resumed");
                    shard
                        .bus()
                        .publish(Event::new(EventKind::ShardResumed).with_shard(id));
                }
                None => {}
            }
        }
        Inbound::Disconnect => {
            shard.transition(
                |s| matches!(s, ShardState::Ready | ShardState::Reconnecting),
                ShardState::Disconnected,
            );
            tracing::warn!(shard = id, "shard disconnected");
            shard
                .bus()
                .publish(Event::new(EventKind::ShardDisconnected).with_shard(id));
        }
        Inbound::Reconnecting => {
            shard.transition(
                |s| matches!(s, ShardState::Ready | ShardState::Disconnected),
                ShardState::Reconnecting,
            );
            tracing::info!(shard = id, "shard reconnecting");
            shard
                .bus()
                .publish(Event::new(EventKind::ShardReconnecting).with_shard(id));
        }
        Inbound::Eval { id: req, outcome } => {
            let outcome = outcome.map_err(|message| ShardError::Remote { shard: id, message });
            if let Err(e) = shard.evals.resolve(&req, outcome) {
                tracing::debug!(shard = id, error = %e, "dropping eval response");
            }
        }
        Inbound::Fetch { id: req, outcome } => {
            let outcome = outcome.map_err(|message| ShardError::Remote { shard: id, message });
            if let Err(e) = shard.fetches.resolve(&req, outcome) {
                tracing::debug!(shard = id, error = %e, "dropping fetch response");
            }
        }
        Inbound::Stats(data) => {
            shard.bus().publish(
                Event::new(EventKind::ShardStats)
                    .with_shard(id)
                    .with_payload(data),
            );
        }
        Inbound::Log { level, message } => match level {
            LogLevel::Error => tracing::error!(shard = id, "{message}"),
            LogLevel::Warn => tracing::warn!(shard = id, "{message}"),
            LogLevel::Info => tracing::info!(shard = id, "{message}"),
            LogLevel::Debug => tracing::debug!(shard = id, "{message}"),
            LogLevel::Trace => tracing::trace!(shard = id, "{message}"),
        },
        Inbound::Custom(payload) => {
            shard.bus().publish(
                Event::new(EventKind::ShardMessage)
                    .with_shard(id)
                    .with_payload(payload),
            );
        }
    }
}

fn malformed(shard: &Shard, reason: String) {
    tracing::warn!(shard = shard.id(), %reason, "malformed message from worker");
    shard.bus().publish(
        Event::new(EventKind::ShardError)
            .with_shard(shard.id())
            .with_reason(reason),
    );
}
