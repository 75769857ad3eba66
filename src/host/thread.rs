//! # Thread-mode worker host.
//!
//! Each shard gets a dedicated OS thread running a single-threaded tokio
//! runtime. The worker future races the terminate token; a panic inside the
//! worker is caught and reported as an exit with code `1`.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ShardError;
use crate::host::{ControlChannel, HostEvent, WorkerEnv, WorkerFn, WorkerHost, WorkerLink};

/// Runs worker functions on dedicated threads.
#[derive(Clone)]
pub struct ThreadHost {
    entry: WorkerFn,
}

impl ThreadHost {
    /// Creates a host running `entry` for every shard.
    pub fn new(entry: WorkerFn) -> Self {
        Self { entry }
    }
}

#[async_trait]
impl WorkerHost for ThreadHost {
    async fn launch(&self, env: WorkerEnv) -> Result<ControlChannel, ShardError> {
        let shard = env.shard_id;
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let terminate = CancellationToken::new();

        let entry = self.entry.clone();
        let token = terminate.clone();
        let exit_tx = in_tx.clone();
        let link = WorkerLink::new(env, in_tx, out_rx);

        std::thread::Builder::new()
            .name(format!("shard-{shard}"))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(shard, error = %e, "worker runtime failed to start");
                        let _ = exit_tx.send(HostEvent::Exited(None));
                        return;
                    }
                };

                let code = rt.block_on(async move {
                    let work = AssertUnwindSafe(entry(link)).catch_unwind();
                    tokio::select! {
                        res = work => if res.is_ok() { Some(0) } else { Some(1) },
                        _ = token.cancelled() => None,
                    }
                });
                let _ = exit_tx.send(HostEvent::Exited(code));
            })
            .map_err(|e| ShardError::Launch {
                shard,
                reason: e.to_string(),
            })?;

        Ok(ControlChannel {
            outbound: out_tx,
            inbound: in_rx,
            terminate,
        })
    }

    fn mode(&self) -> &'static str {
        "thread"
    }
}
