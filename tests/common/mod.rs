#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use shardvisor::{
    Bus, Event, EventKind, ManagerConfig, Script, ShardCount, WorkerFn, WorkerLink,
    WorkerRequest, worker_fn,
};

/// Scripted thread worker.
///
/// Snippets: `"exit"` returns (context dies), `"hang"` never answers,
/// `"fail-on-N"` errors on shard N, `"probe"` answers unless this is a muted launch.
/// `stats()` answers with `guilds_per_shard` guilds. Anything else echoes the shard id.
pub struct Scripted {
    pub guilds_per_shard: u64,
    pub ready_delay: Duration,
    /// This shard returns right after launch, before reporting ready.
    pub exit_at_start: Option<u32>,
    /// This shard stays up but never reports ready.
    pub never_ready: Option<u32>,
    /// Launches numbered below this (per worker fn, starting at 0) ignore probes.
    pub muted_launches: u32,
    pub launches: Arc<AtomicU32>,
}

impl Default for Scripted {
    fn default() -> Self {
        Self {
            guilds_per_shard: 100,
            ready_delay: Duration::ZERO,
            exit_at_start: None,
            never_ready: None,
            muted_launches: 0,
            launches: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Scripted {
    pub fn into_worker(self) -> WorkerFn {
        let this = Arc::new(self);
        worker_fn(move |link: WorkerLink| {
            let this = Arc::clone(&this);
            async move { this.run(link).await }
        })
    }

    async fn run(&self, mut link: WorkerLink) {
        let launch = self.launches.fetch_add(1, Ordering::SeqCst);
        let muted = launch < self.muted_launches;
        let shard = link.env().shard_id;
        if self.exit_at_start == Some(shard) {
            return;
        }
        if self.never_ready == Some(shard) {
            while link.recv().await.is_some() {}
            return;
        }

        if !self.ready_delay.is_zero() {
            tokio::time::sleep(self.ready_delay).await;
        }
        let _ = link.ready();

        while let Some(req) = link.recv().await {
            match req {
                WorkerRequest::Eval { id, script } => match script {
                    Script::Snippet(s) if s == "exit" => return,
                    Script::Snippet(s) if s == "hang" => {}
                    Script::Snippet(s) if s == "probe" && muted => {}
                    Script::Snippet(s) if s == format!("fail-on-{shard}") => {
                        let _ = link.reply_eval(id, Err(format!("shard {shard} refused")));
                    }
                    Script::Invoke { function, .. } if function == "stats" => {
                        let record = json!({
                            "guilds": self.guilds_per_shard,
                            "users": 10,
                            "ping": 20.0,
                            "ready": true
                        });
                        let _ = link.reply_eval(id, Ok(record));
                    }
                    _ => {
                        let _ = link.reply_eval(id, Ok(json!(shard)));
                    }
                },
                WorkerRequest::Fetch { id, prop } => {
                    let _ = link.reply_fetch(id, Ok(json!(format!("{prop}@{shard}"))));
                }
                _ => {}
            }
        }
    }
}

/// Thread-mode config with fast timings and a fixed count.
pub fn fast_config(worker: WorkerFn, count: u32) -> ManagerConfig {
    let mut cfg = ManagerConfig::thread(worker);
    cfg.total_shards = ShardCount::Fixed(count);
    cfg.spawn_delay = Duration::from_millis(20);
    cfg.spawn_timeout = Duration::from_secs(2);
    cfg.eval_timeout = Duration::from_secs(1);
    cfg.respawn_backoff = shardvisor::BackoffPolicy::fixed(Duration::from_millis(20));
    cfg.health.interval = Duration::from_secs(3600);
    cfg
}

/// Next event of `kind` for `shard` on `rx`, or panics after 2s.
pub async fn expect_event(
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    kind: EventKind,
    shard: u32,
) -> Event {
    Bus::next_matching(rx, |e| e.is(kind, shard), Duration::from_secs(2))
        .await
        .unwrap_or_else(|_| panic!("no {kind:?} for shard {shard}"))
}
