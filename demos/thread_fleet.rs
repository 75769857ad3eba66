//! # Example: Thread Fleet
//!
//! Four in-process workers, each answering `eval` with a fake stats record.
//! Shard 2 crashes after a few seconds and is respawned by the manager.
//!
//! Run with: `RUST_LOG=info cargo run --example thread_fleet`

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shardvisor::{
    BackoffPolicy, LogLevel, ManagerConfig, ShardManager, Subscribe, WorkerLink, WorkerRequest,
    worker_fn,
};
use tracing_subscriber::EnvFilter;

async fn worker(mut link: WorkerLink) {
    let id = link.env().shard_id;
    let _ = link.log(LogLevel::Info, format!("worker {id} connecting"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    let _ = link.ready();

    let crash = tokio::time::sleep(Duration::from_secs(3));
    tokio::pin!(crash);
    loop {
        tokio::select! {
            _ = &mut crash, if id == 2 => {
                let _ = link.log(LogLevel::Warn, "simulated crash");
                return;
            }
            req = link.recv() => match req {
                Some(WorkerRequest::Eval { id: req_id, .. }) => {
                    let stats = json!({
                        "guilds": 250 + id * 10,
                        "users": 10_000,
                        "channels": 900,
                        "ping": 42.0,
                        "memory": {"heapUsed": 64 << 20},
                        "ready": true
                    });
                    let _ = link.reply_eval(req_id, Ok(stats));
                }
                Some(_) => {}
                None => return,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut cfg = ManagerConfig::thread(worker_fn(worker));
    cfg.total_shards = 4.into();
    cfg.spawn_delay = Duration::from_millis(250);
    cfg.respawn_backoff = BackoffPolicy::fixed(Duration::from_secs(1));
    cfg.health.interval = Duration::from_secs(2);
    cfg.stats.interval = Some(Duration::from_secs(2));

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(shardvisor::LogWriter)];
    let manager = ShardManager::builder(cfg).with_subscribers(subs).build()?;

    let ids = manager.spawn().await?;
    println!("spawned shards {ids:?}");

    tokio::time::sleep(Duration::from_secs(6)).await;

    let snapshot = manager.stats().collect().await;
    println!(
        "guilds={} users={} ping={:.1}",
        snapshot.totals.guilds, snapshot.totals.users, snapshot.totals.ping
    );
    println!("states: {:?}", manager.states());

    manager.destroy().await;
    Ok(())
}
