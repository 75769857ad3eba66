//! # Example: Cluster Fleet
//!
//! Five shards split into clusters of two, sized by a static oracle.
//! Every event reaches one subscriber tagged with its cluster id.
//!
//! Run with: `cargo run --example cluster_fleet`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use shardvisor::{
    ClusterConfig, ClusterManager, Event, EventKind, ManagerConfig, StaticOracle, Subscribe,
    WorkerLink, WorkerRequest, worker_fn,
};

struct ClusterPrinter;

#[async_trait]
impl Subscribe for ClusterPrinter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::ShardReady => println!("[cluster {:?}] shard {:?} ready", e.cluster, e.shard),
            EventKind::ClusterReady => println!("[cluster {:?}] up", e.cluster),
            EventKind::FleetReady if e.cluster.is_none() => {
                println!("all clusters up ({:?} shards)", e.target)
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "cluster-printer"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let worker = worker_fn(|mut link: WorkerLink| async move {
        let env = link.env().clone();
        let _ = link.ready();
        while let Some(req) = link.recv().await {
            if let WorkerRequest::Eval { id, .. } = req {
                let _ = link.reply_eval(id, Ok(json!({"shard": env.shard_id, "of": env.shard_count})));
            }
        }
    });

    let mut template = ManagerConfig::thread(worker);
    template.spawn_delay = Duration::from_millis(100);

    let mut cfg = ClusterConfig::new(template);
    cfg.cluster_delay = Duration::from_millis(300);

    let clusters = ClusterManager::new(cfg)
        .with_oracle(Arc::new(StaticOracle::new(5)))
        .with_subscribers(vec![Arc::new(ClusterPrinter)]);

    let ids = clusters.spawn().await?;
    println!("clusters: {ids:?}");

    for (shard, value) in clusters.broadcast_eval("whoami").await {
        println!("shard {shard}: {}", value?);
    }

    clusters.destroy().await;
    Ok(())
}
