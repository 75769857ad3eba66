#![cfg(unix)]

use std::time::Duration;

use shardvisor::{Bus, EventKind, ManagerConfig, RespawnPolicy, ShardCount, ShardError, ShardManager, ShardState, WorkerEntry};

fn shell_worker(script: &str) -> ManagerConfig {
    let mut cfg = ManagerConfig::new(WorkerEntry::Process {
        program: "sh".into(),
        args: vec!["-c".into(), script.into()],
    });
    cfg.total_shards = ShardCount::Fixed(1);
    cfg.spawn_delay = Duration::ZERO;
    cfg.spawn_timeout = Duration::from_secs(5);
    cfg.respawn = RespawnPolicy::Never;
    cfg
}

#[tokio::test]
async fn child_process_speaks_ndjson() {
    let cfg = shell_worker(r#"echo "{\"type\":\"ready\",\"shard\":$SHARD_ID}"; read line; exit 3"#);
    let manager = ShardManager::builder(cfg).build().unwrap();
    manager.spawn().await.unwrap();
    assert_eq!(manager.states()[&0], ShardState::Ready);

    let mut rx = manager.bus().subscribe();
    manager.send_to(0, serde_json::json!({"op": "bye"})).unwrap();

    let death = Bus::next_matching(&mut rx, |e| e.is(EventKind::ShardDeath, 0), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(death.code, Some(3));
    manager.destroy().await;
}

#[tokio::test]
async fn child_exiting_before_ready_fails_the_spawn() {
    let manager = ShardManager::builder(shell_worker("exit 7")).build().unwrap();
    let err = manager.spawn().await.unwrap_err();
    assert!(matches!(err, ShardError::DiedDuringSpawn { shard: 0, code: Some(7) }));
}

#[tokio::test]
async fn missing_program_fails_at_build() {
    let err = ShardManager::builder(ManagerConfig::process("")).build().unwrap_err();
    assert!(matches!(err, ShardError::MissingEntry));
}
