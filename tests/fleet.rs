mod common;

use std::time::Duration;

use common::{Scripted, expect_event, fast_config};
use shardvisor::{
    Bus, DynamicConfig, DynamicStrategy, EventKind, RespawnPolicy, ScaleDecision, ShardError,
    ShardManager, ShardState, StaticOracle,
};
use std::sync::Arc;

#[tokio::test]
async fn fixed_fleet_comes_up_in_order() {
    let manager = ShardManager::builder(fast_config(Scripted::default().into_worker(), 3))
        .build()
        .unwrap();
    let mut rx = manager.bus().subscribe();

    let ids = manager.spawn().await.unwrap();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(manager.shard_ids(), vec![0, 1, 2]);
    assert!(manager.states().values().all(|s| *s == ShardState::Ready));

    let mut ready = Vec::new();
    while ready.len() < 3 {
        let ev = Bus::next_matching(&mut rx, |e| e.kind == EventKind::ShardReady, Duration::from_secs(1))
            .await
            .unwrap();
        ready.push(ev.shard.unwrap());
    }
    assert_eq!(ready, vec![0, 1, 2]);
    Bus::next_matching(&mut rx, |e| e.kind == EventKind::FleetReady, Duration::from_secs(1))
        .await
        .unwrap();
    manager.destroy().await;
}

#[tokio::test]
async fn explicit_list_keeps_fleet_total() {
    let mut cfg = fast_config(Scripted::default().into_worker(), 8);
    cfg.shard_list = Some(vec![5, 7]);
    let manager = ShardManager::builder(cfg).build().unwrap();

    assert_eq!(manager.spawn().await.unwrap(), vec![5, 7]);
    assert_eq!(manager.shard(5).unwrap().shard_count(), 8);
    assert!(manager.shard(0).is_none());
    manager.destroy().await;
}

#[tokio::test]
async fn second_spawn_is_rejected_while_first_runs() {
    let worker = Scripted {
        ready_delay: Duration::from_millis(100),
        ..Default::default()
    };
    let manager = ShardManager::builder(fast_config(worker.into_worker(), 2))
        .build()
        .unwrap();

    let (a, b) = tokio::join!(manager.spawn(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.spawn().await
    });
    assert!(a.is_ok());
    assert!(matches!(b, Err(ShardError::AlreadySpawning)));
    assert!(!manager.is_spawning());
    manager.destroy().await;
}

#[tokio::test]
async fn broadcast_eval_survives_one_failing_shard() {
    let manager = ShardManager::builder(fast_config(Scripted::default().into_worker(), 3))
        .build()
        .unwrap();
    manager.spawn().await.unwrap();

    let results = manager.broadcast_eval("fail-on-1").await;
    let ids: Vec<u32> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(results[0].1.as_ref().unwrap(), &serde_json::json!(0));
    assert!(matches!(results[1].1, Err(ShardError::Remote { shard: 1, .. })));
    assert_eq!(results[2].1.as_ref().unwrap(), &serde_json::json!(2));

    let values = manager.fetch_client_values("guilds").await;
    assert_eq!(values[2].1.as_ref().unwrap(), &serde_json::json!("guilds@2"));
    manager.destroy().await;
}

#[tokio::test]
async fn death_is_followed_by_a_respawn() {
    let manager = ShardManager::builder(fast_config(Scripted::default().into_worker(), 2))
        .build()
        .unwrap();
    manager.spawn().await.unwrap();
    let mut rx = manager.bus().subscribe();

    let err = manager.shard(1).unwrap().eval("exit").await.unwrap_err();
    assert!(matches!(err, ShardError::Died { shard: 1, .. }));

    expect_event(&mut rx, EventKind::ShardDeath, 1).await;
    expect_event(&mut rx, EventKind::RespawnScheduled, 1).await;
    expect_event(&mut rx, EventKind::ShardReady, 1).await;
    assert_eq!(manager.shard(1).unwrap().state(), ShardState::Ready);
    assert_eq!(manager.shard(1).unwrap().eval("who").await.unwrap(), serde_json::json!(1));
    manager.destroy().await;
}

#[tokio::test]
async fn death_without_respawn_only_raises_the_signal() {
    let mut cfg = fast_config(Scripted::default().into_worker(), 1);
    cfg.respawn = RespawnPolicy::Never;
    let manager = ShardManager::builder(cfg).build().unwrap();
    manager.spawn().await.unwrap();
    let mut rx = manager.bus().subscribe();

    let _ = manager.shard(0).unwrap().eval("exit").await;
    expect_event(&mut rx, EventKind::ShardDeath, 0).await;

    let respawn = Bus::next_matching(
        &mut rx,
        |e| e.kind == EventKind::RespawnScheduled,
        Duration::from_millis(200),
    )
    .await;
    assert!(respawn.is_err());
    assert_eq!(manager.shard(0).unwrap().state(), ShardState::Dead);
    manager.destroy().await;
}

#[tokio::test]
async fn health_verdict_respawns_exactly_once() {
    let worker = Scripted {
        muted_launches: 1,
        ..Default::default()
    };
    let mut cfg = fast_config(worker.into_worker(), 1);
    cfg.health.probe = "probe".into();
    cfg.health.timeout = Duration::from_millis(30);
    cfg.health.max_failures = 2;
    let manager = ShardManager::builder(cfg).build().unwrap();
    manager.spawn().await.unwrap();
    let mut rx = manager.bus().subscribe();

    assert!(manager.health().check().await.is_empty());
    assert_eq!(manager.health().check().await, vec![0]);

    expect_event(&mut rx, EventKind::ShardDead, 0).await;
    expect_event(&mut rx, EventKind::RespawnScheduled, 0).await;
    expect_event(&mut rx, EventKind::ShardReady, 0).await;

    let again = Bus::next_matching(
        &mut rx,
        |e| e.kind == EventKind::RespawnScheduled,
        Duration::from_millis(200),
    )
    .await;
    assert!(again.is_err());

    assert!(manager.health().check().await.is_empty());
    assert_eq!(manager.health().shard_health(0).failures, 0);
    manager.destroy().await;
}

#[tokio::test]
async fn unknown_ids_and_kill() {
    let manager = ShardManager::builder(fast_config(Scripted::default().into_worker(), 1))
        .build()
        .unwrap();
    manager.spawn().await.unwrap();

    assert!(matches!(manager.kill_shard(9), Err(ShardError::NotFound { shard: 9 })));
    assert!(matches!(
        manager.send_to(9, serde_json::json!({})),
        Err(ShardError::NotFound { .. })
    ));
    manager.send_to(0, serde_json::json!({"op": "noop"})).unwrap();

    manager.kill_shard(0).unwrap();
    assert_eq!(manager.states()[&0], ShardState::Killed);
    let results = manager.broadcast(serde_json::json!("hello"));
    assert!(matches!(results[0].1, Err(ShardError::NotConnected { shard: 0 })));
    manager.destroy().await;
}

#[tokio::test]
async fn stats_totals_cover_the_fleet() {
    let worker = Scripted {
        guilds_per_shard: 250,
        ..Default::default()
    };
    let manager = ShardManager::builder(fast_config(worker.into_worker(), 4))
        .build()
        .unwrap();
    manager.spawn().await.unwrap();

    let snap = manager.stats().collect().await;
    assert_eq!(snap.shards.len(), 4);
    assert_eq!(snap.totals.guilds, 1000);
    assert_eq!(snap.totals.users, 40);
    assert_eq!(snap.totals.ping, 20.0);
    assert_eq!(manager.stats().history().len(), 1);
    manager.destroy().await;
}

#[tokio::test]
async fn auto_count_comes_from_the_oracle() {
    let mut cfg = fast_config(Scripted::default().into_worker(), 1);
    cfg.total_shards = shardvisor::ShardCount::Auto;
    let manager = ShardManager::builder(cfg.clone())
        .with_oracle(Arc::new(StaticOracle::new(3)))
        .build()
        .unwrap();
    assert_eq!(manager.spawn().await.unwrap(), vec![0, 1, 2]);
    assert_eq!(manager.total_shards(), 3);
    manager.destroy().await;

    let starved = ShardManager::builder(cfg)
        .with_oracle(Arc::new(
            StaticOracle::new(3).with_session_limit(1, Duration::from_secs(60)),
        ))
        .build()
        .unwrap();
    let err = starved.spawn().await.unwrap_err();
    assert_eq!(err.as_label(), "oracle_session_limit");
    assert!(starved.shard_ids().is_empty());
}

#[tokio::test]
async fn auto_without_oracle_or_token_fails_to_build() {
    let mut cfg = fast_config(Scripted::default().into_worker(), 1);
    cfg.total_shards = shardvisor::ShardCount::Auto;
    let err = ShardManager::builder(cfg).build().unwrap_err();
    assert_eq!(err.as_label(), "shard_invalid_config");
}

#[tokio::test]
async fn dynamic_check_grows_the_fleet() {
    let worker = Scripted {
        guilds_per_shard: 900,
        ..Default::default()
    };
    let manager = ShardManager::builder(fast_config(worker.into_worker(), 2))
        .build()
        .unwrap();
    manager.spawn().await.unwrap();

    let dynamic = DynamicStrategy::new(
        DynamicConfig {
            scale_up_settle: Duration::from_millis(10),
            ..Default::default()
        },
        Arc::new(StaticOracle::new(2)),
    );
    let decision = dynamic.check_and_scale(&manager).await;
    assert_eq!(decision, ScaleDecision::Up { from: 2, to: 3 });
    assert_eq!(manager.shard_ids(), vec![0, 1, 2]);
    assert_eq!(manager.shard(2).unwrap().state(), ShardState::Ready);
    assert_eq!(manager.total_shards(), 3);
    manager.destroy().await;
}

#[tokio::test]
async fn destroy_kills_everything() {
    let manager = ShardManager::builder(fast_config(Scripted::default().into_worker(), 2))
        .build()
        .unwrap();
    manager.spawn().await.unwrap();
    let shard = manager.shard(0).unwrap();

    manager.destroy().await;
    assert!(manager.shard_ids().is_empty());
    assert_eq!(shard.state(), ShardState::Killed);
}

/// Drains every event already published on `rx`.
fn drain(rx: &mut tokio::sync::broadcast::Receiver<shardvisor::Event>) -> Vec<shardvisor::Event> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

/// Time between two events, zero if `later` was stamped first.
fn gap(earlier: &shardvisor::Event, later: &shardvisor::Event) -> Duration {
    later.at.duration_since(earlier.at).unwrap_or_default()
}

#[tokio::test]
async fn spawn_windows_never_overlap() {
    let mut cfg = fast_config(Scripted::default().into_worker(), 3);
    cfg.spawn_delay = Duration::from_millis(80);
    let manager = ShardManager::builder(cfg).build().unwrap();
    let mut rx = manager.bus().subscribe();

    manager.spawn().await.unwrap();
    let timeline: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::ShardSpawning | EventKind::ShardReady))
        .collect();
    let order: Vec<_> = timeline.iter().map(|e| (e.kind, e.shard.unwrap())).collect();
    assert_eq!(
        order,
        vec![
            (EventKind::ShardSpawning, 0),
            (EventKind::ShardReady, 0),
            (EventKind::ShardSpawning, 1),
            (EventKind::ShardReady, 1),
            (EventKind::ShardSpawning, 2),
            (EventKind::ShardReady, 2),
        ]
    );
    for pair in timeline.chunks(2).collect::<Vec<_>>().windows(2) {
        let (ready, next_spawn) = (&pair[0][1], &pair[1][0]);
        assert!(gap(ready, next_spawn) >= Duration::from_millis(80));
    }
    manager.destroy().await;
}

#[tokio::test]
async fn failed_spawn_keeps_earlier_shards() {
    let worker = Scripted {
        never_ready: Some(1),
        ..Default::default()
    };
    let mut cfg = fast_config(worker.into_worker(), 3);
    cfg.spawn_timeout = Duration::from_millis(200);
    let manager = ShardManager::builder(cfg).build().unwrap();

    let err = manager.spawn().await.unwrap_err();
    assert!(matches!(err, ShardError::SpawnTimeout { shard: 1, .. }));
    assert_eq!(manager.shard_ids(), vec![0, 1]);
    assert_eq!(manager.states()[&0], ShardState::Ready);
    assert_eq!(manager.states()[&1], ShardState::Dead);
    assert!(manager.shard(2).is_none());
    assert!(!manager.is_spawning());
    manager.destroy().await;
}

#[tokio::test]
async fn respawn_all_goes_one_shard_at_a_time() {
    let manager = ShardManager::builder(fast_config(Scripted::default().into_worker(), 3))
        .build()
        .unwrap();
    manager.spawn().await.unwrap();
    let mut rx = manager.bus().subscribe();

    manager.respawn_all(Duration::from_millis(80)).await.unwrap();
    let timeline: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e.kind, EventKind::RespawnScheduled | EventKind::ShardReady))
        .collect();
    let order: Vec<_> = timeline.iter().map(|e| (e.kind, e.shard.unwrap())).collect();
    assert_eq!(
        order,
        vec![
            (EventKind::RespawnScheduled, 0),
            (EventKind::ShardReady, 0),
            (EventKind::RespawnScheduled, 1),
            (EventKind::ShardReady, 1),
            (EventKind::RespawnScheduled, 2),
            (EventKind::ShardReady, 2),
        ]
    );
    for pair in timeline.chunks(2).collect::<Vec<_>>().windows(2) {
        let (ready, next_respawn) = (&pair[0][1], &pair[1][0]);
        assert!(gap(ready, next_respawn) >= Duration::from_millis(80));
    }
    assert!(manager.states().values().all(|s| *s == ShardState::Ready));
    manager.destroy().await;
}

#[tokio::test]
async fn failed_scale_up_step_leaves_no_entry_behind() {
    let worker = Scripted {
        guilds_per_shard: 900,
        exit_at_start: Some(2),
        ..Default::default()
    };
    let manager = ShardManager::builder(fast_config(worker.into_worker(), 2))
        .build()
        .unwrap();
    manager.spawn().await.unwrap();
    let mut rx = manager.bus().subscribe();

    let dynamic = DynamicStrategy::new(
        DynamicConfig {
            scale_up_settle: Duration::from_millis(10),
            ..Default::default()
        },
        Arc::new(StaticOracle::new(2)),
    );
    let decision = dynamic.check_and_scale(&manager).await;
    assert_eq!(decision, ScaleDecision::Up { from: 2, to: 3 });
    expect_event(&mut rx, EventKind::ScaleStepFailed, 2).await;

    assert_eq!(manager.shard_ids(), vec![0, 1]);
    assert!(manager.shard(2).is_none());
    assert_eq!(manager.total_shards(), 2);
    manager.destroy().await;
}

#[tokio::test]
async fn dynamic_check_shrinks_the_fleet() {
    let worker = Scripted {
        guilds_per_shard: 10,
        ..Default::default()
    };
    let manager = ShardManager::builder(fast_config(worker.into_worker(), 3))
        .build()
        .unwrap();
    manager.spawn().await.unwrap();

    let dynamic = DynamicStrategy::new(
        DynamicConfig {
            scale_down_settle: Duration::from_millis(10),
            ..Default::default()
        },
        Arc::new(StaticOracle::new(3)),
    );
    let decision = dynamic.check_and_scale(&manager).await;
    assert_eq!(decision, ScaleDecision::Down { from: 3, to: 1 });
    assert_eq!(manager.shard_ids(), vec![0]);
    assert_eq!(manager.total_shards(), 1);
    manager.destroy().await;
}
