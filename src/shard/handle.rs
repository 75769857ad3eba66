//! # Shard handle.
//!
//! [`Shard`] is shared (`Arc`) between its owning manager, the pump task and
//! any caller holding it for requests. State changes are published through a
//! `watch` channel so `spawn` can wait for readiness without polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::ShardError;
use crate::events::{Bus, Event, EventKind};
use crate::host::{WorkerEnv, WorkerHost};
use crate::ipc::{Outbound, PendingTable, Script};
use crate::shard::{ShardState, pump};

/// Per-shard settings fixed at creation.
#[derive(Clone, Debug)]
pub(crate) struct ShardParams {
    /// Total shard count handed to the worker.
    pub shard_count: u32,
    /// Worker credentials.
    pub token: Option<String>,
    /// Default deadline for `eval`/`fetch_client_value`.
    pub eval_timeout: Duration,
}

/// Live link to the current execution context.
struct Connection {
    epoch: u64,
    outbound: mpsc::UnboundedSender<Value>,
    terminate: CancellationToken,
}

/// One partition of the workload and the protocol state to drive it.
pub struct Shard {
    id: u32,
    params: ShardParams,
    host: Arc<dyn WorkerHost>,
    bus: Bus,
    state: watch::Sender<ShardState>,
    conn: Mutex<Option<Connection>>,
    epoch: AtomicU64,
    last_exit: Mutex<Option<i32>>,
    pub(super) evals: PendingTable,
    pub(super) fetches: PendingTable,
}

impl Shard {
    pub(crate) fn new(id: u32, params: ShardParams, host: Arc<dyn WorkerHost>, bus: Bus) -> Arc<Self> {
        let (state, _) = watch::channel(ShardState::Created);
        Arc::new(Self {
            id,
            params,
            host,
            bus,
            state,
            conn: Mutex::new(None),
            epoch: AtomicU64::new(0),
            last_exit: Mutex::new(None),
            evals: PendingTable::new(),
            fetches: PendingTable::new(),
        })
    }

    /// Shard id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Total shard count this shard was started with.
    pub fn shard_count(&self) -> u32 {
        self.params.shard_count
    }

    /// Current state.
    pub fn state(&self) -> ShardState {
        *self.state.borrow()
    }

    /// Receiver observing every state change.
    pub fn watch_state(&self) -> watch::Receiver<ShardState> {
        self.state.subscribe()
    }

    /// True when the worker reported `ready` and has not stopped since.
    pub fn is_ready(&self) -> bool {
        self.state().is_live()
    }

    /// Exit code of the last terminated execution context.
    pub fn last_exit_code(&self) -> Option<i32> {
        *self.last_exit.lock()
    }

    /// Outstanding `eval` and `fetch` requests.
    pub fn pending_requests(&self) -> usize {
        self.evals.len() + self.fetches.len()
    }

    /// Launches a fresh execution context and waits until the worker reports `ready`.
    ///
    /// Any previous context is terminated first. Fails with
    /// [`ShardError::SpawnTimeout`] if `ready` does not arrive within `timeout`
    /// (the context is then terminated), or [`ShardError::DiedDuringSpawn`] if
    /// the context exits first.
    pub async fn spawn(self: &Arc<Self>, timeout: Duration) -> Result<(), ShardError> {
        self.detach();
        let mut state_rx = self.state.subscribe();
        self.state.send_replace(ShardState::Spawning);
        *self.last_exit.lock() = None;

        tracing::info!(shard = self.id, mode = self.host.mode(), "spawning shard");
        self.bus.publish(
            Event::new(EventKind::ShardSpawning)
                .with_shard(self.id)
                .with_target(self.params.shard_count),
        );

        let env = WorkerEnv {
            shard_id: self.id,
            shard_count: self.params.shard_count,
            token: self.params.token.clone(),
        };
        let channel = match self.host.launch(env).await {
            Ok(channel) => channel,
            Err(e) => {
                self.state.send_replace(ShardState::Dead);
                tracing::error!(shard = self.id, error = %e, "shard launch failed");
                return Err(e);
            }
        };

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.conn.lock() = Some(Connection {
            epoch,
            outbound: channel.outbound,
            terminate: channel.terminate.clone(),
        });
        tokio::spawn(pump::run(
            Arc::clone(self),
            epoch,
            channel.inbound,
            channel.terminate,
        ));

        let settled = tokio::time::timeout(timeout, async {
            state_rx
                .wait_for(|s| *s != ShardState::Spawning)
                .await
                .map(|s| *s)
        })
        .await;

        match settled {
            Ok(Ok(s)) if s.is_live() => Ok(()),
            Ok(Ok(ShardState::Killed)) => Err(ShardError::Killed { shard: self.id }),
            Ok(Ok(_)) | Ok(Err(_)) => Err(ShardError::DiedDuringSpawn {
                shard: self.id,
                code: self.last_exit_code(),
            }),
            Err(_) => {
                self.detach();
                self.state.send_replace(ShardState::Dead);
                tracing::warn!(shard = self.id, ?timeout, "shard took too long to spawn");
                Err(ShardError::SpawnTimeout {
                    shard: self.id,
                    timeout,
                })
            }
        }
    }

    /// Fire-and-forget message to the worker.
    pub fn send(&self, message: Value) -> Result<(), ShardError> {
        self.dispatch(Outbound::Custom(message))
    }

    /// Sends a `broadcast` envelope to the worker.
    pub fn broadcast(&self, message: Value) -> Result<(), ShardError> {
        self.dispatch(Outbound::Broadcast(message))
    }

    /// Evaluates `script` in the worker, waiting at most `timeout`.
    ///
    /// A timeout only stops waiting; the worker may still answer, and that
    /// answer is dropped as unmatched.
    pub async fn evaluate(&self, script: impl Into<Script>, timeout: Duration) -> Result<Value, ShardError> {
        let script = script.into();
        self.request(&self.evals, timeout, move |id| Outbound::Eval { id, script })
            .await
    }

    /// [`evaluate`](Self::evaluate) with the configured default deadline.
    pub async fn eval(&self, script: impl Into<Script>) -> Result<Value, ShardError> {
        self.evaluate(script, self.params.eval_timeout).await
    }

    /// Requests client property `prop` from the worker.
    pub async fn fetch(&self, prop: impl Into<String>, timeout: Duration) -> Result<Value, ShardError> {
        let prop = prop.into();
        self.request(&self.fetches, timeout, move |id| Outbound::Fetch { id, prop })
            .await
    }

    /// [`fetch`](Self::fetch) with the configured default deadline.
    pub async fn fetch_client_value(&self, prop: impl Into<String>) -> Result<Value, ShardError> {
        self.fetch(prop, self.params.eval_timeout).await
    }

    /// Terminates the execution context and moves to `Killed`.
    ///
    /// Outstanding requests are rejected with [`ShardError::Killed`]. Never fails.
    pub fn kill(&self) {
        self.detach();
        let prev = self.state.send_replace(ShardState::Killed);
        let shard = self.id;
        let rejected = self.evals.reject_all(|| ShardError::Killed { shard })
            + self.fetches.reject_all(|| ShardError::Killed { shard });

        if prev != ShardState::Killed {
            tracing::info!(shard, rejected, "shard killed");
            self.bus
                .publish(Event::new(EventKind::ShardKilled).with_shard(shard));
        }
    }

    /// Kill, wait `delay`, spawn again with a fresh context.
    pub async fn respawn(self: &Arc<Self>, delay: Duration, timeout: Duration) -> Result<(), ShardError> {
        self.kill();
        tokio::time::sleep(delay).await;
        self.spawn(timeout).await
    }

    async fn request<F>(&self, table: &PendingTable, timeout: Duration, build: F) -> Result<Value, ShardError>
    where
        F: FnOnce(String) -> Outbound,
    {
        let (id, rx) = table.register();
        if let Err(e) = self.dispatch(build(id.clone())) {
            table.forget(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ShardError::Died {
                shard: self.id,
                code: self.last_exit_code(),
            }),
            Err(_) => {
                table.forget(&id);
                tracing::debug!(shard = self.id, %id, ?timeout, "request timed out");
                Err(ShardError::EvalTimeout {
                    shard: self.id,
                    timeout,
                })
            }
        }
    }

    fn dispatch(&self, msg: Outbound) -> Result<(), ShardError> {
        let value = msg.into_value()?;
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or(ShardError::NotConnected { shard: self.id })?;
        conn.outbound
            .send(value)
            .map_err(|_| ShardError::NotConnected { shard: self.id })
    }

    /// Drops the current connection and terminates its context.
    fn detach(&self) -> bool {
        match self.conn.lock().take() {
            Some(conn) => {
                conn.terminate.cancel();
                true
            }
            None => false,
        }
    }

    /// Moves `from` → `to` if `from(current)` holds; returns the previous state.
    pub(super) fn transition(&self, from: impl Fn(ShardState) -> bool, to: ShardState) -> Option<ShardState> {
        let mut prev = None;
        self.state.send_if_modified(|s| {
            if from(*s) && *s != to {
                prev = Some(*s);
                *s = to;
                true
            } else {
                false
            }
        });
        prev
    }

    /// Handles termination of the context started at `epoch`.
    pub(super) fn on_exit(&self, epoch: u64, code: Option<i32>) {
        {
            let mut conn = self.conn.lock();
            if conn.as_ref().map(|c| c.epoch) != Some(epoch) {
                return;
            }
            conn.take();
        }
        *self.last_exit.lock() = code;
        let prev = self.state.send_replace(ShardState::Dead);

        let shard = self.id;
        let rejected = self.evals.reject_all(|| ShardError::Died { shard, code })
            + self.fetches.reject_all(|| ShardError::Died { shard, code });

        match prev {
            ShardState::Spawning => {
                tracing::warn!(shard, ?code, "shard died during spawn");
            }
            ShardState::Dead | ShardState::Killed => {}
            _ => {
                if code != Some(0) {
                    tracing::error!(shard, ?code, rejected, "shard exited unexpectedly");
                } else {
                    tracing::warn!(shard, rejected, "shard exited");
                }
                self.bus
                    .publish(Event::new(EventKind::ShardDeath).with_shard(shard).with_code(code));
            }
        }
    }

    pub(super) fn bus(&self) -> &Bus {
        &self.bus
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("mode", &self.host.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ThreadHost, WorkerLink, WorkerRequest, worker_fn};
    use serde_json::json;

    fn scripted_worker() -> Arc<dyn WorkerHost> {
        Arc::new(ThreadHost::new(worker_fn(|mut link: WorkerLink| async move {
            let _ = link.ready();
            while let Some(req) = link.recv().await {
                match req {
                    WorkerRequest::Eval { id, script } => match script {
                        Script::Snippet(s) if s == "hang" => {}
                        Script::Snippet(s) if s == "fail" => {
                            let _ = link.reply_eval(id, Err("nope".into()));
                        }
                        Script::Snippet(s) if s == "exit" => return,
                        other => {
                            let _ = link.reply_eval(id, Ok(serde_json::to_value(other).unwrap()));
                        }
                    },
                    WorkerRequest::Fetch { id, prop } => {
                        let _ = link.reply_fetch(id, Ok(json!(format!("value of {prop}"))));
                    }
                    _ => {}
                }
            }
        })))
    }

    fn shard_with(host: Arc<dyn WorkerHost>, bus: Bus) -> Arc<Shard> {
        let params = ShardParams {
            shard_count: 1,
            token: None,
            eval_timeout: Duration::from_secs(2),
        };
        Shard::new(0, params, host, bus)
    }

    #[tokio::test]
    async fn spawn_then_evaluate_and_fetch() {
        let shard = shard_with(scripted_worker(), Bus::new(64));
        shard.spawn(Duration::from_secs(2)).await.unwrap();
        assert_eq!(shard.state(), ShardState::Ready);

        let v = shard.eval("1 + 1").await.unwrap();
        assert_eq!(v, json!("1 + 1"));
        let v = shard.fetch_client_value("guilds").await.unwrap();
        assert_eq!(v, json!("value of guilds"));

        let err = shard.eval("fail").await.unwrap_err();
        assert_eq!(err.as_label(), "shard_remote_error");
        shard.kill();
    }

    #[tokio::test]
    async fn evaluate_times_out_without_answer() {
        let shard = shard_with(scripted_worker(), Bus::new(64));
        shard.spawn(Duration::from_secs(2)).await.unwrap();

        let started = tokio::time::Instant::now();
        let err = shard
            .evaluate("hang", Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(shard.pending_requests(), 0);
        shard.kill();
    }

    #[tokio::test]
    async fn kill_rejects_outstanding_requests() {
        let shard = shard_with(scripted_worker(), Bus::new(64));
        shard.spawn(Duration::from_secs(2)).await.unwrap();

        let waiter = {
            let shard = Arc::clone(&shard);
            tokio::spawn(async move { shard.evaluate("hang", Duration::from_secs(5)).await })
        };
        while shard.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }
        shard.kill();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ShardError::Killed { shard: 0 }));
        assert_eq!(shard.state(), ShardState::Killed);
        assert!(matches!(shard.send(json!({})), Err(ShardError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn exit_after_ready_publishes_death() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let shard = shard_with(scripted_worker(), bus);
        shard.spawn(Duration::from_secs(2)).await.unwrap();

        let err = shard.eval("exit").await.unwrap_err();
        assert!(matches!(err, ShardError::Died { shard: 0, .. }));

        let ev = Bus::next_matching(&mut rx, |e| e.kind == EventKind::ShardDeath, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(ev.shard, Some(0));
        assert_eq!(shard.state(), ShardState::Dead);
    }

    #[tokio::test]
    async fn silent_worker_hits_spawn_timeout() {
        let host: Arc<dyn WorkerHost> = Arc::new(ThreadHost::new(worker_fn(
            |mut link: WorkerLink| async move { while link.recv().await.is_some() {} },
        )));
        let shard = shard_with(host, Bus::new(16));

        let err = shard.spawn(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, ShardError::SpawnTimeout { shard: 0, .. }));
        assert_eq!(shard.state(), ShardState::Dead);
    }

    #[tokio::test]
    async fn worker_returning_early_fails_the_spawn() {
        let host: Arc<dyn WorkerHost> =
            Arc::new(ThreadHost::new(worker_fn(|_link: WorkerLink| async move {})));
        let shard = shard_with(host, Bus::new(16));

        let err = shard.spawn(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ShardError::DiedDuringSpawn { code: Some(0), .. }));
    }
}
