//! # Worker side of a thread-mode control channel.
//!
//! [`WorkerLink`] is what a [`WorkerFn`](crate::WorkerFn) receives. It speaks
//! the same protocol a process worker speaks over stdin/stdout, without the
//! JSON framing. Wrapping an actual client library behind it is up to the
//! worker.

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::IpcError;
use crate::host::{HostEvent, WorkerEnv};
use crate::ipc::{Inbound, LogLevel, Outbound, Script};

/// A request the orchestrator sent to the worker.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerRequest {
    /// Evaluate `script`; answer with [`WorkerLink::reply_eval`].
    Eval { id: String, script: Script },
    /// Read client property `prop`; answer with [`WorkerLink::reply_fetch`].
    Fetch { id: String, prop: String },
    /// Application-level broadcast.
    Broadcast(Value),
    /// Anything else the orchestrator sent.
    Custom(Value),
}

impl From<Outbound> for WorkerRequest {
    fn from(msg: Outbound) -> Self {
        match msg {
            Outbound::Eval { id, script } => WorkerRequest::Eval { id, script },
            Outbound::Fetch { id, prop } => WorkerRequest::Fetch { id, prop },
            Outbound::Broadcast(v) => WorkerRequest::Broadcast(v),
            Outbound::Custom(v) => WorkerRequest::Custom(v),
        }
    }
}

/// In-process end of a control channel.
pub struct WorkerLink {
    env: WorkerEnv,
    tx: mpsc::UnboundedSender<HostEvent>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl WorkerLink {
    pub(crate) fn new(
        env: WorkerEnv,
        tx: mpsc::UnboundedSender<HostEvent>,
        rx: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self { env, tx, rx }
    }

    /// Startup parameters for this worker.
    pub fn env(&self) -> &WorkerEnv {
        &self.env
    }

    /// Waits for the next request. `None` once the orchestrator side is gone.
    ///
    /// Messages that cannot be decoded are skipped.
    pub async fn recv(&mut self) -> Option<WorkerRequest> {
        loop {
            let raw = self.rx.recv().await?;
            match Outbound::parse(raw) {
                Ok(msg) => return Some(msg.into()),
                Err(e) => tracing::debug!(shard = self.env.shard_id, error = %e, "worker dropped malformed request"),
            }
        }
    }

    /// Reports that the worker is connected and serving.
    pub fn ready(&self) -> Result<(), IpcError> {
        self.push(Inbound::Ready)
    }

    /// Advisory: upstream connection lost.
    pub fn disconnect(&self) -> Result<(), IpcError> {
        self.push(Inbound::Disconnect)
    }

    /// Advisory: upstream connection being re-established.
    pub fn reconnecting(&self) -> Result<(), IpcError> {
        self.push(Inbound::Reconnecting)
    }

    /// Answers an `eval` request.
    pub fn reply_eval(&self, id: impl Into<String>, outcome: Result<Value, String>) -> Result<(), IpcError> {
        self.push(Inbound::Eval {
            id: id.into(),
            outcome,
        })
    }

    /// Answers a `fetch` request.
    pub fn reply_fetch(&self, id: impl Into<String>, outcome: Result<Value, String>) -> Result<(), IpcError> {
        self.push(Inbound::Fetch {
            id: id.into(),
            outcome,
        })
    }

    /// Pushes unsolicited metrics.
    pub fn send_stats(&self, data: Value) -> Result<(), IpcError> {
        self.push(Inbound::Stats(data))
    }

    /// Forwards a log line to the orchestrator.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<(), IpcError> {
        self.push(Inbound::Log {
            level,
            message: message.into(),
        })
    }

    /// Sends an application-level broadcast envelope.
    pub fn broadcast(&self, message: Value) -> Result<(), IpcError> {
        self.send(json!({"type": "broadcast", "message": message}))
    }

    /// Sends a raw message.
    pub fn send(&self, message: Value) -> Result<(), IpcError> {
        self.tx
            .send(HostEvent::Message(message))
            .map_err(|_| IpcError::Closed)
    }

    fn push(&self, msg: Inbound) -> Result<(), IpcError> {
        self.send(msg.into_value())
    }
}
