//! # Worker hosts: where a shard's execution context lives.
//!
//! A [`WorkerHost`] launches one isolated execution context per shard and hands
//! back a [`ControlChannel`] to it. The shard's protocol logic only ever sees
//! the channel, so it is identical for both hosts:
//!
//! - [`ProcessHost`] runs the worker as a child process and frames messages as
//!   newline-delimited JSON on its stdin/stdout.
//! - [`ThreadHost`] runs a Rust worker function on a dedicated OS thread with its
//!   own single-threaded runtime; messages are passed as `serde_json::Value`.
//!
//! ```text
//!            Shard                     ControlChannel                   worker
//!   ┌──────────────────┐  outbound  ┌──────────────────┐   stdin / mpsc   ┌────────┐
//!   │ send / evaluate  │──────────►│                  │────────────────►│        │
//!   │ pump (inbound)   │◄──────────│  terminate token │◄────────────────│        │
//!   └──────────────────┘  HostEvent └──────────────────┘  stdout / mpsc   └────────┘
//! ```
//!
//! Worker startup parameters ([`WorkerEnv`]) are passed as the `SHARD_ID`,
//! `SHARD_COUNT` and `SHARD_TOKEN` environment variables (process) or through
//! [`WorkerLink::env`] (thread).

mod link;
mod process;
mod thread;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ShardError;

pub use link::{WorkerLink, WorkerRequest};
pub use process::ProcessHost;
pub use thread::ThreadHost;

/// Startup parameters handed to a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerEnv {
    /// Shard id the worker serves.
    pub shard_id: u32,
    /// Total shard count of the fleet.
    pub shard_count: u32,
    /// Opaque credentials for the worker's upstream connection.
    pub token: Option<String>,
}

/// What a host reports about its execution context.
#[derive(Debug)]
pub enum HostEvent {
    /// A decoded protocol message.
    Message(Value),
    /// Traffic that could not be decoded.
    Malformed(String),
    /// The context terminated (exit code, if any).
    Exited(Option<i32>),
}

/// Bidirectional transport to one execution context.
pub struct ControlChannel {
    /// Messages to the worker.
    pub outbound: mpsc::UnboundedSender<Value>,
    /// Messages and lifecycle reports from the worker.
    pub inbound: mpsc::UnboundedReceiver<HostEvent>,
    /// Cancelling terminates the context.
    pub terminate: CancellationToken,
}

/// Launches isolated execution contexts for shards.
#[async_trait]
pub trait WorkerHost: Send + Sync + 'static {
    /// Starts a new context for `env.shard_id`.
    async fn launch(&self, env: WorkerEnv) -> Result<ControlChannel, ShardError>;

    /// Short mode name for logs (`"process"`, `"thread"`).
    fn mode(&self) -> &'static str;
}

/// Worker function run by [`ThreadHost`].
pub type WorkerFn = Arc<dyn Fn(WorkerLink) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`WorkerFn`].
///
/// # Example
/// ```rust
/// use shardvisor::{WorkerLink, worker_fn};
///
/// let entry = worker_fn(|mut link: WorkerLink| async move {
///     let _ = link.ready();
///     while let Some(_req) = link.recv().await {}
/// });
/// # let _ = entry;
/// ```
pub fn worker_fn<F, Fut>(f: F) -> WorkerFn
where
    F: Fn(WorkerLink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |link| f(link).boxed())
}
