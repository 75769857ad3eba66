//! # Process-mode worker host.
//!
//! Spawns the worker program as a child process. The protocol runs over the
//! child's stdio, one JSON object per line; stderr is inherited so worker
//! diagnostics land in the orchestrator's output.
//!
//! ```text
//! writer task : outbound mpsc ──► serde_json line ──► child stdin
//! reader task : child stdout ──► line ──► HostEvent::Message / Malformed
//! waiter task : child.wait() or terminate ──► kill ──► drain reader ──► HostEvent::Exited
//! ```

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ShardError;
use crate::host::{ControlChannel, HostEvent, WorkerEnv, WorkerHost};

/// Runs workers as child processes.
#[derive(Clone, Debug)]
pub struct ProcessHost {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessHost {
    /// Creates a host launching `program` with `args` for every shard.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Program path.
    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl WorkerHost for ProcessHost {
    async fn launch(&self, env: WorkerEnv) -> Result<ControlChannel, ShardError> {
        let shard = env.shard_id;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("SHARD_ID", env.shard_id.to_string())
            .env("SHARD_COUNT", env.shard_count.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(token) = &env.token {
            cmd.env("SHARD_TOKEN", token);
        }

        let mut child = cmd.spawn().map_err(|e| ShardError::Launch {
            shard,
            reason: format!("{}: {e}", self.program.display()),
        })?;
        let launch_err = |what: &str| ShardError::Launch {
            shard,
            reason: format!("child {what} not captured"),
        };
        let mut stdin = child.stdin.take().ok_or_else(|| launch_err("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| launch_err("stdout"))?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<serde_json::Value>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let terminate = CancellationToken::new();

        // writer
        let token = terminate.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = token.cancelled() => break,
                    msg = out_rx.recv() => match msg {
                        Some(m) => m,
                        None => break,
                    },
                };
                let mut line = match serde_json::to_vec(&msg) {
                    Ok(buf) => buf,
                    Err(e) => {
                        tracing::warn!(shard, error = %e, "dropping unencodable message");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(e) = stdin.write_all(&line).await {
                    tracing::debug!(shard, error = %e, "worker stdin closed");
                    break;
                }
                let _ = stdin.flush().await;
            }
        });

        // reader
        let reader_tx = in_tx.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let ev = match serde_json::from_str(line) {
                    Ok(v) => HostEvent::Message(v),
                    Err(e) => HostEvent::Malformed(e.to_string()),
                };
                if reader_tx.send(ev).is_err() {
                    break;
                }
            }
        });

        // waiter
        let token = terminate.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status.ok(),
                _ = token.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await.ok()
                }
            };
            let _ = reader.await;
            let _ = in_tx.send(HostEvent::Exited(status.and_then(|s| s.code())));
        });

        Ok(ControlChannel {
            outbound: out_tx,
            inbound: in_rx,
            terminate,
        })
    }

    fn mode(&self) -> &'static str {
        "process"
    }
}
