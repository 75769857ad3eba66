//! Control channel protocol.
//!
//! Every shard talks to its worker over a private, message-only channel. This
//! module defines what travels over it and how correlated requests are tracked.
//!
//! ## Contents
//! - [`Inbound`]  worker → orchestrator messages (`ready`, `eval` responses, `stats`, ...)
//! - [`Outbound`] orchestrator → worker messages (`eval`, `fetch`, `broadcast`, custom)
//! - [`Script`]   what an `eval` asks the worker to run
//! - [`PendingTable`] outstanding correlated requests, keyed by correlation id
//!
//! ## Wire format
//! ```text
//! {"type":"ready"}
//! {"type":"eval","id":"1f-9a3c2e01","script":"Date.now()"}
//! {"type":"eval","id":"1f-9a3c2e01","result":1718000000000}
//! {"type":"eval","id":"20-0b7d11fe","error":"ReferenceError"}
//! {"type":"log","level":"warn","message":"heartbeat late"}
//! ```
//! Process workers exchange one JSON object per line on stdin/stdout; thread
//! workers exchange `serde_json::Value`s in memory.

mod message;
mod pending;
mod script;

pub use message::{Inbound, LogLevel, Outbound};
pub use pending::PendingTable;
pub use script::Script;
