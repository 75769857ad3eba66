//! # Shards: one worker, one control channel, one state machine.
//!
//! ```text
//!  Created ──spawn──► Spawning ──ready──► Ready ◄──ready── Disconnected / Reconnecting
//!                        │                  │  ──disconnect/reconnecting──►  (advisory)
//!                        │ timeout / exit   │ exit
//!                        ▼                  ▼
//!                       Dead ◄──────────────┘         kill (any state) ──► Killed
//! ```
//!
//! - A [`Shard`] owns the channel and two [`PendingTable`](crate::ipc::PendingTable)s
//!   (`eval`, `fetch`).
//! - The pump task interprets inbound traffic and publishes shard events on the bus.
//! - Death rejects outstanding requests with `Died`, kill rejects them with `Killed`.

mod handle;
mod pump;
mod state;

pub use handle::Shard;
pub(crate) use handle::ShardParams;
pub use state::ShardState;
