//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging custom fleet event handlers
//! into a [`ShardManager`](crate::ShardManager). Each subscriber is driven by a
//! dedicated worker loop fed by a bounded queue owned by the
//! [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching, retries); they do **not** block
//!   shard pumps, the manager, or other subscribers.
//! - Each subscriber **declares** its preferred queue capacity via
//!   [`Subscribe::queue_capacity`]. If a queue overflows, events for that
//!   subscriber are **dropped** and a `SubscriberOverflow` event is published.
//!
//! ## Example
//! ```rust
//! use shardvisor::{Event, EventKind, Subscribe};
//!
//! struct DeathAlert;
//!
//! #[async_trait::async_trait]
//! impl Subscribe for DeathAlert {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::ShardDeath {
//!             // page someone...
//!         }
//!     }
//!     fn name(&self) -> &'static str { "death-alert" }
//!     fn queue_capacity(&self) -> usize { 64 }
//! }
//! ```

use crate::events::Event;
use async_trait::async_trait;

/// Contract for fleet event subscribers.
///
/// Called from a subscriber-dedicated worker task. Implementations should avoid
/// blocking the async runtime.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
