//! # Fleet event subscribers.
//!
//! User code observes a fleet by implementing [`Subscribe`] and handing the
//! subscribers to [`ShardManagerBuilder::with_subscribers`](crate::ShardManagerBuilder::with_subscribers).
//!
//! ```text
//!   Shard pumps / monitors ── publish(Event) ──► Bus
//!                                                 │
//!                                  manager listener (forward)
//!                                                 ▼
//!                                           SubscriberSet
//!                                     ┌───────────┼───────────┐
//!                                     ▼           ▼           ▼
//!                                 LogWriter    Alerts      Custom ...
//! ```
//!
//! - [`SubscriberSet`] fans events out without blocking the publisher.
//! - [`LogWriter`] (feature `logging`) renders events through `tracing`.

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
