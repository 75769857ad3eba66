//! # Event bus for broadcasting fleet events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from multiple sources (shards, monitors,
//! managers) and fan-out to any number of listeners.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                     Listeners (many):
//!   Shard pump     ──┐                 ┌──► ShardManager death listener
//!   HealthMonitor  ──┼──► Bus ─────────┼──► SubscriberSet (user callbacks)
//!   StatsAggregator──┤  (broadcast)    ├──► ClusterManager forwarder
//!   DynamicStrategy──┘                 └──► wait_for / once
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::event::Event;
use crate::error::TimeoutError;

/// Broadcast channel for fleet events.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately.
/// - **Fire-and-forget**: no delivery or durability guarantees.
/// - **Cloneable**: cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Waits for the next event matching `pred`, published after this call.
    ///
    /// Fails with [`TimeoutError`] if nothing matches within `timeout`.
    pub async fn wait_for<F>(&self, pred: F, timeout: Duration) -> Result<Event, TimeoutError>
    where
        F: FnMut(&Event) -> bool,
    {
        let mut rx = self.subscribe();
        Self::next_matching(&mut rx, pred, timeout).await
    }

    /// Waits on an existing receiver for the next event matching `pred`.
    ///
    /// Subscribe first, trigger the action, then call this to avoid missing
    /// events published in between.
    pub async fn next_matching<F>(
        rx: &mut broadcast::Receiver<Event>,
        mut pred: F,
        timeout: Duration,
    ) -> Result<Event, TimeoutError>
    where
        F: FnMut(&Event) -> bool,
    {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(ev) if pred(&ev) => return Some(ev),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(ev)) => Ok(ev),
            Ok(None) | Err(_) => Err(TimeoutError::new("wait_for event", timeout)),
        }
    }

    /// One-shot subscription: runs `f` on the first event matching `pred`.
    ///
    /// The returned handle can be aborted to drop the subscription.
    pub fn once<P, F>(&self, mut pred: P, f: F) -> JoinHandle<()>
    where
        P: FnMut(&Event) -> bool + Send + 'static,
        F: FnOnce(Event) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) if pred(&ev) => {
                        f(ev);
                        return;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }
}
