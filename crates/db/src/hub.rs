//! In-process fan-out of insert events.
//!
//! Every insert the store performs, and every insert another process
//! relays in, is published once to the hub. Each live subscription owns a
//! forwarder task that filters the broadcast into the subscription's
//! bounded channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use ecolearn_common::AppResult;
use ecolearn_core::store::SUBSCRIPTION_BUFFER;
use ecolearn_core::{ChannelHandle, Filter, InsertEvent, Subscription, Table};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the broadcast channel shared by all forwarders.
pub const HUB_CAPACITY: usize = 1024;

/// Forwards locally produced inserts to other processes.
///
/// Lets the store announce inserts without depending on the transport.
#[async_trait]
pub trait InsertRelay: Send + Sync {
    /// Publish an insert that happened in this process.
    async fn relay(&self, event: &InsertEvent) -> AppResult<()>;
}

/// Broadcast hub feeding live subscriptions.
pub struct InsertHub {
    tx: broadcast::Sender<InsertEvent>,
    forwarders: Mutex<HashMap<ChannelHandle, JoinHandle<()>>>,
    next_handle: AtomicU64,
}

impl Default for InsertHub {
    fn default() -> Self {
        Self::new(HUB_CAPACITY)
    }
}

impl InsertHub {
    /// Create a hub whose broadcast buffer holds `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            forwarders: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn forwarders(&self) -> MutexGuard<'_, HashMap<ChannelHandle, JoinHandle<()>>> {
        self.forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event to every matching subscription.
    pub fn publish(&self, event: InsertEvent) {
        // No receivers just means nothing is mounted.
        let _ = self.tx.send(event);
    }

    /// Open a subscription for inserts into `table` that match `filter`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, table: Table, filter: Filter) -> Subscription {
        let handle = ChannelHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let events = self.tx.subscribe();

        let task = tokio::spawn(forward(handle, table, filter, events, tx));
        self.forwarders().insert(handle, task);

        debug!(handle = handle.0, %table, "Hub subscription opened");
        Subscription::new(handle, rx)
    }

    /// Stop forwarding to `handle`. Releasing twice is a no-op.
    pub fn release(&self, handle: ChannelHandle) {
        if let Some(task) = self.forwarders().remove(&handle) {
            task.abort();
            debug!(handle = handle.0, "Hub subscription released");
        }
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn active(&self) -> usize {
        self.forwarders().len()
    }
}

impl Drop for InsertHub {
    fn drop(&mut self) {
        for (_, task) in self.forwarders().drain() {
            task.abort();
        }
    }
}

async fn forward(
    handle: ChannelHandle,
    table: Table,
    filter: Filter,
    mut events: broadcast::Receiver<InsertEvent>,
    tx: mpsc::Sender<InsertEvent>,
) {
    loop {
        let event = tokio::select! {
            () = tx.closed() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) if event.table == table && filter.matches(&event.row) => {
                match tx.try_send(event) {
                    // A full buffer already holds a pending refetch trigger.
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(handle = handle.0, %table, skipped, "Subscription lagged behind the hub");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
