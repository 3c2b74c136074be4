//! Sync events and the in-process event bus
//!
//! External triggers (new data, manual requests, preference edits) reach
//! the coordinator as one sum type dispatched through a small
//! publish/subscribe bus. Delivery is best-effort to current subscribers;
//! nothing is persisted or replayed.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};

use crate::sync::StatusLogEntry;

/// Everything the coordinator reacts to
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// User asked for an upload now
    UploadRequested,
    /// User asked to wipe the remote dataset and start over
    ResetRequested,
    /// A component produced a status line for the log
    Status(StatusLogEntry),
    /// A record landed in the local store
    NewRecord { timestamp: i64 },
    /// A settings key changed
    PreferenceChanged { key: String },
    /// Connectivity changed
    NetworkChanged,
    /// The status log gained an entry; observers may re-render
    LogUpdated,
}

/// A live subscription: the id unsubscribes, the receiver drains events
pub struct Subscription {
    pub id: u64,
    pub receiver: Receiver<UploadEvent>,
}

struct Subscriber {
    id: u64,
    sender: Sender<UploadEvent>,
}

/// Publish/subscribe bus for [`UploadEvent`]s
///
/// Subscribers whose receiver has been dropped are pruned on the next
/// publish, so leaked subscriptions cannot pile up.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .push(Subscriber { id, sender });
        Subscription { id, receiver }
    }

    /// Remove a subscriber; its receiver disconnects
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|subscriber| subscriber.id != id);
    }

    /// Deliver an event to every current subscriber
    pub fn publish(&self, event: UploadEvent) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
