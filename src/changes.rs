// Owner-scoped change notification hub

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{ChangeEvent, ChangeKind};

/// Identifies one live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A live subscription: its handle plus the stream of change events
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

struct Subscriber {
    owner_id: String,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

/// Fan-out of change events to per-owner subscribers.
///
/// Each subscriber gets its own unbounded channel so delivery never blocks
/// the writer. Closed receivers are pruned on the next publish.
#[derive(Default)]
pub struct ChangeHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start receiving events for one owner
    pub fn subscribe(&self, owner_id: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, events) = mpsc::unbounded_channel();
        self.lock().insert(
            id,
            Subscriber {
                owner_id: owner_id.to_string(),
                tx,
            },
        );
        debug!(subscription = id, owner = owner_id, "Subscribed to task changes");
        Subscription {
            handle: SubscriptionHandle(id),
            events,
        }
    }

    /// Stop delivery to a subscription. Returns false if it was not live.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.lock().remove(&handle.0).is_some();
        debug!(subscription = handle.0, removed, "Unsubscribed from task changes");
        removed
    }

    /// Deliver an event to every subscriber of its owner.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;
        subscribers.retain(|_, sub| {
            if sub.owner_id != event.owner_id {
                return !sub.tx.is_closed();
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    /// Tell every subscriber its owner's rows may all have changed
    pub fn publish_resync(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|_, sub| {
            sub.tx
                .send(ChangeEvent {
                    kind: ChangeKind::Resync,
                    owner_id: sub.owner_id.clone(),
                    task_id: None,
                })
                .is_ok()
        });
        subscribers.len()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Subscriber>> {
        // A poisoned map is still structurally valid
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
