use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::client::pubsub_client::next_subscriber_id;
use crate::client::{Subscriber, SubscriberHandle, SubscriberId};

/// The set of live subscribers.
///
/// Writers (`register` / `unregister`) are serialized by the lock. Readers
/// take a [`snapshot`](Self::snapshot): the lock is held only while the
/// entries are cloned, never across an await, so a broadcast in progress never
/// holds up a connect or a disconnect.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a subscriber under a freshly generated id and returns that id.
    pub fn register(&self, handle: SubscriberHandle) -> SubscriberId {
        let id = next_subscriber_id();
        let subscriber = Subscriber::from_handle(id.clone(), handle);
        let total = {
            let mut subscribers = self.write();
            subscribers.insert(id.clone(), subscriber);
            subscribers.len()
        };
        debug!(subscriber = %id, total, "subscriber registered");
        id
    }

    /// Removes a subscriber. Removing an unknown id is a no-op; the return
    /// value tells whether anything was removed.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let removed = self.write().remove(id).is_some();
        if removed {
            debug!(subscriber = %id, "subscriber unregistered");
        }
        removed
    }

    /// Point-in-time copy of the current members.
    pub fn snapshot(&self) -> Vec<Subscriber> {
        self.read().values().cloned().collect()
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<SubscriberId, Subscriber>> {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SubscriberId, Subscriber>> {
        self.subscribers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
