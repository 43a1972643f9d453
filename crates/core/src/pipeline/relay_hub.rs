use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::single_slot_relay::{single_slot_relay, RelayConsumer, RelayProducer};

/// Fans one producer out to any number of single-slot relays.
///
/// Every subscriber gets its own relay, so a slow viewer only ever loses
/// its own stale frames. Closing the hub closes every relay.
pub struct RelayHub<T> {
    subscribers: Mutex<Vec<RelayProducer<T>>>,
    closed: AtomicBool,
}

impl<T: Clone> RelayHub<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a new consumer. After [`close`](Self::close) the returned
    /// consumer is already closed.
    pub fn subscribe(&self) -> RelayConsumer<T> {
        let (producer, consumer) = single_slot_relay();
        let mut subscribers = self.lock();
        if !self.closed.load(Ordering::Acquire) {
            subscribers.push(producer);
        }
        consumer
    }

    /// Hands a clone of `item` to every live subscriber and prunes the ones
    /// whose consumer has gone away. Returns the number of live subscribers.
    pub fn publish(&self, item: &T) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|s| !s.is_detached());
        for subscriber in subscribers.iter() {
            subscriber.put(item.clone());
        }
        subscribers.len()
    }

    /// Live subscriber count, ignoring consumers that were dropped since the
    /// last publish.
    pub fn subscriber_count(&self) -> usize {
        self.lock().iter().filter(|s| !s.is_detached()).count()
    }

    pub fn close(&self) {
        let mut subscribers = self.lock();
        self.closed.store(true, Ordering::Release);
        subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RelayProducer<T>>> {
        // A panic while holding the lock cannot leave the Vec inconsistent.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Default for RelayHub<T> {
    fn default() -> Self {
        Self::new()
    }
}
