//! Capacity-one hand-off between a producer that must never block and a
//! consumer that always wants the freshest item.
//!
//! `put` replaces whatever is pending (drop-oldest). Dropping or closing the
//! producer closes the relay; an item pending at that moment is still
//! delivered before `get` reports closure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

/// Creates a connected producer/consumer pair.
pub fn single_slot_relay<T>() -> (RelayProducer<T>, RelayConsumer<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let detached = Arc::new(AtomicBool::new(false));
    (
        RelayProducer {
            tx,
            drain: rx.clone(),
            detached: detached.clone(),
        },
        RelayConsumer { rx, detached },
    )
}

pub struct RelayProducer<T> {
    tx: Sender<T>,
    drain: Receiver<T>,
    detached: Arc<AtomicBool>,
}

impl<T> RelayProducer<T> {
    /// Publishes `item`, discarding any pending unconsumed item. Never blocks.
    ///
    /// Returns the discarded item, if any.
    pub fn put(&self, item: T) -> Option<T> {
        let mut item = item;
        let mut dropped = None;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return dropped,
                Err(TrySendError::Full(rejected)) => {
                    // Either we take the stale item or the consumer just did;
                    // both leave the slot free for the retry.
                    if let Ok(stale) = self.drain.try_recv() {
                        dropped = Some(stale);
                    }
                    item = rejected;
                }
                // Unreachable while `drain` keeps a receiver alive.
                Err(TrySendError::Disconnected(_)) => return dropped,
            }
        }
    }

    /// True once the consumer has been dropped.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Closes the relay. Equivalent to dropping the producer.
    pub fn close(self) {}
}

pub struct RelayConsumer<T> {
    rx: Receiver<T>,
    detached: Arc<AtomicBool>,
}

impl<T> RelayConsumer<T> {
    /// Blocks until an item is available. `None` means the relay is closed.
    pub fn get(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Like [`get`](Self::get) but gives up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> RelayRecv<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => RelayRecv::Item(item),
            Err(RecvTimeoutError::Timeout) => RelayRecv::Empty,
            Err(RecvTimeoutError::Disconnected) => RelayRecv::Closed,
        }
    }

    /// Non-blocking variant of [`get`](Self::get).
    pub fn try_get(&self) -> RelayRecv<T> {
        match self.rx.try_recv() {
            Ok(item) => RelayRecv::Item(item),
            Err(TryRecvError::Empty) => RelayRecv::Empty,
            Err(TryRecvError::Disconnected) => RelayRecv::Closed,
        }
    }
}

impl<T> Drop for RelayConsumer<T> {
    fn drop(&mut self) {
        self.detached.store(true, Ordering::Release);
    }
}

/// Outcome of a bounded wait on a relay.
#[derive(Debug, PartialEq)]
pub enum RelayRecv<T> {
    Item(T),
    Empty,
    Closed,
}

impl<T> RelayRecv<T> {
    pub fn is_item(&self) -> bool {
        matches!(self, RelayRecv::Item(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_put_replaces_pending_item() {
        let (producer, consumer) = single_slot_relay();
        assert_eq!(producer.put("a"), None);
        assert_eq!(producer.put("b"), Some("a"));
        assert_eq!(consumer.get(), Some("b"));
    }

    #[test]
    fn test_get_never_returns_item_twice() {
        let (producer, consumer) = single_slot_relay();
        producer.put(1);
        assert_eq!(consumer.get(), Some(1));
        assert_eq!(consumer.try_get(), RelayRecv::Empty);
    }

    #[test]
    fn test_put_never_blocks_without_consumer_reads() {
        let (producer, consumer) = single_slot_relay();
        for i in 0..10_000 {
            producer.put(i);
        }
        assert_eq!(consumer.get(), Some(9_999));
    }

    #[test]
    fn test_get_after_close_returns_none() {
        let (producer, consumer) = single_slot_relay::<u32>();
        producer.close();
        assert_eq!(consumer.get(), None);
    }

    #[test]
    fn test_pending_item_delivered_before_closure() {
        let (producer, consumer) = single_slot_relay();
        producer.put(7);
        drop(producer);
        assert_eq!(consumer.get(), Some(7));
        assert_eq!(consumer.get(), None);
    }

    #[test]
    fn test_blocked_get_wakes_on_close() {
        let (producer, consumer) = single_slot_relay::<u32>();
        let handle = thread::spawn(move || consumer.get());
        thread::sleep(Duration::from_millis(20));
        drop(producer);
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_blocked_get_wakes_on_put() {
        let (producer, consumer) = single_slot_relay();
        let handle = thread::spawn(move || consumer.get());
        thread::sleep(Duration::from_millis(20));
        producer.put(42);
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn test_get_timeout_reports_empty() {
        let (_producer, consumer) = single_slot_relay::<u32>();
        let start = Instant::now();
        assert_eq!(
            consumer.get_timeout(Duration::from_millis(10)),
            RelayRecv::Empty
        );
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_detached_after_consumer_drop() {
        let (producer, consumer) = single_slot_relay::<u32>();
        assert!(!producer.is_detached());
        drop(consumer);
        assert!(producer.is_detached());
        producer.put(1);
    }

    #[test]
    fn test_concurrent_producer_sequence_is_monotonic() {
        let (producer, consumer) = single_slot_relay();
        let handle = thread::spawn(move || {
            for i in 0..5_000u32 {
                producer.put(i);
            }
        });

        let mut last = None;
        while let Some(value) = consumer.get() {
            if let Some(prev) = last {
                assert!(value > prev);
            }
            last = Some(value);
        }
        handle.join().unwrap();
        assert_eq!(last, Some(4_999));
    }
}
