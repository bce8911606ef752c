//! Multi-subscriber event fan-out.
//!
//! Every subscriber gets its own unbounded queue, so a slow consumer never
//! holds up the watcher and no event is dropped for a live subscriber.
//! The subscriber list is copy-on-write: publishing clones an `Arc` under
//! the lock and sends outside it, so subscribing while events are flowing
//! is safe.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub struct EventBroadcaster<T> {
    subscribers: Mutex<Arc<Vec<UnboundedSender<T>>>>,
}

impl<T: Clone + Send + 'static> EventBroadcaster<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// Register a new subscriber. It sees every event published from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.lock();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().filter(|s| !s.is_closed()).cloned());
        next.push(tx);
        *guard = Arc::new(next);
        rx
    }

    /// Deliver `event` to every live subscriber.
    ///
    /// Subscribers whose receiver was dropped are pruned.
    pub fn publish(&self, event: T) {
        let snapshot = Arc::clone(&*self.lock());

        let mut saw_closed = false;
        for subscriber in snapshot.iter() {
            if subscriber.send(event.clone()).is_err() {
                saw_closed = true;
            }
        }

        if saw_closed {
            let mut guard = self.lock();
            let live: Vec<_> = guard.iter().filter(|s| !s.is_closed()).cloned().collect();
            *guard = Arc::new(live);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().iter().filter(|s| !s.is_closed()).count()
    }

    fn lock(&self) -> MutexGuard<'_, Arc<Vec<UnboundedSender<T>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone + Send + 'static> Default for EventBroadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let broadcaster = EventBroadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        for i in 0..3 {
            broadcaster.publish(i);
        }

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await, Some(0));
            assert_eq!(rx.recv().await, Some(1));
            assert_eq!(rx.recv().await, Some(2));
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.publish("early");
        let mut rx = broadcaster.subscribe();
        broadcaster.publish("late");
        assert_eq!(rx.recv().await, Some("late"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let broadcaster = EventBroadcaster::new();
        let keep = broadcaster.subscribe();
        let gone = broadcaster.subscribe();
        drop(gone);

        broadcaster.publish(1u32);
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(keep);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
