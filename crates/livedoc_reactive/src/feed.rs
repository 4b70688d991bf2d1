//! A value-less event stream.

use crate::subscriber::{cancel_for, Listeners};
use crate::Subscription;
use parking_lot::Mutex;
use std::sync::Arc;

/// A push-based event stream with no notion of a current value.
///
/// Unlike [`Property`](crate::Property), every emitted event is delivered,
/// including consecutive equal ones, and new subscribers see only events
/// emitted after they subscribed.
pub struct EventFeed<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for EventFeed<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> Default for EventFeed<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventFeed<T>
where
    T: Send + Sync + 'static,
{
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners::new())),
        }
    }

    /// Emits an event to all current subscribers.
    pub fn emit(&self, event: T) {
        let snapshot = self.listeners.lock().snapshot();
        for listener in snapshot {
            listener(&event);
        }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.listeners.lock().add(Arc::new(listener));
        cancel_for(&self.listeners, id)
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<T> std::fmt::Debug for EventFeed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFeed")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_every_event() {
        let feed = EventFeed::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = feed.subscribe(move |event: &u32| sink.lock().push(*event));

        feed.emit(1);
        feed.emit(1);
        feed.emit(2);
        assert_eq!(*seen.lock(), vec![1, 1, 2]);
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let feed = EventFeed::new();
        feed.emit(1u32);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = feed.subscribe(move |event: &u32| sink.lock().push(*event));
        feed.emit(2);
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let feed = EventFeed::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = feed.subscribe(move |event: &u32| sink.lock().push(*event));
        feed.emit(1);
        sub.unsubscribe();
        feed.emit(2);
        assert_eq!(*seen.lock(), vec![1]);
    }
}
