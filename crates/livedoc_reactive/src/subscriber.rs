//! Listener registration shared by `Property` and `EventFeed`.

use parking_lot::Mutex;
use std::sync::Arc;

/// A registered listener callback.
pub(crate) type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered set of listeners with stable registration ids.
pub(crate) struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

impl<T> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    /// Registers a listener and returns its id.
    pub(crate) fn add(&mut self, listener: Listener<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Removes the listener with the given id, if still registered.
    pub(crate) fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    /// Snapshots the current listeners for notification outside the lock.
    pub(crate) fn snapshot(&self) -> Vec<Listener<T>> {
        self.entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle for one registered listener.
///
/// Unsubscribes when explicitly asked to, and also when dropped, so holding
/// the handle is what keeps the listener alive. Components that register many
/// listeners typically park their subscriptions on a
/// [`CleanupStack`](crate::CleanupStack).
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Creates a subscription that does nothing when cancelled.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Deregisters the listener. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Builds the cancel closure for a listener registered in `listeners`.
pub(crate) fn cancel_for<T: Send + Sync + 'static>(
    listeners: &Arc<Mutex<Listeners<T>>>,
    id: u64,
) -> Subscription {
    let weak = Arc::downgrade(listeners);
    Subscription::new(move || {
        if let Some(listeners) = weak.upgrade() {
            listeners.lock().remove(id);
        }
    })
}
