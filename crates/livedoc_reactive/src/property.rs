//! A current value plus change notifications.

use crate::subscriber::{cancel_for, Listeners};
use crate::Subscription;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// A reactive value: holds a current value and notifies listeners when it
/// changes.
///
/// Setting a value equal to the current one is a no-op: listeners are never
/// notified of consecutive duplicates. Several downstream invariants (for
/// example "`is_connected` only fires on actual transitions") rely on this.
///
/// Cloning a `Property` clones a handle to the same shared value; all clones
/// observe and feed the same stream.
pub struct Property<T> {
    value: Arc<RwLock<T>>,
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> Property<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a property with an initial value.
    pub fn new(initial: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial)),
            listeners: Arc::new(Mutex::new(Listeners::new())),
        }
    }

    /// Returns a clone of the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Sets a new value, notifying listeners unless it equals the current one.
    pub fn set(&self, next: T) {
        let snapshot = {
            let mut value = self.value.write();
            if *value == next {
                return;
            }
            *value = next.clone();
            self.listeners.lock().snapshot()
        };
        for listener in snapshot {
            listener(&next);
        }
    }

    /// Applies `f` to the current value and sets the result.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.value.read());
        self.set(next);
    }

    /// Subscribes to the property.
    ///
    /// The listener is primed: it is invoked with the current value before
    /// this call returns, then again on every change.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let listener: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(listener);
        let id = self.listeners.lock().add(Arc::clone(&listener));
        let current = self.get();
        listener(&current);
        cancel_for(&self.listeners, id)
    }

    /// Subscribes to future changes only, without priming.
    pub fn on_change(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.listeners.lock().add(Arc::new(listener));
        cancel_for(&self.listeners, id)
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<T> std::fmt::Debug for Property<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("value", &*self.value.read())
            .finish()
    }
}

impl<T> Default for Property<T>
where
    T: Clone + PartialEq + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}
