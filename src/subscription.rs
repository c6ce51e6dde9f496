//! Observer lists for state snapshots.
//!
//! Consumers register a callback invoked on every state transition and get
//! back an unsubscribe handle. Callbacks run outside the registry lock, so
//! subscribing or unsubscribing from within a callback never deadlocks.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Erased view of a registry so [`Subscription`] needs no type parameter.
trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T> Detach for Mutex<Registry<T>> {
    fn detach(&self, id: u64) {
        self.lock().entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

/// A set of callbacks notified on every transition of a `T` snapshot.
pub struct Subscribers<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback. It fires on every subsequent notification until
    /// the returned handle is unsubscribed or the owning component releases
    /// its subscribers.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription
    where
        T: 'static,
    {
        let id = {
            let mut registry = self.inner.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(callback)));
            id
        };
        let weak = Arc::downgrade(&self.inner);
        // Unsize on the binding; the coercion cannot happen inside the
        // `Arc::downgrade` call itself.
        let registry: Weak<dyn Detach> = weak;
        Subscription { id, registry }
    }

    /// Invoke every registered callback with `value`.
    ///
    /// The entry list is snapshotted under the lock and invoked after it is
    /// released; a callback that subscribes during notification takes effect
    /// from the next notification onward.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    /// Drop every registered callback without notifying. Used when a
    /// superseded generation's subscriptions are released.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Subscribers::subscribe`]. Dropping it does not
/// unsubscribe; call [`Subscription::unsubscribe`] explicitly.
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Detach>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}
