use crate::runtime::lock::{read, write};
use crate::runtime::{ObserverSet, Subscription};
use std::sync::{Arc, RwLock};

/// RAII guard for signal watchers.
pub type WatchGuard = Subscription;

/// A reactive signal that holds a value and notifies watchers when changed.
///
/// Clones share the same value and watchers.
///
/// # Examples
///
/// ```
/// use crosstab::Signal;
///
/// let count = Signal::new(0);
/// count.update(|n| *n += 1);
/// assert_eq!(count.get(), 1);
/// ```
pub struct Signal<T> {
    value: Arc<RwLock<T>>,
    watchers: ObserverSet<T>,
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(initial: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial)),
            watchers: ObserverSet::new(),
        }
    }

    /// Get the current value of the signal.
    pub fn get(&self) -> T {
        read(&self.value).clone()
    }

    /// Read the value with a function without cloning.
    ///
    /// The signal is locked while `f` runs, so `f` must not write to it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = read(&self.value);
        f(&*value)
    }

    /// Set a new value for the signal.
    pub fn set(&self, new_value: T) {
        *write(&self.value) = new_value;
        self.notify();
    }

    /// Update the value in place.
    ///
    /// The signal is locked while `f` runs, so `f` must not touch the
    /// signal itself. Use [`replace_with`](Signal::replace_with) for that.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        {
            let mut value = write(&self.value);
            f(&mut *value);
        }
        self.notify();
    }

    /// Replace the value with one computed from the previous value.
    ///
    /// `f` runs with no lock held and may read the signal.
    pub fn replace_with(&self, f: impl FnOnce(&T) -> T) {
        let previous = self.get();
        let next = f(&previous);
        self.set(next);
    }

    /// Watch this signal for changes.
    ///
    /// The callback runs after every `set`, `update` or `replace_with`, once
    /// the new value is in place. It is not called with the current value.
    pub fn watch<F>(&self, callback: F) -> WatchGuard
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.watchers.register(callback)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    fn notify(&self) {
        let watchers = self.watchers.snapshot();
        if watchers.is_empty() {
            return;
        }
        // Watchers may read or write the signal, so no lock is held here
        let value = self.get();
        for watcher in watchers {
            watcher(&value);
        }
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            watchers: self.watchers.clone(),
        }
    }
}
