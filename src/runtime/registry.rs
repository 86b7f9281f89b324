use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use super::lock::{read, write};

/// A registered callback.
pub type Observer<A, R> = Arc<dyn Fn(&A) -> R + Send + Sync>;

struct Registry<A: ?Sized, R> {
    next_id: usize,
    // Ordered by id, which is registration order
    observers: BTreeMap<usize, Observer<A, R>>,
}

/// Type-erased removal so guards don't carry the observer's signature.
trait Detach: Send + Sync {
    fn detach(&self, id: usize);
    fn contains(&self, id: usize) -> bool;
}

impl<A: ?Sized + 'static, R: 'static> Detach for RwLock<Registry<A, R>> {
    fn detach(&self, id: usize) {
        // Dropped after the lock is released
        let removed = write(self).observers.remove(&id);
        drop(removed);
    }

    fn contains(&self, id: usize) -> bool {
        read(self).observers.contains_key(&id)
    }
}

/// A set of observers notified synchronously, in registration order.
///
/// Callers take a [`snapshot`](ObserverSet::snapshot) and invoke it with no
/// lock held, so an observer may register or drop subscriptions while it
/// runs.
///
/// # Examples
///
/// ```
/// use crosstab::runtime::ObserverSet;
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let set: ObserverSet<usize> = ObserverSet::new();
/// let total = Arc::new(AtomicUsize::new(0));
/// let total_clone = total.clone();
///
/// let guard = set.register(move |n: &usize| {
///     total_clone.fetch_add(*n, Ordering::SeqCst);
/// });
///
/// for observer in set.snapshot() {
///     observer(&5);
/// }
/// assert_eq!(total.load(Ordering::SeqCst), 5);
///
/// drop(guard);
/// assert!(set.is_empty());
/// ```
pub struct ObserverSet<A: ?Sized, R = ()> {
    registry: Arc<RwLock<Registry<A, R>>>,
}

impl<A: ?Sized + 'static, R: 'static> ObserverSet<A, R> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry {
                next_id: 0,
                observers: BTreeMap::new(),
            })),
        }
    }

    /// Register an observer. It stays registered until the returned guard
    /// is dropped.
    pub fn register<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        let id = {
            let mut registry = write(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.observers.insert(id, Arc::new(observer));
            id
        };

        let handle: Arc<dyn Detach> = self.registry.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&handle),
        }
    }

    /// Clone out the current observers.
    pub fn snapshot(&self) -> Vec<Observer<A, R>> {
        read(&self.registry).observers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.registry).observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: ?Sized + 'static, R: 'static> Default for ObserverSet<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized, R> Clone for ObserverSet<A, R> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

/// RAII guard for a registered observer.
#[must_use = "dropping a Subscription detaches its observer"]
pub struct Subscription {
    id: usize,
    registry: Weak<dyn Detach>,
}

impl Subscription {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether the observer is still registered.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map_or(false, |registry| registry.contains(self.id))
    }

    /// Detach now. Same as dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
