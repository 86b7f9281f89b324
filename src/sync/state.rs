use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use super::codec;
use crate::config::{BindOptions, MalformedValuePolicy};
use crate::error::Result;
use crate::runtime::lock::lock;
use crate::runtime::Subscription;
use crate::signal::{Signal, WatchGuard};
use crate::store::{Listener, StorageBackend, StorageEvent};

struct Binding<T> {
    key: String,
    state: Signal<T>,
}

/// A local value bound to one storage key and kept in sync with every
/// other context bound to the same key.
///
/// Local changes are written to storage right after they land. Writes made
/// by other contexts replace the local value when their events are
/// delivered. The last write wins.
///
/// Dropping the binding (or calling [`unbind`](CrossTabState::unbind))
/// detaches it from storage. The stored entry is left in place.
///
/// Writes from several threads are persisted one at a time, and each write
/// stores the value current when it runs, so storage ends on the same
/// value as the binding.
pub struct CrossTabState<T> {
    binding: Arc<Binding<T>>,
    _persist: WatchGuard,
    subscription: Subscription,
}

/// Bind a value to `key` with default options.
///
/// Any entry already stored under `key` is removed, and the local value
/// starts at `initial`. Nothing is written until the value changes.
///
/// # Examples
///
/// ```
/// use crosstab::{bind, MemoryStorage};
///
/// let storage = MemoryStorage::default();
/// let tab_a = storage.open_tab();
/// let tab_b = storage.open_tab();
///
/// let a = bind(tab_a, "k", String::new());
/// let b = bind(tab_b.clone(), "k", String::new());
///
/// a.set("hello".to_string());
/// assert_eq!(storage.peek("k").as_deref(), Some("\"hello\""));
///
/// tab_b.dispatch_pending().unwrap();
/// assert_eq!(b.get(), "hello");
/// ```
pub fn bind<T, B>(backend: B, key: impl Into<String>, initial: T) -> CrossTabState<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    B: StorageBackend + 'static,
{
    bind_with(backend, key, initial, BindOptions::default())
}

/// Bind a value to `key` with explicit options.
pub fn bind_with<T, B>(
    backend: B,
    key: impl Into<String>,
    initial: T,
    options: BindOptions,
) -> CrossTabState<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    B: StorageBackend + 'static,
{
    let key = key.into();
    let backend: Arc<dyn StorageBackend> = Arc::new(backend);
    let state = Signal::new(initial.clone());

    if options.clear_on_mount {
        if let Err(e) = backend.remove(&key) {
            warn!(
                key = %key,
                error = %e,
                "failed to clear stored value on mount"
            );
        }
    }

    let persist_lock = Arc::new(Mutex::new(()));
    let persist_guard = state.watch({
        let state = state.clone();
        let backend = Arc::clone(&backend);
        let key = key.clone();
        move |_: &T| {
            // The value handed in may already be stale under contention
            let _serial = lock(&persist_lock);
            persist(backend.as_ref(), &key, &state.get());
        }
    });

    let listener: Listener = Arc::new({
        let state = state.clone();
        let key = key.clone();
        let policy = options.on_malformed;
        move |event: &StorageEvent| {
            apply_foreign(&state, &key, &initial, policy, event)
        }
    });
    let subscription = backend.subscribe(listener);

    debug!(
        key = %key,
        clear_on_mount = options.clear_on_mount,
        "cross-tab state bound"
    );

    CrossTabState {
        binding: Arc::new(Binding { key, state }),
        _persist: persist_guard,
        subscription,
    }
}

/// Write the settled value. Failures are logged and absorbed.
fn persist<T: Serialize>(backend: &dyn StorageBackend, key: &str, value: &T) {
    let result = codec::encode(key, value).and_then(|text| backend.set(key, &text));
    if let Err(e) = result {
        error!(key, error = %e, "failed to persist state");
    }
}

fn apply_foreign<T>(
    state: &Signal<T>,
    key: &str,
    initial: &T,
    policy: MalformedValuePolicy,
    event: &StorageEvent,
) -> Result<()>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let Some(text) = event.written_value(key) else {
        return Ok(());
    };

    match codec::decode::<T>(key, text) {
        Ok(value) => {
            trace!(key, "applying foreign write");
            state.set(value);
            Ok(())
        }
        Err(e) => match policy {
            MalformedValuePolicy::Propagate => Err(e),
            MalformedValuePolicy::Ignore => {
                warn!(key, error = %e, "ignoring malformed foreign value");
                Ok(())
            }
            MalformedValuePolicy::ResetToInitial => {
                warn!(
                    key,
                    error = %e,
                    "malformed foreign value, resetting to initial"
                );
                state.set(initial.clone());
                Ok(())
            }
        },
    }
}

impl<T: Clone + Send + Sync + 'static> CrossTabState<T> {
    pub fn key(&self) -> &str {
        &self.binding.key
    }

    pub fn get(&self) -> T {
        self.binding.state.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.binding.state.with(f)
    }

    pub fn set(&self, value: T) {
        self.binding.state.set(value);
    }

    /// Update the value in place. `f` must not use this binding, since the
    /// value is locked while it runs.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.binding.state.update(f);
    }

    /// Replace the value with one computed from the previous value.
    pub fn replace_with(&self, f: impl FnOnce(&T) -> T) {
        self.binding.state.replace_with(f);
    }

    /// A cloneable write handle. It stops doing anything once the binding
    /// is gone.
    pub fn setter(&self) -> Setter<T> {
        Setter {
            binding: Arc::downgrade(&self.binding),
        }
    }

    /// Run `callback` after every change, local or foreign.
    pub fn watch<F>(&self, callback: F) -> WatchGuard
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.binding.state.watch(callback)
    }

    /// Whether foreign writes still reach this binding.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    /// Detach from storage. Same as dropping the binding.
    pub fn unbind(self) {}
}

impl<T> Drop for CrossTabState<T> {
    fn drop(&mut self) {
        debug!(key = %self.binding.key, "cross-tab state unbound");
    }
}

impl<T: fmt::Debug + Clone + Send + Sync + 'static> fmt::Debug for CrossTabState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossTabState")
            .field("key", &self.binding.key)
            .field("value", &self.get())
            .finish()
    }
}

/// Write half of a [`CrossTabState`].
pub struct Setter<T> {
    binding: Weak<Binding<T>>,
}

impl<T: Clone + Send + Sync + 'static> Setter<T> {
    pub fn set(&self, value: T) {
        self.with_state(|state| state.set(value));
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.with_state(|state| state.update(f));
    }

    pub fn replace_with(&self, f: impl FnOnce(&T) -> T) {
        self.with_state(|state| state.replace_with(f));
    }

    pub fn is_bound(&self) -> bool {
        self.binding.strong_count() > 0
    }

    fn with_state(&self, f: impl FnOnce(&Signal<T>)) {
        match self.binding.upgrade() {
            Some(binding) => f(&binding.state),
            None => debug!("setter used after its binding was dropped"),
        }
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            binding: Weak::clone(&self.binding),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::error::SyncError;
    use crate::store::{MemoryStorage, TabStorage};
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::thread;

    /// Wraps a context and holds its first write until released.
    struct GatedBackend {
        inner: TabStorage,
        entered: Mutex<Option<Sender<()>>>,
        release: Mutex<Option<Receiver<()>>>,
    }

    impl StorageBackend for GatedBackend {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            let entered = self.entered.lock().unwrap().take();
            if let Some(entered) = entered {
                let release = self.release.lock().unwrap().take().unwrap();
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }

        fn subscribe(&self, listener: Listener) -> Subscription {
            self.inner.subscribe(listener)
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        line: u32,
        column: u32,
    }

    #[test]
    fn mount_clears_stale_entry() {
        let storage = MemoryStorage::default();
        let tab = storage.open_tab();
        tab.set("k", "\"stale\"").unwrap();

        let state = bind(tab, "k", "fresh".to_string());

        assert_eq!(storage.peek("k"), None);
        assert_eq!(state.get(), "fresh");
    }

    #[test]
    fn mount_can_keep_stale_entry() {
        let storage = MemoryStorage::default();
        let tab = storage.open_tab();
        tab.set("k", "\"stale\"").unwrap();

        let options = BindOptions::default().clear_on_mount(false);
        let state = bind_with(tab, "k", "fresh".to_string(), options);

        // Kept, but never read back
        assert_eq!(storage.peek("k").as_deref(), Some("\"stale\""));
        assert_eq!(state.get(), "fresh");
    }

    #[test]
    fn local_changes_persist() {
        let storage = MemoryStorage::default();
        let origin = Cursor { line: 0, column: 0 };
        let state = bind(storage.open_tab(), "cursor", origin);

        state.set(Cursor { line: 3, column: 7 });
        let stored = storage.peek("cursor");
        assert_eq!(stored.as_deref(), Some(r#"{"line":3,"column":7}"#));

        state.update(|c| c.line += 1);
        state.replace_with(|c| Cursor {
            column: c.column * 2,
            ..c.clone()
        });
        let stored = storage.peek("cursor");
        assert_eq!(stored.as_deref(), Some(r#"{"line":4,"column":14}"#));
    }

    #[test]
    fn failed_persist_keeps_local_value() {
        let config = StorageConfig::default().with_quota(Some(8));
        let storage = MemoryStorage::new(config);
        let state = bind(storage.open_tab(), "k", String::new());

        state.set("ok".to_string());
        state.set("far too long for the quota".to_string());

        assert_eq!(state.get(), "far too long for the quota");
        assert_eq!(storage.peek("k").as_deref(), Some("\"ok\""));
    }

    #[test]
    fn concurrent_sets_persist_latest_value() {
        let storage = MemoryStorage::default();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let backend = GatedBackend {
            inner: storage.open_tab(),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        };
        let state = Arc::new(bind(backend, "k", 0));

        // The first write stalls inside the backend
        let first = thread::spawn({
            let state = Arc::clone(&state);
            move || state.set(1)
        });
        entered_rx.recv().unwrap();

        let second = thread::spawn({
            let state = Arc::clone(&state);
            move || state.set(2)
        });
        while state.get() != 2 {
            thread::yield_now();
        }

        release_tx.send(()).unwrap();
        first.join().unwrap();
        second.join().unwrap();

        assert_eq!(state.get(), 2);
        assert_eq!(storage.peek("k").as_deref(), Some("2"));
    }

    #[test]
    fn disabled_storage_still_binds() {
        let config = StorageConfig::default().with_enabled(false);
        let storage = MemoryStorage::new(config);
        let state = bind(storage.open_tab(), "k", 1);

        state.set(2);
        assert_eq!(state.get(), 2);
        assert!(storage.is_empty());
    }

    #[test]
    fn unserializable_value_is_not_persisted() {
        let storage = MemoryStorage::default();
        let state: CrossTabState<HashMap<Vec<u8>, u8>> =
            bind(storage.open_tab(), "k", HashMap::new());

        state.set(HashMap::from([(vec![1], 1)]));
        assert_eq!(state.get().len(), 1);
        assert_eq!(storage.peek("k"), None);
    }

    #[test]
    fn foreign_write_replaces_value_and_notifies_watchers() {
        let storage = MemoryStorage::default();
        let tab = storage.open_tab();
        let state = bind(tab.clone(), "k", 0i64);

        let renders = Arc::new(AtomicUsize::new(0));
        let renders_clone = renders.clone();
        let _guard = state.watch(move |_| {
            renders_clone.fetch_add(1, Ordering::SeqCst);
        });

        tab.deliver(&StorageEvent::set("k", None, "41")).unwrap();
        assert_eq!(state.get(), 41);
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let storage = MemoryStorage::default();
        let tab = storage.open_tab();
        let state = bind(tab.clone(), "k", 5);

        tab.deliver(&StorageEvent::set("other", None, "9")).unwrap();
        tab.deliver(&StorageEvent::removed("k", Some("5".into()))).unwrap();
        tab.deliver(&StorageEvent::cleared()).unwrap();

        assert_eq!(state.get(), 5);
    }

    #[test]
    fn malformed_value_propagates_by_default() {
        let storage = MemoryStorage::default();
        let tab = storage.open_tab();
        let state = bind(tab.clone(), "k", 5);

        let event = StorageEvent::set("k", None, "{oops");
        let err = tab.deliver(&event).unwrap_err();
        assert!(matches!(err, SyncError::Deserialize { ref key, .. } if key == "k"));
        assert_eq!(state.get(), 5);
        assert!(state.is_subscribed());
    }

    #[test]
    fn malformed_value_can_be_ignored() {
        let storage = MemoryStorage::default();
        let tab = storage.open_tab();
        let policy = MalformedValuePolicy::Ignore;
        let options = BindOptions::default().on_malformed(policy);
        let state = bind_with(tab.clone(), "k", 5, options);
        state.set(6);

        tab.deliver(&StorageEvent::set("k", None, "\"six\"")).unwrap();
        assert_eq!(state.get(), 6);
    }

    #[test]
    fn malformed_value_can_reset() {
        let storage = MemoryStorage::default();
        let tab = storage.open_tab();
        let policy = MalformedValuePolicy::ResetToInitial;
        let options = BindOptions::default().on_malformed(policy);
        let state = bind_with(tab.clone(), "k", 5, options);
        state.set(6);

        tab.deliver(&StorageEvent::set("k", None, "nope")).unwrap();
        assert_eq!(state.get(), 5);
        assert_eq!(storage.peek("k").as_deref(), Some("5"));
    }

    #[test]
    fn setter_goes_quiet_after_unbind() {
        let storage = MemoryStorage::default();
        let state = bind(storage.open_tab(), "k", 0);
        let setter = state.setter();

        setter.set(1);
        assert_eq!(state.get(), 1);
        assert_eq!(storage.peek("k").as_deref(), Some("1"));

        state.unbind();
        assert!(!setter.is_bound());
        setter.set(2);
        setter.update(|n| *n += 1);
        assert_eq!(storage.peek("k").as_deref(), Some("1"));
    }

    #[test]
    fn unbind_releases_listener() {
        let storage = MemoryStorage::default();
        let tab = storage.open_tab();
        let state = bind(tab.clone(), "k", 0);
        assert_eq!(tab.listener_count(), 1);

        drop(state);
        assert_eq!(tab.listener_count(), 0);
    }
}
