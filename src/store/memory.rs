use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{debug, trace, warn};

use super::{Listener, StorageBackend, StorageEvent};
use crate::config::StorageConfig;
use crate::error::{Result, SyncError};
use crate::runtime::lock::{lock, read, write};
use crate::runtime::{ObserverSet, Subscription};

/// Size of a string as browsers count it against the quota.
fn units(text: &str) -> usize {
    text.encode_utf16().count()
}

fn entry_units(key: &str, value: &str) -> usize {
    units(key) + units(value)
}

/// State shared by every context of one origin.
struct Origin {
    config: StorageConfig,
    entries: RwLock<BTreeMap<String, String>>,
    tabs: RwLock<BTreeMap<usize, Weak<Tab>>>,
    next_tab: AtomicUsize,
}

impl Origin {
    fn check_enabled(&self) -> Result<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(SyncError::StorageDisabled)
        }
    }

    fn live_tabs(&self) -> Vec<Arc<Tab>> {
        let mut tabs = write(&self.tabs);
        tabs.retain(|_, tab| tab.strong_count() > 0);
        tabs.values().filter_map(Weak::upgrade).collect()
    }

    /// Queue `event` on every live context except the writer.
    fn broadcast(&self, from: usize, event: &StorageEvent) {
        for tab in self.live_tabs() {
            if tab.id == from {
                continue;
            }
            trace!(from, to = tab.id, key = ?event.key, "storage event queued");
            lock(&tab.pending).push_back(event.clone());
        }
    }
}

/// One execution context: its listeners and its undelivered events.
struct Tab {
    id: usize,
    pending: Mutex<VecDeque<StorageEvent>>,
    listeners: ObserverSet<StorageEvent, Result<()>>,
}

impl Tab {
    fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Hand one event to every listener. A failing listener doesn't stop the
    /// others; the first error is returned.
    fn deliver(&self, event: &StorageEvent) -> Result<()> {
        let mut first_error = None;
        for listener in self.listeners.snapshot() {
            if let Err(e) = listener(event) {
                warn!(
                    tab = self.id,
                    key = ?event.key,
                    error = %e,
                    "storage listener failed"
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn drain(&self) -> (usize, Option<SyncError>) {
        let mut delivered = 0;
        let mut first_error = None;
        loop {
            let next = lock(&self.pending).pop_front();
            let Some(event) = next else {
                break;
            };
            if let Err(e) = self.deliver(&event) {
                first_error.get_or_insert(e);
            }
            delivered += 1;
        }
        (delivered, first_error)
    }
}

/// An in-memory storage area shared by any number of execution contexts.
///
/// Clones refer to the same area. Each context gets its own handle from
/// [`open_tab`](MemoryStorage::open_tab); events raised by a write are queued
/// on the other contexts and delivered when they run
/// [`TabStorage::dispatch_pending`].
///
/// # Examples
///
/// ```
/// use crosstab::{MemoryStorage, StorageBackend};
///
/// let storage = MemoryStorage::default();
/// let first = storage.open_tab();
/// let second = storage.open_tab();
///
/// first.set("greeting", "\"hi\"").unwrap();
/// assert_eq!(first.pending_events(), 0);
/// assert_eq!(second.pending_events(), 1);
/// assert_eq!(second.get("greeting").unwrap().as_deref(), Some("\"hi\""));
/// ```
#[derive(Clone)]
pub struct MemoryStorage {
    origin: Arc<Origin>,
}

impl MemoryStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            origin: Arc::new(Origin {
                config,
                entries: RwLock::new(BTreeMap::new()),
                tabs: RwLock::new(BTreeMap::new()),
                next_tab: AtomicUsize::new(0),
            }),
        }
    }

    /// Attach a new execution context to this area.
    pub fn open_tab(&self) -> TabStorage {
        let id = self.origin.next_tab.fetch_add(1, Ordering::SeqCst);
        let tab = Arc::new(Tab {
            id,
            pending: Mutex::new(VecDeque::new()),
            listeners: ObserverSet::new(),
        });
        write(&self.origin.tabs).insert(id, Arc::downgrade(&tab));
        debug!(tab = id, "storage context opened");

        TabStorage {
            origin: Arc::clone(&self.origin),
            tab,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.origin.config
    }

    /// Read an entry directly, bypassing any context.
    pub fn peek(&self, key: &str) -> Option<String> {
        read(&self.origin.entries).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.origin.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Space used, in the same units as the quota.
    pub fn usage(&self) -> usize {
        let entries = read(&self.origin.entries);
        entries.iter().map(|(k, v)| entry_units(k, v)).sum()
    }

    pub fn tab_count(&self) -> usize {
        self.origin.live_tabs().len()
    }

    /// Run every context's event loop until nothing is pending.
    ///
    /// Stops after `max_dispatch_rounds` rounds. Returns the number of events
    /// delivered, or the first listener error once every queue is drained.
    pub fn dispatch_all(&self) -> Result<usize> {
        let mut total = 0;
        let mut first_error = None;

        for _ in 0..self.origin.config.max_dispatch_rounds {
            let mut round = 0;
            for tab in self.origin.live_tabs() {
                let (delivered, error) = tab.drain();
                round += delivered;
                if let Some(e) = error {
                    first_error.get_or_insert(e);
                }
            }
            total += round;
            if round == 0 {
                return first_error.map_or(Ok(total), Err);
            }
        }

        let pending: usize = self
            .origin
            .live_tabs()
            .iter()
            .map(|tab| tab.pending_len())
            .sum();
        if pending > 0 {
            warn!(
                rounds = self.origin.config.max_dispatch_rounds,
                pending, "dispatch round limit reached with events pending"
            );
        }
        first_error.map_or(Ok(total), Err)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("config", &self.origin.config)
            .field("entries", &self.len())
            .finish()
    }
}

/// One execution context's handle on a [`MemoryStorage`].
///
/// Clones refer to the same context.
#[derive(Clone)]
pub struct TabStorage {
    origin: Arc<Origin>,
    tab: Arc<Tab>,
}

impl TabStorage {
    pub fn id(&self) -> usize {
        self.tab.id
    }

    /// The area this context belongs to.
    pub fn storage(&self) -> MemoryStorage {
        MemoryStorage {
            origin: Arc::clone(&self.origin),
        }
    }

    /// Remove every entry. Other contexts see an event with no key.
    pub fn clear(&self) -> Result<()> {
        self.origin.check_enabled()?;
        {
            let mut entries = write(&self.origin.entries);
            if entries.is_empty() {
                return Ok(());
            }
            entries.clear();
        }
        self.origin.broadcast(self.tab.id, &StorageEvent::cleared());
        Ok(())
    }

    /// Deliver this context's queued events, oldest first.
    ///
    /// Every event reaches every listener even if some fail. Returns the
    /// number of events delivered, or the first listener error.
    pub fn dispatch_pending(&self) -> Result<usize> {
        match self.tab.drain() {
            (delivered, None) => Ok(delivered),
            (_, Some(e)) => Err(e),
        }
    }

    /// Hand an event straight to this context's listeners, skipping the queue.
    pub fn deliver(&self, event: &StorageEvent) -> Result<()> {
        trace!(
            tab = self.tab.id,
            key = ?event.key,
            "storage event delivered directly"
        );
        self.tab.deliver(event)
    }

    pub fn pending_events(&self) -> usize {
        self.tab.pending_len()
    }

    pub fn listener_count(&self) -> usize {
        self.tab.listeners.len()
    }
}

impl StorageBackend for TabStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.origin.check_enabled()?;
        Ok(read(&self.origin.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.origin.check_enabled()?;
        let old_value = {
            let mut entries = write(&self.origin.entries);
            let old_value = entries.get(key).cloned();
            if old_value.as_deref() == Some(value) {
                return Ok(());
            }

            if let Some(quota) = self.origin.config.quota {
                let used: usize = entries.iter().map(|(k, v)| entry_units(k, v)).sum();
                let freed = old_value.as_deref().map_or(0, |old| entry_units(key, old));
                let required = used - freed + entry_units(key, value);
                if required > quota {
                    return Err(SyncError::QuotaExceeded {
                        key: key.to_string(),
                        required,
                        quota,
                    });
                }
            }

            entries.insert(key.to_string(), value.to_string());
            old_value
        };

        let event = StorageEvent::set(key, old_value, value);
        self.origin.broadcast(self.tab.id, &event);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.origin.check_enabled()?;
        let old_value = write(&self.origin.entries).remove(key);

        if let Some(old_value) = old_value {
            let event = StorageEvent::removed(key, Some(old_value));
            self.origin.broadcast(self.tab.id, &event);
        }
        Ok(())
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        debug!(tab = self.tab.id, "storage listener attached");
        self.tab.listeners.register(move |event| listener(event))
    }
}

impl fmt::Debug for TabStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TabStorage")
            .field("id", &self.tab.id)
            .field("pending", &self.tab.pending_len())
            .field("listeners", &self.tab.listeners.len())
            .finish()
    }
}
