//! Shared key-value storage with cross-context change events.
//!
//! A storage area is a flat map from string keys to string values, shared by
//! every execution context of one origin. A successful write made through
//! one context raises a [`StorageEvent`] in every *other* context; the
//! writer never sees its own change.
//!
//! [`StorageBackend`] is the seam the sync layer talks to. [`MemoryStorage`]
//! is the in-process implementation, with one [`TabStorage`] handle per
//! context.

mod event;
mod memory;

pub use event::StorageEvent;
pub use memory::{MemoryStorage, TabStorage};

use std::sync::Arc;

use crate::error::Result;
use crate::runtime::Subscription;

/// Listener for storage events. An error marks the delivery as failed.
pub type Listener = Arc<dyn Fn(&StorageEvent) -> Result<()> + Send + Sync>;

/// One execution context's view of a shared storage area.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, overwriting any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the entry under `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Listen for changes made by other contexts until the guard drops.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        (**self).subscribe(listener)
    }
}
