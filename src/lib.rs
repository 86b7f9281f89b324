//! # Crosstab
//!
//! Reactive local state kept in sync across execution contexts that share
//! one key-value storage area, the way browser tabs of one origin share
//! `localStorage`.
//!
//! ## Layers
//!
//! - `Signal<T>` - A local value that notifies watchers when changed
//! - `StorageBackend` - A context's view of the shared area, with change
//!   events raised only in *other* contexts
//! - `CrossTabState<T>` - A signal bound to one storage key in both
//!   directions, created with [`bind`]
//!
//! `MemoryStorage` is the bundled in-process area. Each
//! [`MemoryStorage::open_tab`] handle plays one context; its queued events
//! are delivered by [`TabStorage::dispatch_pending`].
//!
//! ## Example
//!
//! ```
//! use crosstab::{bind, MemoryStorage};
//!
//! let storage = MemoryStorage::default();
//! let tab_a = storage.open_tab();
//! let tab_b = storage.open_tab();
//!
//! let a = bind(tab_a.clone(), "draft", String::new());
//! let b = bind(tab_b.clone(), "draft", String::new());
//!
//! a.set("hello".to_string());
//! storage.dispatch_all().unwrap();
//! assert_eq!(b.get(), "hello");
//!
//! // Last writer wins
//! b.set("world".to_string());
//! storage.dispatch_all().unwrap();
//! assert_eq!(a.get(), "world");
//! ```

pub mod config;
pub mod error;
pub mod runtime;
pub mod signal;
pub mod store;
pub mod sync;

// Re-export main types for convenience
pub use config::{BindOptions, MalformedValuePolicy, StorageConfig};
pub use error::{Result, SyncError};
pub use signal::{Signal, WatchGuard};
pub use store::{Listener, MemoryStorage, StorageBackend, StorageEvent, TabStorage};
pub use sync::{bind, bind_with, CrossTabState, Setter};
