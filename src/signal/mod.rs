//! Reactive local state.
//!
//! A [`Signal`] holds one value and notifies its watchers synchronously
//! whenever the value changes.

mod signal;

pub use signal::{Signal, WatchGuard};
