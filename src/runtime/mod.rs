//! Runtime support for reactive primitives.
//!
//! This module provides the observer registries and subscription guards
//! shared by signals and storage areas.

pub(crate) mod lock;
mod registry;

pub use registry::{Observer, ObserverSet, Subscription};
