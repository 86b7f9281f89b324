//! Binding reactive local state to shared storage.
//!
//! [`bind`] pairs a [`Signal`](crate::Signal) with one storage key:
//! - on creation the stored entry is cleared and the value starts at the
//!   caller's initial value,
//! - every local change is serialized and written back,
//! - writes from other contexts replace the local value.

pub mod codec;
mod state;

pub use state::{bind, bind_with, CrossTabState, Setter};
