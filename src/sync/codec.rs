//! JSON text encoding of synced values.
//!
//! Values are stored as bare `serde_json` text with no envelope, so any
//! context that agrees on the type can read them.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SyncError};

pub fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| SyncError::Serialize {
        key: key.to_string(),
        source,
    })
}

pub fn decode<T: DeserializeOwned>(key: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|source| SyncError::Deserialize {
        key: key.to_string(),
        source,
    })
}
