//! Error types shared by the storage and sync layers.

use thiserror::Error;

/// Errors raised by storage backends and bindings.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Writing the entry would push the area past its quota.
    #[error("storage quota exceeded writing `{key}`: {required} of {quota} units")]
    QuotaExceeded {
        key: String,
        required: usize,
        quota: usize,
    },

    /// Storage is unavailable for this origin.
    #[error("storage is disabled")]
    StorageDisabled,

    #[error("failed to serialize value for `{key}`")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A foreign write carried text that does not parse as the bound type.
    #[error("malformed value under `{key}`")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration")]
    Config(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
