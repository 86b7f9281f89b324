//! Configuration for storage areas and bindings.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Default per-origin quota, in UTF-16 code units of keys plus values.
pub const DEFAULT_QUOTA: usize = 5 * 1024 * 1024;

/// Default cap on event loop rounds run by `MemoryStorage::dispatch_all`.
pub const DEFAULT_MAX_DISPATCH_ROUNDS: usize = 64;

/// Settings for a shared storage area.
///
/// # Examples
///
/// ```
/// use crosstab::StorageConfig;
///
/// let config = StorageConfig::from_json(r#"{ "quota": 1024 }"#).unwrap();
/// assert_eq!(config.quota, Some(1024));
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// When false every storage operation fails with `StorageDisabled`.
    pub enabled: bool,
    /// Maximum total size of the area. `None` means unbounded.
    pub quota: Option<usize>,
    pub max_dispatch_rounds: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quota: Some(DEFAULT_QUOTA),
            max_dispatch_rounds: DEFAULT_MAX_DISPATCH_ROUNDS,
        }
    }
}

impl StorageConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(SyncError::Config)
    }

    pub fn with_quota(mut self, quota: Option<usize>) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_dispatch_rounds(mut self, rounds: usize) -> Self {
        self.max_dispatch_rounds = rounds;
        self
    }
}

/// What a binding does when a foreign write carries malformed JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedValuePolicy {
    /// Fail the delivery with `SyncError::Deserialize`, leaving the local value.
    #[default]
    Propagate,
    /// Log and keep the local value.
    Ignore,
    /// Log and fall back to the binding's initial value.
    ResetToInitial,
}

/// Per-binding options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindOptions {
    pub on_malformed: MalformedValuePolicy,
    /// Remove any stored entry under the key when the binding is created.
    pub clear_on_mount: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            on_malformed: MalformedValuePolicy::default(),
            clear_on_mount: true,
        }
    }
}

impl BindOptions {
    pub fn on_malformed(mut self, policy: MalformedValuePolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    pub fn clear_on_mount(mut self, clear: bool) -> Self {
        self.clear_on_mount = clear;
        self
    }
}
