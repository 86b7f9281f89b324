use serde::{Deserialize, Serialize};

/// A change to a shared storage area, as seen by another execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    /// The changed key, or `None` when the whole area was cleared.
    pub key: Option<String>,
    pub old_value: Option<String>,
    /// The new value, or `None` when the entry was removed.
    pub new_value: Option<String>,
}

impl StorageEvent {
    pub fn set(
        key: impl Into<String>,
        old_value: Option<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self {
            key: Some(key.into()),
            old_value,
            new_value: Some(new_value.into()),
        }
    }

    pub fn removed(key: impl Into<String>, old_value: Option<String>) -> Self {
        Self {
            key: Some(key.into()),
            old_value,
            new_value: None,
        }
    }

    pub fn cleared() -> Self {
        Self {
            key: None,
            old_value: None,
            new_value: None,
        }
    }

    /// The new value if this event wrote `key`.
    pub fn written_value(&self, key: &str) -> Option<&str> {
        match (self.key.as_deref(), self.new_value.as_deref()) {
            (Some(k), Some(value)) if k == key => Some(value),
            _ => None,
        }
    }
}
