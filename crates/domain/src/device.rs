//! Device descriptor — the persisted description of a tracked channel.

use serde::{Deserialize, Serialize};

use crate::tracking_key::TrackingKey;

/// What the scheduler needs to remember about a tracked channel across
/// restarts: its key and a human-readable name for logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub key: TrackingKey,
    pub display_name: String,
}

impl DeviceDescriptor {
    #[must_use]
    pub fn new(key: TrackingKey, display_name: impl Into<String>) -> Self {
        Self {
            key,
            display_name: display_name.into(),
        }
    }

    /// Capability name of the observed channel.
    #[must_use]
    pub fn capability(&self) -> &str {
        self.key.capability()
    }
}
