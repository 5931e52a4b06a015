//! Tracking key — identity of one observed `(device, capability)` channel.
//!
//! A device exposing several on/off outputs yields one key per capability.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const HISTORY_PREFIX: &str = "history:";

/// Composite identity of a monitored `(device_id, capability)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackingKey {
    device_id: String,
    capability: String,
}

impl TrackingKey {
    /// Build a key after checking that both parts are non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when either part is blank.
    pub fn new(
        device_id: impl Into<String>,
        capability: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let device_id = device_id.into();
        let capability = capability.into();
        if device_id.trim().is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }
        if capability.trim().is_empty() {
            return Err(ValidationError::EmptyCapability);
        }
        Ok(Self {
            device_id,
            capability,
        })
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Key under which this channel's history blob is persisted.
    #[must_use]
    pub fn history_storage_key(&self) -> String {
        format!("{HISTORY_PREFIX}{self}")
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.capability)
    }
}

impl FromStr for TrackingKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (device_id, capability) = s
            .rsplit_once('/')
            .ok_or_else(|| ValidationError::MalformedKey(s.to_string()))?;
        Self::new(device_id, capability)
    }
}
