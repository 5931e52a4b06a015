//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`MimicError`]
//! via `#[from]`.

use crate::tracking_key::TrackingKey;

/// Top-level error type shared by the application and adapter layers.
#[derive(Debug, thiserror::Error)]
pub enum MimicError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("device unavailable")]
    Device(#[from] DeviceError),

    #[error("tracking failed")]
    Tracking(#[from] TrackingError),

    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The scheduler task has exited and no longer accepts commands.
    #[error("scheduler is not running")]
    SchedulerStopped,
}

/// Invariant violations on user-supplied input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("device id must not be empty")]
    EmptyDeviceId,

    #[error("capability must not be empty")]
    EmptyCapability,

    #[error("tracking key {0:?} is malformed")]
    MalformedKey(String),
}

/// A referenced object does not exist.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Failures reported by a device while reading, writing or subscribing.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device {0} is unknown")]
    UnknownDevice(String),

    #[error("capability {capability} is not available on device {device_id}")]
    UnknownCapability {
        device_id: String,
        capability: String,
    },

    #[error("push notifications are not supported for {0}")]
    SubscribeUnsupported(TrackingKey),

    #[error("device {0} did not respond")]
    Unreachable(String),

    #[error("device I/O failed")]
    Io(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Neither push notifications nor polling could be set up for a key.
#[derive(Debug, thiserror::Error)]
#[error("could not start tracking {key}: subscription failed ({subscribe}) and polling failed")]
pub struct TrackingError {
    pub key: TrackingKey,
    pub subscribe: DeviceError,
    #[source]
    pub poll: DeviceError,
}
