//! Errors raised by the virtual devices.

use mimic_domain::error::DeviceError;
use mimic_domain::tracking_key::TrackingKey;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VirtualDeviceError {
    #[error("no virtual device with id {0}")]
    UnknownDevice(String),

    #[error("virtual device {device_id} has no capability {capability}")]
    UnknownCapability {
        device_id: String,
        capability: String,
    },

    #[error("virtual device {0} is offline")]
    Offline(String),

    #[error("virtual device {0} cannot push notifications")]
    PushUnsupported(TrackingKey),
}

impl From<VirtualDeviceError> for DeviceError {
    fn from(err: VirtualDeviceError) -> Self {
        match err {
            VirtualDeviceError::UnknownDevice(id) => Self::UnknownDevice(id),
            VirtualDeviceError::UnknownCapability {
                device_id,
                capability,
            } => Self::UnknownCapability {
                device_id,
                capability,
            },
            VirtualDeviceError::Offline(id) => Self::Unreachable(id),
            VirtualDeviceError::PushUnsupported(key) => Self::SubscribeUnsupported(key),
        }
    }
}
