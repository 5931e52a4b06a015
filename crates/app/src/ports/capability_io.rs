//! Capability I/O port — access to the on/off capabilities of live devices.
//!
//! An adapter bridges a device protocol (virtual, Zigbee, …) into mimic. The
//! scheduler reads and writes boolean capabilities and, when the device
//! supports it, subscribes to push notifications of value changes.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::Stream;

use mimic_domain::error::DeviceError;
use mimic_domain::tracking_key::TrackingKey;

/// Stream of values pushed by a device each time the capability changes.
pub type ValueStream = Pin<Box<dyn Stream<Item = bool> + Send>>;

/// Opaque identifier handed back to [`CapabilityIo::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An active push subscription on one capability.
pub struct Subscription {
    pub id: SubscriptionId,
    pub updates: ValueStream,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Reads, writes and observes boolean device capabilities.
pub trait CapabilityIo: Send + Sync {
    /// Read the live value of the capability.
    fn read_value(
        &self,
        key: &TrackingKey,
    ) -> impl Future<Output = Result<bool, DeviceError>> + Send;

    /// Set the capability to `value`.
    fn write_value(
        &self,
        key: &TrackingKey,
        value: bool,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Subscribe to value changes.
    ///
    /// Devices that cannot push notifications return an error; the caller
    /// falls back to polling.
    fn subscribe(
        &self,
        key: &TrackingKey,
    ) -> impl Future<Output = Result<Subscription, DeviceError>> + Send;

    /// Release a subscription obtained from [`subscribe`](Self::subscribe).
    fn unsubscribe(&self, id: SubscriptionId)
    -> impl Future<Output = Result<(), DeviceError>> + Send;
}

impl<T: CapabilityIo> CapabilityIo for Arc<T> {
    fn read_value(
        &self,
        key: &TrackingKey,
    ) -> impl Future<Output = Result<bool, DeviceError>> + Send {
        (**self).read_value(key)
    }

    fn write_value(
        &self,
        key: &TrackingKey,
        value: bool,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send {
        (**self).write_value(key, value)
    }

    fn subscribe(
        &self,
        key: &TrackingKey,
    ) -> impl Future<Output = Result<Subscription, DeviceError>> + Send {
        (**self).subscribe(key)
    }

    fn unsubscribe(&self, id: SubscriptionId)
    -> impl Future<Output = Result<(), DeviceError>> + Send {
        (**self).unsubscribe(id)
    }
}
