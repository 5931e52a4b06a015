//! # mimic-adapter-virtual
//!
//! Virtual/demo integration that provides simulated on/off devices for
//! testing and demonstration purposes.
//!
//! ## Provided devices
//!
//! | Device | Capabilities | Behaviour |
//! |--------|--------------|-----------|
//! | Virtual Light | `onoff` | Pushes every change to subscribers |
//! | Virtual Switch | `channel_1`, `channel_2` | Pushes every change to subscribers |
//! | Virtual Plug | `onoff` | No notifications, must be polled |
//!
//! ## Dependency rule
//!
//! Depends on `mimic-app` (port traits) and `mimic-domain` only.

mod devices;
pub mod error;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use mimic_app::ports::{CapabilityIo, Subscription, SubscriptionId};
use mimic_domain::device::DeviceDescriptor;
use mimic_domain::error::DeviceError;
use mimic_domain::tracking_key::TrackingKey;

use devices::{VirtualDevice, VirtualLight, VirtualPlug, VirtualSwitch};
use error::VirtualDeviceError;

struct Subscriber {
    key: TrackingKey,
    updates: mpsc::UnboundedSender<bool>,
}

/// Virtual integration that owns a fixed set of simulated devices.
pub struct VirtualDevices {
    devices: HashMap<&'static str, VirtualDevice>,
    offline: Mutex<HashSet<String>>,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    next_subscription: AtomicU64,
}

impl Default for VirtualDevices {
    fn default() -> Self {
        let devices = [
            VirtualDevice::Light(VirtualLight::default()),
            VirtualDevice::Switch(VirtualSwitch::default()),
            VirtualDevice::Plug(VirtualPlug::default()),
        ]
        .into_iter()
        .map(|device| (device.device_id(), device))
        .collect();

        Self {
            devices,
            offline: Mutex::default(),
            subscribers: Mutex::default(),
            next_subscription: AtomicU64::new(1),
        }
    }
}

impl VirtualDevices {
    /// One descriptor per capability of every virtual device, sorted by key.
    #[must_use]
    pub fn descriptors(&self) -> Vec<DeviceDescriptor> {
        let mut descriptors: Vec<DeviceDescriptor> = self
            .devices
            .values()
            .flat_map(|device| {
                device.capabilities().iter().filter_map(move |capability| {
                    let key = TrackingKey::new(device.device_id(), *capability).ok()?;
                    let name = if device.capabilities().len() > 1 {
                        format!("{} ({capability})", device.name())
                    } else {
                        device.name().to_string()
                    };
                    Some(DeviceDescriptor::new(key, name))
                })
            })
            .collect();
        descriptors.sort_by(|a, b| a.key.cmp(&b.key));
        descriptors
    }

    /// Simulate someone operating the device by hand.
    ///
    /// # Errors
    ///
    /// Returns [`VirtualDeviceError`] if the device or capability does not
    /// exist, or the device is offline.
    pub fn operate(&self, key: &TrackingKey, value: bool) -> Result<(), VirtualDeviceError> {
        let device = self.reachable(key)?;
        let changed = device
            .write(key.capability(), value)
            .ok_or_else(|| unknown_capability(key))?;
        if changed && device.supports_push() {
            self.notify(key, value);
        }
        Ok(())
    }

    /// Take a device off the network, or bring it back.
    pub fn set_offline(&self, device_id: &str, offline: bool) {
        let mut set = lock(&self.offline);
        if offline {
            set.insert(device_id.to_string());
        } else {
            set.remove(device_id);
        }
    }

    /// Number of live subscriptions, across all devices.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn device(&self, key: &TrackingKey) -> Result<&VirtualDevice, VirtualDeviceError> {
        self.devices
            .get(key.device_id())
            .ok_or_else(|| VirtualDeviceError::UnknownDevice(key.device_id().to_string()))
    }

    fn reachable(&self, key: &TrackingKey) -> Result<&VirtualDevice, VirtualDeviceError> {
        let device = self.device(key)?;
        if lock(&self.offline).contains(key.device_id()) {
            return Err(VirtualDeviceError::Offline(key.device_id().to_string()));
        }
        Ok(device)
    }

    fn notify(&self, key: &TrackingKey, value: bool) {
        lock(&self.subscribers)
            .retain(|_, sub| &sub.key != key || sub.updates.send(value).is_ok());
    }
}

impl CapabilityIo for VirtualDevices {
    async fn read_value(&self, key: &TrackingKey) -> Result<bool, DeviceError> {
        let device = self.reachable(key)?;
        let value = device
            .read(key.capability())
            .ok_or_else(|| unknown_capability(key))?;
        Ok(value)
    }

    async fn write_value(&self, key: &TrackingKey, value: bool) -> Result<(), DeviceError> {
        self.operate(key, value)?;
        Ok(())
    }

    async fn subscribe(&self, key: &TrackingKey) -> Result<Subscription, DeviceError> {
        let device = self.reachable(key)?;
        if device.read(key.capability()).is_none() {
            return Err(unknown_capability(key).into());
        }
        if !device.supports_push() {
            return Err(VirtualDeviceError::PushUnsupported(key.clone()).into());
        }

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).insert(
            id,
            Subscriber {
                key: key.clone(),
                updates: tx,
            },
        );
        Ok(Subscription {
            id,
            updates: Box::pin(UnboundedReceiverStream::new(rx)),
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), DeviceError> {
        lock(&self.subscribers).remove(&id);
        Ok(())
    }
}

fn unknown_capability(key: &TrackingKey) -> VirtualDeviceError {
    VirtualDeviceError::UnknownCapability {
        device_id: key.device_id().to_string(),
        capability: key.capability().to_string(),
    }
}

fn lock<T>(state: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
