//! Virtual device implementations — light, switch, plug.
//!
//! Each virtual device has a fixed device id and a fixed set of on/off
//! capabilities so tracking keys stay stable across restarts.

mod light;
mod plug;
mod switch;

pub use light::VirtualLight;
pub use plug::VirtualPlug;
pub use switch::VirtualSwitch;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Wrapper enum for the concrete virtual device types.
pub enum VirtualDevice {
    Light(VirtualLight),
    Plug(VirtualPlug),
    Switch(VirtualSwitch),
}

impl VirtualDevice {
    #[must_use]
    pub fn device_id(&self) -> &'static str {
        match self {
            Self::Light(_) => VirtualLight::DEVICE_ID,
            Self::Plug(_) => VirtualPlug::DEVICE_ID,
            Self::Switch(_) => VirtualSwitch::DEVICE_ID,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Light(_) => "Virtual Light",
            Self::Plug(_) => "Virtual Plug",
            Self::Switch(_) => "Virtual Switch",
        }
    }

    /// On/off capabilities exposed by the device.
    #[must_use]
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::Light(_) => VirtualLight::CAPABILITIES,
            Self::Plug(_) => VirtualPlug::CAPABILITIES,
            Self::Switch(_) => VirtualSwitch::CAPABILITIES,
        }
    }

    /// Whether the device reports value changes on its own.
    #[must_use]
    pub fn supports_push(&self) -> bool {
        !matches!(self, Self::Plug(_))
    }

    /// Current value of `capability`, or `None` if the device lacks it.
    #[must_use]
    pub fn read(&self, capability: &str) -> Option<bool> {
        match self {
            Self::Light(d) => d.read(capability),
            Self::Plug(d) => d.read(capability),
            Self::Switch(d) => d.read(capability),
        }
    }

    /// Set `capability` to `value`.
    ///
    /// Returns whether the value changed, or `None` if the device lacks the
    /// capability.
    pub fn write(&self, capability: &str, value: bool) -> Option<bool> {
        match self {
            Self::Light(d) => d.write(capability, value),
            Self::Plug(d) => d.write(capability, value),
            Self::Switch(d) => d.write(capability, value),
        }
    }
}

/// Swap the value behind `state`, returning whether it changed.
fn replace(state: &Mutex<bool>, value: bool) -> bool {
    let mut current = lock(state);
    let changed = *current != value;
    *current = value;
    changed
}

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
