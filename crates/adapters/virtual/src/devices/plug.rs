//! Virtual plug — a single `onoff` capability that must be polled.

use std::sync::Mutex;

/// A simulated smart plug without change notifications.
#[derive(Default)]
pub struct VirtualPlug {
    state: Mutex<bool>,
}

impl VirtualPlug {
    pub const DEVICE_ID: &'static str = "virtual_plug";
    pub const CAPABILITIES: &'static [&'static str] = &["onoff"];

    #[must_use]
    pub fn read(&self, capability: &str) -> Option<bool> {
        (capability == "onoff").then(|| *super::lock(&self.state))
    }

    pub fn write(&self, capability: &str, value: bool) -> Option<bool> {
        (capability == "onoff").then(|| super::replace(&self.state, value))
    }
}
