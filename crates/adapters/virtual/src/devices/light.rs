//! Virtual light — a single `onoff` capability with push notifications.

use std::sync::Mutex;

/// A simulated light that can be turned on and off.
#[derive(Default)]
pub struct VirtualLight {
    state: Mutex<bool>,
}

impl VirtualLight {
    pub const DEVICE_ID: &'static str = "virtual_light";
    pub const CAPABILITIES: &'static [&'static str] = &["onoff"];

    #[must_use]
    pub fn read(&self, capability: &str) -> Option<bool> {
        (capability == "onoff").then(|| *super::lock(&self.state))
    }

    pub fn write(&self, capability: &str, value: bool) -> Option<bool> {
        (capability == "onoff").then(|| super::replace(&self.state, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_off() {
        let light = VirtualLight::default();
        assert_eq!(light.read("onoff"), Some(false));
    }

    #[test]
    fn should_report_change_when_turned_on() {
        let light = VirtualLight::default();
        assert_eq!(light.write("onoff", true), Some(true));
        assert_eq!(light.write("onoff", true), Some(false));
        assert_eq!(light.read("onoff"), Some(true));
    }

    #[test]
    fn should_ignore_unknown_capability() {
        let light = VirtualLight::default();
        assert_eq!(light.read("dim"), None);
        assert_eq!(light.write("dim", true), None);
    }
}
