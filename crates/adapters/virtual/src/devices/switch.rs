//! Virtual switch — two independent channels with push notifications.

use std::sync::Mutex;

/// A simulated double switch; each channel is tracked separately.
#[derive(Default)]
pub struct VirtualSwitch {
    channels: [Mutex<bool>; 2],
}

impl VirtualSwitch {
    pub const DEVICE_ID: &'static str = "virtual_switch";
    pub const CAPABILITIES: &'static [&'static str] = &["channel_1", "channel_2"];

    fn channel(&self, capability: &str) -> Option<&Mutex<bool>> {
        let index = Self::CAPABILITIES.iter().position(|c| *c == capability)?;
        self.channels.get(index)
    }

    #[must_use]
    pub fn read(&self, capability: &str) -> Option<bool> {
        self.channel(capability).map(|state| *super::lock(state))
    }

    pub fn write(&self, capability: &str, value: bool) -> Option<bool> {
        self.channel(capability)
            .map(|state| super::replace(state, value))
    }
}
