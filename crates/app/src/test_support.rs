//! In-memory port implementations shared by the unit tests of this crate.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::DateTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use mimic_domain::error::{DeviceError, MimicError};
use mimic_domain::time::Timestamp;
use mimic_domain::tracking_key::TrackingKey;

use crate::ports::{CapabilityIo, Clock, KeyValueStore, Subscription, SubscriptionId};

pub(crate) fn key(device: &str) -> TrackingKey {
    TrackingKey::new(device, "onoff").unwrap()
}

pub(crate) fn ts(s: &str) -> Timestamp {
    DateTime::parse_from_rfc3339(s).unwrap()
}

// ── Key-value store ────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct InMemoryKeyValueStore {
    store: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<String>>,
}

impl InMemoryKeyValueStore {
    pub(crate) fn with(entries: &[(&str, &str)]) -> Self {
        let store = entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self {
            store: Mutex::new(store),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn raw(&self, key: &str) -> Option<String> {
        self.store.lock().unwrap().get(key).cloned()
    }

    /// Keys written through `set`, in order.
    pub(crate) fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MimicError> {
        Ok(self.store.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), MimicError> {
        self.writes.lock().unwrap().push(key.to_string());
        self.store.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn unset(&self, key: &str) -> Result<(), MimicError> {
        self.store.lock().unwrap().remove(key);
        Ok(())
    }
}

// ── Devices ────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeState {
    values: HashMap<TrackingKey, bool>,
    push_capable: HashSet<TrackingKey>,
    unreachable: HashSet<TrackingKey>,
    subscribers: HashMap<TrackingKey, Vec<(SubscriptionId, mpsc::UnboundedSender<bool>)>>,
    unsubscribed: Vec<SubscriptionId>,
    writes: Vec<(TrackingKey, bool)>,
    next_subscription: u64,
}

impl FakeState {
    fn notify(&mut self, key: &TrackingKey, value: bool) {
        if let Some(subs) = self.subscribers.get_mut(key) {
            subs.retain(|(_, tx)| tx.send(value).is_ok());
        }
    }
}

/// Scriptable devices: push-capable or poll-only, optionally unreachable.
#[derive(Default)]
pub(crate) struct FakeDevices {
    state: Mutex<FakeState>,
}

impl FakeDevices {
    pub(crate) fn add_push(&self, key: &TrackingKey, value: bool) {
        let mut state = self.state.lock().unwrap();
        state.values.insert(key.clone(), value);
        state.push_capable.insert(key.clone());
    }

    pub(crate) fn add_poll(&self, key: &TrackingKey, value: bool) {
        self.state.lock().unwrap().values.insert(key.clone(), value);
    }

    pub(crate) fn set_unreachable(&self, key: &TrackingKey, unreachable: bool) {
        let mut state = self.state.lock().unwrap();
        if unreachable {
            state.unreachable.insert(key.clone());
        } else {
            state.unreachable.remove(key);
        }
    }

    /// Someone flips the switch by hand.
    pub(crate) fn flip(&self, key: &TrackingKey, value: bool) {
        let mut state = self.state.lock().unwrap();
        state.values.insert(key.clone(), value);
        state.notify(key, value);
    }

    pub(crate) fn value(&self, key: &TrackingKey) -> Option<bool> {
        self.state.lock().unwrap().values.get(key).copied()
    }

    pub(crate) fn writes(&self) -> Vec<(TrackingKey, bool)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub(crate) fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.state.lock().unwrap().unsubscribed.clone()
    }

    fn check_reachable(state: &FakeState, key: &TrackingKey) -> Result<(), DeviceError> {
        if state.unreachable.contains(key) {
            return Err(DeviceError::Unreachable(key.device_id().to_string()));
        }
        if !state.values.contains_key(key) {
            return Err(DeviceError::UnknownDevice(key.device_id().to_string()));
        }
        Ok(())
    }
}

impl CapabilityIo for FakeDevices {
    async fn read_value(&self, key: &TrackingKey) -> Result<bool, DeviceError> {
        let state = self.state.lock().unwrap();
        Self::check_reachable(&state, key)?;
        Ok(state.values[key])
    }

    async fn write_value(&self, key: &TrackingKey, value: bool) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        Self::check_reachable(&state, key)?;
        state.values.insert(key.clone(), value);
        state.writes.push((key.clone(), value));
        state.notify(key, value);
        Ok(())
    }

    async fn subscribe(&self, key: &TrackingKey) -> Result<Subscription, DeviceError> {
        let mut state = self.state.lock().unwrap();
        Self::check_reachable(&state, key)?;
        if !state.push_capable.contains(key) {
            return Err(DeviceError::SubscribeUnsupported(key.clone()));
        }
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.entry(key.clone()).or_default().push((id, tx));
        Ok(Subscription {
            id,
            updates: Box::pin(UnboundedReceiverStream::new(rx)),
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        for subs in state.subscribers.values_mut() {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
        state.unsubscribed.push(id);
        Ok(())
    }
}

// ── Clock ──────────────────────────────────────────────────────────

/// Wall clock that advances with tokio's (paused) test clock.
pub(crate) struct PausedClock {
    base: Timestamp,
    start: tokio::time::Instant,
}

impl PausedClock {
    pub(crate) fn starting_at(base: Timestamp) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Timestamp {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap();
        self.base + elapsed
    }
}
