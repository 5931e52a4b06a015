//! Tracking subsystem — observes on/off capabilities of live devices.
//!
//! Each key goes through `Untracked → AttemptSubscribe → {Listening | Polling}
//! → Untracked`. Push notifications are preferred; a device that refuses the
//! subscription is polled instead. The mode is chosen once, when tracking
//! starts, and never switched afterwards.
//!
//! Background tasks (subscription forwarders, poll loops) never touch the
//! tracked table themselves: they only post observations to the scheduler
//! queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt as _;

use mimic_domain::device::DeviceDescriptor;
use mimic_domain::error::TrackingError;
use mimic_domain::tracking_key::TrackingKey;

use crate::ports::{CapabilityIo, SubscriptionId, ValueStream};
use crate::scheduler::Command;

/// Default interval between two reads of a device that cannot push changes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How a tracked key is being observed.
#[derive(Debug)]
pub enum TrackingMode {
    /// Push notifications, forwarded to the scheduler by a background task.
    Listener {
        subscription: SubscriptionId,
        forwarder: AbortHandle,
    },
    /// Periodic reads compared against the last observed value.
    Poll {
        task: AbortHandle,
        interval: Duration,
    },
}

impl TrackingMode {
    #[must_use]
    pub fn kind(&self) -> TrackingKind {
        match self {
            Self::Listener { .. } => TrackingKind::Listener,
            Self::Poll { .. } => TrackingKind::Poll,
        }
    }
}

/// Observation mode without its handles, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingKind {
    Listener,
    Poll,
}

impl std::fmt::Display for TrackingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listener => f.write_str("listener"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

/// A channel currently under observation.
#[derive(Debug)]
pub struct TrackedDevice {
    pub descriptor: DeviceDescriptor,
    pub last_observed_value: Option<bool>,
    pub mode: TrackingMode,
}

impl TrackedDevice {
    #[must_use]
    pub fn key(&self) -> &TrackingKey {
        &self.descriptor.key
    }
}

/// Result of a successful [`Tracker::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The key was tracked already; nothing changed.
    AlreadyTracked,
    Started(TrackingKind),
}

/// Table of tracked devices and the tasks observing them.
pub struct Tracker<D> {
    io: Arc<D>,
    poll_interval: Duration,
    devices: HashMap<TrackingKey, TrackedDevice>,
    commands: mpsc::WeakSender<Command>,
}

impl<D: CapabilityIo + 'static> Tracker<D> {
    pub(crate) fn new(
        io: Arc<D>,
        poll_interval: Duration,
        commands: mpsc::WeakSender<Command>,
    ) -> Self {
        Self {
            io,
            poll_interval,
            devices: HashMap::new(),
            commands,
        }
    }

    /// Start observing `descriptor.key`.
    ///
    /// Subscription failures are logged and trigger the polling fallback.
    ///
    /// # Errors
    ///
    /// Returns [`TrackingError`] when the subscription fails *and* the
    /// initial read that sets up polling fails too.
    pub async fn start(
        &mut self,
        descriptor: DeviceDescriptor,
    ) -> Result<StartOutcome, TrackingError> {
        let key = descriptor.key.clone();
        if self.devices.contains_key(&key) {
            return Ok(StartOutcome::AlreadyTracked);
        }

        let (mode, last_observed_value) = match self.io.subscribe(&key).await {
            Ok(subscription) => {
                let initial = match self.io.read_value(&key).await {
                    Ok(value) => Some(value),
                    Err(err) => {
                        tracing::debug!(
                            %err,
                            %key,
                            "initial read failed, value unknown until first change"
                        );
                        None
                    }
                };
                let forwarder = self.spawn_forwarder(&key, subscription.updates);
                let mode = TrackingMode::Listener {
                    subscription: subscription.id,
                    forwarder,
                };
                (mode, initial)
            }
            Err(subscribe) => {
                tracing::info!(
                    err = %subscribe,
                    %key,
                    "push notifications unavailable, falling back to polling"
                );
                let initial = match self.io.read_value(&key).await {
                    Ok(value) => value,
                    Err(poll) => {
                        return Err(TrackingError {
                            key,
                            subscribe,
                            poll,
                        });
                    }
                };
                let task = self.spawn_poller(&key);
                let mode = TrackingMode::Poll {
                    task,
                    interval: self.poll_interval,
                };
                (mode, Some(initial))
            }
        };

        let kind = mode.kind();
        tracing::info!(%key, name = %descriptor.display_name, mode = %kind, "tracking started");
        self.devices.insert(
            key,
            TrackedDevice {
                descriptor,
                last_observed_value,
                mode,
            },
        );
        Ok(StartOutcome::Started(kind))
    }

    /// Stop observing `key`. Returns `false` if it was not tracked.
    pub async fn stop(&mut self, key: &TrackingKey) -> bool {
        let Some(device) = self.devices.remove(key) else {
            return false;
        };
        match device.mode {
            TrackingMode::Listener {
                subscription,
                forwarder,
            } => {
                forwarder.abort();
                if let Err(err) = self.io.unsubscribe(subscription).await {
                    tracing::warn!(%err, %key, "failed to unsubscribe");
                }
            }
            TrackingMode::Poll { task, .. } => task.abort(),
        }
        tracing::info!(%key, "tracking stopped");
        true
    }

    /// Stop every tracked key.
    pub async fn stop_all(&mut self) {
        let keys: Vec<TrackingKey> = self.devices.keys().cloned().collect();
        for key in keys {
            self.stop(&key).await;
        }
    }

    /// Register an observed value for `key`.
    ///
    /// Returns `true` when the value should be recorded: the key is tracked
    /// and, for polled devices, the value differs from the previous read.
    /// Observations for keys that were untracked meanwhile are dropped.
    pub fn observe(&mut self, key: &TrackingKey, value: bool) -> bool {
        let Some(device) = self.devices.get_mut(key) else {
            tracing::debug!(%key, "dropping observation for untracked key");
            return false;
        };
        let previous = device.last_observed_value.replace(value);
        match device.mode {
            TrackingMode::Listener { .. } => true,
            TrackingMode::Poll { .. } => previous != Some(value),
        }
    }

    #[must_use]
    pub fn is_tracked(&self, key: &TrackingKey) -> bool {
        self.devices.contains_key(key)
    }

    #[must_use]
    pub fn get(&self, key: &TrackingKey) -> Option<&TrackedDevice> {
        self.devices.get(key)
    }

    /// Tracked keys in a stable order.
    #[must_use]
    pub fn keys(&self) -> Vec<TrackingKey> {
        let mut keys: Vec<TrackingKey> = self.devices.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn spawn_forwarder(&self, key: &TrackingKey, mut updates: ValueStream) -> AbortHandle {
        let key = key.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            while let Some(value) = updates.next().await {
                let Some(tx) = commands.upgrade() else {
                    return;
                };
                let observed = Command::Observed {
                    key: key.clone(),
                    value,
                };
                if tx.send(observed).await.is_err() {
                    return;
                }
            }
            tracing::warn!(%key, "subscription stream ended");
        })
        .abort_handle()
    }

    fn spawn_poller(&self, key: &TrackingKey) -> AbortHandle {
        let key = key.clone();
        let io = Arc::clone(&self.io);
        let commands = self.commands.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match io.read_value(&key).await {
                    Ok(value) => {
                        let Some(tx) = commands.upgrade() else {
                            return;
                        };
                        let observed = Command::Observed {
                            key: key.clone(),
                            value,
                        };
                        if tx.send(observed).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%err, %key, "poll cycle failed, retrying next interval");
                    }
                }
            }
        })
        .abort_handle()
    }
}
