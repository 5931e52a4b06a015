//! Scheduler — the single task that owns all replay state.
//!
//! Push notifications, poll results, timer fires, the daily sweep and every
//! command from a [`SchedulerHandle`] arrive as [`Command`] messages on one
//! bounded queue. The scheduler consumes them one at a time, so the tracked
//! table, the history table and the schedule table are never shared.
//!
//! Background tasks only hold weak senders: once the last handle is dropped
//! the queue closes and the scheduler tears everything down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use mimic_domain::device::DeviceDescriptor;
use mimic_domain::error::{MimicError, TrackingError};
use mimic_domain::event::Event;
use mimic_domain::history::AppendOutcome;
use mimic_domain::schedule::ReplayMode;
use mimic_domain::tracking_key::TrackingKey;

use crate::history_store::{HistoryPoint, HistoryStore};
use crate::initial_sync::{self, SyncReport};
use crate::ports::{CapabilityIo, Clock, KeyValueStore};
use crate::schedule_engine::{self, ReplayOutcome, ScheduleEngine, ScheduledReplay};
use crate::tracking::{DEFAULT_POLL_INTERVAL, StartOutcome, Tracker, TrackingKind};

const TRACKED_DEVICES_KEY: &str = "tracked_devices";
const REPLAY_ENABLED_KEY: &str = "replay_enabled";
const TEST_MODE_KEY: &str = "test_mode";

/// Messages consumed by the scheduler task.
pub(crate) enum Command {
    Observed {
        key: TrackingKey,
        value: bool,
    },
    TimerFired {
        key: TrackingKey,
        generation: u64,
    },
    Sweep,
    StartTracking {
        descriptor: DeviceDescriptor,
        reply: oneshot::Sender<Result<StartOutcome, TrackingError>>,
    },
    StopTracking {
        key: TrackingKey,
        reply: oneshot::Sender<bool>,
    },
    RemoveDevice {
        key: TrackingKey,
        reply: oneshot::Sender<Result<bool, MimicError>>,
    },
    ClearHistory {
        key: TrackingKey,
        reply: oneshot::Sender<Result<(), MimicError>>,
    },
    SetReplayEnabled {
        enabled: bool,
        reply: oneshot::Sender<Option<SyncReport>>,
    },
    SetTestMode {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    Import {
        key: TrackingKey,
        points: Vec<HistoryPoint>,
        reply: oneshot::Sender<Result<usize, MimicError>>,
    },
    History {
        key: TrackingKey,
        reply: oneshot::Sender<Vec<Event>>,
    },
    Status {
        reply: oneshot::Sender<SchedulerStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Tunables of the scheduler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Interval between two reads of a device that cannot push changes.
    pub poll_interval: Duration,
    /// Interval between two retention sweeps over every history.
    pub sweep_interval: Duration,
    /// Capacity of the command queue.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            queue_capacity: 256,
        }
    }
}

/// One registered device as seen by [`SchedulerHandle::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub key: TrackingKey,
    pub display_name: String,
    /// `None` when the device is registered but tracking could not start.
    pub tracking: Option<TrackingKind>,
    pub last_observed_value: Option<bool>,
    pub events: usize,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub replay_enabled: bool,
    pub mode: ReplayMode,
    pub devices: Vec<DeviceStatus>,
    pub scheduled: Vec<ScheduledReplay>,
}

/// Cloneable entry point to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, MimicError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| MimicError::SchedulerStopped)?;
        response.await.map_err(|_| MimicError::SchedulerStopped)
    }

    /// Start observing a device and remember it across restarts.
    ///
    /// # Errors
    ///
    /// Returns [`MimicError::Tracking`] when neither push notifications nor
    /// polling could be set up.
    #[tracing::instrument(skip_all, fields(key = %descriptor.key))]
    pub async fn start_tracking(
        &self,
        descriptor: DeviceDescriptor,
    ) -> Result<StartOutcome, MimicError> {
        let outcome = self
            .request(|reply| Command::StartTracking { descriptor, reply })
            .await??;
        Ok(outcome)
    }

    /// Stop observing a device. Its history is kept.
    ///
    /// Returns `false` when the device was not registered.
    ///
    /// # Errors
    ///
    /// Returns [`MimicError::SchedulerStopped`] if the scheduler has exited.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn stop_tracking(&self, key: TrackingKey) -> Result<bool, MimicError> {
        self.request(|reply| Command::StopTracking { key, reply }).await
    }

    /// Stop observing a device and forget its history.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the history blob could not be removed.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn remove_device(&self, key: TrackingKey) -> Result<bool, MimicError> {
        self.request(|reply| Command::RemoveDevice { key, reply })
            .await?
    }

    /// Forget the history of a device and cancel its pending replay.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the history blob could not be removed.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn clear_history(&self, key: TrackingKey) -> Result<(), MimicError> {
        self.request(|reply| Command::ClearHistory { key, reply })
            .await?
    }

    /// Arm or disarm replay.
    ///
    /// Arming runs the initial state sync and returns its report; any other
    /// call returns `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MimicError::SchedulerStopped`] if the scheduler has exited.
    #[tracing::instrument(skip(self))]
    pub async fn set_replay_enabled(
        &self,
        enabled: bool,
    ) -> Result<Option<SyncReport>, MimicError> {
        self.request(|reply| Command::SetReplayEnabled { enabled, reply })
            .await
    }

    /// Switch between the weekly cycle and the hourly test cycle.
    ///
    /// # Errors
    ///
    /// Returns [`MimicError::SchedulerStopped`] if the scheduler has exited.
    #[tracing::instrument(skip(self))]
    pub async fn set_test_mode(&self, enabled: bool) -> Result<(), MimicError> {
        self.request(|reply| Command::SetTestMode { enabled, reply })
            .await
    }

    /// Seed the history of a device with externally sourced points.
    ///
    /// Returns how many events the history grew by.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the merged history could not be written.
    #[tracing::instrument(skip_all, fields(key = %key, points = points.len()))]
    pub async fn import_history(
        &self,
        key: TrackingKey,
        points: Vec<HistoryPoint>,
    ) -> Result<usize, MimicError> {
        self.request(|reply| Command::Import { key, points, reply })
            .await?
    }

    /// Recorded events of a device, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`MimicError::SchedulerStopped`] if the scheduler has exited.
    pub async fn history(&self, key: TrackingKey) -> Result<Vec<Event>, MimicError> {
        self.request(|reply| Command::History { key, reply }).await
    }

    /// # Errors
    ///
    /// Returns [`MimicError::SchedulerStopped`] if the scheduler has exited.
    pub async fn status(&self) -> Result<SchedulerStatus, MimicError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Stop tracking, cancel every timer and end the scheduler task.
    ///
    /// # Errors
    ///
    /// Returns [`MimicError::SchedulerStopped`] if the scheduler had already
    /// exited.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), MimicError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// State owned by the scheduler task.
pub struct Scheduler<D, S, C> {
    io: Arc<D>,
    clock: C,
    tracker: Tracker<D>,
    histories: HistoryStore<S>,
    schedule: ScheduleEngine,
    registered: Vec<DeviceDescriptor>,
    replay_enabled: bool,
    mode: ReplayMode,
    sweeper: AbortHandle,
}

impl<D, S, C> Scheduler<D, S, C>
where
    D: CapabilityIo + 'static,
    S: KeyValueStore + 'static,
    C: Clock + 'static,
{
    /// Restore persisted state, resume tracking and spawn the scheduler task.
    ///
    /// When replay was armed before the restart, the initial state sync runs
    /// and every key is armed before this returns.
    pub async fn start(
        io: Arc<D>,
        store: S,
        clock: C,
        config: SchedulerConfig,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let weak = tx.downgrade();

        let replay_enabled = read_json::<bool, _>(&store, REPLAY_ENABLED_KEY)
            .await
            .unwrap_or(false);
        let mode = ReplayMode::from_test_mode(
            read_json::<bool, _>(&store, TEST_MODE_KEY)
                .await
                .unwrap_or(false),
        );
        let registered: Vec<DeviceDescriptor> = read_json(&store, TRACKED_DEVICES_KEY)
            .await
            .unwrap_or_default();

        let mut scheduler = Self {
            tracker: Tracker::new(Arc::clone(&io), config.poll_interval, weak.clone()),
            io,
            clock,
            histories: HistoryStore::new(store),
            schedule: ScheduleEngine::new(weak.clone()),
            registered,
            replay_enabled,
            mode,
            sweeper: spawn_sweeper(weak, config.sweep_interval),
        };
        scheduler.restore().await;

        let task = tokio::spawn(scheduler.run(rx));
        (SchedulerHandle { commands: tx }, task)
    }

    async fn restore(&mut self) {
        let registered = self.registered.clone();
        for descriptor in registered {
            let key = descriptor.key.clone();
            let events = self.histories.load(&key).await;
            tracing::debug!(%key, events, "history loaded");
            if let Err(err) = self.tracker.start(descriptor).await {
                tracing::error!(%err, %key, "failed to resume tracking");
            }
        }
        tracing::info!(
            devices = self.registered.len(),
            tracked = self.tracker.len(),
            replay_enabled = self.replay_enabled,
            test_mode = self.mode.is_test(),
            "scheduler state restored"
        );
        if self.replay_enabled {
            self.initial_sync().await;
            self.arm_all();
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            if let Command::Shutdown { reply } = command {
                self.teardown().await;
                let _ = reply.send(());
                return;
            }
            self.handle(command).await;
        }
        self.teardown().await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Observed { key, value } => self.on_observed(&key, value).await,
            Command::TimerFired { key, generation } => {
                self.on_timer_fired(&key, generation).await;
            }
            Command::Sweep => {
                let report = self.histories.sweep(self.now_ms()).await;
                tracing::info!(
                    keys_trimmed = report.keys_trimmed,
                    events_removed = report.events_removed,
                    persist_failures = report.persist_failures,
                    "history sweep complete"
                );
            }
            Command::StartTracking { descriptor, reply } => {
                let _ = reply.send(self.start_tracking(descriptor).await);
            }
            Command::StopTracking { key, reply } => {
                let _ = reply.send(self.stop_tracking(&key).await);
            }
            Command::RemoveDevice { key, reply } => {
                let stopped = self.stop_tracking(&key).await;
                let result = self.histories.clear(&key).await.map(|()| stopped);
                let _ = reply.send(result);
            }
            Command::ClearHistory { key, reply } => {
                self.schedule.cancel(&key);
                let _ = reply.send(self.histories.clear(&key).await);
            }
            Command::SetReplayEnabled { enabled, reply } => {
                let _ = reply.send(self.set_replay_enabled(enabled).await);
            }
            Command::SetTestMode { enabled, reply } => {
                self.set_test_mode(enabled).await;
                let _ = reply.send(());
            }
            Command::Import { key, points, reply } => {
                let now = self.clock.now();
                let result = self.histories.import(&key, points, now).await;
                if let Ok(added) = result {
                    tracing::info!(%key, added, "history imported");
                    self.rearm_if_tracked(&key);
                }
                let _ = reply.send(result);
            }
            Command::History { key, reply } => {
                let _ = reply.send(self.histories.events(&key).to_vec());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn on_observed(&mut self, key: &TrackingKey, value: bool) {
        if !self.tracker.observe(key, value) {
            return;
        }
        let now = self.clock.now();
        match self
            .histories
            .append_event(key, Event::at(now, value), now.timestamp_millis())
            .await
        {
            Ok(AppendOutcome::Appended) => {
                tracing::debug!(%key, value, "transition recorded");
                self.arm_if_idle(key);
            }
            Ok(AppendOutcome::Duplicate) => {}
            Ok(AppendOutcome::OutOfOrder) => {
                tracing::warn!(%key, value, %now, "observation older than last event, dropped");
            }
            Err(err) => {
                tracing::warn!(%err, %key, "failed to persist history, kept in memory");
                self.arm_if_idle(key);
            }
        }
    }

    async fn on_timer_fired(&mut self, key: &TrackingKey, generation: u64) {
        let Some(next) = self.schedule.take_fired(key, generation) else {
            tracing::debug!(%key, generation, "stale timer fire discarded");
            return;
        };
        if !self.replay_enabled || !self.tracker.is_tracked(key) {
            return;
        }
        match schedule_engine::replay(self.io.as_ref(), key, &next.event).await {
            ReplayOutcome::Written { value } => tracing::info!(%key, value, "replayed"),
            ReplayOutcome::Unchanged { value } => {
                tracing::debug!(%key, value, "replay skipped, device already in state");
            }
            ReplayOutcome::Failed(err) => tracing::warn!(%err, %key, "replay failed"),
        }
        self.arm(key);
    }

    async fn start_tracking(
        &mut self,
        descriptor: DeviceDescriptor,
    ) -> Result<StartOutcome, TrackingError> {
        let key = descriptor.key.clone();
        if self.histories.get(&key).is_none() {
            self.histories.load(&key).await;
        }
        let outcome = self.tracker.start(descriptor.clone()).await?;
        if !self.registered.iter().any(|d| d.key == key) {
            self.registered.push(descriptor);
            self.persist_registered().await;
        }
        if outcome != StartOutcome::AlreadyTracked && self.replay_enabled {
            self.arm(&key);
        }
        Ok(outcome)
    }

    async fn stop_tracking(&mut self, key: &TrackingKey) -> bool {
        let stopped = self.tracker.stop(key).await;
        self.schedule.cancel(key);
        let before = self.registered.len();
        self.registered.retain(|d| &d.key != key);
        let unregistered = self.registered.len() != before;
        if unregistered {
            self.persist_registered().await;
        }
        stopped || unregistered
    }

    async fn set_replay_enabled(&mut self, enabled: bool) -> Option<SyncReport> {
        if enabled == self.replay_enabled {
            return None;
        }
        self.replay_enabled = enabled;
        self.persist_flag(REPLAY_ENABLED_KEY, enabled).await;
        if enabled {
            let report = self.initial_sync().await;
            self.arm_all();
            tracing::info!(armed = self.schedule.len(), "replay enabled");
            Some(report)
        } else {
            let cancelled = self.schedule.cancel_all();
            tracing::info!(cancelled, "replay disabled");
            None
        }
    }

    async fn set_test_mode(&mut self, enabled: bool) {
        let mode = ReplayMode::from_test_mode(enabled);
        if mode == self.mode {
            return;
        }
        self.mode = mode;
        self.persist_flag(TEST_MODE_KEY, enabled).await;
        tracing::info!(
            test_mode = enabled,
            period_minutes = mode.period_minutes(),
            "replay mode changed"
        );
        if self.replay_enabled {
            self.schedule.cancel_all();
            self.arm_all();
        }
    }

    async fn initial_sync(&self) -> SyncReport {
        let keys = self.tracker.keys();
        initial_sync::run(
            self.io.as_ref(),
            &self.histories,
            &keys,
            self.mode,
            self.clock.now(),
        )
        .await
    }

    fn arm(&mut self, key: &TrackingKey) {
        let Some(history) = self.histories.get(key) else {
            self.schedule.cancel(key);
            return;
        };
        if self.schedule.arm(key, history, self.mode, self.clock.now()).is_none() {
            tracing::debug!(%key, "nothing to replay");
        }
    }

    fn arm_if_idle(&mut self, key: &TrackingKey) {
        if self.replay_enabled && self.tracker.is_tracked(key) && !self.schedule.is_armed(key) {
            self.arm(key);
        }
    }

    /// Recompute the timer of `key` from its current history, even if one is
    /// already armed.
    fn rearm_if_tracked(&mut self, key: &TrackingKey) {
        if self.replay_enabled && self.tracker.is_tracked(key) {
            self.arm(key);
        }
    }

    fn arm_all(&mut self) {
        for key in self.tracker.keys() {
            self.arm(&key);
        }
    }

    fn status(&self) -> SchedulerStatus {
        let devices = self
            .registered
            .iter()
            .map(|descriptor| {
                let tracked = self.tracker.get(&descriptor.key);
                DeviceStatus {
                    key: descriptor.key.clone(),
                    display_name: descriptor.display_name.clone(),
                    tracking: tracked.map(|device| device.mode.kind()),
                    last_observed_value: tracked.and_then(|device| device.last_observed_value),
                    events: self.histories.events(&descriptor.key).len(),
                }
            })
            .collect();
        SchedulerStatus {
            replay_enabled: self.replay_enabled,
            mode: self.mode,
            devices,
            scheduled: self.schedule.snapshot(),
        }
    }

    async fn persist_registered(&self) {
        match serde_json::to_string(&self.registered) {
            Ok(blob) => {
                if let Err(err) = self.histories.backend().set(TRACKED_DEVICES_KEY, blob).await {
                    tracing::warn!(%err, "failed to persist tracked devices");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to encode tracked devices"),
        }
    }

    async fn persist_flag(&self, key: &str, value: bool) {
        if let Err(err) = self.histories.backend().set(key, value.to_string()).await {
            tracing::warn!(%err, key, "failed to persist flag");
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    async fn teardown(&mut self) {
        self.sweeper.abort();
        let cancelled = self.schedule.cancel_all();
        self.tracker.stop_all().await;
        tracing::info!(cancelled, "scheduler stopped");
    }
}

async fn read_json<T, S>(store: &S, key: &str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
    S: KeyValueStore,
{
    match store.get(key).await {
        Ok(Some(blob)) => match serde_json::from_str(&blob) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(%err, key, "stored value is unparsable, using default");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(%err, key, "failed to read stored value, using default");
            None
        }
    }
}

fn spawn_sweeper(commands: mpsc::WeakSender<Command>, interval: Duration) -> AbortHandle {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(tx) = commands.upgrade() else {
                return;
            };
            if tx.send(Command::Sweep).await.is_err() {
                return;
            }
        }
    })
    .abort_handle()
}
