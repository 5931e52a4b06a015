//! Schedule engine — one live replay timer per tracking key.
//!
//! Arming a key always cancels its previous timer first, so at most one timer
//! per key is ever outstanding. A timer task only sleeps and then posts
//! [`Command::TimerFired`] to the scheduler queue; the scheduler performs the
//! replay and rearms from the history as it is *at fire time*.
//!
//! Every armed timer carries a generation number. A fire message whose
//! generation no longer matches the armed timer (because the key was
//! cancelled or rearmed after the message was queued) is discarded.

use std::collections::HashMap;

use chrono::Duration as ChronoDuration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use mimic_domain::error::DeviceError;
use mimic_domain::event::Event;
use mimic_domain::history::History;
use mimic_domain::schedule::{NextEvent, ReplayMode, calculate_next_event};
use mimic_domain::time::Timestamp;
use mimic_domain::tracking_key::TrackingKey;

use crate::ports::CapabilityIo;
use crate::scheduler::Command;

struct ArmedTimer {
    generation: u64,
    next: NextEvent,
    due: Timestamp,
    handle: AbortHandle,
}

/// A pending replay, as reported by [`ScheduleEngine::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReplay {
    pub key: TrackingKey,
    pub event: Event,
    pub delay_minutes: u32,
    pub due: Timestamp,
}

/// What happened when a timer fired.
#[derive(Debug)]
pub enum ReplayOutcome {
    /// The device was switched to the historical value.
    Written { value: bool },
    /// The device already had the historical value; nothing was written.
    Unchanged { value: bool },
    Failed(DeviceError),
}

/// Table of armed replay timers.
pub struct ScheduleEngine {
    timers: HashMap<TrackingKey, ArmedTimer>,
    next_generation: u64,
    commands: mpsc::WeakSender<Command>,
}

impl ScheduleEngine {
    pub(crate) fn new(commands: mpsc::WeakSender<Command>) -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            commands,
        }
    }

    /// Cancel any timer for `key`, then arm a new one for the next event of
    /// `history`. Returns `None` (and leaves the key unarmed) when the history
    /// yields no schedule.
    pub fn arm(
        &mut self,
        key: &TrackingKey,
        history: &History,
        mode: ReplayMode,
        now: Timestamp,
    ) -> Option<NextEvent> {
        self.cancel(key);
        let next = calculate_next_event(history, mode, now)?;

        self.next_generation += 1;
        let generation = self.next_generation;
        let delay = next.delay();
        let commands = self.commands.clone();
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx
                    .send(Command::TimerFired {
                        key: fired_key,
                        generation,
                    })
                    .await;
            }
        })
        .abort_handle();

        let due = now + ChronoDuration::minutes(i64::from(next.delay_minutes));
        tracing::debug!(
            %key,
            value = next.event.value,
            delay_minutes = next.delay_minutes,
            %due,
            "replay armed"
        );
        self.timers.insert(
            key.clone(),
            ArmedTimer {
                generation,
                next,
                due,
                handle,
            },
        );
        Some(next)
    }

    /// Cancel the timer of `key`. Returns `false` if none was armed.
    pub fn cancel(&mut self, key: &TrackingKey) -> bool {
        match self.timers.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer and clear the table. Returns how many were armed.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        count
    }

    /// Claim the timer of `key` that fired with `generation`.
    ///
    /// Returns the event it was armed for and removes the entry, or `None`
    /// when the fire is stale.
    pub fn take_fired(&mut self, key: &TrackingKey, generation: u64) -> Option<NextEvent> {
        match self.timers.get(key) {
            Some(timer) if timer.generation == generation => {
                self.timers.remove(key).map(|timer| timer.next)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_armed(&self, key: &TrackingKey) -> bool {
        self.timers.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Pending replays, soonest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ScheduledReplay> {
        let mut replays: Vec<ScheduledReplay> = self
            .timers
            .iter()
            .map(|(key, timer)| ScheduledReplay {
                key: key.clone(),
                event: timer.next.event,
                delay_minutes: timer.next.delay_minutes,
                due: timer.due,
            })
            .collect();
        replays.sort_by(|a, b| a.due.cmp(&b.due).then_with(|| a.key.cmp(&b.key)));
        replays
    }
}

/// Bring the device behind `key` to `event.value`, writing only if the live
/// value differs.
pub async fn replay<D: CapabilityIo>(io: &D, key: &TrackingKey, event: &Event) -> ReplayOutcome {
    let live = match io.read_value(key).await {
        Ok(value) => value,
        Err(err) => return ReplayOutcome::Failed(err),
    };
    if live == event.value {
        return ReplayOutcome::Unchanged { value: live };
    }
    match io.write_value(key, event.value).await {
        Ok(()) => ReplayOutcome::Written { value: event.value },
        Err(err) => ReplayOutcome::Failed(err),
    }
}
