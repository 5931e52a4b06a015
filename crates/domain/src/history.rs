//! History — the bounded, deduplicated event sequence of one tracking key.
//!
//! Invariants, re-established after every mutation:
//! - events are ordered by non-decreasing `timestamp_ms`;
//! - no two consecutive events share the same `value`;
//! - no event is older than [`RETENTION_MS`] relative to the last append or sweep;
//! - at most [`MAX_EVENTS`] events are kept (the most recent ones).

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::time::MILLIS_PER_DAY;

/// Eight days, so a full previous cycle is always present at replay time
/// even when the daily sweep runs late.
pub const RETENTION_MS: i64 = 8 * MILLIS_PER_DAY;

/// Hard cap on the number of events kept per key.
pub const MAX_EVENTS: usize = 10_000;

/// Upper bound on points accepted by a one-shot historical import.
pub const MAX_IMPORT_POINTS: usize = 50;

/// Result of [`History::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Same value as the most recent event; nothing changed.
    Duplicate,
    /// Older than the most recent event; rejected to keep the ordering.
    OutOfOrder,
}

/// Ordered transition history of one tracking key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    events: Vec<Event>,
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from arbitrary events, restoring ordering and
    /// dedup invariants. Retention is applied separately by [`trim`](Self::trim).
    #[must_use]
    pub fn from_events(mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.timestamp_ms);
        events.dedup_by(|next, prev| next.value == prev.value);
        Self { events }
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Value of the most recently recorded event.
    #[must_use]
    pub fn last_value(&self) -> Option<bool> {
        self.last().map(|e| e.value)
    }

    /// Append a live observation, then enforce retention and the size cap
    /// relative to `now_ms`.
    pub fn append(&mut self, event: Event, now_ms: i64) -> AppendOutcome {
        if let Some(last) = self.events.last() {
            if last.value == event.value {
                return AppendOutcome::Duplicate;
            }
            if event.timestamp_ms < last.timestamp_ms {
                return AppendOutcome::OutOfOrder;
            }
        }
        self.events.push(event);
        self.trim(now_ms);
        AppendOutcome::Appended
    }

    /// Drop events older than the retention window and truncate to the most
    /// recent [`MAX_EVENTS`]. Returns the number of events removed.
    pub fn trim(&mut self, now_ms: i64) -> usize {
        let before = self.events.len();
        let cutoff = now_ms - RETENTION_MS;
        let expired = self.events.partition_point(|e| e.timestamp_ms < cutoff);
        if expired > 0 {
            self.events.drain(..expired);
        }
        if self.events.len() > MAX_EVENTS {
            let excess = self.events.len() - MAX_EVENTS;
            self.events.drain(..excess);
        }
        before - self.events.len()
    }

    /// Merge externally sourced events (e.g. an import) with the current
    /// history under the same rules as live recording.
    ///
    /// Returns how many events the history grew by (zero if the merge only
    /// replaced or dropped entries).
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Event>, now_ms: i64) -> usize {
        let before = self.events.len();
        let mut events = std::mem::take(&mut self.events);
        events.extend(incoming);
        *self = Self::from_events(events);
        self.trim(now_ms);
        self.events.len().saturating_sub(before)
    }

    /// The last event recorded at or before `target_ms`, i.e. the state the
    /// channel was in at that moment.
    ///
    /// Scans forward and stops at the first event past the target.
    #[must_use]
    pub fn state_at(&self, target_ms: i64) -> Option<&Event> {
        let mut found = None;
        for event in &self.events {
            if event.timestamp_ms > target_ms {
                break;
            }
            found = Some(event);
        }
        found
    }

    /// Serialize to the JSON blob persisted per key.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; only possible on a broken writer.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a persisted JSON blob, restoring ordering and dedup invariants.
    ///
    /// # Errors
    ///
    /// Returns the parse error when the blob is not a valid event list.
    pub fn decode(blob: &str) -> Result<Self, serde_json::Error> {
        let events: Vec<Event> = serde_json::from_str(blob)?;
        Ok(Self::from_events(events))
    }
}
