//! History store — per-key transition histories with per-key persistence.
//!
//! The in-memory table is the source of truth while the scheduler runs; each
//! mutation writes back only the blob of the key it touched. The daily sweep
//! re-applies retention to keys that have been idle.

use std::collections::HashMap;

use chrono::DateTime;

use mimic_domain::error::MimicError;
use mimic_domain::event::Event;
use mimic_domain::history::{AppendOutcome, History, MAX_IMPORT_POINTS};
use mimic_domain::time::Timestamp;
use mimic_domain::tracking_key::TrackingKey;

use crate::ports::KeyValueStore;

/// One externally sourced observation fed to [`HistoryStore::import`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPoint {
    pub timestamp_ms: i64,
    pub value: bool,
}

/// Outcome of a retention sweep across all keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub keys_trimmed: usize,
    pub events_removed: usize,
    pub persist_failures: usize,
}

/// Owner of every key's [`History`].
pub struct HistoryStore<S> {
    store: S,
    histories: HashMap<TrackingKey, History>,
}

impl<S: KeyValueStore> HistoryStore<S> {
    /// Create an empty store persisting through `store`.
    pub fn new(store: S) -> Self {
        Self {
            store,
            histories: HashMap::new(),
        }
    }

    /// The underlying key-value store, shared with the scheduler for flags.
    pub fn backend(&self) -> &S {
        &self.store
    }

    /// Load the persisted history of `key` into memory.
    ///
    /// A missing blob yields an empty history. An unreadable or unparsable
    /// blob is logged and also treated as empty, so one corrupt key never
    /// prevents the others from loading. Returns the number of loaded events.
    pub async fn load(&mut self, key: &TrackingKey) -> usize {
        let history = match self.store.get(&key.history_storage_key()).await {
            Ok(Some(blob)) => match History::decode(&blob) {
                Ok(history) => history,
                Err(err) => {
                    tracing::warn!(%err, %key, "stored history is unparsable, starting empty");
                    History::new()
                }
            },
            Ok(None) => History::new(),
            Err(err) => {
                tracing::warn!(%err, %key, "failed to read stored history, starting empty");
                History::new()
            }
        };
        let len = history.len();
        self.histories.insert(key.clone(), history);
        len
    }

    #[must_use]
    pub fn get(&self, key: &TrackingKey) -> Option<&History> {
        self.histories.get(key)
    }

    /// Events of `key`, oldest first. Empty when the key has no history.
    #[must_use]
    pub fn events(&self, key: &TrackingKey) -> &[Event] {
        self.histories
            .get(key)
            .map(History::events)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_history(&self, key: &TrackingKey) -> bool {
        self.histories.get(key).is_some_and(|h| !h.is_empty())
    }

    #[must_use]
    pub fn last_value(&self, key: &TrackingKey) -> Option<bool> {
        self.histories.get(key).and_then(History::last_value)
    }

    /// Append an observed transition and persist the key if it changed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the blob could not be written. The event
    /// stays recorded in memory and is persisted with the next write.
    pub async fn append_event(
        &mut self,
        key: &TrackingKey,
        event: Event,
        now_ms: i64,
    ) -> Result<AppendOutcome, MimicError> {
        let history = self.histories.entry(key.clone()).or_default();
        let outcome = history.append(event, now_ms);
        if outcome == AppendOutcome::Appended {
            self.persist(key).await?;
        }
        Ok(outcome)
    }

    /// Forget the history of `key`, in memory and in storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the blob could not be removed.
    pub async fn clear(&mut self, key: &TrackingKey) -> Result<(), MimicError> {
        self.histories.remove(key);
        self.store.unset(&key.history_storage_key()).await
    }

    /// Re-apply retention to every key, persisting each key that shrank.
    pub async fn sweep(&mut self, now_ms: i64) -> SweepReport {
        let mut report = SweepReport::default();
        let mut trimmed = Vec::new();
        for (key, history) in &mut self.histories {
            let removed = history.trim(now_ms);
            if removed > 0 {
                report.events_removed += removed;
                trimmed.push(key.clone());
            }
        }
        report.keys_trimmed = trimmed.len();
        for key in trimmed {
            if let Err(err) = self.persist(&key).await {
                tracing::warn!(%err, %key, "failed to persist swept history");
                report.persist_failures += 1;
            }
        }
        report
    }

    /// Seed `key` with externally sourced points.
    ///
    /// Points dated after `now` are dropped. Of the rest, at most
    /// [`MAX_IMPORT_POINTS`] are taken (the most recent ones). Calendar
    /// fields are derived in the UTC offset of `now`. Returns how many events
    /// the history grew by.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the merged history could not be written.
    pub async fn import(
        &mut self,
        key: &TrackingKey,
        mut points: Vec<HistoryPoint>,
        now: Timestamp,
    ) -> Result<usize, MimicError> {
        let now_ms = now.timestamp_millis();
        let given = points.len();
        points.retain(|p| p.timestamp_ms <= now_ms);
        if points.len() < given {
            tracing::warn!(
                %key,
                dropped = given - points.len(),
                "import points dated in the future dropped"
            );
        }
        points.sort_by_key(|p| p.timestamp_ms);
        if points.len() > MAX_IMPORT_POINTS {
            tracing::debug!(
                %key,
                given = points.len(),
                kept = MAX_IMPORT_POINTS,
                "import truncated to most recent points"
            );
            points.drain(..points.len() - MAX_IMPORT_POINTS);
        }

        let offset = *now.offset();
        let events: Vec<Event> = points
            .into_iter()
            .filter_map(|p| {
                let at = DateTime::from_timestamp_millis(p.timestamp_ms)?.with_timezone(&offset);
                Some(Event::at(at, p.value))
            })
            .collect();

        let history = self.histories.entry(key.clone()).or_default();
        let added = history.merge(events, now_ms);
        self.persist(key).await?;
        Ok(added)
    }

    async fn persist(&self, key: &TrackingKey) -> Result<(), MimicError> {
        let Some(history) = self.histories.get(key) else {
            return Ok(());
        };
        let blob = history
            .encode()
            .map_err(|err| MimicError::Storage(Box::new(err)))?;
        self.store.set(&key.history_storage_key(), blob).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemoryKeyValueStore, key, ts};
    use chrono::Duration;
    use mimic_domain::history::RETENTION_MS;

    fn now() -> Timestamp {
        ts("2024-01-08T12:00:00+01:00")
    }

    #[tokio::test]
    async fn should_persist_only_the_touched_key_on_append() {
        let mut store = HistoryStore::new(InMemoryKeyValueStore::default());
        let lamp = key("lamp");
        let desk = key("desk");
        store.load(&lamp).await;
        store.load(&desk).await;

        store
            .append_event(&lamp, Event::at(now(), true), now().timestamp_millis())
            .await
            .unwrap();

        assert_eq!(store.backend().writes(), vec!["history:lamp/onoff".to_string()]);
        assert!(store.backend().raw("history:desk/onoff").is_none());
    }

    #[tokio::test]
    async fn should_not_write_when_value_repeats() {
        let mut store = HistoryStore::new(InMemoryKeyValueStore::default());
        let lamp = key("lamp");
        let ms = now().timestamp_millis();

        store.append_event(&lamp, Event::at(now(), true), ms).await.unwrap();
        let outcome = store
            .append_event(&lamp, Event::at(now() + Duration::minutes(1), true), ms)
            .await
            .unwrap();

        assert_eq!(outcome, AppendOutcome::Duplicate);
        assert_eq!(store.events(&lamp).len(), 1);
        assert_eq!(store.backend().writes().len(), 1);
    }

    #[tokio::test]
    async fn should_reload_identical_history_after_persisting() {
        let backend = std::sync::Arc::new(InMemoryKeyValueStore::default());
        let lamp = key("lamp");
        let ms = now().timestamp_millis();

        let mut first = HistoryStore::new(backend.clone());
        for (i, value) in [true, false, true, false].into_iter().enumerate() {
            let offset = Duration::minutes(i64::try_from(i).unwrap() * 37);
            let at = now() - Duration::hours(4) + offset;
            first.append_event(&lamp, Event::at(at, value), ms).await.unwrap();
        }

        let mut second = HistoryStore::new(backend);
        let loaded = second.load(&lamp).await;

        assert_eq!(loaded, 4);
        assert_eq!(second.events(&lamp), first.events(&lamp));
    }

    #[tokio::test]
    async fn should_treat_unparsable_blob_as_empty_history() {
        let backend = InMemoryKeyValueStore::with(&[("history:lamp/onoff", "not json")]);
        let mut store = HistoryStore::new(backend);

        let loaded = store.load(&key("lamp")).await;

        assert_eq!(loaded, 0);
        assert!(!store.has_history(&key("lamp")));
    }

    #[tokio::test]
    async fn should_treat_missing_blob_as_empty_history() {
        let mut store = HistoryStore::new(InMemoryKeyValueStore::default());
        assert_eq!(store.load(&key("lamp")).await, 0);
        assert!(store.get(&key("lamp")).is_some());
    }

    #[tokio::test]
    async fn should_remove_history_and_blob_on_clear() {
        let mut store = HistoryStore::new(InMemoryKeyValueStore::default());
        let lamp = key("lamp");
        store
            .append_event(&lamp, Event::at(now(), true), now().timestamp_millis())
            .await
            .unwrap();

        store.clear(&lamp).await.unwrap();

        assert!(store.events(&lamp).is_empty());
        assert!(store.backend().raw("history:lamp/onoff").is_none());
    }

    #[tokio::test]
    async fn should_trim_idle_keys_and_persist_each_on_sweep() {
        let mut store = HistoryStore::new(InMemoryKeyValueStore::default());
        let old = key("old");
        let fresh = key("fresh");
        let nine_days_ago = now() - Duration::days(9);
        store
            .append_event(&old, Event::at(nine_days_ago, true), nine_days_ago.timestamp_millis())
            .await
            .unwrap();
        store
            .append_event(&fresh, Event::at(now(), true), now().timestamp_millis())
            .await
            .unwrap();

        let report = store.sweep(now().timestamp_millis()).await;

        assert_eq!(report.keys_trimmed, 1);
        assert_eq!(report.events_removed, 1);
        assert!(store.events(&old).is_empty());
        assert_eq!(store.events(&fresh).len(), 1);
        assert_eq!(store.backend().raw("history:old/onoff").as_deref(), Some("[]"));
        let cutoff = now().timestamp_millis() - RETENTION_MS;
        assert!(store.events(&fresh).iter().all(|e| e.timestamp_ms >= cutoff));
    }

    #[tokio::test]
    async fn should_import_at_most_fifty_most_recent_points() {
        let mut store = HistoryStore::new(InMemoryKeyValueStore::default());
        let lamp = key("lamp");
        let start = (now() - Duration::days(2)).timestamp_millis();
        let points: Vec<HistoryPoint> = (0..60)
            .map(|i| HistoryPoint {
                timestamp_ms: start + i * 60_000,
                value: i % 2 == 0,
            })
            .collect();

        let added = store.import(&lamp, points, now()).await.unwrap();

        assert_eq!(added, 50);
        assert_eq!(store.events(&lamp)[0].timestamp_ms, start + 10 * 60_000);
        assert!(store.backend().raw("history:lamp/onoff").is_some());
    }

    #[tokio::test]
    async fn should_merge_imported_points_with_dedup() {
        let mut store = HistoryStore::new(InMemoryKeyValueStore::default());
        let lamp = key("lamp");
        let ms = now().timestamp_millis();
        store.append_event(&lamp, Event::at(now(), true), ms).await.unwrap();

        let points = vec![
            HistoryPoint {
                timestamp_ms: ms - 120_000,
                value: true,
            },
            HistoryPoint {
                timestamp_ms: ms - 60_000,
                value: true,
            },
        ];
        let added = store.import(&lamp, points, now()).await.unwrap();

        assert_eq!(added, 0);
        assert_eq!(store.events(&lamp).len(), 1);
        assert_eq!(store.events(&lamp)[0].timestamp_ms, ms - 120_000);
    }

    #[tokio::test]
    async fn should_drop_imported_points_dated_in_the_future() {
        let mut store = HistoryStore::new(InMemoryKeyValueStore::default());
        let lamp = key("lamp");
        let ms = now().timestamp_millis();
        let points = vec![
            HistoryPoint {
                timestamp_ms: ms - 60 * 60_000,
                value: true,
            },
            HistoryPoint {
                timestamp_ms: ms + 24 * 60 * 60_000,
                value: false,
            },
        ];

        let added = store.import(&lamp, points, now()).await.unwrap();

        assert_eq!(added, 1);
        let later = now() + Duration::minutes(5);
        let outcome = store
            .append_event(&lamp, Event::at(later, false), later.timestamp_millis())
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome::Appended);
        assert_eq!(store.events(&lamp).len(), 2);
    }

    #[tokio::test]
    async fn should_derive_imported_calendar_fields_in_local_offset() {
        let mut store = HistoryStore::new(InMemoryKeyValueStore::default());
        let lamp = key("lamp");
        let at = ts("2024-01-08T06:30:00+00:00");

        store
            .import(
                &lamp,
                vec![HistoryPoint {
                    timestamp_ms: at.timestamp_millis(),
                    value: true,
                }],
                now(),
            )
            .await
            .unwrap();

        let event = store.events(&lamp)[0];
        assert_eq!(event.hour_of_day, 7);
        assert_eq!(event.minute_of_hour, 30);
    }
}
