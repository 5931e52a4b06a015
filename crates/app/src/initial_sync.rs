//! Initial state sync — align live devices with their state one cycle ago.
//!
//! Runs once when replay is armed and once at startup when replay was
//! already armed. Without it, a light that was on at this time last week
//! would stay off until the next recorded transition comes round.

use std::fmt;

use mimic_domain::error::DeviceError;
use mimic_domain::schedule::ReplayMode;
use mimic_domain::time::Timestamp;
use mimic_domain::tracking_key::TrackingKey;

use crate::history_store::HistoryStore;
use crate::ports::{CapabilityIo, KeyValueStore};

/// Per-device classification of a sync pass.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The device was switched to the historical value.
    Synced { value: bool },
    /// The device already had the historical value.
    AlreadyCorrect { value: bool },
    /// Nothing recorded for this key yet.
    NoHistory,
    /// History exists but starts after the target moment.
    NoHistoricalState,
    Error(DeviceError),
}

impl SyncOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Synced { .. } => "synced",
            Self::AlreadyCorrect { .. } => "already_correct",
            Self::NoHistory => "no_history",
            Self::NoHistoricalState => "no_historical_state",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcomes of one sync pass, in key order.
#[derive(Debug)]
pub struct SyncReport {
    pub target: Timestamp,
    pub outcomes: Vec<(TrackingKey, SyncOutcome)>,
}

/// Counts per outcome, for a one-line log summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub synced: usize,
    pub already_correct: usize,
    pub no_history: usize,
    pub no_historical_state: usize,
    pub errors: usize,
}

impl SyncReport {
    #[must_use]
    pub fn summary(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for (_, outcome) in &self.outcomes {
            match outcome {
                SyncOutcome::Synced { .. } => summary.synced += 1,
                SyncOutcome::AlreadyCorrect { .. } => summary.already_correct += 1,
                SyncOutcome::NoHistory => summary.no_history += 1,
                SyncOutcome::NoHistoricalState => summary.no_historical_state += 1,
                SyncOutcome::Error(_) => summary.errors += 1,
            }
        }
        summary
    }

    #[must_use]
    pub fn outcome(&self, key: &TrackingKey) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|(k, _)| k == key).map(|(_, o)| o)
    }
}

/// Bring every key in `keys` to the value it had at `now - period`.
///
/// Device errors are recorded per key and never abort the pass.
pub async fn run<D, S>(
    io: &D,
    histories: &HistoryStore<S>,
    keys: &[TrackingKey],
    mode: ReplayMode,
    now: Timestamp,
) -> SyncReport
where
    D: CapabilityIo,
    S: KeyValueStore,
{
    let target_ms = now.timestamp_millis() - mode.period_ms();
    let target = now - chrono::Duration::milliseconds(mode.period_ms());
    let mut outcomes = Vec::with_capacity(keys.len());

    for key in keys {
        let outcome = match histories.get(key) {
            Some(history) if !history.is_empty() => match history.state_at(target_ms) {
                Some(event) => align(io, key, event.value).await,
                None => SyncOutcome::NoHistoricalState,
            },
            _ => SyncOutcome::NoHistory,
        };
        match &outcome {
            SyncOutcome::Error(err) => {
                tracing::warn!(%err, %key, "initial sync failed for device");
            }
            other => tracing::debug!(%key, outcome = %other, "initial sync"),
        }
        outcomes.push((key.clone(), outcome));
    }

    let report = SyncReport { target, outcomes };
    let summary = report.summary();
    tracing::info!(
        %target,
        synced = summary.synced,
        already_correct = summary.already_correct,
        no_history = summary.no_history,
        no_historical_state = summary.no_historical_state,
        errors = summary.errors,
        "initial state sync complete"
    );
    report
}

async fn align<D: CapabilityIo>(io: &D, key: &TrackingKey, value: bool) -> SyncOutcome {
    let live = match io.read_value(key).await {
        Ok(live) => live,
        Err(err) => return SyncOutcome::Error(err),
    };
    if live == value {
        return SyncOutcome::AlreadyCorrect { value };
    }
    match io.write_value(key, value).await {
        Ok(()) => SyncOutcome::Synced { value },
        Err(err) => SyncOutcome::Error(err),
    }
}
