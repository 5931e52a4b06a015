//! Event — an immutable record of one observed on/off transition.
//!
//! Besides the absolute timestamp, an event stores its position on the
//! weekly calendar (weekday, hour, minute) as observed in local time when it
//! was recorded. Replay matching works on that position only.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::time::{MINUTES_PER_HOUR, Timestamp};

/// A recorded transition of a binary actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub value: bool,
    /// 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub minute_of_hour: u8,
    /// `hour_of_day * 60 + minute_of_hour`.
    pub time_minutes: u16,
}

impl Event {
    /// Record `value` at `at`, deriving the calendar fields from the
    /// timestamp's own offset.
    #[must_use]
    pub fn at(at: Timestamp, value: bool) -> Self {
        let position = CalendarPosition::of(at);
        Self {
            timestamp_ms: at.timestamp_millis(),
            value,
            day_of_week: position.day_of_week,
            hour_of_day: position.hour_of_day,
            minute_of_hour: position.minute_of_hour,
            time_minutes: position.time_minutes(),
        }
    }

    /// Whether the stored calendar fields are within range and consistent.
    ///
    /// Events loaded from storage are not trusted blindly; malformed ones
    /// never produce a schedule.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.day_of_week < 7
            && self.hour_of_day < 24
            && self.minute_of_hour < 60
            && u32::from(self.time_minutes)
                == u32::from(self.hour_of_day) * MINUTES_PER_HOUR + u32::from(self.minute_of_hour)
    }
}

/// Where a moment falls on the weekly ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarPosition {
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub minute_of_hour: u8,
}

impl CalendarPosition {
    #[must_use]
    pub fn of(at: Timestamp) -> Self {
        // chrono guarantees these ranges, so the narrowing casts never truncate.
        #[allow(clippy::cast_possible_truncation)]
        Self {
            day_of_week: at.weekday().num_days_from_sunday() as u8,
            hour_of_day: at.hour() as u8,
            minute_of_hour: at.minute() as u8,
        }
    }

    /// Minutes elapsed since local midnight.
    #[must_use]
    pub fn time_minutes(&self) -> u16 {
        u16::from(self.hour_of_day) * 60 + u16::from(self.minute_of_hour)
    }
}
