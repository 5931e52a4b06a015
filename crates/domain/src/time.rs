//! Time and timestamp helpers.
//!
//! Timestamps carry their UTC offset so that the calendar position of an
//! event (weekday, hour, minute) is the one observed locally when it was
//! recorded.

use chrono::{DateTime, FixedOffset, Local};

/// Local timestamp with its UTC offset.
pub type Timestamp = DateTime<FixedOffset>;

pub const MINUTES_PER_HOUR: u32 = 60;
pub const MINUTES_PER_DAY: u32 = 24 * MINUTES_PER_HOUR;
pub const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;

pub const MILLIS_PER_MINUTE: i64 = 60 * 1000;
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Return the current local time.
#[must_use]
pub fn now() -> Timestamp {
    Local::now().fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_local_time() {
        let before = Local::now();
        let ts = now();
        let after = Local::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_define_week_as_10080_minutes() {
        assert_eq!(MINUTES_PER_WEEK, 10_080);
        assert_eq!(i64::from(MINUTES_PER_DAY) * MILLIS_PER_MINUTE, MILLIS_PER_DAY);
    }
}
