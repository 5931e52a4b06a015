//! Replay scheduling math — where the next historical event falls on the ring.
//!
//! In [`ReplayMode::Normal`] the ring is one week (7 × 1440 minutes) and an
//! event matches on `(day_of_week, time_minutes)`. In [`ReplayMode::Test`]
//! the ring is one hour and only `minute_of_hour` matters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event::{CalendarPosition, Event};
use crate::history::History;
use crate::time::{
    MILLIS_PER_MINUTE, MINUTES_PER_DAY, MINUTES_PER_HOUR, MINUTES_PER_WEEK, Timestamp,
};

/// Replay cycle length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Replay last week's pattern.
    #[default]
    Normal,
    /// Replay last hour's pattern, for validating a setup quickly.
    Test,
}

impl ReplayMode {
    #[must_use]
    pub fn from_test_mode(test_mode: bool) -> Self {
        if test_mode { Self::Test } else { Self::Normal }
    }

    #[must_use]
    pub fn is_test(self) -> bool {
        matches!(self, Self::Test)
    }

    /// Length of one replay cycle in minutes.
    #[must_use]
    pub fn period_minutes(self) -> u32 {
        match self {
            Self::Normal => MINUTES_PER_WEEK,
            Self::Test => MINUTES_PER_HOUR,
        }
    }

    /// Length of one replay cycle in milliseconds.
    #[must_use]
    pub fn period_ms(self) -> i64 {
        i64::from(self.period_minutes()) * MILLIS_PER_MINUTE
    }

    /// Forward distance in minutes from `now` to the next occurrence of
    /// `event`'s position on this mode's ring. Never zero: an event at the
    /// current position is one full period away.
    #[must_use]
    pub fn delay_minutes(self, now: CalendarPosition, event: &Event) -> u32 {
        let period = self.period_minutes();
        match self {
            Self::Normal => {
                let current = u32::from(now.time_minutes());
                let target = u32::from(event.time_minutes);
                if event.day_of_week == now.day_of_week {
                    if target > current {
                        target - current
                    } else {
                        period - current + target
                    }
                } else {
                    let days_until =
                        (u32::from(event.day_of_week) + 7 - u32::from(now.day_of_week)) % 7;
                    days_until * MINUTES_PER_DAY + target - current
                }
            }
            Self::Test => {
                let current = u32::from(now.minute_of_hour);
                let target = u32::from(event.minute_of_hour);
                if target > current {
                    target - current
                } else {
                    period - current + target
                }
            }
        }
    }
}

/// The event to replay next and how long to wait for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextEvent {
    pub event: Event,
    pub delay_minutes: u32,
}

impl NextEvent {
    /// Timer duration for this delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.delay_minutes) * 60)
    }
}

/// Pick the history event whose ring position comes soonest after `now`.
///
/// Ties on the minimal delay keep the first event in history order.
/// Returns `None` for an empty history or one holding only malformed events.
#[must_use]
pub fn calculate_next_event(
    history: &History,
    mode: ReplayMode,
    now: Timestamp,
) -> Option<NextEvent> {
    let position = CalendarPosition::of(now);
    let mut best: Option<NextEvent> = None;

    for event in history.events() {
        if !event.is_well_formed() {
            continue;
        }
        let delay_minutes = mode.delay_minutes(position, event);
        if delay_minutes == 0 {
            continue;
        }
        if best.is_none_or(|b| delay_minutes < b.delay_minutes) {
            best = Some(NextEvent {
                event: *event,
                delay_minutes,
            });
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration};

    // 2024-01-01 is a Monday.
    fn monday(time: &str) -> Timestamp {
        DateTime::parse_from_rfc3339(&format!("2024-01-01T{time}:00+00:00")).unwrap()
    }

    fn scenario_history() -> History {
        History::from_events(vec![
            Event::at(monday("19:30") - ChronoDuration::days(7), true),
            Event::at(monday("23:15") - ChronoDuration::days(7), false),
        ])
    }

    #[test]
    fn should_pick_upcoming_event_on_same_day() {
        let next =
            calculate_next_event(&scenario_history(), ReplayMode::Normal, monday("19:00")).unwrap();
        assert!(next.event.value);
        assert_eq!(next.delay_minutes, 30);
    }

    #[test]
    fn should_wrap_to_following_week_when_all_events_passed() {
        let next =
            calculate_next_event(&scenario_history(), ReplayMode::Normal, monday("23:20")).unwrap();
        assert!(next.event.value);
        assert_eq!(next.delay_minutes, 10_080 - 23 * 60 - 20 + 19 * 60 + 30);
    }

    #[test]
    fn should_count_whole_days_to_event_on_later_weekday() {
        // Wednesday 08:00.
        let history =
            History::from_events(vec![Event::at(monday("08:00") + ChronoDuration::days(2), true)]);
        let next = calculate_next_event(&history, ReplayMode::Normal, monday("10:00")).unwrap();
        assert_eq!(next.delay_minutes, 2 * 1440 - 600 + 480);
    }

    #[test]
    fn should_wrap_weekday_circularly() {
        // Sunday 09:00 seen from Monday 09:00 is six days away.
        let history =
            History::from_events(vec![Event::at(monday("09:00") - ChronoDuration::days(1), false)]);
        let next = calculate_next_event(&history, ReplayMode::Normal, monday("09:00")).unwrap();
        assert_eq!(next.delay_minutes, 6 * 1440);
    }

    #[test]
    fn should_schedule_a_full_period_ahead_when_event_is_now() {
        let history = History::from_events(vec![Event::at(monday("12:00"), true)]);
        let next = calculate_next_event(&history, ReplayMode::Normal, monday("12:00")).unwrap();
        assert_eq!(next.delay_minutes, 10_080);

        let next = calculate_next_event(&history, ReplayMode::Test, monday("12:00")).unwrap();
        assert_eq!(next.delay_minutes, 60);
    }

    #[test]
    fn should_match_on_minute_of_hour_in_test_mode() {
        let history = History::from_events(vec![
            Event::at(monday("07:10"), true),
            Event::at(monday("07:40"), false),
        ]);
        let next = calculate_next_event(&history, ReplayMode::Test, monday("15:25")).unwrap();
        assert!(!next.event.value);
        assert_eq!(next.delay_minutes, 15);

        let next = calculate_next_event(&history, ReplayMode::Test, monday("15:45")).unwrap();
        assert!(next.event.value);
        assert_eq!(next.delay_minutes, 25);
    }

    #[test]
    fn should_return_none_for_empty_history() {
        let next = calculate_next_event(&History::new(), ReplayMode::Normal, monday("12:00"));
        assert!(next.is_none());
    }

    #[test]
    fn should_return_none_when_only_malformed_events() {
        let mut event = Event::at(monday("12:00"), true);
        event.day_of_week = 9;
        let history = History::from_events(vec![event]);
        assert!(calculate_next_event(&history, ReplayMode::Normal, monday("11:00")).is_none());
    }

    #[test]
    fn should_keep_first_event_in_history_order_on_tie() {
        // Same ring position one week apart: identical delay.
        let first = Event::at(monday("20:00") - ChronoDuration::days(7), true);
        let second = Event::at(monday("20:00"), false);
        let history = History::from_events(vec![first, second]);

        let next = calculate_next_event(&history, ReplayMode::Normal, monday("19:00")).unwrap();
        assert_eq!(next.event, first);
        assert_eq!(next.delay_minutes, 60);
    }

    #[test]
    fn should_keep_delay_within_period_for_every_position() {
        let history = History::from_events(vec![
            Event::at(monday("00:00"), true),
            Event::at(monday("13:37") + ChronoDuration::days(3), false),
            Event::at(monday("23:59") + ChronoDuration::days(6), true),
        ]);
        for mode in [ReplayMode::Normal, ReplayMode::Test] {
            for step in 0..(7 * 24 * 4) {
                let now = monday("00:00") + ChronoDuration::minutes(step * 15 + 7);
                let next = calculate_next_event(&history, mode, now).unwrap();
                assert!(next.delay_minutes > 0);
                assert!(next.delay_minutes <= mode.period_minutes());
            }
        }
    }

    #[test]
    fn should_convert_delay_to_duration() {
        let next = NextEvent {
            event: Event::at(monday("12:00"), true),
            delay_minutes: 30,
        };
        assert_eq!(next.delay(), Duration::from_secs(1800));
    }

    #[test]
    fn should_report_periods_per_mode() {
        assert_eq!(ReplayMode::Normal.period_minutes(), 10_080);
        assert_eq!(ReplayMode::Test.period_minutes(), 60);
        assert_eq!(ReplayMode::Test.period_ms(), 3_600_000);
        assert_eq!(ReplayMode::from_test_mode(true), ReplayMode::Test);
    }
}
