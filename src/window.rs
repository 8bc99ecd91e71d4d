use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::Serialize;

/// How far ahead of an appointment the reminder goes out.
pub const REMINDER_LEAD: Duration = Duration::hours(2);
/// Matches the dispatch cadence so consecutive runs tile the timeline.
pub const WINDOW_WIDTH: Duration = Duration::minutes(15);

/// Band of appointment start times eligible on one run, in clinic-local time.
///
/// The band is half-open: `start` is included and `end` is not, so the end of
/// one run's window is the start of the next and no booking lands in both.
/// It may span midnight, in which case `end` falls on the following date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ReminderWindow {
    /// Calendar date of the first eligible start time.
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn start_time(&self) -> NaiveTime {
        self.start.time()
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end.time()
    }

    /// Same half-open test the store applies in SQL.
    #[cfg(test)]
    pub fn contains(&self, date: NaiveDate, time: NaiveTime) -> bool {
        let at = date.and_time(time);
        self.start <= at && at < self.end
    }
}

impl fmt::Display for ReminderWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-", self.date(), self.start_time().format("%H:%M"))?;
        if self.end.date() != self.date() {
            write!(f, "{} ", self.end.date())?;
        }
        write!(f, "{}", self.end_time().format("%H:%M"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReminderWindowCalculator {
    offset: FixedOffset,
}

impl ReminderWindowCalculator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn compute_window(&self, now: DateTime<Utc>) -> ReminderWindow {
        let start = to_minute((now.with_timezone(&self.offset) + REMINDER_LEAD).naive_local());

        ReminderWindow {
            start,
            end: start + WINDOW_WIDTH,
        }
    }
}

fn to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}
