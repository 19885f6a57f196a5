//! Time sources and business calendars
//!
//! Every "now" the engine reads comes from a [`Clock`], so tests and
//! replays can pin time with a [`ManualClock`]. SLA deadlines are laid
//! out on a [`BusinessCalendar`]: either continuous wall-clock time or
//! configured working hours with holidays.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::RwLock;

// ── Clocks ───────────────────────────────────────────────────────────

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(at),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        match self.now.write() {
            Ok(mut guard) => *guard = at,
            Err(poisoned) => *poisoned.into_inner() = at,
        }
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ── Calendars ────────────────────────────────────────────────────────

/// Durations are clamped to a century of SLA time
const MAX_SLA_SECS: u64 = 100 * 365 * 86_400;

/// Measures SLA time between two instants
pub trait BusinessCalendar: Send + Sync {
    /// The instant `secs` of SLA time after `start`
    fn add_duration(&self, start: DateTime<Utc>, secs: u64) -> DateTime<Utc>;

    /// SLA seconds between `start` and `end` (zero if `end` is earlier)
    fn elapsed_secs(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u64;
}

/// Round-the-clock time: every second counts
#[derive(Clone, Copy, Debug, Default)]
pub struct ContinuousCalendar;

impl BusinessCalendar for ContinuousCalendar {
    fn add_duration(&self, start: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
        start + Duration::seconds(secs.min(MAX_SLA_SECS) as i64)
    }

    fn elapsed_secs(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
        end.signed_duration_since(start).num_seconds().max(0) as u64
    }
}

/// Working days, daily hours and holidays, all in UTC
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub working_days: Vec<Weekday>,
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    #[serde(default)]
    pub holidays: BTreeSet<NaiveDate>,
}

impl WorkingHours {
    pub fn new(working_days: Vec<Weekday>, day_start: NaiveTime, day_end: NaiveTime) -> Self {
        Self {
            working_days,
            day_start,
            day_end,
            holidays: BTreeSet::new(),
        }
    }

    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    /// At least one working day and a non-empty daily window
    pub fn is_usable(&self) -> bool {
        !self.working_days.is_empty() && self.day_start < self.day_end
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.working_days.contains(&date.weekday()) && !self.holidays.contains(&date)
    }

    fn window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.from_utc_datetime(&date.and_time(self.day_start)),
            Utc.from_utc_datetime(&date.and_time(self.day_end)),
        )
    }
}

impl Default for WorkingHours {
    /// Monday to Friday, 09:00 to 17:00
    fn default() -> Self {
        Self::new(
            vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
        )
    }
}

/// Counts only time inside working hours
///
/// Unusable working hours (no days, empty window) fall back to
/// continuous time.
#[derive(Clone, Debug, Default)]
pub struct WorkingHoursCalendar {
    hours: WorkingHours,
}

impl WorkingHoursCalendar {
    pub fn new(hours: WorkingHours) -> Self {
        Self { hours }
    }

    pub fn hours(&self) -> &WorkingHours {
        &self.hours
    }
}

impl BusinessCalendar for WorkingHoursCalendar {
    fn add_duration(&self, start: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
        if secs == 0 || !self.hours.is_usable() {
            return ContinuousCalendar.add_duration(start, secs);
        }

        let mut remaining = secs.min(MAX_SLA_SECS) as i64;
        let mut date = start.date_naive();
        loop {
            if self.hours.is_working_day(date) {
                let (open, close) = self.hours.window(date);
                let from = open.max(start);
                if from < close {
                    let available = close.signed_duration_since(from).num_seconds();
                    if remaining <= available {
                        return from + Duration::seconds(remaining);
                    }
                    remaining -= available;
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => return ContinuousCalendar.add_duration(start, secs),
            }
        }
    }

    fn elapsed_secs(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
        if !self.hours.is_usable() {
            return ContinuousCalendar.elapsed_secs(start, end);
        }
        if end <= start {
            return 0;
        }

        let mut total = 0i64;
        let mut date = start.date_naive();
        let last = end.date_naive();
        while date <= last {
            if self.hours.is_working_day(date) {
                let (open, close) = self.hours.window(date);
                let from = open.max(start);
                let to = close.min(end);
                if from < to {
                    total += to.signed_duration_since(from).num_seconds();
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        total.max(0) as u64
    }
}
