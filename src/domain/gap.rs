//! Gap detection: which trading dates should carry data but do not.
//!
//! Comparison is always at date granularity. An intraday series with a
//! single bar anywhere in a trading day covers that day.

use crate::domain::calendar::ExchangeCalendar;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;

/// Outcome of a gap scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapReport {
    NoGaps,
    Missing(BTreeSet<NaiveDate>),
}

impl GapReport {
    fn from_set(missing: BTreeSet<NaiveDate>) -> Self {
        if missing.is_empty() {
            GapReport::NoGaps
        } else {
            GapReport::Missing(missing)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, GapReport::NoGaps)
    }

    pub fn len(&self) -> usize {
        match self {
            GapReport::NoGaps => 0,
            GapReport::Missing(set) => set.len(),
        }
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        match self {
            GapReport::NoGaps => Vec::new(),
            GapReport::Missing(set) => set.iter().copied().collect(),
        }
    }
}

/// A contiguous run of missing trading days (inclusive bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRun {
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub trading_days: usize,
}

impl GapRun {
    /// Calendar days needed for a lookback window ending after `last` to
    /// reach back to `first`.
    pub fn span_days(&self) -> i64 {
        (self.last - self.first).num_days() + 1
    }
}

/// Every trading day in `[start, end]`: weekdays minus the calendar's
/// holidays for each year spanned.
pub fn expected_dates(
    start: NaiveDate,
    end: NaiveDate,
    calendar: &ExchangeCalendar,
) -> BTreeSet<NaiveDate> {
    let mut dates = BTreeSet::new();
    if end < start {
        return dates;
    }
    let holidays = calendar.holidays_between(start, end);
    let mut day = start;
    while day <= end {
        if crate::domain::calendar::is_weekday(day) && !holidays.contains(&day) {
            dates.insert(day);
        }
        day += Duration::days(1);
    }
    dates
}

/// Expected trading days in `[start, end]` absent from `present`.
pub fn missing_dates(
    present: &BTreeSet<NaiveDate>,
    start: NaiveDate,
    end: NaiveDate,
    calendar: &ExchangeCalendar,
) -> GapReport {
    let missing = expected_dates(start, end, calendar)
        .into_iter()
        .filter(|d| !present.contains(d))
        .collect();
    GapReport::from_set(missing)
}

/// Interior gaps of a series: missing trading days strictly between its
/// first and last stored dates.
pub fn interior_gaps(present: &BTreeSet<NaiveDate>, calendar: &ExchangeCalendar) -> GapReport {
    match (present.first(), present.last()) {
        (Some(&first), Some(&last)) if last > first => missing_dates(
            present,
            first + Duration::days(1),
            last - Duration::days(1),
            calendar,
        ),
        _ => GapReport::NoGaps,
    }
}

/// Group missing dates into runs. Two missing dates belong to the same run
/// when no trading day separates them.
pub fn gap_runs(report: &GapReport, calendar: &ExchangeCalendar) -> Vec<GapRun> {
    let dates = report.dates();
    let mut runs: Vec<GapRun> = Vec::new();

    for date in dates {
        match runs.last_mut() {
            Some(run) if next_trading_day(run.last, calendar) == date => {
                run.last = date;
                run.trading_days += 1;
            }
            _ => runs.push(GapRun {
                first: date,
                last: date,
                trading_days: 1,
            }),
        }
    }

    runs
}

fn next_trading_day(date: NaiveDate, calendar: &ExchangeCalendar) -> NaiveDate {
    let mut day = date + Duration::days(1);
    while !calendar.is_trading_day(day) {
        day += Duration::days(1);
    }
    day
}
