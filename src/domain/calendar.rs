//! Trading calendars: Mon-Fri business-day arithmetic and exchange holiday
//! sets computed from rules, so any year can be generated without a table.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeSet;
use std::fmt;

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Number of Mon-Fri days in `[start, end)`. Zero when `end <= start`.
///
/// No holiday adjustment: this is the cheap count used for scheduling
/// priority (staleness, missing-day estimates).
pub fn business_days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    if end <= start {
        return 0;
    }
    let total = (end - start).num_days();
    let full_weeks = total / 7;
    let mut count = full_weeks * 5;
    let mut day = start + Duration::days(full_weeks * 7);
    while day < end {
        if is_weekday(day) {
            count += 1;
        }
        day += Duration::days(1);
    }
    count
}

/// Holiday rule set of a named exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolidayRules {
    /// New York Stock Exchange full-day closures.
    Nyse,
    /// Australian Securities Exchange full-day closures.
    Asx,
    /// Weekends only.
    Weekdays,
}

#[derive(Debug, Clone)]
pub struct ExchangeCalendar {
    name: String,
    rules: HolidayRules,
    extra: BTreeSet<NaiveDate>,
}

impl ExchangeCalendar {
    pub fn new(rules: HolidayRules) -> Self {
        let name = match rules {
            HolidayRules::Nyse => "NYSE",
            HolidayRules::Asx => "ASX",
            HolidayRules::Weekdays => "WEEKDAYS",
        };
        Self {
            name: name.to_string(),
            rules,
            extra: BTreeSet::new(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let rules = match name.trim().to_uppercase().as_str() {
            "NYSE" | "NASDAQ" | "US" => HolidayRules::Nyse,
            "ASX" | "AU" => HolidayRules::Asx,
            "WEEKDAYS" | "NONE" => HolidayRules::Weekdays,
            _ => return None,
        };
        Some(Self::new(rules))
    }

    /// Add one-off closures (national days of mourning, outages).
    pub fn with_extra_holidays<I: IntoIterator<Item = NaiveDate>>(mut self, dates: I) -> Self {
        self.extra.extend(dates);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holidays(&self, year: i32) -> BTreeSet<NaiveDate> {
        let mut set = match self.rules {
            HolidayRules::Nyse => nyse_holidays(year),
            HolidayRules::Asx => asx_holidays(year),
            HolidayRules::Weekdays => BTreeSet::new(),
        };
        set.extend(self.extra.iter().filter(|d| d.year() == year).copied());
        set
    }

    /// Holidays for every year spanned by `[start, end]`.
    pub fn holidays_between(&self, start: NaiveDate, end: NaiveDate) -> BTreeSet<NaiveDate> {
        if end < start {
            return BTreeSet::new();
        }
        (start.year()..=end.year())
            .flat_map(|y| self.holidays(y))
            .filter(|d| *d >= start && *d <= end)
            .collect()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        is_weekday(date) && !self.holidays(date.year()).contains(&date)
    }
}

impl fmt::Display for ExchangeCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Anonymous Gregorian algorithm.
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    ymd(year, month as u32, day as u32)
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_next = if month == 12 {
        ymd(year + 1, 1, 1)?
    } else {
        ymd(year, month + 1, 1)?
    };
    let mut day = first_next - Duration::days(1);
    while day.weekday() != weekday {
        day -= Duration::days(1);
    }
    Some(day)
}

/// Saturday moves to Friday, Sunday to Monday.
fn observed_nearest(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

/// Weekend dates move forward to the following Monday.
fn observed_monday(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date + Duration::days(2),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn nyse_holidays(year: i32) -> BTreeSet<NaiveDate> {
    let mut days = BTreeSet::new();

    // A Saturday New Year is not observed on the prior Friday.
    if let Some(d) = ymd(year, 1, 1) {
        if d.weekday() != Weekday::Sat {
            days.insert(observed_nearest(d));
        }
    }
    if year >= 1998 {
        days.extend(nth_weekday(year, 1, Weekday::Mon, 3));
    }
    days.extend(nth_weekday(year, 2, Weekday::Mon, 3));
    days.extend(easter_sunday(year).map(|e| e - Duration::days(2)));
    days.extend(last_weekday(year, 5, Weekday::Mon));
    if year >= 2022 {
        days.extend(ymd(year, 6, 19).map(observed_nearest));
    }
    days.extend(ymd(year, 7, 4).map(observed_nearest));
    days.extend(nth_weekday(year, 9, Weekday::Mon, 1));
    days.extend(nth_weekday(year, 11, Weekday::Thu, 4));
    days.extend(ymd(year, 12, 25).map(observed_nearest));

    days
}

fn asx_holidays(year: i32) -> BTreeSet<NaiveDate> {
    let mut days = BTreeSet::new();

    days.extend(ymd(year, 1, 1).map(observed_monday));
    days.extend(ymd(year, 1, 26).map(observed_monday));
    if let Some(easter) = easter_sunday(year) {
        days.insert(easter - Duration::days(2));
        days.insert(easter + Duration::days(1));
    }
    // Anzac Day has no substitute weekday.
    days.extend(ymd(year, 4, 25).filter(|d| is_weekday(*d)));
    days.extend(nth_weekday(year, 6, Weekday::Mon, 2));

    if let (Some(christmas), Some(boxing)) = (ymd(year, 12, 25), ymd(year, 12, 26)) {
        let christmas_obs = observed_monday(christmas);
        let mut boxing_obs = observed_monday(boxing);
        if boxing_obs <= christmas_obs {
            boxing_obs = christmas_obs + Duration::days(1);
        }
        days.insert(christmas_obs);
        days.insert(boxing_obs);
    }

    days
}
