//! Synchronization settings, read once from configuration and immutable for
//! the lifetime of a run.

use crate::domain::calendar::ExchangeCalendar;
use crate::domain::error::SyncError;
use crate::domain::series::{Interval, IntervalClass};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_UPDATE_THRESHOLD_DAYS: i64 = 5;
pub const DEFAULT_COOLDOWN_SECONDS: f64 = 2.0;
pub const DEFAULT_MAX_BACKFILL_CHUNKS: i64 = 20;
pub const DEFAULT_MAX_GAP_FILLS: i64 = 10;
pub const DEFAULT_GAP_SCAN_INTERVAL_DAYS: i64 = 7;
pub const DEFAULT_REQUIRED_INTERVALS: &str = "5min,1hour,1day";

const SECTION: &str = "sync";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimiterKind {
    FixedInterval,
    TokenBucket { capacity: u32, rate_per_second: f64 },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub update_threshold_days: i64,
    pub lookback_days: BTreeMap<IntervalClass, u32>,
    pub rate_limit_cooldown: Duration,
    pub rate_limiter: RateLimiterKind,
    pub required_intervals: Vec<Interval>,
    pub calendar: ExchangeCalendar,
    pub max_backfill_chunks: u32,
    pub max_gap_fills: u32,
    pub gap_scan_interval_days: i64,
}

pub fn default_lookback_days(class: IntervalClass) -> u32 {
    match class {
        IntervalClass::Intraday => 30,
        IntervalClass::Hourly => 365,
        IntervalClass::Daily => 3650,
        IntervalClass::Long => 7300,
    }
}

fn lookback_key(class: IntervalClass) -> &'static str {
    match class {
        IntervalClass::Intraday => "lookback_days_intraday",
        IntervalClass::Hourly => "lookback_days_hourly",
        IntervalClass::Daily => "lookback_days_daily",
        IntervalClass::Long => "lookback_days_long",
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            update_threshold_days: DEFAULT_UPDATE_THRESHOLD_DAYS,
            lookback_days: [
                IntervalClass::Intraday,
                IntervalClass::Hourly,
                IntervalClass::Daily,
                IntervalClass::Long,
            ]
            .into_iter()
            .map(|c| (c, default_lookback_days(c)))
            .collect(),
            rate_limit_cooldown: Duration::from_secs_f64(DEFAULT_COOLDOWN_SECONDS),
            rate_limiter: RateLimiterKind::FixedInterval,
            required_intervals: vec![Interval::FiveMinutes, Interval::OneHour, Interval::OneDay],
            calendar: ExchangeCalendar::new(crate::domain::calendar::HolidayRules::Nyse),
            max_backfill_chunks: DEFAULT_MAX_BACKFILL_CHUNKS as u32,
            max_gap_fills: DEFAULT_MAX_GAP_FILLS as u32,
            gap_scan_interval_days: DEFAULT_GAP_SCAN_INTERVAL_DAYS,
        }
    }
}

impl SyncConfig {
    /// Default deep lookback for an interval.
    pub fn lookback_for(&self, interval: Interval) -> u32 {
        let class = interval.class();
        self.lookback_days
            .get(&class)
            .copied()
            .unwrap_or_else(|| default_lookback_days(class))
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SyncError> {
        let update_threshold_days =
            positive_int(config, SECTION, "update_threshold_days", DEFAULT_UPDATE_THRESHOLD_DAYS)?;

        let mut lookback_days = BTreeMap::new();
        for class in [
            IntervalClass::Intraday,
            IntervalClass::Hourly,
            IntervalClass::Daily,
            IntervalClass::Long,
        ] {
            let days = positive_int(
                config,
                SECTION,
                lookback_key(class),
                default_lookback_days(class) as i64,
            )?;
            lookback_days.insert(class, days as u32);
        }

        let cooldown =
            config.get_double(SECTION, "rate_limit_cooldown_seconds", DEFAULT_COOLDOWN_SECONDS);
        if !cooldown.is_finite() || cooldown < 0.0 {
            return Err(invalid(
                SECTION,
                "rate_limit_cooldown_seconds",
                "must be a non-negative number of seconds",
            ));
        }

        let rate_limiter = parse_rate_limiter(config, cooldown)?;
        let required_intervals = parse_required_intervals(config)?;
        let calendar = parse_calendar(config)?;

        Ok(Self {
            update_threshold_days,
            lookback_days,
            rate_limit_cooldown: Duration::from_secs_f64(cooldown),
            rate_limiter,
            required_intervals,
            calendar,
            max_backfill_chunks: positive_int(
                config,
                SECTION,
                "max_backfill_chunks",
                DEFAULT_MAX_BACKFILL_CHUNKS,
            )? as u32,
            max_gap_fills: positive_int(config, SECTION, "max_gap_fills", DEFAULT_MAX_GAP_FILLS)?
                as u32,
            gap_scan_interval_days: positive_int(
                config,
                SECTION,
                "gap_scan_interval_days",
                DEFAULT_GAP_SCAN_INTERVAL_DAYS,
            )?,
        })
    }
}

fn invalid(section: &str, key: &str, reason: &str) -> SyncError {
    SyncError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Reads an integer, rejecting values that are present but not positive
/// integers (a typo must not silently fall back to the default).
fn positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, SyncError> {
    let Some(raw) = config.get_string(section, key) else {
        return Ok(default);
    };
    match raw.trim().parse::<i64>() {
        Ok(v) if v > 0 && v <= u32::MAX as i64 => Ok(v),
        _ => Err(invalid(section, key, "must be a positive integer")),
    }
}

fn parse_rate_limiter(config: &dyn ConfigPort, cooldown: f64) -> Result<RateLimiterKind, SyncError> {
    let kind = config
        .get_string(SECTION, "rate_limiter")
        .unwrap_or_else(|| "fixed".to_string());
    match kind.trim().to_lowercase().as_str() {
        "fixed" | "fixed_interval" => Ok(RateLimiterKind::FixedInterval),
        "token_bucket" => {
            let capacity = positive_int(config, SECTION, "token_bucket_capacity", 1)? as u32;
            let default_rate = if cooldown > 0.0 { 1.0 / cooldown } else { 1.0 };
            let rate = config.get_double(SECTION, "token_bucket_rate", default_rate);
            if !rate.is_finite() || rate <= 0.0 {
                return Err(invalid(SECTION, "token_bucket_rate", "must be positive"));
            }
            Ok(RateLimiterKind::TokenBucket {
                capacity,
                rate_per_second: rate,
            })
        }
        _ => Err(invalid(
            SECTION,
            "rate_limiter",
            "expected fixed or token_bucket",
        )),
    }
}

fn parse_required_intervals(config: &dyn ConfigPort) -> Result<Vec<Interval>, SyncError> {
    let raw = config
        .get_string(SECTION, "required_intervals")
        .unwrap_or_else(|| DEFAULT_REQUIRED_INTERVALS.to_string());

    let mut intervals = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let interval: Interval = token
            .parse()
            .map_err(|reason: String| invalid(SECTION, "required_intervals", &reason))?;
        if !intervals.contains(&interval) {
            intervals.push(interval);
        }
    }
    if intervals.is_empty() {
        return Err(invalid(
            SECTION,
            "required_intervals",
            "at least one interval is required",
        ));
    }
    intervals.sort();
    Ok(intervals)
}

fn parse_calendar(config: &dyn ConfigPort) -> Result<ExchangeCalendar, SyncError> {
    let name = config
        .get_string("calendar", "exchange")
        .unwrap_or_else(|| "NYSE".to_string());
    let calendar = ExchangeCalendar::from_name(&name)
        .ok_or_else(|| invalid("calendar", "exchange", "expected NYSE, ASX or WEEKDAYS"))?;

    let mut extra = Vec::new();
    for token in config.get_list("calendar", "extra_holidays") {
        let date = NaiveDate::parse_from_str(&token, "%Y-%m-%d").map_err(|_| {
            invalid(
                "calendar",
                "extra_holidays",
                "invalid date format, expected YYYY-MM-DD",
            )
        })?;
        extra.push(date);
    }

    Ok(calendar.with_extra_holidays(extra))
}
