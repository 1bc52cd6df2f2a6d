#![allow(dead_code)]

use barsync::domain::calendar::{is_weekday, ExchangeCalendar, HolidayRules};
use barsync::domain::error::SyncError;
pub use barsync::domain::ohlcv::Bar;
use barsync::domain::series::{ContractMonth, InstrumentKind, Interval, SeriesId};
use barsync::domain::sync_config::SyncConfig;
use barsync::ports::provider_port::{
    check_lookback, BarProvider, BarRequest, FetchOutcome, FetchedBars,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Serves canned bar histories per table name, filtered to each request
/// window, and records every fetch.
pub struct MockProvider {
    pub bars: HashMap<String, Vec<Bar>>,
    pub floors: HashMap<String, NaiveDateTime>,
    pub last_trades: HashMap<String, NaiveDate>,
    pub errors: HashMap<String, String>,
    pub unavailable: HashMap<String, String>,
    pub window: u32,
    pub reachable: bool,
    pub calls: Cell<usize>,
    pub requests: RefCell<Vec<BarRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            bars: HashMap::new(),
            floors: HashMap::new(),
            last_trades: HashMap::new(),
            errors: HashMap::new(),
            unavailable: HashMap::new(),
            window: 10_000,
            reachable: true,
            calls: Cell::new(0),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn with_bars(mut self, series: &SeriesId, bars: Vec<Bar>) -> Self {
        self.bars.insert(series.table_name(), bars);
        self
    }

    pub fn with_floor(mut self, series: &SeriesId, floor: NaiveDateTime) -> Self {
        self.floors.insert(series.table_name(), floor);
        self
    }

    pub fn with_last_trade(mut self, series: &SeriesId, date: NaiveDate) -> Self {
        self.last_trades.insert(series.table_name(), date);
        self
    }

    /// Fetches for `series` fail as rate limited.
    pub fn with_error(mut self, series: &SeriesId, reason: &str) -> Self {
        self.errors.insert(series.table_name(), reason.to_string());
        self
    }

    /// Fetches for `series` fail as if the connection dropped.
    pub fn with_outage(mut self, series: &SeriesId, reason: &str) -> Self {
        self.unavailable.insert(series.table_name(), reason.to_string());
        self
    }

    pub fn with_window(mut self, days: u32) -> Self {
        self.window = days;
        self
    }

    pub fn offline(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn fetches_for(&self, series: &SeriesId) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|r| &r.series == series)
            .count()
    }
}

impl BarProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn check_connection(&self) -> Result<(), SyncError> {
        if self.reachable {
            Ok(())
        } else {
            Err(SyncError::ProviderUnavailable {
                reason: "connection refused".into(),
            })
        }
    }

    fn max_lookback_days(&self, _interval: Interval) -> u32 {
        self.window
    }

    fn fetch_bars(&self, request: &BarRequest) -> Result<FetchOutcome, SyncError> {
        check_lookback(self, request)?;
        self.calls.set(self.calls.get() + 1);
        self.requests.borrow_mut().push(request.clone());

        let table = request.series.table_name();
        if let Some(reason) = self.unavailable.get(&table) {
            return Err(SyncError::ProviderUnavailable {
                reason: reason.clone(),
            });
        }
        if let Some(reason) = self.errors.get(&table) {
            return Err(SyncError::ProviderRateLimited {
                symbol: request.series.symbol.clone(),
                reason: reason.clone(),
            });
        }

        let (from, to) = request.window(dt(2100, 1, 1));
        let bars: Vec<Bar> = self
            .bars
            .get(&table)
            .map(|all| {
                all.iter()
                    .filter(|b| b.timestamp >= from && b.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if bars.is_empty() {
            Ok(FetchOutcome::NoData)
        } else {
            Ok(FetchOutcome::Bars(FetchedBars { bars, dropped: 0 }))
        }
    }

    fn earliest_available_timestamp(
        &self,
        series: &SeriesId,
    ) -> Result<Option<NaiveDateTime>, SyncError> {
        Ok(self.floors.get(&series.table_name()).copied())
    }

    fn last_trade_date(&self, series: &SeriesId) -> Result<Option<NaiveDate>, SyncError> {
        Ok(self.last_trades.get(&series.table_name()).copied())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
    date(y, m, d).and_time(NaiveTime::MIN)
}

pub fn dt_hms(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, mi, s).unwrap()
}

pub fn make_bar(timestamp: NaiveDateTime, close: f64) -> Bar {
    Bar {
        timestamp,
        open: close - 0.5,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1_000,
    }
}

/// One midnight bar per weekday in `[from, to]`.
pub fn weekday_bars(from: NaiveDate, to: NaiveDate) -> Vec<Bar> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .filter(|d| is_weekday(*d))
        .enumerate()
        .map(|(i, d)| make_bar(d.and_time(NaiveTime::MIN), 100.0 + i as f64))
        .collect()
}

/// The `count` weekday bars ending on `last` (inclusive).
pub fn weekday_bars_ending(last: NaiveDate, count: usize) -> Vec<Bar> {
    let mut days = Vec::with_capacity(count);
    let mut day = last;
    while days.len() < count {
        if is_weekday(day) {
            days.push(day);
        }
        day -= Duration::days(1);
    }
    days.reverse();
    days.into_iter()
        .enumerate()
        .map(|(i, d)| make_bar(d.and_time(NaiveTime::MIN), 100.0 + i as f64))
        .collect()
}

pub fn stock(symbol: &str, interval: Interval) -> SeriesId {
    SeriesId::new(symbol, InstrumentKind::Stock, interval)
}

pub fn contract(symbol: &str, year: i32, month: u32, interval: Interval) -> SeriesId {
    SeriesId::future(symbol, ContractMonth::new(year, month).unwrap(), interval)
}

/// Daily-only sync with a Mon-Fri calendar.
pub fn daily_config() -> SyncConfig {
    SyncConfig {
        required_intervals: vec![Interval::OneDay],
        calendar: ExchangeCalendar::new(HolidayRules::Weekdays),
        ..SyncConfig::default()
    }
}
