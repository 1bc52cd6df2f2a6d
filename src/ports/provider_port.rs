//! Bar provider port trait.

use crate::domain::error::SyncError;
use crate::domain::ohlcv::Bar;
use crate::domain::series::{Interval, SeriesId};
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Bars for `[end - lookback_days, end]`; `end` defaults to now.
#[derive(Debug, Clone, PartialEq)]
pub struct BarRequest {
    pub series: SeriesId,
    pub lookback_days: u32,
    pub end: Option<NaiveDateTime>,
}

impl BarRequest {
    pub fn window(&self, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
        let end = self.end.unwrap_or(now);
        (end - Duration::days(self.lookback_days as i64), end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchedBars {
    /// Ascending by timestamp.
    pub bars: Vec<Bar>,
    /// Bars discarded for malformed timestamps.
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Bars(FetchedBars),
    /// Nothing in the requested window: the provider has no history this far
    /// back (or nothing newer yet).
    NoData,
}

pub trait BarProvider {
    fn name(&self) -> &str;

    /// Cheap reachability probe; failure aborts a run during discovery.
    fn check_connection(&self) -> Result<(), SyncError>;

    /// Longest window a single call may request. Finer intervals get shorter
    /// windows.
    fn max_lookback_days(&self, interval: Interval) -> u32;

    /// Requests longer than [`max_lookback_days`](Self::max_lookback_days)
    /// fail with [`SyncError::LookbackExceeded`].
    fn fetch_bars(&self, request: &BarRequest) -> Result<FetchOutcome, SyncError>;

    /// The provider floor; `None` when the provider cannot say.
    fn earliest_available_timestamp(
        &self,
        series: &SeriesId,
    ) -> Result<Option<NaiveDateTime>, SyncError>;

    /// Last trade date of a futures contract.
    fn last_trade_date(&self, _series: &SeriesId) -> Result<Option<NaiveDate>, SyncError> {
        Ok(None)
    }
}

impl<P: BarProvider + ?Sized> BarProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn check_connection(&self) -> Result<(), SyncError> {
        (**self).check_connection()
    }

    fn max_lookback_days(&self, interval: Interval) -> u32 {
        (**self).max_lookback_days(interval)
    }

    fn fetch_bars(&self, request: &BarRequest) -> Result<FetchOutcome, SyncError> {
        (**self).fetch_bars(request)
    }

    fn earliest_available_timestamp(
        &self,
        series: &SeriesId,
    ) -> Result<Option<NaiveDateTime>, SyncError> {
        (**self).earliest_available_timestamp(series)
    }

    fn last_trade_date(&self, series: &SeriesId) -> Result<Option<NaiveDate>, SyncError> {
        (**self).last_trade_date(series)
    }
}

/// Shared guard for adapters: reject windows longer than the maximum.
pub fn check_lookback(provider: &dyn BarProvider, request: &BarRequest) -> Result<(), SyncError> {
    let maximum = provider.max_lookback_days(request.series.interval);
    if request.lookback_days > maximum {
        return Err(SyncError::LookbackExceeded {
            interval: request.series.interval.to_string(),
            requested: request.lookback_days,
            maximum,
        });
    }
    Ok(())
}
