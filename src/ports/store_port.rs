//! Time-series store port trait.

use crate::domain::error::SyncError;
use crate::domain::ohlcv::Bar;
use crate::domain::series::SeriesId;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;

/// Durable storage with one table per series.
///
/// Reads against a series that has never been written return empty results
/// rather than an error.
pub trait TimeSeriesStore {
    /// Insert rows as-is. Duplicate timestamps are allowed until the next
    /// [`dedup`](Self::dedup). Returns the number of rows inserted.
    fn append(&self, series: &SeriesId, bars: &[Bar]) -> Result<usize, SyncError>;

    /// Keep the earliest-inserted row of every timestamp group. Returns the
    /// number of rows removed; a second call always returns 0.
    fn dedup(&self, series: &SeriesId) -> Result<usize, SyncError>;

    /// Bars with `from <= timestamp <= to`, ascending.
    fn read_range(
        &self,
        series: &SeriesId,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, SyncError>;

    fn min_timestamp(&self, series: &SeriesId) -> Result<Option<NaiveDateTime>, SyncError>;

    fn max_timestamp(&self, series: &SeriesId) -> Result<Option<NaiveDateTime>, SyncError>;

    fn series_exists(&self, series: &SeriesId) -> Result<bool, SyncError>;

    fn row_count(&self, series: &SeriesId) -> Result<usize, SyncError>;

    /// Administrative purge. Returns whether the table existed.
    fn drop_series(&self, series: &SeriesId) -> Result<bool, SyncError>;

    /// Distinct calendar dates present in `[from, to]`.
    fn distinct_dates(
        &self,
        series: &SeriesId,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Result<BTreeSet<NaiveDate>, SyncError> {
        Ok(self
            .read_range(series, from, to)?
            .iter()
            .map(Bar::date)
            .collect())
    }
}
