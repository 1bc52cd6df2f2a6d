//! Combined store + catalog write path.

use crate::domain::catalog::{CatalogEntry, CatalogUpdate};
use crate::domain::error::SyncError;
use crate::domain::ohlcv::Bar;
use crate::domain::series::SeriesId;
use crate::ports::catalog_port::CatalogPort;
use crate::ports::store_port::TimeSeriesStore;
use chrono::{NaiveDate, NaiveDateTime};

#[derive(Debug, Clone)]
pub struct WriteResult {
    pub entry: CatalogEntry,
    pub appended: usize,
    pub duplicates_removed: usize,
}

impl WriteResult {
    /// Rows the series actually gained.
    pub fn net_new(&self) -> usize {
        self.appended.saturating_sub(self.duplicates_removed)
    }
}

/// Every append goes through [`write_batch`](Self::write_batch) so the
/// catalog entry always matches the series' stored min/max timestamps.
pub trait SeriesRepository: TimeSeriesStore + CatalogPort {
    /// Append, dedup, then upsert the catalog from the stored bounds.
    /// Implementations backed by a transactional store should override this
    /// to run all three steps atomically.
    fn write_batch(
        &self,
        series: &SeriesId,
        bars: &[Bar],
        provider_floor: Option<NaiveDateTime>,
        last_trade_date: Option<NaiveDate>,
    ) -> Result<WriteResult, SyncError> {
        let appended = self.append(series, bars)?;
        let duplicates_removed = self.dedup(series)?;

        let not_found = || SyncError::SeriesNotFound {
            series: series.table_name(),
        };
        let first = self.min_timestamp(series)?.ok_or_else(not_found)?;
        let last = self.max_timestamp(series)?.ok_or_else(not_found)?;

        let entry = self.upsert(&CatalogUpdate {
            series: series.clone(),
            first_record_date: first,
            last_update_date: last,
            provider_floor,
            last_trade_date,
        })?;

        Ok(WriteResult {
            entry,
            appended,
            duplicates_removed,
        })
    }
}
