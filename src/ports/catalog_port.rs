//! Record catalog port trait.

use crate::domain::catalog::{select_missing_intervals, select_stale, CatalogEntry, CatalogUpdate};
use crate::domain::error::SyncError;
use crate::domain::series::{Interval, SeriesId};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

pub trait CatalogPort {
    fn get(&self, series: &SeriesId) -> Result<Option<CatalogEntry>, SyncError>;

    /// All entries, ordered by series name.
    fn list_entries(&self) -> Result<Vec<CatalogEntry>, SyncError>;

    /// Create or merge an entry (see [`CatalogEntry::merge`]).
    fn upsert(&self, update: &CatalogUpdate) -> Result<CatalogEntry, SyncError>;

    fn mark_gap_scan(&self, series: &SeriesId, date: NaiveDate) -> Result<(), SyncError>;

    /// Set the terminal flag and pin missing days to zero.
    fn mark_history_exhausted(&self, series: &SeriesId) -> Result<(), SyncError>;

    /// Remove the entry. Returns whether it existed.
    fn purge(&self, series: &SeriesId) -> Result<bool, SyncError>;

    fn list_stale(&self, threshold_days: i64, today: NaiveDate) -> Result<Vec<CatalogEntry>, SyncError> {
        Ok(select_stale(&self.list_entries()?, threshold_days, today))
    }

    fn list_missing_intervals(
        &self,
        required: &[Interval],
    ) -> Result<BTreeMap<String, (SeriesId, Vec<Interval>)>, SyncError> {
        Ok(select_missing_intervals(&self.list_entries()?, required))
    }

    /// Instrument keys (`SYMBOL` or `SYMBOL:YYYYMM`) with at least one entry.
    fn tracked_instruments(&self) -> Result<BTreeSet<String>, SyncError> {
        Ok(self
            .list_entries()?
            .iter()
            .map(|e| e.series.instrument_key())
            .collect())
    }
}
