//! In-process store and catalog. Used for dry runs and tests; nothing is
//! persisted.

use crate::domain::catalog::{CatalogEntry, CatalogUpdate};
use crate::domain::error::SyncError;
use crate::domain::ohlcv::Bar;
use crate::domain::series::SeriesId;
use crate::ports::catalog_port::CatalogPort;
use crate::ports::series_port::SeriesRepository;
use crate::ports::store_port::TimeSeriesStore;
use chrono::{NaiveDate, NaiveDateTime};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default)]
pub struct MemoryRepository {
    /// Rows in insertion order, keyed by table name.
    tables: RefCell<BTreeMap<String, Vec<Bar>>>,
    catalog: RefCell<BTreeMap<String, CatalogEntry>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<F>(&self, series: &SeriesId, f: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut CatalogEntry),
    {
        let mut catalog = self.catalog.borrow_mut();
        let entry = catalog
            .get_mut(&series.table_name())
            .ok_or_else(|| SyncError::SeriesNotFound {
                series: series.table_name(),
            })?;
        f(entry);
        Ok(())
    }
}

impl TimeSeriesStore for MemoryRepository {
    fn append(&self, series: &SeriesId, bars: &[Bar]) -> Result<usize, SyncError> {
        self.tables
            .borrow_mut()
            .entry(series.table_name())
            .or_default()
            .extend_from_slice(bars);
        Ok(bars.len())
    }

    fn dedup(&self, series: &SeriesId) -> Result<usize, SyncError> {
        let mut tables = self.tables.borrow_mut();
        let Some(rows) = tables.get_mut(&series.table_name()) else {
            return Ok(0);
        };
        let before = rows.len();
        let mut seen = HashSet::new();
        rows.retain(|bar| seen.insert(bar.timestamp));
        Ok(before - rows.len())
    }

    fn read_range(
        &self,
        series: &SeriesId,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, SyncError> {
        let tables = self.tables.borrow();
        let mut bars: Vec<Bar> = tables
            .get(&series.table_name())
            .map(|rows| {
                rows.iter()
                    .filter(|b| from.is_none_or(|f| b.timestamp >= f))
                    .filter(|b| to.is_none_or(|t| b.timestamp <= t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    fn min_timestamp(&self, series: &SeriesId) -> Result<Option<NaiveDateTime>, SyncError> {
        Ok(self
            .tables
            .borrow()
            .get(&series.table_name())
            .and_then(|rows| rows.iter().map(|b| b.timestamp).min()))
    }

    fn max_timestamp(&self, series: &SeriesId) -> Result<Option<NaiveDateTime>, SyncError> {
        Ok(self
            .tables
            .borrow()
            .get(&series.table_name())
            .and_then(|rows| rows.iter().map(|b| b.timestamp).max()))
    }

    fn series_exists(&self, series: &SeriesId) -> Result<bool, SyncError> {
        Ok(self.tables.borrow().contains_key(&series.table_name()))
    }

    fn row_count(&self, series: &SeriesId) -> Result<usize, SyncError> {
        Ok(self
            .tables
            .borrow()
            .get(&series.table_name())
            .map_or(0, Vec::len))
    }

    fn drop_series(&self, series: &SeriesId) -> Result<bool, SyncError> {
        Ok(self
            .tables
            .borrow_mut()
            .remove(&series.table_name())
            .is_some())
    }
}

impl CatalogPort for MemoryRepository {
    fn get(&self, series: &SeriesId) -> Result<Option<CatalogEntry>, SyncError> {
        Ok(self.catalog.borrow().get(&series.table_name()).cloned())
    }

    fn list_entries(&self) -> Result<Vec<CatalogEntry>, SyncError> {
        Ok(self.catalog.borrow().values().cloned().collect())
    }

    fn upsert(&self, update: &CatalogUpdate) -> Result<CatalogEntry, SyncError> {
        let mut catalog = self.catalog.borrow_mut();
        let entry = catalog
            .entry(update.series.table_name())
            .and_modify(|e| e.merge(update))
            .or_insert_with(|| CatalogEntry::from_update(update));
        Ok(entry.clone())
    }

    fn mark_gap_scan(&self, series: &SeriesId, date: NaiveDate) -> Result<(), SyncError> {
        self.with_entry(series, |e| e.last_gap_scan_date = Some(date))
    }

    fn mark_history_exhausted(&self, series: &SeriesId) -> Result<(), SyncError> {
        self.with_entry(series, CatalogEntry::mark_history_exhausted)
    }

    fn purge(&self, series: &SeriesId) -> Result<bool, SyncError> {
        Ok(self
            .catalog
            .borrow_mut()
            .remove(&series.table_name())
            .is_some())
    }
}

impl SeriesRepository for MemoryRepository {}
