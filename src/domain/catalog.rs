//! Record catalog entries: what is known about each stored series and how
//! a new write folds into it.

use crate::domain::calendar::business_days_between;
use crate::domain::series::{Interval, SeriesId};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub series: SeriesId,
    pub first_record_date: NaiveDateTime,
    pub last_update_date: NaiveDateTime,
    pub num_missing_business_days: i64,
    pub last_gap_scan_date: Option<NaiveDate>,
    pub last_trade_date: Option<NaiveDate>,
    pub provider_floor: Option<NaiveDateTime>,
    /// The provider has no history older than `first_record_date`.
    pub history_exhausted: bool,
}

/// Coverage observed after a write, plus whatever the provider reported.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogUpdate {
    pub series: SeriesId,
    pub first_record_date: NaiveDateTime,
    pub last_update_date: NaiveDateTime,
    pub provider_floor: Option<NaiveDateTime>,
    pub last_trade_date: Option<NaiveDate>,
}

/// Business days between the provider floor and the first stored record.
pub fn missing_business_days(floor: NaiveDateTime, first_record: NaiveDateTime) -> i64 {
    business_days_between(floor.date(), first_record.date())
}

impl CatalogEntry {
    pub fn name(&self) -> String {
        self.series.table_name()
    }

    pub fn from_update(update: &CatalogUpdate) -> Self {
        let num_missing_business_days = update
            .provider_floor
            .map(|floor| missing_business_days(floor, update.first_record_date))
            .unwrap_or(0);
        Self {
            series: update.series.clone(),
            first_record_date: update.first_record_date,
            last_update_date: update.last_update_date,
            num_missing_business_days,
            last_gap_scan_date: None,
            last_trade_date: update.last_trade_date,
            provider_floor: update.provider_floor,
            history_exhausted: false,
        }
    }

    /// Fold a write into an existing entry. The first record only moves
    /// earlier and the last update never moves backwards; missing days are
    /// recomputed only when a fresh provider floor is supplied.
    pub fn merge(&mut self, update: &CatalogUpdate) {
        if update.first_record_date < self.first_record_date {
            self.first_record_date = update.first_record_date;
        }
        if update.last_update_date > self.last_update_date {
            self.last_update_date = update.last_update_date;
        }
        if let Some(floor) = update.provider_floor {
            self.provider_floor = Some(floor);
            self.num_missing_business_days = if self.history_exhausted {
                0
            } else {
                missing_business_days(floor, self.first_record_date)
            };
        }
        if update.last_trade_date.is_some() {
            self.last_trade_date = update.last_trade_date;
        }
    }

    pub fn mark_history_exhausted(&mut self) {
        self.history_exhausted = true;
        self.num_missing_business_days = 0;
    }

    /// Business days elapsed since the last stored bar.
    pub fn staleness(&self, today: NaiveDate) -> i64 {
        business_days_between(self.last_update_date.date(), today)
    }

    /// A futures contract past its last trade date with no further history.
    pub fn is_closed(&self, today: NaiveDate) -> bool {
        match self.last_trade_date {
            Some(ltd) => ltd < today && (self.history_exhausted || self.last_update_date.date() >= ltd),
            None => false,
        }
    }

    pub fn is_stale(&self, threshold_days: i64, today: NaiveDate) -> bool {
        !self.is_closed(today) && self.staleness(today) >= threshold_days
    }

    pub fn needs_backfill(&self) -> bool {
        !self.history_exhausted && self.num_missing_business_days > 0
    }

    pub fn gap_scan_due(&self, interval_days: i64, today: NaiveDate) -> bool {
        match self.last_gap_scan_date {
            None => true,
            Some(scanned) => (today - scanned).num_days() >= interval_days,
        }
    }
}

/// Entries whose staleness meets the threshold, ordered most stale first.
pub fn select_stale(
    entries: &[CatalogEntry],
    threshold_days: i64,
    today: NaiveDate,
) -> Vec<CatalogEntry> {
    let mut stale: Vec<CatalogEntry> = entries
        .iter()
        .filter(|e| e.is_stale(threshold_days, today))
        .cloned()
        .collect();
    stale.sort_by(|a, b| {
        b.staleness(today)
            .cmp(&a.staleness(today))
            .then_with(|| a.series.cmp(&b.series))
    });
    stale
}

/// For every tracked instrument, the required intervals it has no entry for.
/// Keys are instrument keys (`SYMBOL` or `SYMBOL:YYYYMM`); the value carries a
/// template series to derive the missing ids from.
pub fn select_missing_intervals(
    entries: &[CatalogEntry],
    required: &[Interval],
) -> BTreeMap<String, (SeriesId, Vec<Interval>)> {
    let mut present: BTreeMap<String, (SeriesId, BTreeSet<Interval>)> = BTreeMap::new();
    for entry in entries {
        present
            .entry(entry.series.instrument_key())
            .or_insert_with(|| (entry.series.clone(), BTreeSet::new()))
            .1
            .insert(entry.series.interval);
    }

    present
        .into_iter()
        .filter_map(|(key, (template, have))| {
            let missing: Vec<Interval> = required
                .iter()
                .filter(|i| !have.contains(i))
                .copied()
                .collect();
            if missing.is_empty() {
                None
            } else {
                Some((key, (template, missing)))
            }
        })
        .collect()
}
