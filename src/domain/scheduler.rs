//! Sync scheduler.
//!
//! One [`SyncScheduler::run`] walks a namespace through
//! `Idle -> Discovering -> Backfilling -> InteriorGapFill -> Idle`:
//!
//! - **Discovering** checks the provider connection, then seeds every
//!   watch-list instrument that has no catalog entries (and every partially
//!   onboarded instrument's missing intervals) at the default deep lookback.
//! - **Backfilling** refreshes stale series forwards from their last update and
//!   extends series with missing business days backwards towards the provider
//!   floor.
//! - **InteriorGapFill** scans daily-or-finer series for missing trading days
//!   between their first and last stored bars and refetches around each run.
//!
//! Every fetched chunk is written through
//! [`SeriesRepository::write_batch`] before the next provider call. Failures
//! of a single series are recorded in the [`RunSummary`] and never stop the
//! run; only a connectivity failure during discovery aborts it.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::domain::catalog::CatalogEntry;
use crate::domain::error::SyncError;
use crate::domain::gap::{gap_runs, interior_gaps};
use crate::domain::ohlcv::Bar;
use crate::domain::report::{Outcome, Phase, RunSummary};
use crate::domain::series::{InstrumentKind, Interval, SeriesId};
use crate::domain::sync_config::SyncConfig;
use crate::domain::watchlist::WatchItem;
use crate::ports::provider_port::{BarProvider, BarRequest, FetchOutcome};
use crate::ports::series_port::SeriesRepository;

/// Whole days covering `span`, rounded up. Zero or negative spans yield 0.
fn days_ceil(span: Duration) -> i64 {
    let secs = span.num_seconds();
    if secs <= 0 { 0 } else { (secs + 86_399) / 86_400 }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// Latest instant a series can have bars for: `now`, or the end of a futures
/// contract's last trade date when that comes first.
fn data_horizon(now: NaiveDateTime, last_trade: Option<NaiveDate>) -> NaiveDateTime {
    match last_trade {
        Some(ltd) => now.min(midnight(ltd + Duration::days(1))),
        None => now,
    }
}

/// Running tally for one series step.
#[derive(Default)]
struct Progress {
    written: usize,
    fetched_any: bool,
}

impl Progress {
    fn outcome(&self) -> Outcome {
        if self.written > 0 {
            Outcome::Updated {
                bars_written: self.written,
            }
        } else if self.fetched_any {
            Outcome::UpToDate
        } else {
            Outcome::NoData
        }
    }
}

pub struct SyncScheduler<'a> {
    repo: &'a dyn SeriesRepository,
    provider: &'a dyn BarProvider,
    config: &'a SyncConfig,
    kind: InstrumentKind,
}

impl<'a> SyncScheduler<'a> {
    pub fn new(
        repo: &'a dyn SeriesRepository,
        provider: &'a dyn BarProvider,
        config: &'a SyncConfig,
        kind: InstrumentKind,
    ) -> Self {
        Self {
            repo,
            provider,
            config,
            kind,
        }
    }

    /// Run every phase once. `now` anchors staleness and fetch windows.
    ///
    /// Returns `Err` only when the run is aborted: the provider is unreachable
    /// during discovery, or the catalog itself cannot be read.
    pub fn run(&self, watchlist: &[WatchItem], now: NaiveDateTime) -> Result<RunSummary, SyncError> {
        let started = Instant::now();
        let mut summary = RunSummary::new();

        let seeded = self.discover(watchlist, now, &mut summary)?;
        self.backfill(&seeded, now, &mut summary)?;
        self.fill_interior_gaps(now, &mut summary)?;

        self.enter(Phase::Idle);
        for entry in self.repo.list_entries()? {
            if summary.outcomes_for(&entry.series).next().is_none() {
                summary.record(&entry.series, Phase::Idle, Outcome::UpToDate);
            }
        }
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    fn enter(&self, phase: Phase) {
        tracing::info!(namespace = self.kind.as_str(), %phase, "entering phase");
    }

    fn series_for(&self, item: &WatchItem, interval: Interval) -> SeriesId {
        match item.expiry {
            Some(expiry) => SeriesId::future(&item.symbol, expiry, interval),
            None => SeriesId::new(&item.symbol, self.kind, interval),
        }
    }

    fn max_window(&self, interval: Interval) -> i64 {
        self.provider.max_lookback_days(interval).max(1) as i64
    }

    fn settle(
        &self,
        series: &SeriesId,
        phase: Phase,
        result: Result<Outcome, SyncError>,
        summary: &mut RunSummary,
    ) {
        match result {
            Ok(outcome) => {
                tracing::info!(series = %series, %phase, %outcome, "series step finished");
                summary.record(series, phase, outcome);
            }
            Err(e) => {
                tracing::warn!(series = %series, %phase, error = %e, "series step failed, continuing");
                summary.record(
                    series,
                    phase,
                    Outcome::Failed {
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    /// One provider call. Empty batches are reported as no data.
    fn fetch(
        &self,
        series: &SeriesId,
        lookback_days: i64,
        end: NaiveDateTime,
        summary: &mut RunSummary,
    ) -> Result<Option<Vec<Bar>>, SyncError> {
        let request = BarRequest {
            series: series.clone(),
            lookback_days: lookback_days.clamp(0, u32::MAX as i64) as u32,
            end: Some(end),
        };
        summary.fetch_calls += 1;
        tracing::debug!(series = %series, lookback_days, end = %end, "fetching bars");

        match self.provider.fetch_bars(&request)? {
            FetchOutcome::Bars(batch) => {
                summary.bars_dropped += batch.dropped;
                if batch.bars.is_empty() {
                    Ok(None)
                } else {
                    tracing::debug!(series = %series, bars = batch.bars.len(), "fetched bars");
                    Ok(Some(batch.bars))
                }
            }
            FetchOutcome::NoData => Ok(None),
        }
    }

    // -- Discovering --

    fn discover(
        &self,
        watchlist: &[WatchItem],
        now: NaiveDateTime,
        summary: &mut RunSummary,
    ) -> Result<BTreeSet<SeriesId>, SyncError> {
        self.enter(Phase::Discovering);

        if let Err(e) = self.provider.check_connection() {
            tracing::error!(provider = self.provider.name(), error = %e, "provider unreachable, aborting run");
            return Err(e);
        }

        let tracked = self.repo.tracked_instruments()?;
        let mut seeded = BTreeSet::new();

        for item in watchlist {
            if tracked.contains(&item.key()) {
                continue;
            }
            tracing::info!(instrument = %item, "new instrument");
            for &interval in &self.config.required_intervals {
                let series = self.series_for(item, interval);
                self.seed(&series, now, summary)?;
                seeded.insert(series);
            }
        }

        let partial = self
            .repo
            .list_missing_intervals(&self.config.required_intervals)?;
        for (instrument, (template, intervals)) in partial {
            for interval in intervals {
                let series = template.with_interval(interval);
                if seeded.contains(&series) {
                    continue;
                }
                tracing::info!(%instrument, %interval, "seeding missing interval");
                self.seed(&series, now, summary)?;
                seeded.insert(series);
            }
        }

        Ok(seeded)
    }

    fn seed(
        &self,
        series: &SeriesId,
        now: NaiveDateTime,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        match self.seed_series(series, now, summary) {
            Err(e) if e.is_connectivity() => {
                tracing::error!(series = %series, error = %e, "provider lost during discovery, aborting run");
                Err(e)
            }
            result => {
                self.settle(series, Phase::Discovering, result, summary);
                Ok(())
            }
        }
    }

    /// Fetch the default deep lookback (capped at the provider floor) in
    /// windows walking back from `now`, or from the last trade date of an
    /// expired contract.
    fn seed_series(
        &self,
        series: &SeriesId,
        now: NaiveDateTime,
        summary: &mut RunSummary,
    ) -> Result<Outcome, SyncError> {
        let floor = self.provider.earliest_available_timestamp(series)?;
        let last_trade = self.provider.last_trade_date(series)?;

        let anchor = data_horizon(now, last_trade);

        let mut remaining = self.config.lookback_for(series.interval) as i64;
        if let Some(floor) = floor {
            remaining = remaining.min(days_ceil(anchor - floor));
        }
        let window = self.max_window(series.interval);

        let mut progress = Progress::default();
        let mut end = anchor;
        while remaining > 0 {
            let chunk = remaining.min(window);
            match self.fetch(series, chunk, end, summary)? {
                Some(bars) => {
                    let result = self.repo.write_batch(series, &bars, floor, last_trade)?;
                    progress.written += result.net_new();
                    progress.fetched_any = true;
                }
                None => {
                    if progress.fetched_any {
                        tracing::info!(series = %series, "no older history, marking exhausted");
                        self.repo.mark_history_exhausted(series)?;
                    }
                    break;
                }
            }
            end -= Duration::days(chunk);
            remaining -= chunk;
        }

        Ok(progress.outcome())
    }

    // -- Backfilling --

    fn backfill(
        &self,
        seeded: &BTreeSet<SeriesId>,
        now: NaiveDateTime,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        self.enter(Phase::Backfilling);
        let today = now.date();

        let stale = self
            .repo
            .list_stale(self.config.update_threshold_days, today)?;
        for entry in stale.iter().filter(|e| !seeded.contains(&e.series)) {
            tracing::info!(
                series = %entry.series,
                staleness = entry.staleness(today),
                "refreshing stale series"
            );
            let result = self.refresh(entry, now, summary);
            self.settle(&entry.series, Phase::Backfilling, result, summary);
        }

        let incomplete: Vec<CatalogEntry> = self
            .repo
            .list_entries()?
            .into_iter()
            .filter(|e| e.needs_backfill() && !seeded.contains(&e.series))
            .collect();
        for entry in &incomplete {
            tracing::info!(
                series = %entry.series,
                missing_business_days = entry.num_missing_business_days,
                "extending history"
            );
            let result = self.extend_history(entry, summary);
            self.settle(&entry.series, Phase::Backfilling, result, summary);
        }

        Ok(())
    }

    /// Forward refresh from `last_update_date` to `now`, oldest window first.
    /// An expired contract that yields no new rows is closed.
    fn refresh(
        &self,
        entry: &CatalogEntry,
        now: NaiveDateTime,
        summary: &mut RunSummary,
    ) -> Result<Outcome, SyncError> {
        let series = &entry.series;
        let window = self.max_window(series.interval);

        let horizon = data_horizon(now, entry.last_trade_date);

        let mut progress = Progress::default();
        let mut cursor = entry.last_update_date;
        let mut calls = 0;
        while cursor < horizon && calls < self.config.max_backfill_chunks {
            let chunk = days_ceil(horizon - cursor).min(window);
            let end = (cursor + Duration::days(chunk)).min(horizon);
            calls += 1;
            if let Some(bars) = self.fetch(series, chunk, end, summary)? {
                let result = self
                    .repo
                    .write_batch(series, &bars, None, entry.last_trade_date)?;
                progress.written += result.net_new();
                progress.fetched_any = true;
            }
            cursor = end;
        }

        let expired = entry.last_trade_date.is_some_and(|ltd| ltd < now.date());
        if expired && progress.written == 0 {
            tracing::info!(series = %series, "contract expired with no further data");
            self.repo.mark_history_exhausted(series)?;
        }

        Ok(progress.outcome())
    }

    /// Backwards backfill from `first_record_date` towards the provider floor.
    /// Reaching the floor or getting no data marks the series exhausted.
    fn extend_history(
        &self,
        entry: &CatalogEntry,
        summary: &mut RunSummary,
    ) -> Result<Outcome, SyncError> {
        let series = &entry.series;
        let floor = match self.provider.earliest_available_timestamp(series)? {
            Some(floor) => floor,
            None => match entry.provider_floor {
                Some(floor) => floor,
                None => return Ok(Outcome::UpToDate),
            },
        };
        let window = self.max_window(series.interval);

        let mut progress = Progress::default();
        let mut end = entry.first_record_date;
        for _ in 0..self.config.max_backfill_chunks {
            let lookback = days_ceil(end - floor);
            if lookback <= 0 {
                tracing::info!(series = %series, "reached provider floor");
                self.repo.mark_history_exhausted(series)?;
                return Ok(match progress.outcome() {
                    Outcome::NoData => Outcome::UpToDate,
                    other => other,
                });
            }

            let chunk = lookback.min(window);
            match self.fetch(series, chunk, end, summary)? {
                Some(bars) => {
                    let result =
                        self.repo
                            .write_batch(series, &bars, Some(floor), entry.last_trade_date)?;
                    progress.written += result.net_new();
                    progress.fetched_any = true;
                }
                None => {
                    tracing::info!(series = %series, "provider has no older history");
                    self.repo.mark_history_exhausted(series)?;
                    break;
                }
            }
            end -= Duration::days(chunk);
        }

        Ok(progress.outcome())
    }

    // -- InteriorGapFill --

    fn fill_interior_gaps(&self, now: NaiveDateTime, summary: &mut RunSummary) -> Result<(), SyncError> {
        self.enter(Phase::InteriorGapFill);
        let today = now.date();

        let due: Vec<CatalogEntry> = self
            .repo
            .list_entries()?
            .into_iter()
            .filter(|e| {
                e.series.interval.is_daily_or_finer()
                    && e.gap_scan_due(self.config.gap_scan_interval_days, today)
            })
            .collect();

        for entry in &due {
            let result = self.fill_series_gaps(entry, summary);
            if result.is_ok() {
                if let Err(e) = self.repo.mark_gap_scan(&entry.series, today) {
                    self.settle(&entry.series, Phase::InteriorGapFill, Err(e), summary);
                    continue;
                }
            }
            self.settle(&entry.series, Phase::InteriorGapFill, result, summary);
        }

        Ok(())
    }

    /// Refetch around each run of missing trading days, newest run first,
    /// bounded by `max_gap_fills` calls.
    fn fill_series_gaps(
        &self,
        entry: &CatalogEntry,
        summary: &mut RunSummary,
    ) -> Result<Outcome, SyncError> {
        let series = &entry.series;
        let present = self.repo.distinct_dates(series, None, None)?;
        let report = interior_gaps(&present, &self.config.calendar);
        if report.is_empty() {
            return Ok(Outcome::UpToDate);
        }

        let runs = gap_runs(&report, &self.config.calendar);
        tracing::info!(
            series = %series,
            missing = report.len(),
            runs = runs.len(),
            "interior gaps detected"
        );

        let window = self.max_window(series.interval);
        let mut progress = Progress::default();
        let mut calls = 0;
        'runs: for run in runs.iter().rev() {
            let mut remaining = run.span_days();
            let mut end = midnight(run.last + Duration::days(1));
            while remaining > 0 {
                if calls >= self.config.max_gap_fills {
                    tracing::debug!(series = %series, "gap fill budget spent");
                    break 'runs;
                }
                let chunk = remaining.min(window);
                calls += 1;
                if let Some(bars) = self.fetch(series, chunk, end, summary)? {
                    let result = self
                        .repo
                        .write_batch(series, &bars, None, entry.last_trade_date)?;
                    progress.written += result.net_new();
                    progress.fetched_any = true;
                }
                end -= Duration::days(chunk);
                remaining -= chunk;
            }
        }

        Ok(progress.outcome())
    }
}
