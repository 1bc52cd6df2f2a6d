//! End-to-end sync scenarios against the SQLite store.
//!
//! Tests cover:
//! - Onboarding a new symbol (catalog entry, missing business days)
//! - Terminal convergence once history reaches the provider floor
//! - Monotonic coverage across forward refresh and backward backfill
//! - Overlapping fetches deduplicated to one row per timestamp
//! - Discovery abort on connectivity loss
//! - Per-series failures do not stop the run
//! - Interior gap detection and refill
//! - Futures contracts seeded, refreshed and closed around their last trade date

#![cfg(feature = "sqlite")]

mod common;

use barsync::adapters::sqlite_adapter::SqliteAdapter;
use barsync::domain::calendar::{business_days_between, ExchangeCalendar, HolidayRules};
use barsync::domain::error::SyncError;
use barsync::domain::gap::{missing_dates, GapReport};
use barsync::domain::report::{Outcome, Phase};
use barsync::domain::scheduler::SyncScheduler;
use barsync::domain::series::{InstrumentKind, Interval, IntervalClass};
use barsync::domain::sync_config::SyncConfig;
use barsync::domain::watchlist::parse_list;
use barsync::ports::catalog_port::CatalogPort;
use barsync::ports::series_port::SeriesRepository;
use barsync::ports::store_port::TimeSeriesStore;
use common::*;
use std::collections::BTreeSet;

fn store() -> SqliteAdapter {
    let adapter = SqliteAdapter::in_memory().unwrap();
    adapter.initialize_schema().unwrap();
    adapter
}

mod onboarding {
    use super::*;

    #[test]
    fn new_symbol_gets_catalog_entry_with_missing_days_to_floor() {
        let repo = store();
        let aapl = stock("AAPL", Interval::OneDay);
        let today = date(2024, 6, 28);
        let history = weekday_bars_ending(today, 300);
        let oldest = history[0].timestamp;

        let provider = MockProvider::new()
            .with_bars(&aapl, history)
            .with_floor(&aapl, dt(2015, 1, 1));
        let config = daily_config();
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);

        let summary = scheduler
            .run(&parse_list("aapl").unwrap(), today.and_hms_opt(0, 0, 0).unwrap())
            .unwrap();

        let entry = repo.get(&aapl).unwrap().unwrap();
        assert_eq!(entry.first_record_date, oldest);
        assert_eq!(entry.last_update_date, dt(2024, 6, 28));
        assert_eq!(
            entry.num_missing_business_days,
            business_days_between(date(2015, 1, 1), oldest.date())
        );
        assert!(entry.num_missing_business_days > 0);
        assert!(!entry.history_exhausted);
        assert_eq!(entry.provider_floor, Some(dt(2015, 1, 1)));

        assert_eq!(repo.row_count(&aapl).unwrap(), 300);
        assert_eq!(summary.errors(), 0);
        assert!(summary
            .outcomes_for(&aapl)
            .any(|o| *o == Outcome::Updated { bars_written: 300 }));
    }

    #[test]
    fn seeding_walks_back_in_provider_windows() {
        let repo = store();
        let aapl = stock("AAPL", Interval::OneDay);
        let provider = MockProvider::new()
            .with_bars(&aapl, weekday_bars(date(2024, 1, 2), date(2024, 3, 1)))
            .with_floor(&aapl, dt(2024, 1, 1))
            .with_window(20);
        let config = daily_config();
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);

        scheduler
            .run(&parse_list("AAPL").unwrap(), dt(2024, 3, 1))
            .unwrap();

        // 60 days to the floor in windows of at most 20
        let requests = provider.requests.borrow();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.lookback_days <= 20));

        let entry = repo.get(&aapl).unwrap().unwrap();
        assert_eq!(entry.first_record_date, dt(2024, 1, 2));
        assert_eq!(entry.num_missing_business_days, 1);
    }

    #[test]
    fn all_required_intervals_are_seeded() {
        let repo = store();
        let daily = stock("MSFT", Interval::OneDay);
        let hourly = stock("MSFT", Interval::OneHour);
        let provider = MockProvider::new()
            .with_bars(&daily, weekday_bars(date(2024, 2, 1), date(2024, 3, 1)))
            .with_bars(
                &hourly,
                vec![
                    make_bar(dt_hms(2024, 2, 29, 10, 0, 0), 1.0),
                    make_bar(dt_hms(2024, 3, 1, 10, 0, 0), 2.0),
                ],
            );
        let config = SyncConfig {
            required_intervals: vec![Interval::OneHour, Interval::OneDay],
            ..daily_config()
        };
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);

        scheduler
            .run(&parse_list("MSFT").unwrap(), dt_hms(2024, 3, 1, 16, 0, 0))
            .unwrap();

        let names: Vec<String> = repo
            .list_entries()
            .unwrap()
            .iter()
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["MSFT_stock_1day", "MSFT_stock_1hour"]);
    }
}

mod convergence {
    use super::*;

    #[test]
    fn series_at_provider_floor_issues_no_further_fetches() {
        let repo = store();
        let aapl = stock("AAPL", Interval::OneDay);
        let history = weekday_bars(date(2024, 1, 2), date(2024, 3, 1));
        let provider = MockProvider::new()
            .with_bars(&aapl, history)
            .with_floor(&aapl, dt(2024, 1, 2));
        let config = daily_config();
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);
        let watchlist = parse_list("AAPL").unwrap();

        scheduler.run(&watchlist, dt(2024, 3, 1)).unwrap();
        let entry = repo.get(&aapl).unwrap().unwrap();
        assert_eq!(entry.num_missing_business_days, 0);
        let calls_after_first = provider.calls.get();

        for _ in 0..3 {
            let summary = scheduler.run(&watchlist, dt(2024, 3, 1)).unwrap();
            assert_eq!(summary.fetch_calls, 0);
            assert!(summary
                .outcomes_for(&aapl)
                .all(|o| *o == Outcome::UpToDate));
        }

        assert_eq!(provider.calls.get(), calls_after_first);
        assert_eq!(repo.get(&aapl).unwrap().unwrap().num_missing_business_days, 0);
    }

    #[test]
    fn backfill_marks_history_exhausted_then_stops() {
        let repo = store();
        let aapl = stock("AAPL", Interval::OneDay);
        let today = date(2024, 6, 28);
        let provider = MockProvider::new()
            .with_bars(&aapl, weekday_bars_ending(today, 300))
            .with_floor(&aapl, dt(2015, 1, 1))
            .with_window(365);
        let mut config = daily_config();
        config.lookback_days.insert(IntervalClass::Daily, 200);
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);
        let watchlist = parse_list("AAPL").unwrap();
        let now = today.and_hms_opt(0, 0, 0).unwrap();

        scheduler.run(&watchlist, now).unwrap();
        assert!(repo.get(&aapl).unwrap().unwrap().needs_backfill());

        // The oldest bar on offer is years short of the advertised floor.
        let second = scheduler.run(&watchlist, now).unwrap();
        assert!(second.fetch_calls > 0);
        let entry = repo.get(&aapl).unwrap().unwrap();
        assert!(entry.history_exhausted);
        assert_eq!(entry.num_missing_business_days, 0);

        let third = scheduler.run(&watchlist, now).unwrap();
        assert_eq!(third.fetch_calls, 0);
        assert_eq!(repo.row_count(&aapl).unwrap(), 300);
    }
}

mod coverage {
    use super::*;

    #[test]
    fn refresh_and_backfill_only_widen_coverage() {
        let repo = store();
        let spy = stock("SPY", Interval::OneDay);
        let full = weekday_bars(date(2023, 1, 2), date(2024, 3, 1));
        let partial: Vec<Bar> = full
            .iter()
            .filter(|b| b.timestamp >= dt(2023, 6, 1) && b.timestamp <= dt(2024, 1, 31))
            .cloned()
            .collect();
        repo.write_batch(&spy, &partial, Some(dt(2023, 1, 2)), None)
            .unwrap();
        let before = repo.get(&spy).unwrap().unwrap();
        assert!(before.needs_backfill());

        let provider = MockProvider::new()
            .with_bars(&spy, full.clone())
            .with_floor(&spy, dt(2023, 1, 2))
            .with_window(60);
        let config = daily_config();
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);

        let summary = scheduler.run(&[], dt(2024, 3, 1)).unwrap();

        let after = repo.get(&spy).unwrap().unwrap();
        assert!(after.first_record_date <= before.first_record_date);
        assert!(after.last_update_date >= before.last_update_date);
        assert_eq!(after.first_record_date, dt(2023, 1, 2));
        assert_eq!(after.last_update_date, dt(2024, 3, 1));
        assert_eq!(after.num_missing_business_days, 0);
        assert_eq!(repo.row_count(&spy).unwrap(), full.len());

        let phases: BTreeSet<String> = summary
            .reports
            .iter()
            .filter(|r| r.series == spy)
            .map(|r| r.phase.to_string())
            .collect();
        assert!(phases.contains(&Phase::Backfilling.to_string()));
    }

    #[test]
    fn catalog_matches_store_bounds_after_sync() {
        let repo = store();
        let qqq = stock("QQQ", Interval::OneDay);
        let provider = MockProvider::new()
            .with_bars(&qqq, weekday_bars(date(2024, 1, 2), date(2024, 2, 29)))
            .with_floor(&qqq, dt(2024, 1, 2));
        let config = daily_config();
        SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock)
            .run(&parse_list("QQQ").unwrap(), dt(2024, 3, 1))
            .unwrap();

        let entry = repo.get(&qqq).unwrap().unwrap();
        assert_eq!(Some(entry.first_record_date), repo.min_timestamp(&qqq).unwrap());
        assert_eq!(Some(entry.last_update_date), repo.max_timestamp(&qqq).unwrap());
    }
}

mod dedup {
    use super::*;

    #[test]
    fn overlapping_fetches_keep_one_row_per_timestamp() {
        let repo = store();
        let aapl = stock("AAPL", Interval::FiveMinutes);
        let first = vec![
            make_bar(dt_hms(2024, 3, 1, 9, 25, 0), 10.0),
            make_bar(dt_hms(2024, 3, 1, 9, 30, 0), 11.0),
        ];
        let second = vec![
            make_bar(dt_hms(2024, 3, 1, 9, 30, 0), 99.0),
            make_bar(dt_hms(2024, 3, 1, 9, 35, 0), 12.0),
        ];

        repo.append(&aapl, &first).unwrap();
        repo.append(&aapl, &second).unwrap();
        assert_eq!(repo.dedup(&aapl).unwrap(), 1);
        assert_eq!(repo.dedup(&aapl).unwrap(), 0);

        let at_930: Vec<Bar> = repo
            .read_range(
                &aapl,
                Some(dt_hms(2024, 3, 1, 9, 30, 0)),
                Some(dt_hms(2024, 3, 1, 9, 30, 0)),
            )
            .unwrap();
        assert_eq!(at_930.len(), 1);
        assert_eq!(at_930[0].close, 11.0);
        assert_eq!(repo.row_count(&aapl).unwrap(), 3);
    }

    #[test]
    fn write_batch_reports_duplicates() {
        let repo = store();
        let aapl = stock("AAPL", Interval::FiveMinutes);
        repo.write_batch(
            &aapl,
            &[
                make_bar(dt_hms(2024, 3, 1, 9, 25, 0), 10.0),
                make_bar(dt_hms(2024, 3, 1, 9, 30, 0), 11.0),
            ],
            None,
            None,
        )
        .unwrap();
        let result = repo
            .write_batch(
                &aapl,
                &[
                    make_bar(dt_hms(2024, 3, 1, 9, 30, 0), 99.0),
                    make_bar(dt_hms(2024, 3, 1, 9, 35, 0), 12.0),
                ],
                None,
                None,
            )
            .unwrap();

        assert_eq!(result.appended, 2);
        assert_eq!(result.duplicates_removed, 1);
        assert_eq!(result.net_new(), 1);
        assert_eq!(result.entry.first_record_date, dt_hms(2024, 3, 1, 9, 25, 0));
        assert_eq!(result.entry.last_update_date, dt_hms(2024, 3, 1, 9, 35, 0));
    }
}

mod failures {
    use super::*;

    #[test]
    fn unreachable_provider_aborts_before_any_write() {
        let repo = store();
        let provider = MockProvider::new().offline();
        let config = daily_config();
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);

        let err = scheduler
            .run(&parse_list("AAPL,MSFT").unwrap(), dt(2024, 3, 1))
            .unwrap_err();

        assert!(matches!(err, SyncError::ProviderUnavailable { .. }));
        assert_eq!(provider.calls.get(), 0);
        assert!(repo.list_entries().unwrap().is_empty());
    }

    #[test]
    fn connection_lost_during_discovery_aborts() {
        let repo = store();
        let aapl = stock("AAPL", Interval::OneDay);
        let msft = stock("MSFT", Interval::OneDay);
        let provider = MockProvider::new()
            .with_bars(&aapl, weekday_bars(date(2024, 2, 1), date(2024, 3, 1)))
            .with_outage(&msft, "connection reset");
        let config = daily_config();
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);

        let err = scheduler
            .run(&parse_list("AAPL,MSFT").unwrap(), dt(2024, 3, 1))
            .unwrap_err();

        assert!(err.is_connectivity());
        // AAPL sorts first and was written before the outage.
        assert!(repo.get(&aapl).unwrap().is_some());
        assert!(repo.get(&msft).unwrap().is_none());
    }

    #[test]
    fn rate_limited_series_is_reported_and_run_continues() {
        let repo = store();
        let aapl = stock("AAPL", Interval::OneDay);
        let msft = stock("MSFT", Interval::OneDay);
        let nvda = stock("NVDA", Interval::OneDay);
        let provider = MockProvider::new()
            .with_bars(&aapl, weekday_bars(date(2024, 2, 1), date(2024, 3, 1)))
            .with_bars(&nvda, weekday_bars(date(2024, 2, 1), date(2024, 3, 1)))
            .with_error(&msft, "HTTP 429");
        let config = daily_config();
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);

        let summary = scheduler
            .run(&parse_list("NVDA,MSFT,AAPL").unwrap(), dt(2024, 3, 1))
            .unwrap();

        assert_eq!(summary.errors(), 1);
        let failed: Vec<_> = summary.failures().map(|r| r.series.clone()).collect();
        assert_eq!(failed, vec![msft.clone()]);
        assert!(repo.get(&aapl).unwrap().is_some());
        assert!(repo.get(&nvda).unwrap().is_some());
        assert!(repo.get(&msft).unwrap().is_none());
    }

    #[test]
    fn symbol_without_data_is_reported_as_no_data() {
        let repo = store();
        let zzzz = stock("ZZZZ", Interval::OneDay);
        let provider = MockProvider::new();
        let config = daily_config();
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);

        let summary = scheduler
            .run(&parse_list("ZZZZ").unwrap(), dt(2024, 3, 1))
            .unwrap();

        assert!(summary.outcomes_for(&zzzz).any(|o| *o == Outcome::NoData));
        assert!(repo.get(&zzzz).unwrap().is_none());
        assert!(!repo.series_exists(&zzzz).unwrap());
    }
}

mod gaps {
    use super::*;

    fn january_without_the_10th() -> Vec<Bar> {
        weekday_bars(date(2024, 1, 1), date(2024, 1, 31))
            .into_iter()
            .filter(|b| b.timestamp.date() != date(2024, 1, 10))
            .collect()
    }

    #[test]
    fn single_missing_weekday_in_january() {
        let repo = store();
        let spy = stock("SPY", Interval::OneDay);
        repo.write_batch(&spy, &january_without_the_10th(), None, None)
            .unwrap();

        let present = repo.distinct_dates(&spy, None, None).unwrap();
        let nyse = ExchangeCalendar::new(HolidayRules::Nyse);
        let report = missing_dates(&present, date(2024, 1, 1), date(2024, 1, 31), &nyse);

        assert_eq!(report, GapReport::Missing(BTreeSet::from([date(2024, 1, 10)])));
    }

    #[test]
    fn interior_gap_is_refetched_and_scan_recorded() {
        let repo = store();
        let spy = stock("SPY", Interval::OneDay);
        repo.write_batch(&spy, &january_without_the_10th(), None, None)
            .unwrap();

        let provider = MockProvider::new()
            .with_bars(&spy, weekday_bars(date(2024, 1, 1), date(2024, 1, 31)));
        let config = SyncConfig {
            calendar: ExchangeCalendar::new(HolidayRules::Nyse),
            ..daily_config()
        };
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Stock);

        let summary = scheduler.run(&[], dt(2024, 1, 31)).unwrap();

        assert_eq!(provider.fetches_for(&spy), 1);
        assert!(summary
            .outcomes_for(&spy)
            .any(|o| *o == Outcome::Updated { bars_written: 1 }));

        let present = repo.distinct_dates(&spy, None, None).unwrap();
        let report = missing_dates(&present, date(2024, 1, 1), date(2024, 1, 31), &config.calendar);
        assert_eq!(report, GapReport::NoGaps);
        assert_eq!(
            repo.get(&spy).unwrap().unwrap().last_gap_scan_date,
            Some(date(2024, 1, 31))
        );

        // Scan is not due again the same week.
        let again = scheduler.run(&[], dt(2024, 1, 31)).unwrap();
        assert_eq!(again.fetch_calls, 0);
    }
}

mod futures {
    use super::*;
    use chrono::Duration;

    fn watch(key: &str) -> Vec<barsync::domain::watchlist::WatchItem> {
        parse_list(key).unwrap()
    }

    #[test]
    fn expired_contract_closes_once_refresh_adds_nothing() {
        let repo = store();
        let es = contract("ES", 2024, 3, Interval::OneDay);
        // History stops the day before the last trade date.
        let provider = MockProvider::new()
            .with_bars(&es, weekday_bars(date(2024, 1, 2), date(2024, 3, 14)))
            .with_floor(&es, dt(2024, 1, 2))
            .with_last_trade(&es, date(2024, 3, 15));
        let config = daily_config();
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Future);
        let watchlist = watch("ES:202403");

        scheduler.run(&watchlist, dt(2024, 3, 15)).unwrap();
        let entry = repo.get(&es).unwrap().unwrap();
        assert_eq!(entry.last_update_date, dt(2024, 3, 14));
        assert_eq!(entry.last_trade_date, Some(date(2024, 3, 15)));
        assert!(!entry.is_closed(date(2024, 6, 3)));

        let refresh = scheduler.run(&watchlist, dt(2024, 6, 3)).unwrap();
        assert_eq!(refresh.fetch_calls, 1);
        let request = provider.requests.borrow().last().cloned().unwrap();
        assert_eq!(request.end, Some(dt(2024, 3, 16)));

        let entry = repo.get(&es).unwrap().unwrap();
        assert!(entry.history_exhausted);
        assert!(entry.is_closed(date(2024, 6, 3)));

        for week in 1..=2 {
            let now = dt(2024, 6, 3) + Duration::weeks(week);
            let summary = scheduler.run(&watchlist, now).unwrap();
            assert_eq!(summary.fetch_calls, 0, "run {now}");
        }
    }

    #[test]
    fn long_expired_contract_seeds_from_last_trade_date() {
        let repo = store();
        let es = contract("ES", 2023, 12, Interval::FiveMinutes);
        let history: Vec<Bar> = weekday_bars(date(2023, 11, 1), date(2023, 12, 15))
            .into_iter()
            .map(|b| make_bar(b.timestamp + Duration::minutes(570), b.close))
            .collect();
        let provider = MockProvider::new()
            .with_bars(&es, history.clone())
            .with_floor(&es, dt(2023, 11, 1))
            .with_last_trade(&es, date(2023, 12, 15))
            .with_window(59);
        let config = SyncConfig {
            required_intervals: vec![Interval::FiveMinutes],
            ..daily_config()
        };
        let scheduler = SyncScheduler::new(&repo, &provider, &config, InstrumentKind::Future);
        let watchlist = watch("ES:202312");

        let seeded = scheduler.run(&watchlist, dt(2024, 6, 3)).unwrap();
        assert_eq!(seeded.fetch_calls, 1);
        let request = provider.requests.borrow()[0].clone();
        assert_eq!(request.lookback_days, 30);
        assert_eq!(request.end, Some(dt(2023, 12, 16)));

        let entry = repo.get(&es).unwrap().unwrap();
        assert_eq!(entry.first_record_date, dt_hms(2023, 11, 16, 9, 30, 0));
        assert_eq!(entry.last_update_date, dt_hms(2023, 12, 15, 9, 30, 0));
        assert!(entry.is_closed(date(2024, 6, 3)));
        assert!(entry.needs_backfill());

        scheduler.run(&watchlist, dt(2024, 6, 10)).unwrap();
        let entry = repo.get(&es).unwrap().unwrap();
        assert_eq!(entry.first_record_date, dt_hms(2023, 11, 1, 9, 30, 0));
        assert!(entry.history_exhausted);
        assert_eq!(repo.row_count(&es).unwrap(), history.len());

        let settled = scheduler.run(&watchlist, dt(2024, 6, 17)).unwrap();
        assert_eq!(settled.fetch_calls, 0);
    }
}
