//! CLI definition and dispatch.

use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use crate::adapters::csv_adapter::CsvReplayProvider;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::memory_adapter::MemoryRepository;
use crate::adapters::throttled_provider::ThrottledProvider;
use crate::domain::calendar::ExchangeCalendar;
use crate::domain::error::SyncError;
use crate::domain::gap::{gap_runs, interior_gaps, GapRun};
use crate::domain::report::{Outcome, RunSummary};
use crate::domain::scheduler::SyncScheduler;
use crate::domain::series::{ContractMonth, InstrumentKind, Interval, SeriesId};
use crate::domain::sync_config::SyncConfig;
use crate::domain::throttle::{Clock, SystemClock};
use crate::domain::watchlist::{self, WatchItem, WatchlistError};
use crate::ports::config_port::ConfigPort;
use crate::ports::provider_port::BarProvider;
use crate::ports::series_port::SeriesRepository;

#[derive(Parser, Debug)]
#[command(name = "barsync", about = "Historical bar synchronization")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover, backfill and gap-fill every configured namespace
    Sync {
        #[arg(short, long)]
        config: PathBuf,
        /// Only run this namespace (index, stock or future)
        #[arg(short, long)]
        namespace: Option<InstrumentKind>,
        /// Comma-separated symbols overriding the configured watch-list
        #[arg(long)]
        symbols: Option<String>,
        /// Sync into an in-memory store; nothing is persisted
        #[arg(long)]
        dry_run: bool,
    },
    /// Show catalog coverage and staleness
    Status {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        namespace: Option<InstrumentKind>,
    },
    /// List interior gaps of stored daily-or-finer series
    Gaps {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        namespace: Option<InstrumentKind>,
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Drop a series table and its catalog entry
    Purge {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        namespace: InstrumentKind,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        interval: Interval,
        /// Contract month (YYYYMM) for futures
        #[arg(long)]
        expiry: Option<ContractMonth>,
    },
    /// Check configuration and catalog consistency with stored data
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Sync {
            config,
            namespace,
            symbols,
            dry_run,
        } => run_sync(&config, namespace, symbols.as_deref(), dry_run),
        Command::Status { config, namespace } => run_status(&config, namespace),
        Command::Gaps {
            config,
            namespace,
            symbol,
        } => run_gaps(&config, namespace, symbol.as_deref()),
        Command::Purge {
            config,
            namespace,
            symbol,
            interval,
            expiry,
        } => run_purge(&config, namespace, &symbol, interval, expiry),
        Command::Validate { config } => run_validate(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, SyncError> {
    FileConfigAdapter::from_file(path)
}

/// Namespaces with a configured store, optionally narrowed to one.
pub fn namespaces(config: &dyn ConfigPort, only: Option<InstrumentKind>) -> Vec<InstrumentKind> {
    InstrumentKind::ALL
        .into_iter()
        .filter(|kind| only.is_none_or(|k| k == *kind))
        .filter(|kind| config.get_string("storage", &storage_key(*kind)).is_some())
        .collect()
}

fn storage_key(kind: InstrumentKind) -> String {
    format!("{}_path", kind.as_str())
}

/// Watch-list for one namespace: `[watchlist] indices` for indices,
/// `file` (or `symbols`) for stocks and `futures` for futures contracts.
/// `symbols` overrides the configured list.
pub fn resolve_watchlist(
    config: &dyn ConfigPort,
    kind: InstrumentKind,
    symbols: Option<&str>,
) -> Result<Vec<WatchItem>, SyncError> {
    let items = match (symbols, kind) {
        (Some(list), _) => watchlist::parse_list(list)?,
        (None, InstrumentKind::Index) => {
            watchlist::parse_list(&config.get_string("watchlist", "indices").unwrap_or_default())?
        }
        (None, InstrumentKind::Stock) => match config.get_string("watchlist", "file") {
            Some(path) => watchlist::read_csv(path)?,
            None => watchlist::parse_list(
                &config.get_string("watchlist", "symbols").unwrap_or_default(),
            )?,
        },
        (None, InstrumentKind::Future) => {
            watchlist::parse_list(&config.get_string("watchlist", "futures").unwrap_or_default())?
        }
    };

    if kind == InstrumentKind::Future {
        if let Some(item) = items.iter().find(|i| i.expiry.is_none()) {
            return Err(WatchlistError::InvalidContract {
                token: item.symbol.clone(),
                reason: "futures must be written SYMBOL:YYYYMM".into(),
            }
            .into());
        }
    }

    Ok(items)
}

/// Provider selected by `[provider] kind` (default `csv`).
pub fn build_provider(config: &dyn ConfigPort) -> Result<Box<dyn BarProvider>, SyncError> {
    let kind = config
        .get_string("provider", "kind")
        .unwrap_or_else(|| "csv".to_string());

    match kind.trim().to_lowercase().as_str() {
        "csv" => Ok(Box::new(CsvReplayProvider::from_config(config)?)),
        #[cfg(feature = "yahoo")]
        "yahoo" => Ok(Box::new(
            crate::adapters::yahoo_adapter::YahooProvider::from_config(config)?,
        )),
        other => Err(SyncError::ConfigInvalid {
            section: "provider".into(),
            key: "kind".into(),
            reason: format!("unsupported provider {other:?}"),
        }),
    }
}

#[cfg(feature = "sqlite")]
pub fn open_store(
    config: &dyn ConfigPort,
    kind: InstrumentKind,
) -> Result<Box<dyn SeriesRepository>, SyncError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;

    let adapter = SqliteAdapter::from_config(config, kind)?;
    adapter.initialize_schema()?;
    Ok(Box::new(adapter))
}

#[cfg(not(feature = "sqlite"))]
pub fn open_store(
    _config: &dyn ConfigPort,
    kind: InstrumentKind,
) -> Result<Box<dyn SeriesRepository>, SyncError> {
    Err(SyncError::ConfigInvalid {
        section: "storage".into(),
        key: storage_key(kind),
        reason: "built without the sqlite feature".into(),
    })
}

/// Run the scheduler for one namespace.
pub fn sync_namespace(
    repo: &dyn SeriesRepository,
    provider: &dyn BarProvider,
    sync_config: &SyncConfig,
    kind: InstrumentKind,
    watchlist: &[WatchItem],
    now: NaiveDateTime,
) -> Result<RunSummary, SyncError> {
    tracing::info!(
        namespace = kind.as_str(),
        provider = provider.name(),
        symbols = watchlist.len(),
        "starting sync run"
    );
    let summary = SyncScheduler::new(repo, provider, sync_config, kind).run(watchlist, now)?;
    summary.log_summary(kind.as_str());
    Ok(summary)
}

fn run_sync(
    config_path: &Path,
    only: Option<InstrumentKind>,
    symbols: Option<&str>,
    dry_run: bool,
) -> Result<ExitCode, SyncError> {
    eprintln!("Loading config from {}", config_path.display());
    let config = load_config(config_path)?;
    let sync_config = SyncConfig::from_config(&config)?;

    let clock: Rc<dyn Clock> = Rc::new(SystemClock::new());
    let provider = ThrottledProvider::from_config(build_provider(&config)?, &sync_config, clock);

    let kinds = if dry_run {
        InstrumentKind::ALL
            .into_iter()
            .filter(|kind| only.is_none_or(|k| k == *kind))
            .collect()
    } else {
        namespaces(&config, only)
    };
    if kinds.is_empty() {
        return Err(SyncError::ConfigMissing {
            section: "storage".into(),
            key: only.map_or_else(|| "index_path".into(), storage_key),
        });
    }

    let now = Local::now().naive_local();
    let mut aborted: Option<SyncError> = None;

    for kind in kinds {
        let watchlist = resolve_watchlist(&config, kind, symbols)?;
        if watchlist.is_empty() && dry_run {
            continue;
        }

        let repo: Box<dyn SeriesRepository> = if dry_run {
            Box::new(MemoryRepository::new())
        } else {
            open_store(&config, kind)?
        };

        eprintln!("Syncing {} {} symbols...", watchlist.len(), kind);
        match sync_namespace(&*repo, &provider, &sync_config, kind, &watchlist, now) {
            Ok(summary) => print_summary(kind, &summary),
            Err(e) => {
                tracing::error!(namespace = kind.as_str(), error = %e, "sync run aborted");
                eprintln!("error: {kind} run aborted: {e}");
                aborted.get_or_insert(e);
            }
        }
    }

    Ok(match aborted {
        Some(e) => (&e).into(),
        None => ExitCode::SUCCESS,
    })
}

fn print_summary(kind: InstrumentKind, summary: &RunSummary) {
    for report in &summary.reports {
        if !matches!(report.outcome, Outcome::UpToDate) {
            println!(
                "{:<36} {:<18} {}",
                report.series.to_string(),
                report.phase.to_string(),
                report.outcome
            );
        }
    }
    eprintln!(
        "{kind}: {} updated, {} no data, {} up to date, {} errors; {} bars written, {} dropped, {} provider calls in {:.1}s",
        summary.updated(),
        summary.no_data(),
        summary.up_to_date(),
        summary.errors(),
        summary.bars_written(),
        summary.bars_dropped,
        summary.fetch_calls,
        summary.elapsed.as_secs_f64(),
    );
}

fn run_status(config_path: &Path, only: Option<InstrumentKind>) -> Result<ExitCode, SyncError> {
    let config = load_config(config_path)?;
    let sync_config = SyncConfig::from_config(&config)?;
    let today = Local::now().date_naive();

    for kind in namespaces(&config, only) {
        let repo = open_store(&config, kind)?;
        let entries = repo.list_entries()?;
        println!("[{kind}] {} series", entries.len());

        for entry in &entries {
            let state = if entry.is_closed(today) {
                "closed"
            } else if entry.is_stale(sync_config.update_threshold_days, today) {
                "stale"
            } else {
                "fresh"
            };
            println!(
                "  {:<36} {} .. {}  missing={:<5} behind={:<4} {}{}",
                entry.name(),
                entry.first_record_date,
                entry.last_update_date,
                entry.num_missing_business_days,
                entry.staleness(today),
                state,
                if entry.history_exhausted { " (history exhausted)" } else { "" },
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Interior gap runs of every stored daily-or-finer series, optionally
/// restricted to one symbol.
pub fn find_gaps(
    repo: &dyn SeriesRepository,
    calendar: &ExchangeCalendar,
    symbol: Option<&str>,
) -> Result<Vec<(SeriesId, Vec<GapRun>)>, SyncError> {
    let mut found = Vec::new();
    for entry in repo.list_entries()? {
        if !entry.series.interval.is_daily_or_finer() {
            continue;
        }
        if symbol.is_some_and(|s| !entry.series.symbol.eq_ignore_ascii_case(s.trim())) {
            continue;
        }
        let present = repo.distinct_dates(&entry.series, None, None)?;
        let runs = gap_runs(&interior_gaps(&present, calendar), calendar);
        found.push((entry.series, runs));
    }
    Ok(found)
}

fn run_gaps(
    config_path: &Path,
    only: Option<InstrumentKind>,
    symbol: Option<&str>,
) -> Result<ExitCode, SyncError> {
    let config = load_config(config_path)?;
    let sync_config = SyncConfig::from_config(&config)?;

    for kind in namespaces(&config, only) {
        let repo = open_store(&config, kind)?;
        for (series, runs) in find_gaps(&*repo, &sync_config.calendar, symbol)? {
            if runs.is_empty() {
                println!("{series}: no gaps");
                continue;
            }
            let days: usize = runs.iter().map(|r| r.trading_days).sum();
            println!("{series}: {days} missing trading days in {} runs", runs.len());
            for run in runs {
                println!("  {} .. {} ({} days)", run.first, run.last, run.trading_days);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_purge(
    config_path: &Path,
    kind: InstrumentKind,
    symbol: &str,
    interval: Interval,
    expiry: Option<ContractMonth>,
) -> Result<ExitCode, SyncError> {
    let config = load_config(config_path)?;
    let series = match expiry {
        Some(expiry) => SeriesId::future(symbol, expiry, interval),
        None => SeriesId::new(symbol, kind, interval),
    };

    let repo = open_store(&config, kind)?;
    let dropped = repo.drop_series(&series)?;
    let purged = repo.purge(&series)?;
    if !dropped && !purged {
        return Err(SyncError::SeriesNotFound {
            series: series.table_name(),
        });
    }

    tracing::info!(%series, dropped, purged, "purged series");
    eprintln!("Purged {series}");
    Ok(ExitCode::SUCCESS)
}

/// A catalog entry whose coverage disagrees with the stored rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Inconsistency {
    pub series: SeriesId,
    pub catalog: (NaiveDateTime, NaiveDateTime),
    pub stored: Option<(NaiveDateTime, NaiveDateTime)>,
}

pub fn check_consistency(repo: &dyn SeriesRepository) -> Result<Vec<Inconsistency>, SyncError> {
    let mut found = Vec::new();
    for entry in repo.list_entries()? {
        let stored = match (
            repo.min_timestamp(&entry.series)?,
            repo.max_timestamp(&entry.series)?,
        ) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        };
        let catalog = (entry.first_record_date, entry.last_update_date);
        if stored != Some(catalog) {
            found.push(Inconsistency {
                series: entry.series,
                catalog,
                stored,
            });
        }
    }
    Ok(found)
}

fn run_validate(config_path: &Path) -> Result<ExitCode, SyncError> {
    eprintln!("Validating {}", config_path.display());
    let config = load_config(config_path)?;
    let sync_config = SyncConfig::from_config(&config)?;
    let provider = build_provider(&config)?;
    eprintln!(
        "  provider: {}, calendar: {}, intervals: {}",
        provider.name(),
        sync_config.calendar,
        sync_config
            .required_intervals
            .iter()
            .map(|i| i.name())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut inconsistent = 0;
    for kind in InstrumentKind::ALL {
        let watchlist = resolve_watchlist(&config, kind, None)?;
        let Some(path) = config.get_string("storage", &storage_key(kind)) else {
            if !watchlist.is_empty() {
                eprintln!("  warning: {} {kind} symbols but no [storage] {}", watchlist.len(), storage_key(kind));
            }
            continue;
        };
        if !Path::new(&path).exists() {
            eprintln!("  {kind}: {} symbols, store {path} not created yet", watchlist.len());
            continue;
        }

        let repo = open_store(&config, kind)?;
        let problems = check_consistency(&*repo)?;
        eprintln!(
            "  {kind}: {} symbols, {} catalog entries, {} inconsistent",
            watchlist.len(),
            repo.list_entries()?.len(),
            problems.len()
        );
        for p in &problems {
            match p.stored {
                Some((min, max)) => eprintln!(
                    "    {}: catalog {} .. {}, stored {} .. {}",
                    p.series, p.catalog.0, p.catalog.1, min, max
                ),
                None => eprintln!("    {}: catalog entry without stored rows", p.series),
            }
        }
        inconsistent += problems.len();
    }

    if inconsistent > 0 {
        let err = SyncError::StorageQuery {
            reason: format!("{inconsistent} catalog entries disagree with stored data"),
        };
        eprintln!("error: {err}");
        return Ok((&err).into());
    }

    eprintln!("\nConfiguration is valid.");
    Ok(ExitCode::SUCCESS)
}
