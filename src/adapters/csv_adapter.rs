//! File-replay bar provider.
//!
//! Serves bars from `{data_dir}/{table_name}.csv` files (header
//! `timestamp,open,high,low,close,volume`), e.g. `AAPL_stock_1day.csv` or
//! `ES_202403_1hour.csv`. The earliest row of a file is the provider floor.
//! Futures last trade dates come from an optional `contracts.csv` with rows
//! `symbol,expiry,last_trade_date`.

use crate::domain::error::SyncError;
use crate::domain::ohlcv::{normalize_raw_bars, Bar, RawBar};
use crate::domain::series::{ContractMonth, Interval, IntervalClass, SeriesId};
use crate::domain::sync_config::default_lookback_days;
use crate::ports::config_port::ConfigPort;
use crate::ports::provider_port::{check_lookback, BarProvider, BarRequest, FetchOutcome, FetchedBars};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const CONTRACTS_FILE: &str = "contracts.csv";

pub struct CsvReplayProvider {
    data_dir: PathBuf,
    max_lookback: BTreeMap<IntervalClass, u32>,
}

impl CsvReplayProvider {
    /// Per-call windows default to the deep lookback of each interval class.
    pub fn new(data_dir: PathBuf) -> Self {
        let max_lookback = [
            IntervalClass::Intraday,
            IntervalClass::Hourly,
            IntervalClass::Daily,
            IntervalClass::Long,
        ]
        .into_iter()
        .map(|c| (c, default_lookback_days(c)))
        .collect();
        Self {
            data_dir,
            max_lookback,
        }
    }

    pub fn with_max_lookback(mut self, class: IntervalClass, days: u32) -> Self {
        self.max_lookback.insert(class, days.max(1));
        self
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SyncError> {
        let data_dir = config
            .get_string("provider", "data_dir")
            .ok_or_else(|| SyncError::ConfigMissing {
                section: "provider".into(),
                key: "data_dir".into(),
            })?;

        let mut provider = Self::new(PathBuf::from(data_dir));
        for (class, key) in [
            (IntervalClass::Intraday, "max_lookback_days_intraday"),
            (IntervalClass::Hourly, "max_lookback_days_hourly"),
            (IntervalClass::Daily, "max_lookback_days_daily"),
            (IntervalClass::Long, "max_lookback_days_long"),
        ] {
            let days = config.get_int("provider", key, provider.max_lookback[&class] as i64);
            if days <= 0 {
                return Err(SyncError::ConfigInvalid {
                    section: "provider".into(),
                    key: key.into(),
                    reason: "must be a positive integer".into(),
                });
            }
            provider = provider.with_max_lookback(class, days.min(u32::MAX as i64) as u32);
        }
        Ok(provider)
    }

    fn csv_path(&self, series: &SeriesId) -> PathBuf {
        self.data_dir.join(format!("{}.csv", series.table_name()))
    }

    fn response_err(series: &SeriesId, reason: String) -> SyncError {
        SyncError::ProviderResponse {
            symbol: series.symbol.clone(),
            reason,
        }
    }

    /// All bars of a series file, or `None` when there is no file.
    fn load(&self, series: &SeriesId) -> Result<Option<(Vec<Bar>, usize)>, SyncError> {
        let path = self.csv_path(series);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            Self::response_err(series, format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut raw = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let record = result
                .map_err(|e| Self::response_err(series, format!("CSV parse error: {}", e)))?;
            let row = Row {
                record: &record,
                line: line + 1,
                series,
            };
            raw.push(RawBar {
                timestamp: row.field(0, "timestamp")?.to_string(),
                open: row.number(1, "open")?,
                high: row.number(2, "high")?,
                low: row.number(3, "low")?,
                close: row.number(4, "close")?,
                volume: row.volume(5)?,
            });
        }

        Ok(Some(normalize_raw_bars(&series.symbol, raw)))
    }

    fn contract_last_trade(&self, symbol: &str, expiry: ContractMonth) -> Result<Option<NaiveDate>, SyncError> {
        let path = self.data_dir.join(CONTRACTS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| SyncError::ProviderResponse {
                symbol: symbol.to_string(),
                reason: format!("failed to read {}: {}", path.display(), e),
            })?;

        let wanted = expiry.to_string();
        for record in rdr.records() {
            let record = record.map_err(|e| SyncError::ProviderResponse {
                symbol: symbol.to_string(),
                reason: format!("{}: {}", CONTRACTS_FILE, e),
            })?;
            let (Some(sym), Some(month), Some(ltd)) = (record.get(0), record.get(1), record.get(2)) else {
                continue;
            };
            if sym.eq_ignore_ascii_case(symbol) && month == wanted {
                let date = NaiveDate::parse_from_str(ltd, "%Y-%m-%d").map_err(|_| {
                    SyncError::MalformedTimestamp {
                        value: ltd.to_string(),
                    }
                })?;
                return Ok(Some(date));
            }
        }
        Ok(None)
    }
}

/// One CSV record with enough context for error messages.
struct Row<'a> {
    record: &'a csv::StringRecord,
    line: usize,
    series: &'a SeriesId,
}

impl<'a> Row<'a> {
    fn err(&self, reason: String) -> SyncError {
        CsvReplayProvider::response_err(self.series, format!("row {}: {}", self.line, reason))
    }

    fn field(&self, idx: usize, name: &str) -> Result<&'a str, SyncError> {
        self.record
            .get(idx)
            .ok_or_else(|| self.err(format!("missing {} column", name)))
    }

    fn number(&self, idx: usize, name: &str) -> Result<f64, SyncError> {
        self.field(idx, name)?
            .parse()
            .map_err(|e| self.err(format!("invalid {} value: {}", name, e)))
    }

    /// Some exports write volume as a float.
    fn volume(&self, idx: usize) -> Result<i64, SyncError> {
        let raw = self.field(idx, "volume")?;
        raw.parse::<i64>()
            .or_else(|_| raw.parse::<f64>().map(|v| v as i64))
            .map_err(|e| self.err(format!("invalid volume value: {}", e)))
    }
}

impl BarProvider for CsvReplayProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn check_connection(&self) -> Result<(), SyncError> {
        if self.data_dir.is_dir() {
            Ok(())
        } else {
            Err(SyncError::ProviderUnavailable {
                reason: format!("data directory {} not found", self.data_dir.display()),
            })
        }
    }

    fn max_lookback_days(&self, interval: Interval) -> u32 {
        let class = interval.class();
        self.max_lookback
            .get(&class)
            .copied()
            .unwrap_or_else(|| default_lookback_days(class))
    }

    fn fetch_bars(&self, request: &BarRequest) -> Result<FetchOutcome, SyncError> {
        check_lookback(self, request)?;

        let Some((bars, dropped)) = self.load(&request.series)? else {
            return Ok(FetchOutcome::NoData);
        };
        let now = chrono::Local::now().naive_local();
        let (from, to) = request.window(now);
        let bars: Vec<Bar> = bars
            .into_iter()
            .filter(|b| b.timestamp >= from && b.timestamp <= to)
            .collect();

        if bars.is_empty() {
            Ok(FetchOutcome::NoData)
        } else {
            Ok(FetchOutcome::Bars(FetchedBars { bars, dropped }))
        }
    }

    fn earliest_available_timestamp(&self, series: &SeriesId) -> Result<Option<NaiveDateTime>, SyncError> {
        Ok(self
            .load(series)?
            .and_then(|(bars, _)| bars.first().map(|b| b.timestamp)))
    }

    fn last_trade_date(&self, series: &SeriesId) -> Result<Option<NaiveDate>, SyncError> {
        match series.expiry {
            Some(expiry) => self.contract_last_trade(&series.symbol, expiry),
            None => Ok(None),
        }
    }
}
