//! SQLite storage adapter: one table per series plus the `records_catalog`
//! table, in one database file per namespace.

use crate::domain::catalog::{CatalogEntry, CatalogUpdate};
use crate::domain::error::SyncError;
use crate::domain::ohlcv::Bar;
use crate::domain::series::{ContractMonth, InstrumentKind, Interval, SeriesId};
use crate::ports::catalog_port::CatalogPort;
use crate::ports::config_port::ConfigPort;
use crate::ports::series_port::{SeriesRepository, WriteResult};
use crate::ports::store_port::TimeSeriesStore;
use chrono::{NaiveDate, NaiveDateTime};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

const CATALOG_COLUMNS: &str = "name, symbol, instrument_kind, interval, expiry, \
     first_record_date, last_update_date, num_missing_business_days, \
     last_gap_scan_date, last_trade_date, provider_floor, history_exhausted";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
    auto_create: bool,
}

fn query_err(e: rusqlite::Error) -> SyncError {
    SyncError::StorageQuery {
        reason: e.to_string(),
    }
}

fn write_err(series: &SeriesId) -> impl Fn(rusqlite::Error) -> SyncError + '_ {
    move |e| SyncError::StorageWrite {
        series: series.table_name(),
        reason: e.to_string(),
    }
}

/// Double-quoted SQL identifier. Symbols such as `^GSPC` or `BRK.B` end up in
/// table names.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_ts(value: &str) -> Result<NaiveDateTime, SyncError> {
    NaiveDateTime::parse_from_str(value, TS_FORMAT).map_err(|e| SyncError::StorageQuery {
        reason: format!("corrupt timestamp {value:?}: {e}"),
    })
}

fn parse_date(value: &str) -> Result<NaiveDate, SyncError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| SyncError::StorageQuery {
        reason: format!("corrupt date {value:?}: {e}"),
    })
}

fn corrupt(reason: String) -> SyncError {
    SyncError::StorageQuery { reason }
}

/// Raw `records_catalog` row before validation.
struct CatalogRow {
    symbol: String,
    kind: String,
    interval: String,
    expiry: Option<String>,
    first_record_date: String,
    last_update_date: String,
    num_missing_business_days: i64,
    last_gap_scan_date: Option<String>,
    last_trade_date: Option<String>,
    provider_floor: Option<String>,
    history_exhausted: bool,
}

impl CatalogRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            symbol: row.get(1)?,
            kind: row.get(2)?,
            interval: row.get(3)?,
            expiry: row.get(4)?,
            first_record_date: row.get(5)?,
            last_update_date: row.get(6)?,
            num_missing_business_days: row.get(7)?,
            last_gap_scan_date: row.get(8)?,
            last_trade_date: row.get(9)?,
            provider_floor: row.get(10)?,
            history_exhausted: row.get(11)?,
        })
    }

    fn into_entry(self) -> Result<CatalogEntry, SyncError> {
        let kind: InstrumentKind = self.kind.parse().map_err(corrupt)?;
        let interval: Interval = self.interval.parse().map_err(corrupt)?;
        let series = match self.expiry.as_deref() {
            Some(expiry) => {
                let month: ContractMonth = expiry.parse().map_err(corrupt)?;
                SeriesId::future(&self.symbol, month, interval)
            }
            None => SeriesId::new(&self.symbol, kind, interval),
        };

        Ok(CatalogEntry {
            series,
            first_record_date: parse_ts(&self.first_record_date)?,
            last_update_date: parse_ts(&self.last_update_date)?,
            num_missing_business_days: self.num_missing_business_days,
            last_gap_scan_date: self.last_gap_scan_date.as_deref().map(parse_date).transpose()?,
            last_trade_date: self.last_trade_date.as_deref().map(parse_date).transpose()?,
            provider_floor: self.provider_floor.as_deref().map(parse_ts).transpose()?,
            history_exhausted: self.history_exhausted,
        })
    }
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, SyncError> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(query_err)
}

fn create_series_table(conn: &Connection, series: &SeriesId) -> Result<(), SyncError> {
    let name = series.table_name();
    let table = quote_ident(&name);
    let index = quote_ident(&format!("idx_{name}_timestamp"));
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            timestamp TEXT NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {index} ON {table}(timestamp);"
    ))
    .map_err(write_err(series))?;
    tracing::debug!(series = %series, "created series table");
    Ok(())
}

fn append_rows(
    conn: &Connection,
    series: &SeriesId,
    bars: &[Bar],
    auto_create: bool,
) -> Result<usize, SyncError> {
    if !table_exists(conn, &series.table_name())? {
        if !auto_create {
            return Err(SyncError::StorageWrite {
                series: series.table_name(),
                reason: "table does not exist and auto_create is disabled".into(),
            });
        }
        create_series_table(conn, series)?;
    }

    let sql = format!(
        "INSERT INTO {} (timestamp, open, high, low, close, volume)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        quote_ident(&series.table_name())
    );
    let mut stmt = conn.prepare_cached(&sql).map_err(write_err(series))?;
    for bar in bars {
        stmt.execute(params![
            format_ts(bar.timestamp),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume
        ])
        .map_err(write_err(series))?;
    }
    Ok(bars.len())
}

fn dedup_rows(conn: &Connection, series: &SeriesId) -> Result<usize, SyncError> {
    if !table_exists(conn, &series.table_name())? {
        return Ok(0);
    }
    let table = quote_ident(&series.table_name());
    conn.execute(
        &format!(
            "DELETE FROM {table} WHERE rowid NOT IN
                (SELECT MIN(rowid) FROM {table} GROUP BY timestamp)"
        ),
        [],
    )
    .map_err(write_err(series))
}

fn bounds(
    conn: &Connection,
    series: &SeriesId,
) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, SyncError> {
    if !table_exists(conn, &series.table_name())? {
        return Ok(None);
    }
    let (min, max): (Option<String>, Option<String>) = conn
        .query_row(
            &format!(
                "SELECT MIN(timestamp), MAX(timestamp) FROM {}",
                quote_ident(&series.table_name())
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(query_err)?;

    match (min, max) {
        (Some(min), Some(max)) => Ok(Some((parse_ts(&min)?, parse_ts(&max)?))),
        _ => Ok(None),
    }
}

fn load_entry(conn: &Connection, series: &SeriesId) -> Result<Option<CatalogEntry>, SyncError> {
    let row = conn
        .query_row(
            &format!("SELECT {CATALOG_COLUMNS} FROM records_catalog WHERE name = ?1"),
            params![series.table_name()],
            CatalogRow::from_row,
        )
        .optional()
        .map_err(query_err)?;
    row.map(CatalogRow::into_entry).transpose()
}

fn save_entry(conn: &Connection, entry: &CatalogEntry) -> Result<(), SyncError> {
    let series = &entry.series;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO records_catalog ({CATALOG_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            series.table_name(),
            series.symbol,
            series.kind.as_str(),
            series.interval.name(),
            series.expiry.map(|m| m.to_string()),
            format_ts(entry.first_record_date),
            format_ts(entry.last_update_date),
            entry.num_missing_business_days,
            entry.last_gap_scan_date.map(format_date),
            entry.last_trade_date.map(format_date),
            entry.provider_floor.map(format_ts),
            entry.history_exhausted,
        ],
    )
    .map_err(write_err(series))?;
    Ok(())
}

fn upsert_entry(conn: &Connection, update: &CatalogUpdate) -> Result<CatalogEntry, SyncError> {
    let entry = match load_entry(conn, &update.series)? {
        Some(mut existing) => {
            existing.merge(update);
            existing
        }
        None => {
            tracing::info!(series = %update.series, "new catalog entry");
            CatalogEntry::from_update(update)
        }
    };
    save_entry(conn, &entry)?;
    Ok(entry)
}

impl SqliteAdapter {
    /// Open the database for one namespace, `[storage] {kind}_path`.
    pub fn from_config(config: &dyn ConfigPort, kind: InstrumentKind) -> Result<Self, SyncError> {
        let key = format!("{}_path", kind.as_str());
        let db_path = config
            .get_string("storage", &key)
            .ok_or_else(|| SyncError::ConfigMissing {
                section: "storage".into(),
                key,
            })?;

        let pool_size = config.get_int("storage", "pool_size", 4).clamp(1, 64) as u32;
        let auto_create = config.get_bool("storage", "auto_create", true);

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| SyncError::StorageQuery {
                reason: format!("{db_path}: {e}"),
            })?;

        tracing::debug!(path = %db_path, pool_size, auto_create, "opened sqlite store");
        Ok(Self { pool, auto_create })
    }

    pub fn in_memory() -> Result<Self, SyncError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| SyncError::StorageQuery {
                reason: e.to_string(),
            })?;

        Ok(Self {
            pool,
            auto_create: true,
        })
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    pub fn initialize_schema(&self) -> Result<(), SyncError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records_catalog (
                name TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                instrument_kind TEXT NOT NULL,
                interval TEXT NOT NULL,
                expiry TEXT,
                first_record_date TEXT NOT NULL,
                last_update_date TEXT NOT NULL,
                num_missing_business_days INTEGER NOT NULL DEFAULT 0,
                last_gap_scan_date TEXT,
                last_trade_date TEXT,
                provider_floor TEXT,
                history_exhausted INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_records_catalog_symbol ON records_catalog(symbol);",
        )
        .map_err(query_err)?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, SyncError> {
        self.pool.get().map_err(|e: r2d2::Error| SyncError::StorageQuery {
            reason: e.to_string(),
        })
    }
}

impl TimeSeriesStore for SqliteAdapter {
    fn append(&self, series: &SeriesId, bars: &[Bar]) -> Result<usize, SyncError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(write_err(series))?;
        let appended = append_rows(&tx, series, bars, self.auto_create)?;
        tx.commit().map_err(write_err(series))?;
        Ok(appended)
    }

    fn dedup(&self, series: &SeriesId) -> Result<usize, SyncError> {
        let conn = self.conn()?;
        dedup_rows(&conn, series)
    }

    fn read_range(
        &self,
        series: &SeriesId,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, SyncError> {
        let conn = self.conn()?;
        if !table_exists(&conn, &series.table_name())? {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT timestamp, open, high, low, close, volume FROM {}
             WHERE (?1 IS NULL OR timestamp >= ?1) AND (?2 IS NULL OR timestamp <= ?2)
             ORDER BY timestamp ASC, rowid ASC",
            quote_ident(&series.table_name())
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let rows = stmt
            .query_map(params![from.map(format_ts), to.map(format_ts)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            let (ts, open, high, low, close, volume) = row.map_err(query_err)?;
            bars.push(Bar {
                timestamp: parse_ts(&ts)?,
                open,
                high,
                low,
                close,
                volume,
            });
        }
        Ok(bars)
    }

    fn min_timestamp(&self, series: &SeriesId) -> Result<Option<NaiveDateTime>, SyncError> {
        Ok(bounds(&*self.conn()?, series)?.map(|(min, _)| min))
    }

    fn max_timestamp(&self, series: &SeriesId) -> Result<Option<NaiveDateTime>, SyncError> {
        Ok(bounds(&*self.conn()?, series)?.map(|(_, max)| max))
    }

    fn series_exists(&self, series: &SeriesId) -> Result<bool, SyncError> {
        table_exists(&*self.conn()?, &series.table_name())
    }

    fn row_count(&self, series: &SeriesId) -> Result<usize, SyncError> {
        let conn = self.conn()?;
        if !table_exists(&conn, &series.table_name())? {
            return Ok(0);
        }
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&series.table_name())),
                [],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        Ok(count as usize)
    }

    fn drop_series(&self, series: &SeriesId) -> Result<bool, SyncError> {
        let conn = self.conn()?;
        let existed = table_exists(&conn, &series.table_name())?;
        if existed {
            conn.execute_batch(&format!(
                "DROP TABLE {}",
                quote_ident(&series.table_name())
            ))
            .map_err(write_err(series))?;
            tracing::info!(series = %series, "dropped series table");
        }
        Ok(existed)
    }
}

impl CatalogPort for SqliteAdapter {
    fn get(&self, series: &SeriesId) -> Result<Option<CatalogEntry>, SyncError> {
        load_entry(&*self.conn()?, series)
    }

    fn list_entries(&self) -> Result<Vec<CatalogEntry>, SyncError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CATALOG_COLUMNS} FROM records_catalog ORDER BY name"
            ))
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], CatalogRow::from_row)
            .map_err(query_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(query_err)?.into_entry()?);
        }
        Ok(entries)
    }

    fn upsert(&self, update: &CatalogUpdate) -> Result<CatalogEntry, SyncError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(write_err(&update.series))?;
        let entry = upsert_entry(&tx, update)?;
        tx.commit().map_err(write_err(&update.series))?;
        Ok(entry)
    }

    fn mark_gap_scan(&self, series: &SeriesId, date: NaiveDate) -> Result<(), SyncError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE records_catalog SET last_gap_scan_date = ?1 WHERE name = ?2",
                params![format_date(date), series.table_name()],
            )
            .map_err(write_err(series))?;
        if changed == 0 {
            return Err(SyncError::SeriesNotFound {
                series: series.table_name(),
            });
        }
        Ok(())
    }

    fn mark_history_exhausted(&self, series: &SeriesId) -> Result<(), SyncError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE records_catalog
                 SET history_exhausted = 1, num_missing_business_days = 0
                 WHERE name = ?1",
                params![series.table_name()],
            )
            .map_err(write_err(series))?;
        if changed == 0 {
            return Err(SyncError::SeriesNotFound {
                series: series.table_name(),
            });
        }
        Ok(())
    }

    fn purge(&self, series: &SeriesId) -> Result<bool, SyncError> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM records_catalog WHERE name = ?1",
                params![series.table_name()],
            )
            .map_err(write_err(series))?;
        Ok(removed > 0)
    }
}

impl SeriesRepository for SqliteAdapter {
    /// Append, dedup and catalog upsert in one transaction. Any failure rolls
    /// all three back.
    fn write_batch(
        &self,
        series: &SeriesId,
        bars: &[Bar],
        provider_floor: Option<NaiveDateTime>,
        last_trade_date: Option<NaiveDate>,
    ) -> Result<WriteResult, SyncError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(write_err(series))?;

        let appended = append_rows(&tx, series, bars, self.auto_create)?;
        let duplicates_removed = dedup_rows(&tx, series)?;
        let (first, last) = bounds(&tx, series)?.ok_or_else(|| SyncError::SeriesNotFound {
            series: series.table_name(),
        })?;

        let entry = upsert_entry(
            &tx,
            &CatalogUpdate {
                series: series.clone(),
                first_record_date: first,
                last_update_date: last,
                provider_floor,
                last_trade_date,
            },
        )?;

        tx.commit().map_err(write_err(series))?;

        tracing::debug!(
            series = %series,
            appended,
            duplicates_removed,
            first = %entry.first_record_date,
            last = %entry.last_update_date,
            "wrote batch"
        );
        Ok(WriteResult {
            entry,
            appended,
            duplicates_removed,
        })
    }
}
