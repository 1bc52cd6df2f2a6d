//! OHLCV bar representation and provider timestamp normalization.

use crate::domain::error::SyncError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// One stored bar. Daily and coarser bars carry a midnight timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Bar {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// A bar as delivered by a provider, timestamp still unparsed.
#[derive(Debug, Clone)]
pub struct RawBar {
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y%m%d  %H:%M:%S",
    "%Y%m%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y%m%d", "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

/// Parse a provider timestamp in any of the formats seen in the wild.
///
/// Timezone-qualified values are converted to their naive local wall clock
/// (the offset is dropped, not applied). Pure digit strings longer than eight
/// characters are read as epoch seconds.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, SyncError> {
    let trimmed = value.trim();
    let malformed = || SyncError::MalformedTimestamp {
        value: value.to_string(),
    };
    if trimmed.is_empty() {
        return Err(malformed());
    }

    if trimmed.len() > 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = trimmed.parse().map_err(|_| malformed())?;
        return DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(malformed);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.naive_local());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(d.and_time(NaiveTime::MIN));
        }
    }

    Err(malformed())
}

/// Convert raw provider bars, dropping (and logging) those whose timestamp
/// cannot be parsed. Returns the good bars sorted ascending and the number
/// dropped.
pub fn normalize_raw_bars(symbol: &str, raw: Vec<RawBar>) -> (Vec<Bar>, usize) {
    let mut bars = Vec::with_capacity(raw.len());
    let mut dropped = 0;

    for r in raw {
        match parse_timestamp(&r.timestamp) {
            Ok(timestamp) => bars.push(Bar {
                timestamp,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
            }),
            Err(e) => {
                tracing::warn!(symbol, error = %e, "dropping bar");
                dropped += 1;
            }
        }
    }

    bars.sort_by_key(|b| b.timestamp);
    (bars, dropped)
}
