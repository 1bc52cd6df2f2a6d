//! Series identity: symbol, instrument kind, interval and optional contract
//! month, plus the deterministic storage table name derived from them.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstrumentKind {
    Index,
    Stock,
    Future,
}

impl InstrumentKind {
    pub const ALL: [InstrumentKind; 3] = [
        InstrumentKind::Index,
        InstrumentKind::Stock,
        InstrumentKind::Future,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Index => "index",
            InstrumentKind::Stock => "stock",
            InstrumentKind::Future => "future",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "index" | "ind" => Ok(InstrumentKind::Index),
            "stock" | "stk" => Ok(InstrumentKind::Stock),
            "future" | "fut" => Ok(InstrumentKind::Future),
            other => Err(format!("unknown instrument kind: {other}")),
        }
    }
}

/// Bar interval. Ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    OneDay,
    OneWeek,
    OneMonth,
}

/// Coarse grouping used for lookback defaults and provider windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntervalClass {
    Intraday,
    Hourly,
    Daily,
    Long,
}

impl Interval {
    pub const ALL: [Interval; 8] = [
        Interval::OneMinute,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::OneDay,
        Interval::OneWeek,
        Interval::OneMonth,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1min",
            Interval::FiveMinutes => "5min",
            Interval::FifteenMinutes => "15min",
            Interval::ThirtyMinutes => "30min",
            Interval::OneHour => "1hour",
            Interval::OneDay => "1day",
            Interval::OneWeek => "1week",
            Interval::OneMonth => "1month",
        }
    }

    pub fn class(&self) -> IntervalClass {
        match self {
            Interval::OneMinute
            | Interval::FiveMinutes
            | Interval::FifteenMinutes
            | Interval::ThirtyMinutes => IntervalClass::Intraday,
            Interval::OneHour => IntervalClass::Hourly,
            Interval::OneDay => IntervalClass::Daily,
            Interval::OneWeek | Interval::OneMonth => IntervalClass::Long,
        }
    }

    /// Whether every trading day is expected to carry at least one bar.
    pub fn is_daily_or_finer(&self) -> bool {
        *self <= Interval::OneDay
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let interval = match lower.as_str() {
            "1min" | "1m" | "1 min" => Interval::OneMinute,
            "5min" | "5m" | "5 mins" => Interval::FiveMinutes,
            "15min" | "15m" | "15 mins" => Interval::FifteenMinutes,
            "30min" | "30m" | "30 mins" => Interval::ThirtyMinutes,
            "1hour" | "1h" | "60min" | "1 hour" => Interval::OneHour,
            "1day" | "1d" | "daily" | "1 day" => Interval::OneDay,
            "1week" | "1w" | "1wk" | "weekly" | "1 week" => Interval::OneWeek,
            "1month" | "1mo" | "monthly" | "1 month" => Interval::OneMonth,
            _ => return Err(format!("unknown interval: {s}")),
        };
        Ok(interval)
    }
}

/// Futures contract month, written `YYYYMM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractMonth {
    pub year: i32,
    pub month: u32,
}

impl ContractMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1900..=2999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for ContractMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for ContractMonth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid contract month {s:?}, expected YYYYMM"));
        }
        let year: i32 = s[..4].parse().map_err(|_| format!("invalid year in {s:?}"))?;
        let month: u32 = s[4..].parse().map_err(|_| format!("invalid month in {s:?}"))?;
        ContractMonth::new(year, month).ok_or_else(|| format!("invalid contract month {s:?}"))
    }
}

/// Identity of one stored bar sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId {
    pub symbol: String,
    pub kind: InstrumentKind,
    pub interval: Interval,
    pub expiry: Option<ContractMonth>,
}

impl SeriesId {
    pub fn new(symbol: &str, kind: InstrumentKind, interval: Interval) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            kind,
            interval,
            expiry: None,
        }
    }

    pub fn future(symbol: &str, expiry: ContractMonth, interval: Interval) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            kind: InstrumentKind::Future,
            interval,
            expiry: Some(expiry),
        }
    }

    /// Same instrument at a different interval.
    pub fn with_interval(&self, interval: Interval) -> Self {
        Self {
            interval,
            ..self.clone()
        }
    }

    /// Storage key: `{symbol}_{kind}_{interval}`, or
    /// `{symbol}_{YYYYMM}_{interval}` for futures contracts.
    pub fn table_name(&self) -> String {
        match self.expiry {
            Some(expiry) => format!("{}_{}_{}", self.symbol, expiry, self.interval),
            None => format!("{}_{}_{}", self.symbol, self.kind, self.interval),
        }
    }

    /// Key used to group the intervals of one instrument.
    pub fn instrument_key(&self) -> String {
        match self.expiry {
            Some(expiry) => format!("{}:{}", self.symbol, expiry),
            None => self.symbol.clone(),
        }
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.table_name())
    }
}
