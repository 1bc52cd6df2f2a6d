//! Watch-list parsing.
//!
//! A watch-list is one logical column of symbols. Entries are uppercased,
//! deduplicated and sorted before the scheduler sees them. Futures contracts
//! are written `SYMBOL:YYYYMM`.

use crate::domain::series::ContractMonth;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchItem {
    pub symbol: String,
    pub expiry: Option<ContractMonth>,
}

impl WatchItem {
    pub fn key(&self) -> String {
        match self.expiry {
            Some(expiry) => format!("{}:{}", self.symbol, expiry),
            None => self.symbol.clone(),
        }
    }
}

impl fmt::Display for WatchItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchlistError {
    #[error("invalid symbol {0:?}")]
    InvalidSymbol(String),

    #[error("invalid contract {token:?}: {reason}")]
    InvalidContract { token: String, reason: String },

    #[error("failed to read watch-list {path}: {reason}")]
    Read { path: String, reason: String },
}

fn valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=' | '&'))
}

/// Parse one token. Blank tokens yield `None`.
pub fn parse_item(token: &str) -> Result<Option<WatchItem>, WatchlistError> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let upper = trimmed.to_uppercase();

    let (symbol, expiry) = match upper.split_once(':') {
        Some((sym, month)) => {
            let expiry = month
                .parse::<ContractMonth>()
                .map_err(|reason| WatchlistError::InvalidContract {
                    token: trimmed.to_string(),
                    reason,
                })?;
            (sym.trim().to_string(), Some(expiry))
        }
        None => (upper, None),
    };

    if !valid_symbol(&symbol) {
        return Err(WatchlistError::InvalidSymbol(trimmed.to_string()));
    }

    Ok(Some(WatchItem { symbol, expiry }))
}

/// Parse a comma-separated list.
pub fn parse_list(input: &str) -> Result<Vec<WatchItem>, WatchlistError> {
    let mut items = Vec::new();
    for token in input.split(',') {
        if let Some(item) = parse_item(token)? {
            items.push(item);
        }
    }
    Ok(normalize(items))
}

/// Read the first column of a CSV file. A header row named `symbol` (any
/// case) is skipped.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Vec<WatchItem>, WatchlistError> {
    let path = path.as_ref();
    let read_err = |reason: String| WatchlistError::Read {
        path: path.display().to_string(),
        reason,
    };

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| read_err(e.to_string()))?;

    let mut items = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| read_err(e.to_string()))?;
        let Some(cell) = record.get(0) else {
            continue;
        };
        if row == 0 && cell.eq_ignore_ascii_case("symbol") {
            continue;
        }
        if let Some(item) = parse_item(cell)? {
            items.push(item);
        }
    }

    Ok(normalize(items))
}

/// Deduplicate and sort.
pub fn normalize(items: Vec<WatchItem>) -> Vec<WatchItem> {
    items.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}
