//! Domain error types.

use crate::domain::watchlist::WatchlistError;

/// Top-level error type for barsync.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("provider unavailable: {reason}")]
    ProviderUnavailable { reason: String },

    #[error("provider rate limited {symbol}: {reason}")]
    ProviderRateLimited { symbol: String, reason: String },

    #[error("provider response error for {symbol}: {reason}")]
    ProviderResponse { symbol: String, reason: String },

    #[error("lookback of {requested} days for {interval} exceeds provider maximum of {maximum}")]
    LookbackExceeded {
        interval: String,
        requested: u32,
        maximum: u32,
    },

    #[error("malformed timestamp {value:?}")]
    MalformedTimestamp { value: String },

    #[error("storage write error on {series}: {reason}")]
    StorageWrite { series: String, reason: String },

    #[error("storage query error: {reason}")]
    StorageQuery { reason: String },

    #[error("series {series} does not exist")]
    SeriesNotFound { series: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Watchlist(#[from] WatchlistError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// True for failures that must abort a run during discovery.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::ProviderUnavailable { .. })
    }
}

impl From<&SyncError> for std::process::ExitCode {
    fn from(err: &SyncError) -> Self {
        let code: u8 = match err {
            SyncError::Io(_) => 1,
            SyncError::ConfigParse { .. }
            | SyncError::ConfigMissing { .. }
            | SyncError::ConfigInvalid { .. } => 2,
            SyncError::StorageWrite { .. }
            | SyncError::StorageQuery { .. }
            | SyncError::SeriesNotFound { .. } => 3,
            SyncError::ProviderUnavailable { .. }
            | SyncError::ProviderRateLimited { .. }
            | SyncError::ProviderResponse { .. }
            | SyncError::LookbackExceeded { .. }
            | SyncError::MalformedTimestamp { .. } => 4,
            SyncError::Watchlist(_) => 5,
        };
        std::process::ExitCode::from(code)
    }
}
