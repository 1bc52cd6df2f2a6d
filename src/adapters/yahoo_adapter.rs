//! Yahoo Finance bar provider.
//!
//! Uses the v8 chart API. Timestamps arrive as epoch seconds and are shifted
//! by the exchange's `gmtoffset` to local wall-clock time; daily and coarser
//! bars are truncated to midnight. `meta.firstTradeDate` is the provider
//! floor, clamped to how far back Yahoo serves intraday and hourly bars.
//! Rate limiting (HTTP 429) and network failures are retried with
//! exponential backoff before being surfaced.

use crate::domain::error::SyncError;
use crate::domain::ohlcv::{normalize_raw_bars, Bar, RawBar};
use crate::domain::series::{Interval, SeriesId};
use crate::ports::config_port::ConfigPort;
use crate::ports::provider_port::{check_lookback, BarProvider, BarRequest, FetchOutcome, FetchedBars};
use chrono::{DateTime, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const PROBE_SYMBOL: &str = "SPY";
/// Largest exchange UTC offset, in seconds. Request bounds are padded by it
/// since the window is exchange-local and `period1`/`period2` are UTC.
const MAX_UTC_OFFSET_SECS: i64 = 14 * 3600;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    first_trade_date: Option<i64>,
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

/// Yahoo's name for an interval.
fn yahoo_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1m",
        Interval::FiveMinutes => "5m",
        Interval::FifteenMinutes => "15m",
        Interval::ThirtyMinutes => "30m",
        Interval::OneHour => "60m",
        Interval::OneDay => "1d",
        Interval::OneWeek => "1wk",
        Interval::OneMonth => "1mo",
    }
}

/// Days of history Yahoo serves at all for intraday and hourly bars.
fn serve_horizon_days(interval: Interval) -> Option<i64> {
    match interval {
        Interval::OneMinute => Some(28),
        Interval::FiveMinutes | Interval::FifteenMinutes | Interval::ThirtyMinutes => Some(58),
        Interval::OneHour => Some(728),
        Interval::OneDay | Interval::OneWeek | Interval::OneMonth => None,
    }
}

/// Earliest bar Yahoo will serve for `interval`: the first trade date, or
/// the serve horizon when that is later.
fn interval_floor(
    first_trade: Option<NaiveDateTime>,
    interval: Interval,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    match serve_horizon_days(interval) {
        Some(days) => {
            let horizon = (now - chrono::Duration::days(days)).date().and_time(NaiveTime::MIN);
            Some(first_trade.map_or(horizon, |first| first.max(horizon)))
        }
        None => first_trade,
    }
}

/// Daily and coarser windows cover whole dates.
fn window_start(interval: Interval, from: NaiveDateTime) -> NaiveDateTime {
    if interval >= Interval::OneDay {
        from.date().and_time(NaiveTime::MIN)
    } else {
        from
    }
}

/// UTC epoch bounds covering the local window `[from, to]` whatever the
/// exchange offset. Daily and coarser windows include all of `to`'s date.
fn period_bounds(interval: Interval, from: NaiveDateTime, to: NaiveDateTime) -> (i64, i64) {
    let start = window_start(interval, from);
    let end = if interval >= Interval::OneDay {
        (to.date() + chrono::Duration::days(1)).and_time(NaiveTime::MIN)
    } else {
        to
    };
    (
        start.and_utc().timestamp() - MAX_UTC_OFFSET_SECS,
        end.and_utc().timestamp() + MAX_UTC_OFFSET_SECS,
    )
}

/// Truncate daily and coarser bars to midnight and keep those inside the
/// local window.
fn clip_to_window(mut bars: Vec<Bar>, interval: Interval, from: NaiveDateTime, to: NaiveDateTime) -> Vec<Bar> {
    if interval >= Interval::OneDay {
        for bar in &mut bars {
            bar.timestamp = bar.timestamp.date().and_time(NaiveTime::MIN);
        }
    }
    let start = window_start(interval, from);
    bars.retain(|b| b.timestamp >= start && b.timestamp <= to);
    bars
}

/// Chart data for one symbol, or `None` when Yahoo does not know it.
fn chart_data(symbol: &str, resp: ChartResponse) -> Result<Option<ChartData>, SyncError> {
    match resp.chart.result {
        Some(result) => Ok(result.into_iter().next()),
        None => match resp.chart.error {
            Some(err) if err.code == "Not Found" => Ok(None),
            Some(err) => Err(SyncError::ProviderResponse {
                symbol: symbol.to_string(),
                reason: format!("{}: {}", err.code, err.description),
            }),
            None => Err(SyncError::ProviderResponse {
                symbol: symbol.to_string(),
                reason: "empty result with no error".into(),
            }),
        },
    }
}

/// Convert chart data to raw bars in exchange-local time. Rows with no
/// prices at all (non-trading placeholders) are skipped.
fn raw_bars(data: &ChartData) -> Vec<RawBar> {
    let Some(timestamps) = data.timestamp.as_ref() else {
        return Vec::new();
    };
    let Some(quote) = data.indicators.quote.first() else {
        return Vec::new();
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let open = quote.open.get(i).copied().flatten();
        let high = quote.high.get(i).copied().flatten();
        let low = quote.low.get(i).copied().flatten();
        let close = quote.close.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) = (open, high, low, close) else {
            continue;
        };
        bars.push(RawBar {
            timestamp: (ts + data.meta.gmtoffset).to_string(),
            open,
            high,
            low,
            close,
            volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
        });
    }
    bars
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) barsync")
            .build()
            .map_err(|e| SyncError::ProviderUnavailable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SyncError> {
        let timeout = config.get_int("provider", "timeout_seconds", 30).max(1) as u64;
        let mut provider = Self::new(Duration::from_secs(timeout))?;
        provider.max_retries = config.get_int("provider", "max_retries", 3).clamp(0, 10) as u32;
        if let Some(url) = config.get_string("provider", "base_url") {
            provider.base_url = url.trim_end_matches('/').to_string();
        }
        Ok(provider)
    }

    fn chart_url(&self, symbol: &str, query: &str) -> String {
        format!("{}/v8/finance/chart/{}?{}", self.base_url, symbol, query)
    }

    /// GET a chart URL with retry. 429 and connect/timeout failures are
    /// retried; the last one is surfaced as rate-limited or unavailable.
    fn get_chart(&self, symbol: &str, url: &str) -> Result<ChartResponse, SyncError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying yahoo request");
                std::thread::sleep(delay);
            }

            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        tracing::warn!(symbol, "yahoo rate limited");
                        last_error = Some(SyncError::ProviderRateLimited {
                            symbol: symbol.to_string(),
                            reason: "HTTP 429".into(),
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(SyncError::ProviderUnavailable {
                            reason: format!("HTTP {status} from yahoo"),
                        });
                    }

                    // Unknown symbols come back as 404 with a chart error body.
                    if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
                        if status.is_server_error() {
                            last_error = Some(SyncError::ProviderResponse {
                                symbol: symbol.to_string(),
                                reason: format!("HTTP {status}"),
                            });
                            continue;
                        }
                        return Err(SyncError::ProviderResponse {
                            symbol: symbol.to_string(),
                            reason: format!("HTTP {status}"),
                        });
                    }

                    return resp.json().map_err(|e| SyncError::ProviderResponse {
                        symbol: symbol.to_string(),
                        reason: format!("failed to parse response: {e}"),
                    });
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(SyncError::ProviderUnavailable {
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    return Err(SyncError::ProviderUnavailable {
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::ProviderResponse {
            symbol: symbol.to_string(),
            reason: "max retries exceeded".into(),
        }))
    }
}

impl BarProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn check_connection(&self) -> Result<(), SyncError> {
        let url = self.chart_url(PROBE_SYMBOL, "range=1d&interval=1d");
        match self.get_chart(PROBE_SYMBOL, &url) {
            Ok(_) | Err(SyncError::ProviderRateLimited { .. }) => Ok(()),
            Err(SyncError::ProviderResponse { reason, .. }) => {
                Err(SyncError::ProviderUnavailable { reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Per-call windows Yahoo will serve: under eight days of 1m bars once
    /// the request is padded for the exchange offset, about two months of
    /// other intraday bars, two years of hourly bars.
    fn max_lookback_days(&self, interval: Interval) -> u32 {
        match interval {
            Interval::OneMinute => 6,
            Interval::FiveMinutes | Interval::FifteenMinutes | Interval::ThirtyMinutes => 59,
            Interval::OneHour => 729,
            Interval::OneDay => 3650,
            Interval::OneWeek | Interval::OneMonth => 36500,
        }
    }

    fn fetch_bars(&self, request: &BarRequest) -> Result<FetchOutcome, SyncError> {
        check_lookback(self, request)?;
        let series = &request.series;

        let now = chrono::Local::now().naive_local();
        let (from, to) = request.window(now);
        let (period1, period2) = period_bounds(series.interval, from, to);
        let query = format!(
            "period1={}&period2={}&interval={}&includePrePost=false",
            period1,
            period2,
            yahoo_interval(series.interval)
        );
        let url = self.chart_url(&series.symbol, &query);

        let chart = self.get_chart(&series.symbol, &url)?;
        let Some(data) = chart_data(&series.symbol, chart)? else {
            return Ok(FetchOutcome::NoData);
        };

        let (bars, dropped) = normalize_raw_bars(&series.symbol, raw_bars(&data));
        let bars = clip_to_window(bars, series.interval, from, to);

        if bars.is_empty() {
            Ok(FetchOutcome::NoData)
        } else {
            tracing::debug!(series = %series, bars = bars.len(), dropped, "yahoo bars");
            Ok(FetchOutcome::Bars(FetchedBars { bars, dropped }))
        }
    }

    fn earliest_available_timestamp(&self, series: &SeriesId) -> Result<Option<NaiveDateTime>, SyncError> {
        let url = self.chart_url(&series.symbol, "range=1d&interval=1d");
        let chart = self.get_chart(&series.symbol, &url)?;
        let Some(data) = chart_data(&series.symbol, chart)? else {
            return Ok(None);
        };
        let first_trade = data
            .meta
            .first_trade_date
            .and_then(|ts| DateTime::from_timestamp(ts + data.meta.gmtoffset, 0))
            .map(|dt| dt.naive_utc());
        let now = chrono::Local::now().naive_local();
        Ok(interval_floor(first_trade, series.interval, now))
    }
}
