//! Rate-limited provider decorator.

use crate::domain::error::SyncError;
use crate::domain::series::{Interval, SeriesId};
use crate::domain::sync_config::{RateLimiterKind, SyncConfig};
use crate::domain::throttle::{Clock, FixedIntervalGate, RateLimiter, TokenBucket};
use crate::ports::provider_port::{check_lookback, BarProvider, BarRequest, FetchOutcome};
use chrono::{NaiveDate, NaiveDateTime};
use std::cell::RefCell;
use std::rc::Rc;

/// Wraps a provider so every external call first waits on the limiter.
/// `max_lookback_days` is local and never throttled.
pub struct ThrottledProvider<P> {
    inner: P,
    limiter: RefCell<Box<dyn RateLimiter>>,
}

impl<P: BarProvider> ThrottledProvider<P> {
    pub fn new(inner: P, limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            inner,
            limiter: RefCell::new(limiter),
        }
    }

    /// Limiter chosen by `[sync] rate_limiter`.
    pub fn from_config(inner: P, config: &SyncConfig, clock: Rc<dyn Clock>) -> Self {
        let limiter: Box<dyn RateLimiter> = match config.rate_limiter {
            RateLimiterKind::FixedInterval => {
                Box::new(FixedIntervalGate::new(config.rate_limit_cooldown, clock))
            }
            RateLimiterKind::TokenBucket {
                capacity,
                rate_per_second,
            } => Box::new(TokenBucket::new(capacity, rate_per_second, clock)),
        };
        Self::new(inner, limiter)
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn pace(&self, call: &str) {
        let waited = self.limiter.borrow_mut().acquire();
        if !waited.is_zero() {
            tracing::debug!(
                provider = self.inner.name(),
                call,
                waited_ms = waited.as_millis() as u64,
                "rate limiter cooldown"
            );
        }
    }
}

impl<P: BarProvider> BarProvider for ThrottledProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn check_connection(&self) -> Result<(), SyncError> {
        self.pace("check_connection");
        self.inner.check_connection()
    }

    fn max_lookback_days(&self, interval: Interval) -> u32 {
        self.inner.max_lookback_days(interval)
    }

    fn fetch_bars(&self, request: &BarRequest) -> Result<FetchOutcome, SyncError> {
        // An oversized request fails without spending a slot.
        check_lookback(&self.inner, request)?;
        self.pace("fetch_bars");
        self.inner.fetch_bars(request)
    }

    fn earliest_available_timestamp(&self, series: &SeriesId) -> Result<Option<NaiveDateTime>, SyncError> {
        self.pace("earliest_available_timestamp");
        self.inner.earliest_available_timestamp(series)
    }

    fn last_trade_date(&self, series: &SeriesId) -> Result<Option<NaiveDate>, SyncError> {
        self.pace("last_trade_date");
        self.inner.last_trade_date(series)
    }
}
