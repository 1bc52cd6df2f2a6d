//! Core domain types and sync logic.

pub mod calendar;
pub mod catalog;
pub mod error;
pub mod gap;
pub mod ohlcv;
pub mod report;
pub mod scheduler;
pub mod series;
pub mod sync_config;
pub mod throttle;
pub mod watchlist;
