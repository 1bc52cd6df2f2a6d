//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod file_config_adapter;
pub mod memory_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
pub mod throttled_provider;
#[cfg(feature = "yahoo")]
pub mod yahoo_adapter;
