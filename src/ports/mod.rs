//! Port traits: the seams between the sync engine and its collaborators.

pub mod catalog_port;
pub mod config_port;
pub mod provider_port;
pub mod series_port;
pub mod store_port;
