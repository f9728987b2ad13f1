//! Local SQLite cache of the published auction snapshot, kept in sync with the
//! server by a cheap version probe and an atomic full refresh.

pub mod api;
pub mod config;
pub mod dataset_sync;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod integrity;
pub mod prober;
pub mod query;
pub mod source;
pub mod state;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use dataset_sync::SyncService;
pub use error::{AppError, Result};
