//! Snapkeep Core - snapshot archives and group restore
//!
//! This crate builds point-in-time archives of the application's relational
//! state and auxiliary folders, and restores them wholesale or by named
//! restore group against either the embedded or the client-server engine.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

pub mod archive;
pub mod backup;
pub mod catalog;
pub mod config;
pub mod dialect;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod service;
pub mod util;

pub use backup::{BackupListing, CreatedBackup, RestoreReport, TableOutcome};
pub use catalog::{RestoreCatalog, RestoreGroup, RestoreSelection};
pub use config::EngineConfig;
pub use dialect::{DialectAdapter, SqlValue, TableRows};
pub use error::{BackupError, BackupResult};
pub use manifest::{DbType, Manifest};
pub use service::BackupService;
