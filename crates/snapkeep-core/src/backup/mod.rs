//! Snapshot writer, reader, and restore orchestrator

pub mod create;
pub mod list;
pub mod restore;
pub mod types;

pub use create::create_backup;
pub use list::{list_backups, read_manifest, read_manifest_at, resolve_archive};
pub use restore::restore_backup;
pub use types::{
    BackupListing, CreatedBackup, FolderOutcome, RestoreReport, RestoredItems, SkipReason,
    TableOutcome,
};
