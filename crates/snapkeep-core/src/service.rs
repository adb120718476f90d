//! Backup service: the explicit context every operation runs in
//!
//! Owns configuration, the restore catalog, the dialect adapter, and the
//! operation lock. Mutating operations hold the lock for their whole
//! duration; overlapping calls fail fast with `Busy`.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::archive::parse_archive_timestamp;
use crate::backup::{
    create_backup, list_backups, read_manifest, read_manifest_at, resolve_archive,
    restore_backup, BackupListing, CreatedBackup, RestoreReport,
};
use crate::backup::list::existing_archive;
use crate::catalog::{RestoreCatalog, RestoreGroup, RestoreSelection};
use crate::config::EngineConfig;
use crate::dialect::{open_adapter, DialectAdapter};
use crate::error::{BackupError, BackupResult};
use crate::lock::{OperationKind, OperationLock};
use crate::manifest::Manifest;

const UPLOAD_SUFFIX: &str = ".upload";

/// Entry point for all backup operations
pub struct BackupService {
    config: EngineConfig,
    catalog: RestoreCatalog,
    adapter: Box<dyn DialectAdapter>,
    lock: OperationLock,
}

impl BackupService {
    /// Create a service around an already-open adapter
    #[must_use]
    pub fn new(config: EngineConfig, adapter: Box<dyn DialectAdapter>) -> Self {
        let catalog = config.catalog();
        Self {
            config,
            catalog,
            adapter,
            lock: OperationLock::new(),
        }
    }

    /// Validate the config and open the adapter it names
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the database cannot
    /// be opened
    pub fn from_config(config: EngineConfig) -> BackupResult<Self> {
        config.validate()?;
        let adapter = open_adapter(&config)?;
        Ok(Self::new(config, adapter))
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &RestoreCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn adapter(&self) -> &dyn DialectAdapter {
        self.adapter.as_ref()
    }

    /// Restore groups in declaration order
    #[must_use]
    pub fn groups(&self) -> Vec<&RestoreGroup> {
        self.catalog.groups().collect()
    }

    /// Snapshot the live system into a new archive
    ///
    /// # Errors
    /// Returns `Busy` if another operation is running, or any creation error
    pub fn create_backup(&self) -> BackupResult<CreatedBackup> {
        let _guard = self.lock.try_acquire(OperationKind::Create)?;
        create_backup(&self.config, &self.catalog, self.adapter.as_ref())
    }

    /// Archives in the backup directory, newest first
    ///
    /// # Errors
    /// Returns an error if the backup directory cannot be read
    pub fn list_backups(&self) -> BackupResult<Vec<BackupListing>> {
        list_backups(&self.config)
    }

    /// # Errors
    /// Returns `Validation`, `NotFound`, or `CorruptArchive`
    pub fn read_manifest(&self, filename: &str) -> BackupResult<Manifest> {
        read_manifest(&self.config, filename)
    }

    /// Restore the selected groups from an archive
    ///
    /// # Errors
    /// Returns `Busy`, or any pre-mutation failure of the restore
    pub fn restore(&self, filename: &str, selection: &RestoreSelection) -> BackupResult<RestoreReport> {
        // Name check happens before the lock and before touching disk
        resolve_archive(&self.config, filename)?;
        let _guard = self.lock.try_acquire(OperationKind::Restore)?;
        restore_backup(
            &self.config,
            &self.catalog,
            self.adapter.as_ref(),
            filename,
            selection,
        )
    }

    /// Path of an existing archive, for download
    ///
    /// # Errors
    /// Returns `Validation` or `NotFound`
    pub fn archive_path(&self, filename: &str) -> BackupResult<PathBuf> {
        existing_archive(&self.config, filename)
    }

    /// Delete an archive
    ///
    /// # Errors
    /// Returns `Validation`, `Busy`, or `NotFound`
    pub fn delete_backup(&self, filename: &str) -> BackupResult<()> {
        resolve_archive(&self.config, filename)?;
        let _guard = self.lock.try_acquire(OperationKind::Delete)?;
        let path = existing_archive(&self.config, filename)?;
        fs::remove_file(&path)?;
        info!(archive = %filename, "Backup deleted");
        Ok(())
    }

    /// Accept an uploaded archive
    ///
    /// At most `max_upload_bytes` are read. The upload is written under a
    /// temporary name and only renamed into place once its manifest parses;
    /// on any failure the written file is removed.
    ///
    /// # Errors
    /// Returns `Validation` for a bad name, an existing archive, or an
    /// oversize upload, and `CorruptArchive` when the manifest is unreadable
    pub fn upload_backup<R: Read>(&self, filename: &str, reader: R) -> BackupResult<BackupListing> {
        let target = resolve_archive(&self.config, filename)?;
        let _guard = self.lock.try_acquire(OperationKind::Upload)?;

        if target.exists() {
            return Err(BackupError::Validation(format!(
                "Backup already exists: {filename}"
            )));
        }
        fs::create_dir_all(self.config.backup_dir())?;

        let staged = PathBuf::from(format!("{}{UPLOAD_SUFFIX}", target.display()));
        match self.receive_upload(filename, reader, &staged) {
            Ok(manifest) => {
                fs::rename(&staged, &target)?;
                let size = fs::metadata(&target)?.len();
                info!(archive = %filename, size, "Backup uploaded");
                Ok(BackupListing {
                    filename: filename.to_string(),
                    size,
                    created: parse_archive_timestamp(&self.config.archive_prefix, filename)
                        .map(|ts| ts.and_utc()),
                    manifest: Some(manifest),
                })
            }
            Err(e) => {
                warn!(archive = %filename, error = %e, "Upload rejected");
                if staged.exists() {
                    if let Err(cleanup) = fs::remove_file(&staged) {
                        warn!(path = %staged.display(), error = %cleanup, "Failed to remove rejected upload");
                    }
                }
                Err(e)
            }
        }
    }

    fn receive_upload<R: Read>(
        &self,
        filename: &str,
        reader: R,
        staged: &Path,
    ) -> BackupResult<Manifest> {
        let cap = self.config.max_upload_bytes;
        let mut file = File::create(staged)?;
        let written = io::copy(&mut reader.take(cap.saturating_add(1)), &mut file)?;
        drop(file);

        if written > cap {
            return Err(BackupError::Validation(format!(
                "Upload exceeds the {cap} byte limit"
            )));
        }

        read_manifest_at(staged, filename)
    }

    /// Keep the newest `keep` archives, deleting the rest
    ///
    /// # Errors
    /// Returns `Busy`, or an error if listing or deleting fails
    pub fn prune_backups(&self, keep: usize) -> BackupResult<Vec<String>> {
        let _guard = self.lock.try_acquire(OperationKind::Prune)?;

        let mut deleted = Vec::new();
        for listing in list_backups(&self.config)?.into_iter().skip(keep) {
            let path = resolve_archive(&self.config, &listing.filename)?;
            fs::remove_file(&path)?;
            info!(archive = %listing.filename, "Pruned backup");
            deleted.push(listing.filename);
        }
        Ok(deleted)
    }

    /// Operation currently holding the lock
    #[must_use]
    pub fn running(&self) -> Option<OperationKind> {
        self.lock.running()
    }
}
