//! Snapshot reader: archive listing and manifest lookup

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::BackupListing;
use crate::archive::{is_archive_name, parse_archive_timestamp, read_entry, MANIFEST_ENTRY};
use crate::config::EngineConfig;
use crate::error::{BackupError, BackupResult};
use crate::manifest::Manifest;
use crate::util::safe_join;

/// Validate an archive filename and resolve it inside the backup directory
///
/// The name check happens before any filesystem access.
///
/// # Errors
/// Returns `Validation` for names violating the convention or escaping
/// the backup directory
pub fn resolve_archive(config: &EngineConfig, filename: &str) -> BackupResult<PathBuf> {
    if !is_archive_name(&config.archive_prefix, filename) {
        return Err(BackupError::Validation(format!(
            "Invalid backup filename: {filename}"
        )));
    }
    Ok(safe_join(&config.backup_dir(), Path::new(filename))?)
}

/// Resolve an archive that must already exist
pub(crate) fn existing_archive(config: &EngineConfig, filename: &str) -> BackupResult<PathBuf> {
    let path = resolve_archive(config, filename)?;
    if !path.is_file() {
        return Err(BackupError::NotFound(format!("Backup not found: {filename}")));
    }
    Ok(path)
}

/// List archives in the backup directory, newest first
///
/// An unreadable manifest yields `manifest: None` for that entry.
///
/// # Errors
/// Returns an error if the directory exists but cannot be read
pub fn list_backups(config: &EngineConfig) -> BackupResult<Vec<BackupListing>> {
    let dir = config.backup_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut listings = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().to_string();
        if !is_archive_name(&config.archive_prefix, &filename) {
            continue;
        }

        // Follows symlinks; a dangling one is skipped like any non-file
        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                debug!(archive = %filename, error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let manifest = match read_manifest_at(&path, &filename) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                debug!(archive = %filename, error = %e, "Manifest unreadable");
                None
            }
        };

        listings.push(BackupListing {
            created: parse_archive_timestamp(&config.archive_prefix, &filename)
                .map(|ts| ts.and_utc()),
            filename,
            size: metadata.len(),
            manifest,
        });
    }

    // The embedded timestamp sorts lexicographically
    listings.sort_by(|a, b| b.filename.cmp(&a.filename));
    Ok(listings)
}

/// Read the manifest of a named archive
///
/// # Errors
/// Returns `Validation`, `NotFound`, or `CorruptArchive`
pub fn read_manifest(config: &EngineConfig, filename: &str) -> BackupResult<Manifest> {
    let path = existing_archive(config, filename)?;
    read_manifest_at(&path, filename)
}

/// Read only the manifest entry of the archive at `path`
///
/// # Errors
/// Returns `CorruptArchive` if the zip is unreadable, the entry absent, or
/// the document invalid
pub fn read_manifest_at(path: &Path, filename: &str) -> BackupResult<Manifest> {
    let bytes = read_entry(path, MANIFEST_ENTRY)
        .map_err(|e| BackupError::corrupt(filename, format!("unreadable archive: {e}")))?
        .ok_or_else(|| BackupError::corrupt(filename, format!("{MANIFEST_ENTRY} is missing")))?;

    Manifest::from_slice(&bytes)
        .map_err(|e| BackupError::corrupt(filename, format!("invalid {MANIFEST_ENTRY}: {e}")))
}
