//! Snapshot writer

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use super::types::CreatedBackup;
use crate::archive::{archive_filename, create_archive, MANIFEST_ENTRY};
use crate::catalog::RestoreCatalog;
use crate::config::EngineConfig;
use crate::dialect::{DialectAdapter, DialectError};
use crate::error::{BackupError, BackupResult};
use crate::manifest::Manifest;
use crate::util::{copy_dir_recursive, safe_join};

const PARTIAL_SUFFIX: &str = ".partial";

/// Build a new archive from the live database and auxiliary folders
///
/// Nothing survives a failed creation: the staging directory is removed
/// on every path and a partially written archive is deleted.
///
/// # Errors
/// Returns `DatabaseDump` if the dump or table enumeration fails, or
/// `Filesystem`/`Io` if staging or packing fails
pub fn create_backup(
    config: &EngineConfig,
    catalog: &RestoreCatalog,
    adapter: &dyn DialectAdapter,
) -> BackupResult<CreatedBackup> {
    let backup_dir = config.backup_dir();
    fs::create_dir_all(&backup_dir)?;

    let (created, filename) = unused_name(config, &backup_dir, Utc::now().trunc_subsecs(0));
    let archive_path = backup_dir.join(&filename);
    let partial_path = backup_dir.join(format!("{filename}{PARTIAL_SUFFIX}"));

    let staging = tempfile::Builder::new()
        .prefix(&format!(
            "{}-staging-{}-",
            config.archive_prefix,
            created.format(crate::archive::naming::TIMESTAMP_FORMAT)
        ))
        .tempdir_in(&backup_dir)?;

    let result = build_archive(config, catalog, adapter, staging.path(), &partial_path, created)
        .and_then(|manifest| {
            fs::rename(&partial_path, &archive_path)?;
            Ok(manifest)
        });

    let manifest = match result {
        Ok(manifest) => manifest,
        Err(e) => {
            error!(archive = %filename, error = %e, "Backup creation failed");
            if partial_path.exists() {
                if let Err(cleanup) = fs::remove_file(&partial_path) {
                    warn!(path = %partial_path.display(), error = %cleanup, "Failed to remove partial archive");
                }
            }
            return Err(e);
        }
    };

    if let Err(e) = staging.close() {
        warn!(error = %e, "Failed to remove staging directory");
    }

    let size = fs::metadata(&archive_path)?.len();
    info!(archive = %filename, size, tables = manifest.tables.len(), "Backup created");

    Ok(CreatedBackup {
        filename,
        size,
        manifest,
    })
}

/// First second-resolution name at or after `start` with no existing file
fn unused_name(
    config: &EngineConfig,
    backup_dir: &Path,
    start: DateTime<Utc>,
) -> (DateTime<Utc>, String) {
    let mut created = start;
    loop {
        let name = archive_filename(&config.archive_prefix, created);
        if !backup_dir.join(&name).exists() {
            return (created, name);
        }
        created += Duration::seconds(1);
    }
}

fn build_archive(
    config: &EngineConfig,
    catalog: &RestoreCatalog,
    adapter: &dyn DialectAdapter,
    staging: &Path,
    output: &Path,
    created: DateTime<Utc>,
) -> BackupResult<Manifest> {
    adapter.dump(staging).map_err(BackupError::DatabaseDump)?;

    // Writers keep going during a hot dump, so count the artifact itself
    let tables = dump_counts(adapter, staging).map_err(BackupError::DatabaseDump)?;

    let folders = copy_folders(config, staging);

    let manifest = Manifest::build(created, adapter.db_type(), tables, folders, catalog);
    let manifest_json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| BackupError::Filesystem(format!("Failed to serialize manifest: {e}")))?;
    fs::write(staging.join(MANIFEST_ENTRY), manifest_json)?;

    create_archive(staging, output)?;
    Ok(manifest)
}

fn dump_counts(
    adapter: &dyn DialectAdapter,
    staging: &Path,
) -> Result<BTreeMap<String, u64>, DialectError> {
    let dump = adapter.open_dump(staging)?;
    let mut tables = BTreeMap::new();
    for table in dump.tables() {
        if let Some(count) = dump.row_count(&table)? {
            tables.insert(table, count);
        }
    }
    Ok(tables)
}

/// Copy each configured folder that exists; a failed folder is dropped
/// from the archive without aborting the others
fn copy_folders(config: &EngineConfig, staging: &Path) -> Vec<String> {
    let mut included = Vec::new();

    for folder in config.folders() {
        let copied = safe_join(&config.data_root, Path::new(&folder))
            .and_then(|src| Ok((src, safe_join(staging, Path::new(&folder))?)))
            .map_err(|e| e.to_string())
            .and_then(|(src, dst)| copy_folder(&src, &dst));

        match copied {
            Ok(Some(files)) => {
                info!(folder = %folder, files, "Folder included");
                included.push(folder);
            }
            Ok(None) => {}
            Err(e) => warn!(folder = %folder, error = %e, "Skipping folder"),
        }
    }

    included
}

fn copy_folder(src: &Path, dst: &Path) -> Result<Option<usize>, String> {
    if !src.is_dir() {
        return Ok(None);
    }
    match copy_dir_recursive(src, dst) {
        Ok(files) => Ok(Some(files)),
        Err(e) => {
            let _ = fs::remove_dir_all(dst);
            Err(e.to_string())
        }
    }
}
