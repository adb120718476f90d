//! Restore orchestrator
//!
//! The archive is extracted and its manifest validated before anything
//! live is touched. After that, each selected table is replaced on its own
//! so one failure never aborts the rest.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use super::list::existing_archive;
use super::types::{FolderOutcome, RestoreReport, SkipReason, TableOutcome};
use crate::archive::{extract_all, MANIFEST_ENTRY};
use crate::catalog::{ResolvedSelection, RestoreCatalog, RestoreSelection};
use crate::config::{ColumnMismatchPolicy, EngineConfig};
use crate::dialect::{DialectAdapter, DialectError, DumpSource};
use crate::error::{BackupError, BackupResult};
use crate::manifest::Manifest;
use crate::util::{copy_dir_recursive, safe_join};

/// Restore the tables and folders of `selection` from a named archive
///
/// # Errors
/// Returns `Validation` for a bad filename or an archive from the other
/// engine, `NotFound` if absent, and `CorruptArchive` if the archive cannot
/// be extracted or lacks a manifest or dump. All of these abort before
/// any live state changes. Per-table and per-folder failures are reported
/// in the returned [`RestoreReport`] instead.
pub fn restore_backup(
    config: &EngineConfig,
    catalog: &RestoreCatalog,
    adapter: &dyn DialectAdapter,
    filename: &str,
    selection: &RestoreSelection,
) -> BackupResult<RestoreReport> {
    let archive_path = existing_archive(config, filename)?;

    let backup_dir = config.backup_dir();
    // Removed on drop, so every exit path cleans up
    let extracted = tempfile::Builder::new()
        .prefix(&format!("{}-restore-", config.archive_prefix))
        .tempdir_in(&backup_dir)?;

    extract_all(&archive_path, extracted.path(), config.extract_offload_bytes)
        .map_err(|e| BackupError::corrupt(filename, format!("extraction failed: {e}")))?;

    let manifest = load_manifest(extracted.path(), filename)?;
    if manifest.db_type != adapter.db_type() {
        return Err(BackupError::Validation(format!(
            "{filename} was taken from the {} engine, the live database is {}",
            manifest.db_type,
            adapter.db_type()
        )));
    }

    let dump = adapter.open_dump(extracted.path()).map_err(|e| match e {
        DialectError::DumpMissing(_) => BackupError::corrupt(filename, "database dump is missing"),
        other => BackupError::corrupt(filename, format!("unreadable database dump: {other}")),
    })?;

    let resolved = catalog.resolve(selection);
    info!(
        archive = %filename,
        groups = ?selection.keys(),
        tables = resolved.tables.len(),
        folders = resolved.folders.len(),
        "Starting restore"
    );

    let tables = if selection.is_full() {
        restore_full(config, adapter, dump.as_ref(), &resolved, extracted.path())?
    } else {
        restore_tables(config, adapter, dump.as_ref(), &resolved)
    };

    let folders = restore_folders(config, &resolved, extracted.path());

    let folders_restored = folders
        .values()
        .any(|o| matches!(o, FolderOutcome::Restored { .. }));
    let requires_restart = selection.is_full() || resolved.requires_restart || folders_restored;

    let report = RestoreReport::from_outcomes(tables, folders, requires_restart);

    drop(dump);
    if let Err(e) = extracted.close() {
        warn!(error = %e, "Failed to remove extraction directory");
    }

    info!(
        archive = %filename,
        restored = report.restored.tables.len(),
        skipped = report.skipped_tables().len(),
        failed = report.failed_tables().len(),
        requires_restart = report.requires_restart,
        "Restore finished"
    );
    Ok(report)
}

fn load_manifest(extracted: &Path, filename: &str) -> BackupResult<Manifest> {
    let path = extracted.join(MANIFEST_ENTRY);
    let bytes = fs::read(&path)
        .map_err(|_| BackupError::corrupt(filename, format!("{MANIFEST_ENTRY} is missing")))?;
    Manifest::from_slice(&bytes)
        .map_err(|e| BackupError::corrupt(filename, format!("invalid {MANIFEST_ENTRY}: {e}")))
}

/// Full restores replay the whole dump when the engine supports it,
/// otherwise fall through to per-table replaces
fn restore_full(
    config: &EngineConfig,
    adapter: &dyn DialectAdapter,
    dump: &dyn DumpSource,
    resolved: &ResolvedSelection,
    extracted: &Path,
) -> BackupResult<BTreeMap<String, TableOutcome>> {
    if !adapter.replay_full(extracted)? {
        return Ok(restore_tables(config, adapter, dump, resolved));
    }

    let mut outcomes = BTreeMap::new();
    for table in dump.tables() {
        let rows = dump.rows_of(&table)?.map_or(0, |r| r.len());
        outcomes.insert(table, TableOutcome::Restored { rows });
    }
    Ok(outcomes)
}

fn restore_tables(
    config: &EngineConfig,
    adapter: &dyn DialectAdapter,
    dump: &dyn DumpSource,
    resolved: &ResolvedSelection,
) -> BTreeMap<String, TableOutcome> {
    let mut outcomes = BTreeMap::new();
    let mut dependents = BTreeMap::new();

    // A delete must not reach rows the caller did not ask to restore
    for table in &resolved.tables {
        match adapter.cascading_dependents(table) {
            Ok(children) => {
                let outside: Vec<&String> = children
                    .iter()
                    .filter(|c| !resolved.tables.contains(*c))
                    .collect();
                if outside.is_empty() {
                    dependents.insert(table.clone(), children);
                } else {
                    let reason = format!(
                        "deleting would cascade into {} outside the selection",
                        outside
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    warn!(table = %table, reason = %reason, "Table restore refused");
                    outcomes.insert(table.clone(), TableOutcome::Failed { reason });
                }
            }
            Err(e) => {
                warn!(table = %table, error = %e, "Could not read foreign keys, continuing");
                outcomes.insert(
                    table.clone(),
                    TableOutcome::Failed {
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    for table in parents_first(&dependents) {
        let outcome = match restore_table(config.no_common_columns, adapter, dump, &table) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(table = %table, error = %e, "Table restore failed, continuing");
                TableOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        if let TableOutcome::Skipped { reason } = &outcome {
            info!(table = %table, reason = ?reason, "Table skipped");
        }
        outcomes.insert(table, outcome);
    }

    outcomes
}

/// Order tables so each parent is replaced before the children its delete
/// cascades into. Tables caught in a cycle follow in name order.
fn parents_first(dependents: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut pending: BTreeMap<&str, usize> = dependents.keys().map(|t| (t.as_str(), 0)).collect();
    for children in dependents.values() {
        for child in children {
            if let Some(n) = pending.get_mut(child.as_str()) {
                *n += 1;
            }
        }
    }

    let mut ordered = Vec::with_capacity(pending.len());
    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(t, _)| *t)
        .collect();

    while let Some(table) = ready.pop_first() {
        pending.remove(table);
        ordered.push(table.to_string());
        for child in dependents.get(table).into_iter().flatten() {
            if let Some(n) = pending.get_mut(child.as_str()) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(child.as_str());
                }
            }
        }
    }

    ordered.extend(pending.keys().map(|t| (*t).to_string()));
    ordered
}

fn restore_table(
    policy: ColumnMismatchPolicy,
    adapter: &dyn DialectAdapter,
    dump: &dyn DumpSource,
    table: &str,
) -> Result<TableOutcome, DialectError> {
    let Some(rows) = dump.rows_of(table)? else {
        return Ok(TableOutcome::Skipped {
            reason: SkipReason::NotInDump,
        });
    };

    let live_columns = adapter.live_columns(table)?;
    if live_columns.is_empty() {
        return Ok(TableOutcome::Skipped {
            reason: SkipReason::NotInLiveSchema,
        });
    }

    let projected = rows.project(&live_columns);
    if projected.columns.is_empty() && policy == ColumnMismatchPolicy::Skip {
        return Ok(TableOutcome::Skipped {
            reason: SkipReason::NoCommonColumns,
        });
    }

    let dropped = rows.columns.len() - projected.columns.len();
    if dropped > 0 {
        warn!(table = %table, dropped, "Dumped columns missing from live schema were ignored");
    }

    let inserted = adapter.replace(table, &projected)?;
    Ok(TableOutcome::Restored { rows: inserted })
}

fn restore_folders(
    config: &EngineConfig,
    resolved: &ResolvedSelection,
    extracted: &Path,
) -> BTreeMap<String, FolderOutcome> {
    let mut outcomes = BTreeMap::new();

    for folder in &resolved.folders {
        let outcome = match restore_folder(config, extracted, folder) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(folder = %folder, error = %e, "Folder restore failed, continuing");
                FolderOutcome::Failed { reason: e }
            }
        };
        outcomes.insert(folder.clone(), outcome);
    }

    outcomes
}

fn restore_folder(
    config: &EngineConfig,
    extracted: &Path,
    folder: &str,
) -> Result<FolderOutcome, String> {
    let source = safe_join(extracted, Path::new(folder)).map_err(|e| e.to_string())?;
    if !source.is_dir() {
        return Ok(FolderOutcome::NotInArchive);
    }

    let target = safe_join(&config.data_root, Path::new(folder)).map_err(|e| e.to_string())?;
    let files = copy_dir_recursive(&source, &target).map_err(|e| e.to_string())?;
    info!(folder = %folder, files, "Folder restored");
    Ok(FolderOutcome::Restored { files })
}
