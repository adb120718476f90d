//! Service-level tests: locking, creation cleanup, upload, delete, prune

mod common;

use common::{count, FailingDump, Fixture, GatedAdapter, WritesAfterDump};
use snapkeep_core::archive::create_archive;
use snapkeep_core::lock::OperationKind;
use snapkeep_core::{BackupError, DbType, RestoreSelection};
use std::fs;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use tempfile::TempDir;

const ABSENT: &str = "subpanel-backup-2020-01-01T00-00-00.zip";

// =============================================================================
// Creation
// =============================================================================

#[test]
fn test_create_writes_manifest_with_counts_and_groups() {
    let fixture = Fixture::new();
    let service = fixture.service();

    let created = service.create_backup().unwrap();

    assert!(created.filename.starts_with("subpanel-backup-"));
    assert!(created.size > 0);
    let manifest = service.read_manifest(&created.filename).unwrap();
    assert_eq!(manifest.version, "2.0");
    assert_eq!(manifest.db_type, DbType::Embedded);
    assert_eq!(manifest.tables["subscription_plans"], 3);
    assert_eq!(manifest.tables["sessions"], 1);
    assert_eq!(manifest.restore_groups["users"].total_rows, 7);
    assert!(!manifest.restore_groups["plans"].has_folders);
    assert_eq!(fixture.backup_dir_entries(), vec![created.filename]);
}

#[test]
fn test_manifest_counts_match_the_dump_not_later_writes() {
    let fixture = Fixture::new();
    let service = fixture.service_with(Box::new(WritesAfterDump {
        inner: fixture.sqlite(),
        live: fixture.db_path(),
    }));

    let created = service.create_backup().unwrap();

    assert_eq!(count(&fixture.conn(), "subscription_plans"), 4);
    assert_eq!(created.manifest.tables["subscription_plans"], 3);
    assert_eq!(created.manifest.restore_groups["plans"].total_rows, 3);
}

#[test]
fn test_back_to_back_creates_get_distinct_names() {
    let fixture = Fixture::new();
    let service = fixture.service();

    let first = service.create_backup().unwrap();
    let second = service.create_backup().unwrap();

    assert_ne!(first.filename, second.filename);
    assert_eq!(service.list_backups().unwrap().len(), 2);
}

#[test]
fn test_failed_dump_leaves_nothing_behind() {
    let fixture = Fixture::new();
    let service = fixture.service_with(Box::new(FailingDump(fixture.sqlite())));

    let err = service.create_backup().unwrap_err();

    assert!(matches!(err, BackupError::DatabaseDump(_)));
    assert_eq!(err.code(), "DATABASE_DUMP_FAILED");
    assert!(fixture.backup_dir_entries().is_empty());
    assert!(service.running().is_none());
}

// =============================================================================
// Locking
// =============================================================================

#[test]
fn test_overlapping_operations_are_busy() {
    let fixture = Fixture::new();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let service = fixture.service_with(Box::new(GatedAdapter {
        inner: fixture.sqlite(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    }));

    thread::scope(|scope| {
        let creating = scope.spawn(|| service.create_backup());
        entered_rx.recv().unwrap();

        assert_eq!(service.running(), Some(OperationKind::Create));
        let restore = service.restore(ABSENT, &RestoreSelection::from_keys(["plans"]));
        assert!(matches!(
            restore,
            Err(BackupError::Busy {
                running: OperationKind::Create
            })
        ));
        assert!(matches!(
            service.create_backup(),
            Err(BackupError::Busy { .. })
        ));
        assert!(matches!(
            service.delete_backup(ABSENT),
            Err(BackupError::Busy { .. })
        ));
        // Reads do not take the lock
        assert!(service.list_backups().is_ok());

        release_tx.send(()).unwrap();
        assert!(creating.join().unwrap().is_ok());
    });

    assert!(service.running().is_none());
}

#[test]
fn test_invalid_name_rejected_before_busy_check() {
    let fixture = Fixture::new();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let service = fixture.service_with(Box::new(GatedAdapter {
        inner: fixture.sqlite(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    }));

    thread::scope(|scope| {
        let creating = scope.spawn(|| service.create_backup());
        entered_rx.recv().unwrap();

        let err = service
            .restore("../escape.zip", &RestoreSelection::Full)
            .unwrap_err();
        assert!(matches!(err, BackupError::Validation(_)));

        release_tx.send(()).unwrap();
        creating.join().unwrap().unwrap();
    });
}

// =============================================================================
// Delete and download
// =============================================================================

#[test]
fn test_delete_backup() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let created = service.create_backup().unwrap();

    assert!(matches!(
        service.delete_backup("../../etc/passwd"),
        Err(BackupError::Validation(_))
    ));
    assert!(matches!(
        service.delete_backup(ABSENT),
        Err(BackupError::NotFound(_))
    ));

    service.delete_backup(&created.filename).unwrap();
    assert!(fixture.backup_dir_entries().is_empty());
}

#[test]
fn test_archive_path_for_download() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let created = service.create_backup().unwrap();

    let path = service.archive_path(&created.filename).unwrap();
    assert_eq!(path, fixture.backup_dir().join(&created.filename));

    assert!(matches!(
        service.archive_path("backups/../secret.zip"),
        Err(BackupError::Validation(_))
    ));
    assert!(matches!(
        service.archive_path(ABSENT),
        Err(BackupError::NotFound(_))
    ));
}

// =============================================================================
// Upload
// =============================================================================

#[test]
fn test_upload_round_trip() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let created = service.create_backup().unwrap();

    let bytes = fs::read(fixture.backup_dir().join(&created.filename)).unwrap();
    service.delete_backup(&created.filename).unwrap();

    let listing = service
        .upload_backup(&created.filename, bytes.as_slice())
        .unwrap();

    assert_eq!(listing.filename, created.filename);
    assert_eq!(listing.size, bytes.len() as u64);
    assert_eq!(listing.manifest.unwrap().tables["tags"], 2);
    assert_eq!(fixture.backup_dir_entries(), vec![created.filename]);
}

#[test]
fn test_upload_without_manifest_is_removed() {
    let fixture = Fixture::new();
    let service = fixture.service();

    let source = TempDir::new().unwrap();
    fs::write(source.path().join("database.sqlite"), b"not really").unwrap();
    let out = TempDir::new().unwrap();
    let zip_path = out.path().join("upload.zip");
    create_archive(source.path(), &zip_path).unwrap();
    let bytes = fs::read(&zip_path).unwrap();

    let err = service
        .upload_backup("subpanel-backup-2026-03-01T10-00-00.zip", bytes.as_slice())
        .unwrap_err();

    assert!(matches!(err, BackupError::CorruptArchive { .. }));
    assert!(fixture.backup_dir_entries().is_empty());
}

#[test]
fn test_upload_rejects_bad_name_and_oversize() {
    let mut fixture = Fixture::new();
    fixture.config.max_upload_bytes = 16;
    let service = fixture.service();

    assert!(matches!(
        service.upload_backup("evil.zip", &b"PK"[..]),
        Err(BackupError::Validation(_))
    ));

    let payload = vec![0u8; 64];
    let err = service
        .upload_backup("subpanel-backup-2026-03-01T10-00-00.zip", payload.as_slice())
        .unwrap_err();
    assert!(matches!(err, BackupError::Validation(_)));
    assert!(fixture.backup_dir_entries().is_empty());
}

#[test]
fn test_upload_refuses_existing_name() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let created = service.create_backup().unwrap();

    let err = service
        .upload_backup(&created.filename, &b"PK"[..])
        .unwrap_err();
    assert!(matches!(err, BackupError::Validation(_)));
    assert!(service.read_manifest(&created.filename).is_ok());
}

// =============================================================================
// Listing and pruning
// =============================================================================

#[test]
fn test_list_newest_first_and_prune() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let names: Vec<String> = (0..3)
        .map(|_| service.create_backup().unwrap().filename)
        .collect();

    let listed: Vec<String> = service
        .list_backups()
        .unwrap()
        .into_iter()
        .map(|l| l.filename)
        .collect();
    let mut expected = names.clone();
    expected.sort();
    expected.reverse();
    assert_eq!(listed, expected);

    let deleted = service.prune_backups(1).unwrap();
    assert_eq!(deleted.len(), 2);
    assert_eq!(fixture.backup_dir_entries(), vec![expected[0].clone()]);

    assert!(service.prune_backups(5).unwrap().is_empty());
}

#[test]
fn test_groups_in_declaration_order() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let keys: Vec<&str> = service.groups().iter().map(|g| g.key.as_str()).collect();
    assert_eq!(keys[0], "settings");
    assert!(keys.contains(&"plans"));
    assert!(!keys.contains(&"full"));
}
