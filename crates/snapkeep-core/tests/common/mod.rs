//! Shared fixtures for integration tests

#![allow(dead_code)]

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use snapkeep_core::dialect::{DialectAdapter, DialectError, DumpSource, SqliteAdapter, TableRows};
use snapkeep_core::{BackupService, DbType, EngineConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Mutex;
use tempfile::TempDir;

pub const SCHEMA: &str = r"
    CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT);
    CREATE TABLE subscription_plans (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL);
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL,
        plan_id INTEGER REFERENCES subscription_plans(id) ON DELETE CASCADE
    );
    CREATE TABLE user_subscriptions (id INTEGER PRIMARY KEY, user_id INTEGER, expires_at TEXT);
    CREATE TABLE user_notes (id INTEGER PRIMARY KEY, user_id INTEGER, note TEXT);
    CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT NOT NULL, color TEXT);
    CREATE TABLE user_tags (user_id INTEGER, tag_id INTEGER);
    CREATE TABLE email_templates (id INTEGER PRIMARY KEY, name TEXT, body TEXT);
    CREATE TABLE sessions (sid TEXT PRIMARY KEY, data TEXT);

    INSERT INTO settings VALUES ('app_name', 'Stream Panel'), ('theme', 'dark');
    INSERT INTO subscription_plans VALUES (1, 'A', 10.0), (2, 'B', 20.0), (3, 'C', 30.0);
    INSERT INTO users VALUES (1, 'alice', 1), (2, 'bob', 3);
    INSERT INTO user_subscriptions VALUES (1, 1, '2027-01-01'), (2, 2, '2026-12-01');
    INSERT INTO user_notes VALUES (1, 1, 'prefers email');
    INSERT INTO tags VALUES (1, 'vip', 'gold'), (2, 'trial', 'grey');
    INSERT INTO user_tags VALUES (1, 1), (2, 2);
    INSERT INTO email_templates VALUES (1, 'welcome', 'Hello {{name}}');
    INSERT INTO sessions VALUES ('s1', '{}');
";

/// A live application directory with a seeded embedded database
pub struct Fixture {
    pub temp: TempDir,
    pub config: EngineConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config = EngineConfig::for_data_root(temp.path().join("app"));
        let fixture = Self { temp, config };

        fs::create_dir_all(fixture.db_path().parent().unwrap()).unwrap();
        fixture
            .conn()
            .execute_batch(SCHEMA)
            .expect("Failed to seed database");

        let branding = fixture.config.data_root.join("uploads/branding");
        fs::create_dir_all(&branding).unwrap();
        fs::write(branding.join("logo.svg"), "<svg>original</svg>").unwrap();

        fixture
    }

    pub fn db_path(&self) -> PathBuf {
        self.config.data_root.join("data/subpanel.db")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.config.backup_dir()
    }

    /// An independent connection for seeding and inspection
    pub fn conn(&self) -> Connection {
        Connection::open(self.db_path()).expect("Failed to open live database")
    }

    pub fn service(&self) -> BackupService {
        BackupService::from_config(self.config.clone()).expect("Failed to build service")
    }

    pub fn service_with(&self, adapter: Box<dyn DialectAdapter>) -> BackupService {
        BackupService::new(self.config.clone(), adapter)
    }

    pub fn sqlite(&self) -> SqliteAdapter {
        SqliteAdapter::open(&self.db_path()).expect("Failed to open adapter")
    }

    /// Entries of the backup directory, sorted
    pub fn backup_dir_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.backup_dir())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// SHA256 over every row of a table in rowid order
pub fn table_hash(conn: &Connection, table: &str) -> String {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM \"{table}\" ORDER BY rowid"))
        .unwrap();
    let width = stmt.column_count();
    let mut hasher = Sha256::new();
    let mut rows = stmt.query([]).unwrap();
    while let Some(row) = rows.next().unwrap() {
        for i in 0..width {
            let value: rusqlite::types::Value = row.get(i).unwrap();
            hasher.update(format!("{value:?}|").as_bytes());
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

pub fn plan_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM subscription_plans ORDER BY name")
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap()
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get(0)
    })
    .unwrap()
}

/// Adapter whose dump always fails
pub struct FailingDump(pub SqliteAdapter);

impl DialectAdapter for FailingDump {
    fn db_type(&self) -> DbType {
        self.0.db_type()
    }

    fn dump(&self, dest_dir: &Path) -> Result<PathBuf, DialectError> {
        // Leave a partial artifact behind to prove it is cleaned up
        fs::write(dest_dir.join("database.sqlite"), b"partial")?;
        Err(DialectError::Tool {
            tool: "dump".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "disk full".to_string(),
        })
    }

    fn live_columns(&self, table: &str) -> Result<Vec<String>, DialectError> {
        self.0.live_columns(table)
    }

    fn open_dump(&self, extracted_dir: &Path) -> Result<Box<dyn DumpSource>, DialectError> {
        self.0.open_dump(extracted_dir)
    }

    fn replace(&self, table: &str, rows: &TableRows) -> Result<usize, DialectError> {
        self.0.replace(table, rows)
    }
}

/// Adapter that parks inside `dump` until released
pub struct GatedAdapter {
    pub inner: SqliteAdapter,
    pub entered: Mutex<Sender<()>>,
    pub release: Mutex<Receiver<()>>,
}

impl DialectAdapter for GatedAdapter {
    fn db_type(&self) -> DbType {
        self.inner.db_type()
    }

    fn dump(&self, dest_dir: &Path) -> Result<PathBuf, DialectError> {
        self.entered.lock().unwrap().send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        self.inner.dump(dest_dir)
    }

    fn live_columns(&self, table: &str) -> Result<Vec<String>, DialectError> {
        self.inner.live_columns(table)
    }

    fn open_dump(&self, extracted_dir: &Path) -> Result<Box<dyn DumpSource>, DialectError> {
        self.inner.open_dump(extracted_dir)
    }

    fn replace(&self, table: &str, rows: &TableRows) -> Result<usize, DialectError> {
        self.inner.replace(table, rows)
    }
}

/// Adapter that writes to the live database as soon as its dump is taken
pub struct WritesAfterDump {
    pub inner: SqliteAdapter,
    pub live: PathBuf,
}

impl DialectAdapter for WritesAfterDump {
    fn db_type(&self) -> DbType {
        self.inner.db_type()
    }

    fn dump(&self, dest_dir: &Path) -> Result<PathBuf, DialectError> {
        let dumped = self.inner.dump(dest_dir)?;
        Connection::open(&self.live)
            .unwrap()
            .execute("INSERT INTO subscription_plans VALUES (4, 'D', 40.0)", [])
            .unwrap();
        Ok(dumped)
    }

    fn live_columns(&self, table: &str) -> Result<Vec<String>, DialectError> {
        self.inner.live_columns(table)
    }

    fn open_dump(&self, extracted_dir: &Path) -> Result<Box<dyn DumpSource>, DialectError> {
        self.inner.open_dump(extracted_dir)
    }

    fn replace(&self, table: &str, rows: &TableRows) -> Result<usize, DialectError> {
        self.inner.replace(table, rows)
    }
}

/// Adapter whose deletes act on declared child tables, the way a server
/// engine applies `ON DELETE CASCADE`
pub struct CascadingAdapter {
    pub inner: SqliteAdapter,
    pub live: PathBuf,
    /// (parent, child, child column referencing the parent id)
    pub edges: Vec<(&'static str, &'static str, &'static str)>,
}

impl DialectAdapter for CascadingAdapter {
    fn db_type(&self) -> DbType {
        self.inner.db_type()
    }

    fn dump(&self, dest_dir: &Path) -> Result<PathBuf, DialectError> {
        self.inner.dump(dest_dir)
    }

    fn live_columns(&self, table: &str) -> Result<Vec<String>, DialectError> {
        self.inner.live_columns(table)
    }

    fn open_dump(&self, extracted_dir: &Path) -> Result<Box<dyn DumpSource>, DialectError> {
        self.inner.open_dump(extracted_dir)
    }

    fn cascading_dependents(&self, table: &str) -> Result<Vec<String>, DialectError> {
        Ok(self
            .edges
            .iter()
            .filter(|(parent, _, _)| *parent == table)
            .map(|(_, child, _)| (*child).to_string())
            .collect())
    }

    fn replace(&self, table: &str, rows: &TableRows) -> Result<usize, DialectError> {
        let conn = Connection::open(&self.live).unwrap();
        for (parent, child, column) in &self.edges {
            if *parent == table {
                conn.execute(
                    &format!("DELETE FROM \"{child}\" WHERE \"{column}\" IN (SELECT id FROM \"{parent}\")"),
                    [],
                )
                .unwrap();
            }
        }
        self.inner.replace(table, rows)
    }
}
