//! Embedded engine adapter (`SQLite`)

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, DatabaseName, OpenFlags, ToSql};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::{quote_ident, DialectAdapter, DialectError, DumpSource, SqlValue, TableRows};
use crate::manifest::DbType;

/// File name of the embedded dump inside an archive
pub const SQLITE_DUMP_FILE: &str = "database.sqlite";

/// Side files that must travel with a raw copy
const SIDE_FILE_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

const LIST_TABLES_SQL: &str = r"
    SELECT name FROM sqlite_master
    WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
    ORDER BY name
";

/// Adapter over a live `SQLite` database file
pub struct SqliteAdapter {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteAdapter {
    /// Open the live database at `path`
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened
    pub fn open(path: &Path) -> Result<Self, DialectError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // WAL keeps application writers unblocked during hot backups
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Path of the live database file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy the database file and its WAL/SHM side files verbatim
    fn raw_copy(&self, dest: &Path) -> Result<(), DialectError> {
        fs::copy(&self.path, dest)?;
        for suffix in SIDE_FILE_SUFFIXES {
            let side = side_file(&self.path, suffix);
            if side.exists() {
                fs::copy(&side, side_file(dest, suffix))?;
            }
        }
        Ok(())
    }
}

impl DialectAdapter for SqliteAdapter {
    fn db_type(&self) -> DbType {
        DbType::Embedded
    }

    fn dump(&self, dest_dir: &Path) -> Result<PathBuf, DialectError> {
        let dest = dest_dir.join(SQLITE_DUMP_FILE);

        let hot = self.conn().backup(DatabaseName::Main, &dest, None);
        match hot {
            Ok(()) => debug!(dest = %dest.display(), "Online backup complete"),
            Err(e) => {
                warn!(error = %e, "Online backup failed, falling back to raw file copy");
                if dest.exists() {
                    fs::remove_file(&dest)?;
                }
                self.raw_copy(&dest)?;
            }
        }

        Ok(dest)
    }

    fn live_columns(&self, table: &str) -> Result<Vec<String>, DialectError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn open_dump(&self, extracted_dir: &Path) -> Result<Box<dyn DumpSource>, DialectError> {
        let path = extracted_dir.join(SQLITE_DUMP_FILE);
        if !path.is_file() {
            return Err(DialectError::DumpMissing(path));
        }
        Ok(Box::new(SqliteDump::open(&path)?))
    }

    fn replace(&self, table: &str, rows: &TableRows) -> Result<usize, DialectError> {
        let mut conn = self.conn();

        // The pragma is a no-op inside a transaction, so toggle it around one.
        // With enforcement off, deleting parents never cascades into tables
        // outside the restore selection.
        let foreign_keys: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", "OFF")?;

        let result = replace_in_transaction(&mut conn, table, rows);
        let reset = conn.pragma_update(None, "foreign_keys", foreign_keys);

        let inserted = result?;
        reset?;
        Ok(inserted)
    }
}

fn replace_in_transaction(
    conn: &mut Connection,
    table: &str,
    rows: &TableRows,
) -> Result<usize, DialectError> {
    let tx = conn.transaction()?;
    tx.execute(&format!("DELETE FROM {}", quote_ident(table)), [])?;

    let mut inserted = 0;
    if !rows.columns.is_empty() {
        let columns = rows
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=rows.columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            quote_ident(table)
        );

        let mut stmt = tx.prepare(&sql)?;
        for row in &rows.rows {
            inserted += stmt.execute(params_from_iter(row.iter()))?;
        }
    }

    tx.commit()?;
    Ok(inserted)
}

fn list_tables(conn: &Connection) -> Result<Vec<String>, DialectError> {
    let mut stmt = conn.prepare(LIST_TABLES_SQL)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn side_file(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Read-only view of a dumped database file
pub struct SqliteDump {
    conn: Connection,
    tables: Vec<String>,
}

impl SqliteDump {
    /// Open a dump file read-only
    ///
    /// # Errors
    /// Returns an error if the file is not a readable database
    pub fn open(path: &Path) -> Result<Self, DialectError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let tables = list_tables(&conn)?;
        Ok(Self { conn, tables })
    }
}

impl DumpSource for SqliteDump {
    fn tables(&self) -> Vec<String> {
        self.tables.clone()
    }

    fn rows_of(&self, table: &str) -> Result<Option<TableRows>, DialectError> {
        if !self.tables.iter().any(|t| t == table) {
            return Ok(None);
        }

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {}", quote_ident(table)))?;
        let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
        let width = columns.len();

        let mut out = TableRows::new(table, columns);
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(SqlValue::from(row.get_ref(i)?));
            }
            out.rows.push(values);
        }

        Ok(Some(out))
    }

    fn row_count(&self, table: &str) -> Result<Option<u64>, DialectError> {
        if !self.tables.iter().any(|t| t == table) {
            return Ok(None);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(Some(u64::try_from(count).unwrap_or(0)))
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(text) => Self::Text(text.to_string()),
                Err(_) => Self::TextBytes(t.to_vec()),
            },
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Self::Null => ValueRef::Null,
            Self::Integer(i) => ValueRef::Integer(*i),
            Self::Real(f) => ValueRef::Real(*f),
            Self::Text(t) => ValueRef::Text(t.as_bytes()),
            Self::TextBytes(b) => ValueRef::Text(b),
            Self::Blob(b) => ValueRef::Blob(b),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}
