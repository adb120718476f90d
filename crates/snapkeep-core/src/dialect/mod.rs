//! Dialect adapters for the two relational engines
//!
//! Both engines sit behind [`DialectAdapter`]: dump the whole database into
//! a staging directory, enumerate live tables, read dumped rows back
//! ([`DumpSource`]), and replace one live table's contents.

pub mod copy;
pub mod postgres;
pub mod sqlite;

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{DatabaseConfig, EngineConfig};
use crate::manifest::DbType;

pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;

/// Errors from engine operations
#[derive(Error, Debug)]
pub enum DialectError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} exited with {status}: {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Dump artifact missing: {0}")]
    DumpMissing(PathBuf),

    #[error("Malformed dump: {0}")]
    Parse(String),
}

/// A single column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// TEXT whose bytes are not valid UTF-8, kept byte for byte
    TextBytes(Vec<u8>),
    Blob(Vec<u8>),
}

/// Rows of one table, each value tagged by its column position
#[derive(Debug, Clone, PartialEq)]
pub struct TableRows {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl TableRows {
    #[must_use]
    pub fn new(table: &str, columns: Vec<String>) -> Self {
        Self {
            table: table.to_string(),
            columns,
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Narrow to the columns also present in `live_columns`
    ///
    /// Column order follows the dump. Columns only in the dump are
    /// dropped; columns only in the live table are left to their defaults.
    #[must_use]
    pub fn project(&self, live_columns: &[String]) -> Self {
        let keep: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| live_columns.contains(name))
            .map(|(i, _)| i)
            .collect();

        Self {
            table: self.table.clone(),
            columns: keep.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        }
    }
}

/// Read access to a dump extracted from an archive
pub trait DumpSource {
    /// Tables that carry data in the dump
    fn tables(&self) -> Vec<String>;

    /// Dumped rows of `table`, `None` when the dump has no such table
    ///
    /// # Errors
    /// Returns an error if the dump cannot be read
    fn rows_of(&self, table: &str) -> Result<Option<TableRows>, DialectError>;

    /// Number of dumped rows of `table`, `None` when absent
    ///
    /// # Errors
    /// Returns an error if the dump cannot be read
    fn row_count(&self, table: &str) -> Result<Option<u64>, DialectError> {
        Ok(self.rows_of(table)?.map(|rows| rows.len() as u64))
    }
}

/// Uniform dump/replace interface over a live engine
pub trait DialectAdapter: Send + Sync {
    fn db_type(&self) -> DbType;

    /// Materialize the full relational state into `dest_dir`, returning
    /// the dump artifact's path
    ///
    /// # Errors
    /// Returns an error if the dump fails
    fn dump(&self, dest_dir: &Path) -> Result<PathBuf, DialectError>;

    /// Live column names, empty when the table does not exist
    ///
    /// # Errors
    /// Returns an error if the schema query fails
    fn live_columns(&self, table: &str) -> Result<Vec<String>, DialectError>;

    /// Open the dump artifact inside an extracted archive
    ///
    /// # Errors
    /// Returns `DumpMissing` if the artifact is absent
    fn open_dump(&self, extracted_dir: &Path) -> Result<Box<dyn DumpSource>, DialectError>;

    /// Delete every live row of `table` and insert `rows`, atomically
    ///
    /// # Errors
    /// Returns an error if the replace fails; the table is left unchanged
    fn replace(&self, table: &str, rows: &TableRows) -> Result<usize, DialectError>;

    /// Other live tables whose rows a delete on `table` would change
    /// through `ON DELETE CASCADE`, `SET NULL`, or `SET DEFAULT`
    ///
    /// Empty for engines whose replace never fires referential actions.
    ///
    /// # Errors
    /// Returns an error if the schema query fails
    fn cascading_dependents(&self, _table: &str) -> Result<Vec<String>, DialectError> {
        Ok(Vec::new())
    }

    /// Replay the whole dump in place of per-table replaces
    ///
    /// Returns `false` when this engine restores table by table only.
    ///
    /// # Errors
    /// Returns an error if the replay fails
    fn replay_full(&self, _extracted_dir: &Path) -> Result<bool, DialectError> {
        Ok(false)
    }
}

/// Open the adapter named by the configuration
///
/// # Errors
/// Returns an error if the embedded database cannot be opened
pub fn open_adapter(config: &EngineConfig) -> Result<Box<dyn DialectAdapter>, DialectError> {
    match &config.database {
        DatabaseConfig::Embedded { path } => {
            let path = config.resolve(path);
            // Opening would silently create an empty database
            if !path.is_file() {
                return Err(DialectError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Live database not found: {}", path.display()),
                )));
            }
            Ok(Box::new(SqliteAdapter::open(&path)?))
        }
        DatabaseConfig::ClientServer(pg) => Ok(Box::new(PostgresAdapter::new(pg.clone()))),
    }
}

/// Quote an identifier with double quotes, doubling embedded quotes
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
