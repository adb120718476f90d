//! Engine configuration
//!
//! Loaded from a JSON document; every field has a default so a minimal
//! file only names what differs. Relative paths resolve against
//! `data_root`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::catalog::{builtin_groups, RestoreCatalog, RestoreGroup, FULL_SELECTOR};
use crate::util::normalize_path;

const DEFAULT_PREFIX: &str = "subpanel";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_EXTRACT_OFFLOAD_BYTES: u64 = 64 * 1024 * 1024;

/// Errors while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What to do when a dumped table shares no columns with the live table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnMismatchPolicy {
    /// Leave the live table untouched and report it as skipped
    #[default]
    Skip,
    /// Empty the live table, inserting nothing
    Clear,
}

/// Connection settings for the client-server engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: String,
    pub schema: String,
    /// Path or name of the dump utility
    pub pg_dump: PathBuf,
    /// Path or name of the interactive terminal
    pub psql: PathBuf,
    /// Replay the whole dump script for `full` restores
    pub replay_full_dump: bool,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            dbname: "subpanel".to_string(),
            schema: "public".to_string(),
            pg_dump: PathBuf::from("pg_dump"),
            psql: PathBuf::from("psql"),
            replay_full_dump: true,
        }
    }
}

/// Which relational engine backs the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "kebab-case")]
pub enum DatabaseConfig {
    Embedded { path: PathBuf },
    ClientServer(PostgresConfig),
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::Embedded {
            path: PathBuf::from("data/subpanel.db"),
        }
    }
}

/// Configuration for a [`crate::BackupService`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Live application directory
    pub data_root: PathBuf,
    /// Archive directory, `<data_root>/backups` when unset
    pub backup_dir: Option<PathBuf>,
    pub archive_prefix: String,
    pub database: DatabaseConfig,
    /// Auxiliary folders to archive, the catalog's folders when unset
    pub folders: Option<Vec<String>>,
    pub max_upload_bytes: u64,
    /// Archives above this size are extracted on a worker thread
    pub extract_offload_bytes: u64,
    pub no_common_columns: ColumnMismatchPolicy,
    /// Replaces the built-in restore groups when set
    pub groups: Option<Vec<RestoreGroup>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("."),
            backup_dir: None,
            archive_prefix: DEFAULT_PREFIX.to_string(),
            database: DatabaseConfig::default(),
            folders: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            extract_offload_bytes: DEFAULT_EXTRACT_OFFLOAD_BYTES,
            no_common_columns: ColumnMismatchPolicy::default(),
            groups: None,
        }
    }
}

impl EngineConfig {
    /// Defaults rooted at `data_root`
    #[must_use]
    pub fn for_data_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    /// Load and validate a JSON config file
    ///
    /// A relative `data_root` is taken relative to the file's directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigLoadError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut config: Self =
            serde_json::from_str(&content).map_err(|e| ConfigLoadError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if config.data_root.is_relative() {
            if let Some(parent) = path.parent() {
                config.data_root = parent.join(&config.data_root);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the engine relies on
    ///
    /// # Errors
    /// Returns an error describing the first invalid setting
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let prefix_ok = !self.archive_prefix.is_empty()
            && self
                .archive_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !prefix_ok {
            return Err(ConfigLoadError::Invalid(format!(
                "archive_prefix must be non-empty and use only [A-Za-z0-9_-]: {:?}",
                self.archive_prefix
            )));
        }

        if self.max_upload_bytes == 0 {
            return Err(ConfigLoadError::Invalid(
                "max_upload_bytes must be positive".to_string(),
            ));
        }

        if let Some(groups) = &self.groups {
            if let Some(group) = groups.iter().find(|g| g.key == FULL_SELECTOR) {
                return Err(ConfigLoadError::Invalid(format!(
                    "group key '{}' is reserved",
                    group.key
                )));
            }
        }

        let backup_dir = self.backup_dir();
        for folder in self.folders() {
            let normalized = normalize_path(Path::new(&folder))
                .map_err(|e| ConfigLoadError::Invalid(format!("folder {folder:?}: {e}")))?;
            if normalized.as_os_str().is_empty() {
                return Err(ConfigLoadError::Invalid(format!(
                    "folder {folder:?} resolves to the data root"
                )));
            }
            // Archiving the backup directory would nest archives in archives
            let resolved = self.data_root.join(&normalized);
            if resolved.starts_with(&backup_dir) || backup_dir.starts_with(&resolved) {
                return Err(ConfigLoadError::Invalid(format!(
                    "folder {folder:?} overlaps the backup directory {}",
                    backup_dir.display()
                )));
            }
        }

        Ok(())
    }

    /// Resolve a possibly-relative path against `data_root`
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_root.join(path)
        }
    }

    /// Directory holding archives
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => self.resolve(dir),
            None => self.data_root.join("backups"),
        }
    }

    /// Restore catalog in effect
    #[must_use]
    pub fn catalog(&self) -> RestoreCatalog {
        RestoreCatalog::new(self.groups.clone().unwrap_or_else(builtin_groups))
    }

    /// Auxiliary folders to archive
    #[must_use]
    pub fn folders(&self) -> Vec<String> {
        match &self.folders {
            Some(folders) => folders.clone(),
            None => self.catalog().all_folders().into_iter().collect(),
        }
    }
}
