//! Error taxonomy for backup and restore operations

use crate::archive::ArchiveError;
use crate::config::ConfigLoadError;
use crate::dialect::DialectError;
use crate::lock::OperationKind;
use crate::util::PathError;
use thiserror::Error;

/// Result type for engine operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Errors surfaced by the backup engine
///
/// Per-table restore failures are not errors at this level; they are
/// recorded as [`crate::TableOutcome::Failed`] in the restore report.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Bad filename, missing field, or rejected input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Archive or manifest not present
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unreadable zip or missing manifest
    #[error("Corrupt archive {filename}: {reason}")]
    CorruptArchive { filename: String, reason: String },

    /// Another create or restore holds the operation lock
    #[error("Another {running} operation is in progress")]
    Busy { running: OperationKind },

    /// Dump or restore utility failure during creation
    #[error("Database dump failed: {0}")]
    DatabaseDump(#[source] DialectError),

    /// Folder copy or archive packing failure
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// Engine failure outside of a dump
    #[error("Database error: {0}")]
    Dialect(#[from] DialectError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigLoadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    pub(crate) fn corrupt(filename: &str, reason: impl Into<String>) -> Self {
        Self::CorruptArchive {
            filename: filename.to_string(),
            reason: reason.into(),
        }
    }

    /// Get the error code for CLI/API responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::CorruptArchive { .. } => "CORRUPT_ARCHIVE",
            Self::Busy { .. } => "BUSY",
            Self::DatabaseDump(_) => "DATABASE_DUMP_FAILED",
            Self::Filesystem(_) | Self::Io(_) => "FILESYSTEM_ERROR",
            Self::Dialect(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// HTTP status an API layer should answer with
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::CorruptArchive { .. } => 400,
            Self::NotFound(_) => 404,
            Self::Busy { .. } => 409,
            Self::DatabaseDump(_)
            | Self::Filesystem(_)
            | Self::Dialect(_)
            | Self::Config(_)
            | Self::Io(_) => 500,
        }
    }

    /// Structured body for user-visible failures
    #[must_use]
    pub fn to_response(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        })
    }
}

impl From<PathError> for BackupError {
    fn from(err: PathError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ArchiveError> for BackupError {
    fn from(err: ArchiveError) -> Self {
        Self::Filesystem(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(BackupError::Validation("x".into()).http_status(), 400);
        assert_eq!(BackupError::NotFound("x".into()).http_status(), 404);
        assert_eq!(
            BackupError::Busy {
                running: OperationKind::Restore
            }
            .http_status(),
            409
        );
        assert_eq!(BackupError::corrupt("a.zip", "no manifest").http_status(), 400);
    }

    #[test]
    fn test_response_body_has_no_trace() {
        let body = BackupError::NotFound("x-backup.zip".into()).to_response();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "NOT_FOUND");
        assert_eq!(body["error"], "Not found: x-backup.zip");
    }
}
