//! Results returned by backup operations

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::manifest::Manifest;

/// A freshly written archive
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBackup {
    pub filename: String,
    pub size: u64,
    pub manifest: Manifest,
}

/// One archive in the backup directory
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupListing {
    pub filename: String,
    pub size: u64,
    /// Timestamp embedded in the filename
    pub created: Option<DateTime<Utc>>,
    /// `None` when the manifest could not be read
    pub manifest: Option<Manifest>,
}

/// Why a selected table was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotInDump,
    NotInLiveSchema,
    NoCommonColumns,
}

/// What happened to one selected table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    Restored { rows: usize },
    Skipped { reason: SkipReason },
    /// Logged and isolated; other tables still restore
    Failed { reason: String },
}

/// What happened to one selected folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FolderOutcome {
    Restored { files: usize },
    NotInArchive,
    Failed { reason: String },
}

/// Names of everything a restore actually replaced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoredItems {
    pub tables: Vec<String>,
    pub folders: Vec<String>,
}

/// Outcome of a restore
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    /// False when any table or folder failed
    pub success: bool,
    pub restored: RestoredItems,
    pub requires_restart: bool,
    pub tables: BTreeMap<String, TableOutcome>,
    pub folders: BTreeMap<String, FolderOutcome>,
}

impl RestoreReport {
    /// Assemble a report from per-item outcomes
    #[must_use]
    pub fn from_outcomes(
        tables: BTreeMap<String, TableOutcome>,
        folders: BTreeMap<String, FolderOutcome>,
        requires_restart: bool,
    ) -> Self {
        let restored = RestoredItems {
            tables: tables
                .iter()
                .filter(|(_, o)| matches!(o, TableOutcome::Restored { .. }))
                .map(|(name, _)| name.clone())
                .collect(),
            folders: folders
                .iter()
                .filter(|(_, o)| matches!(o, FolderOutcome::Restored { .. }))
                .map(|(name, _)| name.clone())
                .collect(),
        };
        let success = !tables
            .values()
            .any(|o| matches!(o, TableOutcome::Failed { .. }))
            && !folders
                .values()
                .any(|o| matches!(o, FolderOutcome::Failed { .. }));

        Self {
            success,
            restored,
            requires_restart,
            tables,
            folders,
        }
    }

    /// Tables that were selected but left untouched
    #[must_use]
    pub fn skipped_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|(_, o)| matches!(o, TableOutcome::Skipped { .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Tables whose replace failed
    #[must_use]
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|(_, o)| matches!(o, TableOutcome::Failed { .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_partitions_outcomes() {
        let tables = BTreeMap::from([
            ("a".to_string(), TableOutcome::Restored { rows: 3 }),
            (
                "b".to_string(),
                TableOutcome::Skipped {
                    reason: SkipReason::NotInDump,
                },
            ),
            (
                "c".to_string(),
                TableOutcome::Failed {
                    reason: "boom".into(),
                },
            ),
        ]);
        let report = RestoreReport::from_outcomes(tables, BTreeMap::new(), false);

        assert_eq!(report.restored.tables, vec!["a"]);
        assert_eq!(report.skipped_tables(), vec!["b"]);
        assert_eq!(report.failed_tables(), vec!["c"]);
        assert!(!report.success);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = RestoreReport::from_outcomes(
            BTreeMap::from([("a".to_string(), TableOutcome::Restored { rows: 1 })]),
            BTreeMap::from([("uploads/branding".to_string(), FolderOutcome::NotInArchive)]),
            true,
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["requiresRestart"], true);
        assert_eq!(value["restored"]["tables"][0], "a");
        assert_eq!(value["tables"]["a"]["status"], "restored");
        assert_eq!(value["folders"]["uploads/branding"]["status"], "not_in_archive");
    }
}
