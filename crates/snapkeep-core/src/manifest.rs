//! Manifest describing an archive's contents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::RestoreCatalog;

/// Version tag written into new manifests
pub const MANIFEST_VERSION: &str = "2.0";

/// Relational engine a dump was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DbType {
    Embedded,
    ClientServer,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedded => write!(f, "embedded"),
            Self::ClientServer => write!(f, "client-server"),
        }
    }
}

/// Metadata document at the root of every archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub created: DateTime<Utc>,
    pub db_type: DbType,
    /// Row count per table at dump time
    pub tables: BTreeMap<String, u64>,
    pub restore_groups: BTreeMap<String, GroupSummary>,
    /// Auxiliary folders included in the archive
    #[serde(default)]
    pub folders: Vec<String>,
}

/// Per-group aggregate shown before a restore is chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub name: String,
    pub description: String,
    pub icon: String,
    pub total_rows: u64,
    /// Only tables that exist in the dump
    pub tables: BTreeMap<String, u64>,
    pub has_folders: bool,
}

impl Manifest {
    /// Build a manifest from dumped table counts and included folders
    #[must_use]
    pub fn build(
        created: DateTime<Utc>,
        db_type: DbType,
        tables: BTreeMap<String, u64>,
        folders: Vec<String>,
        catalog: &RestoreCatalog,
    ) -> Self {
        let restore_groups = catalog
            .groups()
            .map(|group| {
                let group_tables: BTreeMap<String, u64> = group
                    .tables
                    .iter()
                    .filter_map(|t| tables.get(t).map(|count| (t.clone(), *count)))
                    .collect();
                let summary = GroupSummary {
                    name: group.name.clone(),
                    description: group.description.clone(),
                    icon: group.icon.clone(),
                    total_rows: group_tables.values().sum(),
                    tables: group_tables,
                    has_folders: group.folders.iter().any(|f| folders.contains(f)),
                };
                (group.key.clone(), summary)
            })
            .collect();

        Self {
            version: MANIFEST_VERSION.to_string(),
            created,
            db_type,
            tables,
            restore_groups,
            folders,
        }
    }

    /// Parse manifest bytes
    ///
    /// # Errors
    /// Returns an error if the document is not a valid manifest
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RestoreGroup;

    fn catalog() -> RestoreCatalog {
        RestoreCatalog::new(vec![
            RestoreGroup::new("plans", "Plans", &["subscription_plans"]),
            RestoreGroup::new("users", "Users", &["users", "user_tags"]),
            RestoreGroup::new("settings", "Settings", &["settings"])
                .with_folders(&["uploads/branding"]),
        ])
    }

    #[test]
    fn test_group_aggregates_only_count_dumped_tables() {
        let tables = BTreeMap::from([
            ("subscription_plans".to_string(), 3),
            ("users".to_string(), 10),
            ("settings".to_string(), 4),
        ]);
        let manifest = Manifest::build(
            Utc::now(),
            DbType::Embedded,
            tables,
            vec!["uploads/branding".to_string()],
            &catalog(),
        );

        let users = &manifest.restore_groups["users"];
        assert_eq!(users.total_rows, 10);
        assert!(!users.tables.contains_key("user_tags"));
        assert!(!users.has_folders);
        assert!(manifest.restore_groups["settings"].has_folders);
        assert_eq!(manifest.restore_groups["plans"].total_rows, 3);
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let manifest = Manifest::build(
            Utc::now(),
            DbType::ClientServer,
            BTreeMap::new(),
            Vec::new(),
            &catalog(),
        );
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["dbType"], "client-server");
        assert_eq!(value["version"], MANIFEST_VERSION);
        assert!(value["restoreGroups"]["settings"]["hasFolders"].is_boolean());
        assert!(value["restoreGroups"]["plans"]["totalRows"].is_number());
    }

    #[test]
    fn test_parses_manifest_without_folders() {
        let raw = br#"{
            "version": "1.0",
            "created": "2025-01-02T03:04:05Z",
            "dbType": "embedded",
            "tables": {"tags": 2},
            "restoreGroups": {}
        }"#;
        let manifest = Manifest::from_slice(raw).unwrap();
        assert_eq!(manifest.tables["tags"], 2);
        assert!(manifest.folders.is_empty());
    }
}
