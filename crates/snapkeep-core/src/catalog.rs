//! Restore group catalog
//!
//! Maps logical group keys to the tables and folders they own. Groups may
//! overlap in table membership; the reserved key `full` selects the union
//! of every group.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reserved selector for a full restore
pub const FULL_SELECTOR: &str = "full";

/// A named set of tables (and optionally folders) restorable as a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreGroup {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tables: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub icon: String,
    /// Restoring this group invalidates cached configuration
    #[serde(default)]
    pub requires_restart: bool,
}

impl RestoreGroup {
    /// Create a group owning the given tables
    #[must_use]
    pub fn new(key: &str, name: &str, tables: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            description: String::new(),
            tables: tables.iter().map(ToString::to_string).collect(),
            folders: Vec::new(),
            icon: String::new(),
            requires_restart: false,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    #[must_use]
    pub fn with_icon(mut self, icon: &str) -> Self {
        self.icon = icon.to_string();
        self
    }

    /// Folders are paths relative to the application data root
    #[must_use]
    pub fn with_folders(mut self, folders: &[&str]) -> Self {
        self.folders = folders.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn requiring_restart(mut self) -> Self {
        self.requires_restart = true;
        self
    }
}

/// The group keys requested for a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSelection {
    Full,
    Groups(Vec<String>),
}

impl RestoreSelection {
    /// Build a selection from raw keys; any `full` key makes it a full restore
    #[must_use]
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.iter().any(|k| k == FULL_SELECTOR) {
            Self::Full
        } else {
            Self::Groups(keys)
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Keys as submitted, `["full"]` for a full restore
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::Full => vec![FULL_SELECTOR.to_string()],
            Self::Groups(keys) => keys.clone(),
        }
    }
}

/// Tables and folders a selection resolves to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSelection {
    pub tables: BTreeSet<String>,
    pub folders: BTreeSet<String>,
    /// At least one resolved group invalidates cached configuration
    pub requires_restart: bool,
}

/// Static registry of restore groups
#[derive(Debug, Clone)]
pub struct RestoreCatalog {
    groups: BTreeMap<String, RestoreGroup>,
    order: Vec<String>,
}

impl RestoreCatalog {
    /// Build a catalog from groups; later duplicates of a key win
    #[must_use]
    pub fn new(groups: Vec<RestoreGroup>) -> Self {
        let mut order = Vec::new();
        let mut map = BTreeMap::new();
        for group in groups {
            if !map.contains_key(&group.key) {
                order.push(group.key.clone());
            }
            map.insert(group.key.clone(), group);
        }
        Self { groups: map, order }
    }

    /// Groups in declaration order
    pub fn groups(&self) -> impl Iterator<Item = &RestoreGroup> {
        self.order.iter().filter_map(|key| self.groups.get(key))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RestoreGroup> {
        self.groups.get(key)
    }

    /// Every folder owned by any group, de-duplicated
    #[must_use]
    pub fn all_folders(&self) -> BTreeSet<String> {
        self.groups()
            .flat_map(|g| g.folders.iter().cloned())
            .collect()
    }

    /// Resolve a selection to its table and folder closure
    ///
    /// Unknown keys are ignored.
    #[must_use]
    pub fn resolve(&self, selection: &RestoreSelection) -> ResolvedSelection {
        let selected: Vec<&RestoreGroup> = match selection {
            RestoreSelection::Full => self.groups().collect(),
            RestoreSelection::Groups(keys) => {
                keys.iter().filter_map(|key| self.groups.get(key)).collect()
            }
        };

        let mut resolved = ResolvedSelection::default();
        for group in selected {
            resolved.tables.extend(group.tables.iter().cloned());
            resolved.folders.extend(group.folders.iter().cloned());
            resolved.requires_restart |= group.requires_restart;
        }
        resolved
    }
}

impl Default for RestoreCatalog {
    fn default() -> Self {
        Self::new(builtin_groups())
    }
}

/// Groups of the subscription-management application
#[must_use]
pub fn builtin_groups() -> Vec<RestoreGroup> {
    vec![
        RestoreGroup::new("settings", "Settings & Branding", &["settings"])
            .with_description("Application settings, branding, and uploaded logos")
            .with_icon("settings")
            .with_folders(&["uploads/branding"])
            .requiring_restart(),
        RestoreGroup::new(
            "users",
            "Users & Subscriptions",
            &["users", "user_subscriptions", "user_notes", "user_tags"],
        )
        .with_description("User accounts, their subscriptions, and notes")
        .with_icon("users"),
        RestoreGroup::new("plans", "Subscription Plans", &["subscription_plans"])
            .with_description("Plan definitions, pricing, and durations")
            .with_icon("credit-card"),
        RestoreGroup::new("tags", "Tags", &["tags", "user_tags"])
            .with_description("Tag definitions and user tag assignments")
            .with_icon("tag"),
        RestoreGroup::new(
            "panels",
            "IPTV Panels",
            &["iptv_panels", "iptv_packages", "iptv_editor_settings"],
        )
        .with_description("Panel connections, packages, and editor settings")
        .with_icon("tv")
        .with_folders(&["data/iptv-editor"]),
        RestoreGroup::new(
            "plex",
            "Plex Servers",
            &["plex_servers", "plex_libraries", "plex_packages"],
        )
        .with_description("Plex servers, libraries, and library packages")
        .with_icon("server"),
        RestoreGroup::new("guides", "Playlists & Guides", &["m3u_sources", "epg_sources"])
            .with_description("Playlist and program guide sources")
            .with_icon("list"),
        RestoreGroup::new(
            "email",
            "Email",
            &["email_templates", "email_schedules", "email_logs"],
        )
        .with_description("Templates, schedules, and delivery history")
        .with_icon("mail"),
        RestoreGroup::new(
            "payments",
            "Payments",
            &["payment_providers", "payment_history"],
        )
        .with_description("Payment provider settings and history")
        .with_icon("wallet"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_is_union_of_all_groups() {
        let catalog = RestoreCatalog::default();
        let full = catalog.resolve(&RestoreSelection::Full);

        let mut expected_tables = BTreeSet::new();
        let mut expected_folders = BTreeSet::new();
        for group in catalog.groups() {
            expected_tables.extend(group.tables.iter().cloned());
            expected_folders.extend(group.folders.iter().cloned());
        }

        assert_eq!(full.tables, expected_tables);
        assert_eq!(full.folders, expected_folders);
        assert!(full.requires_restart);
        // user_tags is in two groups but appears once
        assert_eq!(
            full.tables.iter().filter(|t| *t == "user_tags").count(),
            1
        );
    }

    #[test]
    fn test_full_key_anywhere_selects_full() {
        let selection = RestoreSelection::from_keys(["plans", "full"]);
        assert!(selection.is_full());
        assert_eq!(selection.keys(), vec!["full".to_string()]);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let catalog = RestoreCatalog::default();
        let resolved = catalog.resolve(&RestoreSelection::from_keys(["plans", "nope"]));
        assert_eq!(
            resolved.tables,
            BTreeSet::from(["subscription_plans".to_string()])
        );
        assert!(resolved.folders.is_empty());
        assert!(!resolved.requires_restart);

        let nothing = catalog.resolve(&RestoreSelection::from_keys(["nope"]));
        assert!(nothing.tables.is_empty());
    }

    #[test]
    fn test_overlapping_groups_union() {
        let catalog = RestoreCatalog::default();
        let resolved = catalog.resolve(&RestoreSelection::from_keys(["users", "tags"]));
        assert!(resolved.tables.contains("tags"));
        assert!(resolved.tables.contains("users"));
        assert_eq!(resolved.tables.len(), 5);
    }

    #[test]
    fn test_settings_requires_restart() {
        let catalog = RestoreCatalog::default();
        let resolved = catalog.resolve(&RestoreSelection::from_keys(["settings"]));
        assert!(resolved.requires_restart);
        assert!(resolved.folders.contains("uploads/branding"));
    }

    #[test]
    fn test_declaration_order_preserved() {
        let catalog = RestoreCatalog::new(vec![
            RestoreGroup::new("b", "B", &["t1"]),
            RestoreGroup::new("a", "A", &["t2"]),
        ]);
        let keys: Vec<&str> = catalog.groups().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
