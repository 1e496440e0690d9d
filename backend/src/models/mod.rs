//! Domain models for the CSV sync layer.
//!
//! - [`EntityType`] - The fixed set of entity collections and their registry
//! - [`Row`] / [`Table`] - In-memory analog of one CSV file
//! - [`SyncConfig`] - Folder, file names, file ids and loaded data
//! - [`ConfigPatch`] - State transitions applied to a [`SyncConfig`]
//! - [`StorageMode`] - Local vs remote persistence flag

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// One record: column name to value, in insertion order.
pub type Row = Map<String, Value>;

/// Current time as an ISO-8601 UTC timestamp with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// =============================================================================
// Entity Types
// =============================================================================

/// A named entity collection with its own schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Tasks,
    Projects,
    Risks,
    Assets,
    Objectives,
    Kras,
    Kpis,
}

/// Registry entry: default file name and minimum viable header list.
struct RegistryEntry {
    entity: EntityType,
    file_name: &'static str,
    headers: &'static [&'static str],
}

const REGISTRY: &[RegistryEntry] = &[
    RegistryEntry {
        entity: EntityType::Tasks,
        file_name: "tasks.csv",
        headers: &[
            "id", "title", "description", "status", "priority", "assignee", "dueDate",
            "projectId", "createdAt", "updatedAt",
        ],
    },
    RegistryEntry {
        entity: EntityType::Projects,
        file_name: "projects.csv",
        headers: &[
            "id", "name", "description", "status", "manager", "startDate", "endDate", "budget",
            "createdAt", "updatedAt",
        ],
    },
    RegistryEntry {
        entity: EntityType::Risks,
        file_name: "risks.csv",
        headers: &[
            "id", "title", "description", "category", "likelihood", "impact", "owner",
            "mitigation", "status", "createdAt", "updatedAt",
        ],
    },
    RegistryEntry {
        entity: EntityType::Assets,
        file_name: "assets.csv",
        headers: &[
            "id", "name", "type", "serialNumber", "location", "assignedTo", "purchaseDate",
            "status", "createdAt", "updatedAt",
        ],
    },
    RegistryEntry {
        entity: EntityType::Objectives,
        file_name: "objectives.csv",
        headers: &["id", "title", "description", "status", "createdAt", "updatedAt"],
    },
    RegistryEntry {
        entity: EntityType::Kras,
        file_name: "kras.csv",
        headers: &[
            "id", "title", "objectiveId", "department", "responsible", "startDate", "endDate",
            "progress", "status", "createdAt", "updatedAt",
        ],
    },
    RegistryEntry {
        entity: EntityType::Kpis,
        file_name: "kpis.csv",
        headers: &[
            "id", "name", "kraId", "target", "actual", "unit", "frequency", "status",
            "createdAt", "updatedAt",
        ],
    },
];

impl EntityType {
    /// Every entity type, in registry order.
    pub const ALL: [EntityType; 7] = [
        Self::Tasks,
        Self::Projects,
        Self::Risks,
        Self::Assets,
        Self::Objectives,
        Self::Kras,
        Self::Kpis,
    ];

    /// Entity types that get a file when initialization has no file names to work from.
    pub const DEFAULT_SYNCED: [EntityType; 3] = [Self::Objectives, Self::Kras, Self::Kpis];

    /// Key used in storage keys and config maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Projects => "projects",
            Self::Risks => "risks",
            Self::Assets => "assets",
            Self::Objectives => "objectives",
            Self::Kras => "kras",
            Self::Kpis => "kpis",
        }
    }

    // REGISTRY is laid out in declaration order.
    fn entry(&self) -> &'static RegistryEntry {
        &REGISTRY[*self as usize]
    }

    /// Default CSV file name.
    pub fn default_file_name(&self) -> &'static str {
        self.entry().file_name
    }

    /// Default column headers.
    pub fn default_headers(&self) -> Vec<String> {
        self.entry().headers.iter().map(|h| h.to_string()).collect()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == key)
            .ok_or_else(|| ConfigError::UnknownEntityType(s.to_string()))
    }
}

/// Default headers for a config key, empty when the key is not a known entity type.
pub fn default_headers_for(key: &str) -> Vec<String> {
    key.parse::<EntityType>()
        .map(|e| e.default_headers())
        .unwrap_or_default()
}

// =============================================================================
// Table
// =============================================================================

/// Headers plus rows: the contents of one CSV file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers, rows: Vec::new() }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }
}

// =============================================================================
// Storage Mode
// =============================================================================

/// Where an entity store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Local,
    Remote,
}

impl StorageMode {
    /// `"local"` selects local mode; anything else, including no flag, is remote.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("local") => Self::Local,
            _ => Self::Remote,
        }
    }

    pub fn as_flag(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

// =============================================================================
// Sync Configuration
// =============================================================================

/// Folder, file names, resolved file ids and loaded tables.
///
/// All maps are keyed by entity-type key (`"kpis"`, `"tasks"`, ...). The
/// configuration is owned by the caller; the sync engine only ever returns
/// [`ConfigPatch`]es for the caller to commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub file_names: BTreeMap<String, String>,
    #[serde(default)]
    pub file_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, Table>,
}

impl SyncConfig {
    pub fn new(folder_id: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
            ..Default::default()
        }
    }

    /// True when any resolved file id carries the local marker.
    pub fn is_local(&self, marker: &str) -> bool {
        self.file_ids.values().any(|id| id.starts_with(marker))
    }

    pub fn table(&self, entity: &str) -> Option<&Table> {
        self.data.get(entity)
    }

    /// Rows for an entity, empty when no table is loaded.
    pub fn rows(&self, entity: &str) -> Vec<Row> {
        self.data.get(entity).map(|t| t.rows.clone()).unwrap_or_default()
    }

    /// Reducer: returns the configuration with `patch` applied.
    pub fn apply(mut self, patch: ConfigPatch) -> Self {
        self.apply_mut(patch);
        self
    }

    /// In-place variant of [`SyncConfig::apply`].
    pub fn apply_mut(&mut self, patch: ConfigPatch) {
        match patch {
            ConfigPatch::FileIds(ids) => self.file_ids.extend(ids),
            ConfigPatch::FileNames(names) => self.file_names.extend(names),
            ConfigPatch::Data(tables) => self.data.extend(tables),
            ConfigPatch::Rows { entity, rows } => {
                let table = self
                    .data
                    .entry(entity)
                    .or_insert_with_key(|key| Table::new(default_headers_for(key)));
                table.rows = rows;
            }
            ConfigPatch::Batch(patches) => {
                for p in patches {
                    self.apply_mut(p);
                }
            }
        }
    }
}

/// A state transition on a [`SyncConfig`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigPatch {
    /// Merge resolved file ids.
    FileIds(BTreeMap<String, String>),
    /// Merge file names.
    FileNames(BTreeMap<String, String>),
    /// Replace the listed tables, keep the others.
    Data(BTreeMap<String, Table>),
    /// Replace one entity's rows, leaving its headers untouched.
    Rows { entity: String, rows: Vec<Row> },
    /// Several patches applied in order.
    Batch(Vec<ConfigPatch>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("kpis".parse::<EntityType>().unwrap(), EntityType::Kpis);
        assert_eq!(" KRAs ".parse::<EntityType>().unwrap(), EntityType::Kras);
        assert!(matches!(
            "widgets".parse::<EntityType>(),
            Err(ConfigError::UnknownEntityType(_))
        ));
    }

    #[test]
    fn test_registry_defaults() {
        for entity in EntityType::ALL {
            assert_eq!(entity.entry().entity, entity);
            let headers = entity.default_headers();
            assert_eq!(headers[0], "id", "{entity} must start with id");
            assert!(headers.contains(&"updatedAt".to_string()));
            assert_eq!(entity.default_file_name(), format!("{}.csv", entity.as_str()));
        }
    }

    #[test]
    fn test_storage_mode_flag() {
        assert_eq!(StorageMode::from_flag(Some("local")), StorageMode::Local);
        assert_eq!(StorageMode::from_flag(Some("sharepoint")), StorageMode::Remote);
        assert_eq!(StorageMode::from_flag(None), StorageMode::Remote);
    }

    #[test]
    fn test_config_wire_format() {
        let config: SyncConfig = serde_json::from_value(json!({
            "folderId": "F1",
            "fileNames": { "kpis": "kpis.csv" },
            "fileIds": { "kpis": "abc" },
            "data": { "kpis": { "headers": ["id"], "rows": [{ "id": "kpis-1" }] } }
        }))
        .unwrap();

        assert_eq!(config.folder_id, "F1");
        assert_eq!(config.file_ids["kpis"], "abc");
        assert_eq!(config.rows("kpis").len(), 1);

        let back = serde_json::to_value(&config).unwrap();
        assert!(back.get("fileIds").is_some());
    }

    #[test]
    fn test_rows_patch_keeps_headers() {
        let mut config = SyncConfig::new("F1");
        config
            .data
            .insert("kpis".into(), Table::new(vec!["id".into(), "custom".into()]));

        let config = config.apply(ConfigPatch::Rows {
            entity: "kpis".into(),
            rows: vec![row(json!({ "id": "kpis-1" }))],
        });

        let table = config.table("kpis").unwrap();
        assert_eq!(table.headers, vec!["id", "custom"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_rows_patch_creates_table_with_defaults() {
        let config = SyncConfig::new("F1").apply(ConfigPatch::Rows {
            entity: "objectives".into(),
            rows: vec![],
        });
        assert_eq!(
            config.table("objectives").unwrap().headers,
            EntityType::Objectives.default_headers()
        );
    }

    #[test]
    fn test_batch_patch_and_local_marker() {
        let ids = BTreeMap::from([("kpis".to_string(), "local_kpis".to_string())]);
        let names = BTreeMap::from([("kpis".to_string(), "kpis.csv".to_string())]);
        let config = SyncConfig::new("F1").apply(ConfigPatch::Batch(vec![
            ConfigPatch::FileIds(ids),
            ConfigPatch::FileNames(names),
        ]));

        assert!(config.is_local("local_"));
        assert_eq!(config.file_names["kpis"], "kpis.csv");
    }
}
