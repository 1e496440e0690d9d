//! Entity store: CRUD over one entity collection.
//!
//! Every mutation updates memory first, then persists. The storage-mode flag
//! is read on every operation: `local` writes the JSON row array to the
//! key-value store, anything else goes through the sync engine when a
//! [`SyncContext`] is attached (and falls back to the key-value store when not).
//!
//! A failed write never rolls memory back. The error is recorded in
//! [`EntityStore::error`], broadcast, and returned.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::error::{StoreError, StoreResult, SyncError};
use crate::models::{ConfigPatch, EntityType, Row, StorageMode, SyncConfig};
use crate::notify::{LogBroadcaster, LOG_BROADCASTER};
use crate::storage::{mode_key, rows_key, KeyValueStore};
use crate::sync::SyncEngine;

/// Fields managed by the store, never taken from caller input.
const MANAGED_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// Engine plus the shared configuration it works on.
///
/// The configuration is only changed through [`SyncContext::commit`].
#[derive(Clone)]
pub struct SyncContext {
    pub engine: Arc<SyncEngine>,
    pub config: Arc<Mutex<SyncConfig>>,
}

impl SyncContext {
    pub fn new(engine: Arc<SyncEngine>, config: SyncConfig) -> Self {
        Self {
            engine,
            config: Arc::new(Mutex::new(config)),
        }
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> SyncConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply a patch and return the committed configuration.
    pub fn commit(&self, patch: ConfigPatch) -> SyncConfig {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        config.apply_mut(patch);
        config.clone()
    }
}

/// In-memory collection of one entity type with write-through persistence.
pub struct EntityStore {
    entity: EntityType,
    items: Vec<Row>,
    loading: bool,
    error: Option<String>,
    kv: Arc<dyn KeyValueStore>,
    sync: Option<SyncContext>,
    logs: LogBroadcaster,
    prefix: String,
    setup_complete: bool,
}

impl EntityStore {
    pub fn new(entity: EntityType, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            entity,
            items: Vec::new(),
            loading: false,
            error: None,
            kv,
            sync: None,
            logs: LOG_BROADCASTER.clone(),
            prefix: "intranet".to_string(),
            setup_complete: true,
        }
    }

    /// Route remote-mode persistence through `sync`. Keys use the engine's prefix.
    pub fn with_sync(mut self, sync: SyncContext) -> Self {
        self.prefix = sync.engine.options().app_prefix.clone();
        self.sync = Some(sync);
        self
    }

    pub fn with_logs(mut self, logs: LogBroadcaster) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// An incomplete setup makes [`EntityStore::open`] a no-op.
    pub fn with_setup_complete(mut self, complete: bool) -> Self {
        self.setup_complete = complete;
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity
    }

    pub fn items(&self) -> &[Row] {
        &self.items
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Current storage mode. An unreadable flag counts as remote.
    pub fn mode(&self) -> StorageMode {
        let flag = self.kv.get(&mode_key(&self.prefix)).ok().flatten();
        StorageMode::from_flag(flag.as_deref())
    }

    /// Set the global storage-mode flag.
    pub fn set_mode(&self, mode: StorageMode) -> StoreResult<()> {
        self.kv.set(&mode_key(&self.prefix), mode.as_flag())?;
        Ok(())
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Initial load.
    ///
    /// In remote mode any failure falls back to the local copy with a
    /// warning instead of an error.
    pub async fn open(&mut self) -> StoreResult<()> {
        if !self.setup_complete {
            self.items.clear();
            self.loading = false;
            self.error = None;
            return Ok(());
        }

        self.loading = true;
        let loaded = match self.mode() {
            StorageMode::Local => self.read_local(),
            StorageMode::Remote => match self.read_remote().await {
                Ok(rows) => Ok(rows),
                Err(e) => {
                    self.logs.warning(format!(
                        "Could not load {}, using local data: {}",
                        self.entity, e
                    ));
                    self.read_local()
                }
            },
        };
        self.finish_load(loaded)
    }

    /// Replace memory with the active backing store's contents.
    pub async fn refresh(&mut self) -> StoreResult<()> {
        self.loading = true;
        let loaded = match self.mode() {
            StorageMode::Local => self.read_local(),
            StorageMode::Remote => self.read_remote().await,
        };
        self.finish_load(loaded)
    }

    fn finish_load(&mut self, loaded: StoreResult<Vec<Row>>) -> StoreResult<()> {
        self.loading = false;
        match loaded {
            Ok(rows) => {
                self.items = rows;
                self.error = None;
                Ok(())
            }
            Err(e) => {
                self.error = Some(e.to_string());
                self.logs.error(format!("Could not load {}: {}", self.entity, e));
                Err(e)
            }
        }
    }

    fn read_local(&self) -> StoreResult<Vec<Row>> {
        match self.kv.get(&rows_key(&self.prefix, self.entity.as_str()))? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn read_remote(&self) -> StoreResult<Vec<Row>> {
        let Some(sync) = &self.sync else {
            return self.read_local();
        };

        let config = match sync.engine.load(&sync.snapshot()).await? {
            Some(patch) => sync.commit(patch),
            None => sync.snapshot(),
        };
        Ok(config.rows(self.entity.as_str()))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Append a new item built from `fields`.
    ///
    /// The id is `<entity>-<epoch millis>`, bumped when already taken, and
    /// both timestamps are set to the same instant.
    pub async fn add(&mut self, fields: Row) -> StoreResult<Row> {
        let now = Utc::now();
        let stamp = Value::from(now.to_rfc3339_opts(SecondsFormat::Millis, true));

        let mut millis = now.timestamp_millis();
        let mut id = format!("{}-{}", self.entity, millis);
        while self.position(&id).is_some() {
            millis += 1;
            id = format!("{}-{}", self.entity, millis);
        }

        let mut row = Row::new();
        row.insert("id".into(), Value::from(id.clone()));
        row.extend(
            fields
                .into_iter()
                .filter(|(k, _)| !MANAGED_FIELDS.contains(&k.as_str())),
        );
        row.insert("createdAt".into(), stamp.clone());
        row.insert("updatedAt".into(), stamp);

        self.items.push(row.clone());
        self.persist().await?;
        self.logs.success(format!("Added {}", id));
        Ok(row)
    }

    /// Merge `patch` into the item with `id` and refresh its `updatedAt`.
    pub async fn edit(&mut self, id: &str, patch: Row) -> StoreResult<Row> {
        let index = self
            .position(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let row = &mut self.items[index];
        row.extend(
            patch
                .into_iter()
                .filter(|(k, _)| !MANAGED_FIELDS.contains(&k.as_str())),
        );
        row.insert(
            "updatedAt".into(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true).into(),
        );
        let row = row.clone();

        self.persist().await?;
        self.logs.success(format!("Updated {}", id));
        Ok(row)
    }

    pub async fn remove(&mut self, id: &str) -> StoreResult<()> {
        let index = self
            .position(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        self.items.remove(index);
        self.persist().await?;
        self.logs.success(format!("Deleted {}", id));
        Ok(())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|row| row.get("id").and_then(Value::as_str) == Some(id))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    async fn persist(&mut self) -> StoreResult<()> {
        let result = self.write_through().await;
        match &result {
            Ok(()) => self.error = None,
            Err(e) => {
                self.error = Some(e.to_string());
                self.logs.error(format!("Could not save {}: {}", self.entity, e));
            }
        }
        result
    }

    async fn write_through(&self) -> StoreResult<()> {
        match (self.mode(), &self.sync) {
            (StorageMode::Remote, Some(sync)) => {
                let patch = sync
                    .engine
                    .update_entity_data(self.entity.as_str(), self.items.clone());
                let config = sync.commit(patch);

                let saved = sync.engine.save(&config).await;
                let recovered = match &saved {
                    Ok(report) => report.patch.clone(),
                    Err(SyncError::AllFilesFailed { report }) => report.patch.clone(),
                    Err(_) => None,
                };
                if let Some(patch) = recovered {
                    sync.commit(patch);
                }
                saved.map(|_| ()).map_err(StoreError::from)
            }
            _ => self.write_local(),
        }
    }

    fn write_local(&self) -> StoreResult<()> {
        let json = serde_json::to_string(&self.items)?;
        self.kv
            .set(&rows_key(&self.prefix, self.entity.as_str()), &json)?;
        Ok(())
    }
}
