//! Sync engine: keeps entity tables and their CSV files in step.
//!
//! # Operations
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`SyncEngine::initialize`] | create one CSV file per entity type in the folder |
//! | [`SyncEngine::load`] | read every linked file into a table |
//! | [`SyncEngine::save`] | write every table back, with per-file retry |
//! | [`SyncEngine::save_local`] | same content, written to the key-value store |
//! | [`SyncEngine::update_entity_data`] | stamp and replace one entity's rows |
//!
//! The engine never mutates a [`SyncConfig`]. Operations that change it
//! return a [`ConfigPatch`]; the caller applies it with
//! [`SyncConfig::apply`] and decides when to commit.
//!
//! # Rate limits
//!
//! Remote calls are issued one at a time. File creation pauses between files
//! and every write is retried with linear backoff (attempt × delay).

use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ConfigError, SyncError, SyncResult};
use crate::gateway::FileGateway;
use crate::models::{default_headers_for, now_iso, ConfigPatch, EntityType, Row, SyncConfig, Table};
use crate::notify::{LogBroadcaster, LogEntry, LOG_BROADCASTER};
use crate::parser::{csv_to_table, metadata_line, objects_to_csv_with_headers, strip_metadata};
use crate::storage::{csv_key, rows_key, AttemptGuard, KeyValueStore};
use crate::validation::validate_rows;

/// Default number of write attempts per file
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Backoff unit between write attempts
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Pause between two file creations
const DEFAULT_CREATION_PAUSE_MS: u64 = 1000;

// =============================================================================
// Options & status
// =============================================================================

/// Engine settings.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Namespace of local storage keys
    pub app_prefix: String,
    /// File-id prefix that marks a local-only configuration
    pub local_marker: String,
    /// Write attempts per file (at least one is always made)
    pub retry_attempts: u32,
    /// Backoff unit; attempt `n` waits `n × retry_delay` before the next one
    pub retry_delay: Duration,
    /// Wait between consecutive file creations
    pub creation_pause: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            app_prefix: "intranet".to_string(),
            local_marker: "local_".to_string(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            creation_pause: Duration::from_millis(DEFAULT_CREATION_PAUSE_MS),
        }
    }
}

impl SyncOptions {
    pub fn with_app_prefix(mut self, prefix: &str) -> Self {
        self.app_prefix = prefix.to_string();
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_creation_pause(mut self, pause: Duration) -> Self {
        self.creation_pause = pause;
        self
    }
}

/// What the engine is doing, or how its last operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Initializing,
    Initialized,
    Loading,
    Loaded,
    Saving,
    Saved { succeeded: usize, failed: usize },
    Failed(String),
}

// =============================================================================
// Save report
// =============================================================================

/// Destination of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    Remote,
    Local,
}

/// One entity type that could not be written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub entity: String,
    pub reason: String,
}

/// Overall result of a save batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Complete,
    Partial,
    Failed,
}

/// Per-file results of a save.
#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub mode: SaveMode,
    pub succeeded: Vec<String>,
    pub failed: Vec<FileFailure>,
    /// Config changes made along the way (files created during recovery).
    #[serde(skip)]
    pub patch: Option<ConfigPatch>,
}

impl SaveReport {
    fn new(mode: SaveMode) -> Self {
        Self {
            mode,
            succeeded: Vec::new(),
            failed: Vec::new(),
            patch: None,
        }
    }

    fn fail(&mut self, entity: &str, reason: impl Into<String>) {
        self.failed.push(FileFailure {
            entity: entity.to_string(),
            reason: reason.into(),
        });
    }

    pub fn outcome(&self) -> SaveOutcome {
        match (self.succeeded.is_empty(), self.failed.is_empty()) {
            (_, true) => SaveOutcome::Complete,
            (true, false) => SaveOutcome::Failed,
            (false, false) => SaveOutcome::Partial,
        }
    }
}

/// Clears an in-flight flag when dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// CSV content of a saved file: metadata comment, header line, rows.
fn file_content(table: &Table, timestamp: &str) -> String {
    format!(
        "{}\n{}",
        metadata_line(timestamp),
        objects_to_csv_with_headers(&table.rows, &table.headers)
    )
}

// =============================================================================
// Engine
// =============================================================================

/// Orchestrates initialization, load and save of per-entity CSV files.
pub struct SyncEngine {
    gateway: Arc<dyn FileGateway>,
    store: Arc<dyn KeyValueStore>,
    guard: Arc<dyn AttemptGuard>,
    options: SyncOptions,
    logs: LogBroadcaster,
    status: Mutex<SyncStatus>,
    /// Folders initialized by this engine instance
    initialized: Mutex<HashSet<String>>,
    initializing: AtomicBool,
    saving: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        gateway: Arc<dyn FileGateway>,
        store: Arc<dyn KeyValueStore>,
        guard: Arc<dyn AttemptGuard>,
    ) -> Self {
        Self {
            gateway,
            store,
            guard,
            options: SyncOptions::default(),
            logs: LOG_BROADCASTER.clone(),
            status: Mutex::new(SyncStatus::Idle),
            initialized: Mutex::new(HashSet::new()),
            initializing: AtomicBool::new(false),
            saving: AtomicBool::new(false),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_logs(mut self, logs: LogBroadcaster) -> Self {
        self.logs = logs;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn status(&self) -> SyncStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    fn already_initialized(&self, folder_id: &str) -> bool {
        let seen = self.initialized.lock().unwrap_or_else(|e| e.into_inner());
        seen.contains(folder_id) || self.guard.has_attempted(folder_id)
    }

    fn mark_initialized(&self, folder_id: &str) {
        self.guard.mark_attempted(folder_id);
        self.initialized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(folder_id.to_string());
    }

    // -------------------------------------------------------------------------
    // Initialize
    // -------------------------------------------------------------------------

    /// Create the CSV files of a configuration that has none yet.
    ///
    /// Returns `Ok(None)` without touching the gateway when there is no
    /// folder, when file ids are already resolved, or when this folder was
    /// already initialized (this session or a concurrent call).
    pub async fn initialize(&self, config: &SyncConfig) -> SyncResult<Option<ConfigPatch>> {
        let folder_id = config.folder_id.trim();
        if folder_id.is_empty() || !config.file_ids.is_empty() {
            return Ok(None);
        }
        if self.already_initialized(folder_id) {
            self.logs.info(format!("CSV files for folder {} already initialized", folder_id));
            return Ok(None);
        }
        let Some(_in_flight) = InFlight::acquire(&self.initializing) else {
            return Ok(None);
        };

        self.set_status(SyncStatus::Initializing);

        let synthesized = config.file_names.is_empty();
        let file_names: BTreeMap<String, String> = if synthesized {
            EntityType::DEFAULT_SYNCED
                .iter()
                .map(|e| (e.as_str().to_string(), e.default_file_name().to_string()))
                .collect()
        } else {
            config.file_names.clone()
        };

        self.logs.info(format!("📁 Creating {} CSV files...", file_names.len()));

        let mut file_ids = BTreeMap::new();
        let mut new_tables = BTreeMap::new();
        let mut failed = 0;

        for (i, (entity, name)) in file_names.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.options.creation_pause).await;
            }

            let headers = match config.table(entity) {
                Some(table) if !table.headers.is_empty() => table.headers.clone(),
                existing => {
                    let mut table = existing.cloned().unwrap_or_default();
                    table.headers = default_headers_for(entity);
                    let headers = table.headers.clone();
                    new_tables.insert(entity.clone(), table);
                    headers
                }
            };

            let content = objects_to_csv_with_headers(&[], &headers);
            match self.gateway.create_file(name, &content, folder_id).await {
                Ok(file) => {
                    self.logs.log(LogEntry::success(format!("{} → {}", name, file.id)).with_indent(1));
                    file_ids.insert(entity.clone(), file.id);
                }
                Err(e) => {
                    failed += 1;
                    self.logs.log(LogEntry::error(format!("{}: {}", name, e)).with_indent(1));
                }
            }
        }

        if file_ids.is_empty() {
            let err = SyncError::InitializationFailed {
                attempted: file_names.len(),
                failed,
            };
            self.logs.error(err.to_string());
            self.set_status(SyncStatus::Failed(err.to_string()));
            return Err(err);
        }

        self.mark_initialized(folder_id);
        if failed > 0 {
            self.logs.warning(format!(
                "Created {} of {} CSV files",
                file_ids.len(),
                file_names.len()
            ));
        } else {
            self.logs.success(format!("Created {} CSV files", file_ids.len()));
        }
        self.set_status(SyncStatus::Initialized);

        let mut patches = vec![ConfigPatch::FileIds(file_ids)];
        if synthesized {
            patches.push(ConfigPatch::FileNames(file_names));
        }
        if !new_tables.is_empty() {
            patches.push(ConfigPatch::Data(new_tables));
        }
        Ok(Some(ConfigPatch::Batch(patches)))
    }

    // -------------------------------------------------------------------------
    // Load
    // -------------------------------------------------------------------------

    /// Read every linked file into a table.
    ///
    /// All tables come back in one [`ConfigPatch::Data`]. A file that cannot
    /// be read is logged and left out; only a batch where every read failed
    /// is an error.
    pub async fn load(&self, config: &SyncConfig) -> SyncResult<Option<ConfigPatch>> {
        if config.file_ids.is_empty() {
            return Ok(None);
        }
        if config.is_local(&self.options.local_marker) {
            return self.load_local(config);
        }

        self.set_status(SyncStatus::Loading);
        self.logs.info(format!("📖 Loading {} CSV files...", config.file_ids.len()));

        let mut tables = BTreeMap::new();
        let mut failed = 0;

        for (entity, file_id) in &config.file_ids {
            if file_id.trim().is_empty() {
                failed += 1;
                self.logs.log(LogEntry::warning(format!("{}: no file id", entity)).with_indent(1));
                continue;
            }

            match self.gateway.read_file(file_id).await {
                Ok(content) => {
                    let table = self.table_from_content(entity, &content, config);
                    self.logs.log(
                        LogEntry::success(format!("{}: {} rows", entity, table.rows.len())).with_indent(1),
                    );
                    tables.insert(entity.clone(), table);
                }
                Err(e) => {
                    failed += 1;
                    self.logs.log(LogEntry::error(format!("{}: {}", entity, e)).with_indent(1));
                }
            }
        }

        if tables.is_empty() {
            let err = SyncError::LoadFailed { failed };
            self.logs.error(err.to_string());
            self.set_status(SyncStatus::Failed(err.to_string()));
            return Err(err);
        }

        if failed > 0 {
            self.logs.warning(format!("Loaded {} tables, {} files failed", tables.len(), failed));
        }
        self.set_status(SyncStatus::Loaded);
        Ok(Some(ConfigPatch::Data(tables)))
    }

    /// Parse one file. Empty files keep the configured headers.
    fn table_from_content(&self, entity: &str, content: &str, config: &SyncConfig) -> Table {
        let body = strip_metadata(content);
        if body.trim().is_empty() {
            let headers = config
                .table(entity)
                .map(|t| t.headers.clone())
                .unwrap_or_default();
            return Table::new(headers);
        }

        let table = csv_to_table(body, true);
        if let Ok(entity_type) = entity.parse::<EntityType>() {
            if let Err(issues) = validate_rows(entity_type, &table.rows) {
                self.logs.log(
                    LogEntry::warning(format!(
                        "{}: {} rows failed validation (first at row {})",
                        entity,
                        issues.len(),
                        issues[0].row
                    ))
                    .with_indent(2),
                );
            }
        }
        table
    }

    /// Rebuild tables from the key-value store.
    ///
    /// Prefers the JSON row copy and falls back to the CSV text.
    pub fn load_local(&self, config: &SyncConfig) -> SyncResult<Option<ConfigPatch>> {
        let prefix = &self.options.app_prefix;
        let entities: HashSet<&String> = config
            .file_ids
            .keys()
            .chain(config.file_names.keys())
            .chain(config.data.keys())
            .collect();

        let mut tables = BTreeMap::new();
        for entity in entities {
            let configured = config
                .table(entity)
                .map(|t| t.headers.clone())
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| default_headers_for(entity));

            if let Some(json) = self.store.get(&rows_key(prefix, entity))? {
                match serde_json::from_str::<Vec<Row>>(&json) {
                    Ok(rows) => {
                        let headers = match (configured.is_empty(), rows.first()) {
                            (true, Some(first)) => first.keys().cloned().collect(),
                            _ => configured,
                        };
                        tables.insert(entity.clone(), Table { headers, rows });
                        continue;
                    }
                    Err(e) => self.logs.warning(format!("{}: unreadable local rows: {}", entity, e)),
                }
            }

            if let Some(csv) = self.store.get(&csv_key(prefix, entity))? {
                tables.insert(entity.clone(), csv_to_table(strip_metadata(&csv), true));
            }
        }

        if tables.is_empty() {
            return Ok(None);
        }
        self.set_status(SyncStatus::Loaded);
        Ok(Some(ConfigPatch::Data(tables)))
    }

    // -------------------------------------------------------------------------
    // Save
    // -------------------------------------------------------------------------

    /// Write every table to its file.
    ///
    /// Local-marked configurations are saved to the key-value store instead.
    /// A configuration without file ids is initialized first; the resulting
    /// patch is returned in [`SaveReport::patch`].
    pub async fn save(&self, config: &SyncConfig) -> SyncResult<SaveReport> {
        let Some(_in_flight) = InFlight::acquire(&self.saving) else {
            return Err(SyncError::SaveInProgress);
        };

        if config.is_local(&self.options.local_marker) {
            return self.save_local(config);
        }
        if config.folder_id.trim().is_empty() {
            return Err(ConfigError::MissingFolderId.into());
        }

        let mut working = Cow::Borrowed(config);
        let mut recovered = None;
        if config.file_ids.is_empty() {
            self.logs.warning("No CSV files linked yet, initializing...");
            match self.initialize(config).await? {
                Some(patch) => {
                    working = Cow::Owned(config.clone().apply(patch.clone()));
                    recovered = Some(patch);
                }
                None => return Err(ConfigError::MissingFileIds.into()),
            }
        }

        self.set_status(SyncStatus::Saving);
        self.logs.info(format!("💾 Saving {} CSV files...", working.file_ids.len()));

        let timestamp = now_iso();
        let mut report = SaveReport::new(SaveMode::Remote);

        for (entity, file_id) in &working.file_ids {
            if file_id.trim().is_empty() || file_id.starts_with(&self.options.local_marker) {
                report.fail(entity, "no remote file id");
                continue;
            }
            let table = match working.table(entity) {
                Some(table) if !table.headers.is_empty() => table,
                _ => {
                    report.fail(entity, "no headers to write");
                    continue;
                }
            };

            let content = file_content(table, &timestamp);
            match self.write_with_retry(entity, file_id, &content).await {
                Ok(()) => report.succeeded.push(entity.clone()),
                Err(reason) => report.fail(entity, reason),
            }
        }

        report.patch = recovered;
        self.finish_save(report)
    }

    /// Write one file, retrying with linear backoff.
    async fn write_with_retry(&self, entity: &str, file_id: &str, content: &str) -> Result<(), String> {
        let attempts = self.options.retry_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.gateway.update_file(file_id, content).await {
                Ok(true) => {
                    self.logs.log(LogEntry::success(entity.to_string()).with_indent(1));
                    return Ok(());
                }
                Ok(false) => last_error = "update rejected".to_string(),
                Err(e) => last_error = e.to_string(),
            }

            self.logs.log(
                LogEntry::warning(format!(
                    "{}: attempt {}/{} failed: {}",
                    entity, attempt, attempts, last_error
                ))
                .with_indent(1),
            );
            if attempt < attempts {
                tokio::time::sleep(self.options.retry_delay * attempt).await;
            }
        }

        Err(last_error)
    }

    /// Write every table to the key-value store.
    ///
    /// The CSV text is the primary copy; the JSON row copy is best effort.
    pub fn save_local(&self, config: &SyncConfig) -> SyncResult<SaveReport> {
        let prefix = &self.options.app_prefix;
        let timestamp = now_iso();
        let mut report = SaveReport::new(SaveMode::Local);

        for (entity, table) in &config.data {
            let content = file_content(table, &timestamp);
            if let Err(e) = self.store.set(&csv_key(prefix, entity), &content) {
                report.fail(entity, e.to_string());
                continue;
            }

            let rows_saved = serde_json::to_string(&table.rows)
                .map_err(|e| e.to_string())
                .and_then(|json| {
                    self.store
                        .set(&rows_key(prefix, entity), &json)
                        .map_err(|e| e.to_string())
                });
            if let Err(e) = rows_saved {
                self.logs.warning(format!("{}: rows not cached locally: {}", entity, e));
            }

            report.succeeded.push(entity.clone());
        }

        self.finish_save(report)
    }

    fn finish_save(&self, report: SaveReport) -> SyncResult<SaveReport> {
        let (succeeded, failed) = (report.succeeded.len(), report.failed.len());
        let target = match report.mode {
            SaveMode::Remote => "CSV files",
            SaveMode::Local => "tables to local storage",
        };

        match report.outcome() {
            SaveOutcome::Complete => {
                self.logs.success(format!("Saved {} {}", succeeded, target));
            }
            SaveOutcome::Partial => {
                self.logs.warning(format!(
                    "Saved {} of {} {}, {} failed",
                    succeeded,
                    succeeded + failed,
                    target,
                    failed
                ));
                for failure in &report.failed {
                    self.logs.log(
                        LogEntry::error(format!("{}: {}", failure.entity, failure.reason)).with_indent(1),
                    );
                }
            }
            SaveOutcome::Failed => {
                let err = SyncError::AllFilesFailed { report: Box::new(report) };
                self.logs.error(err.to_string());
                self.set_status(SyncStatus::Failed(err.to_string()));
                return Err(err);
            }
        }

        self.set_status(SyncStatus::Saved { succeeded, failed });
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Rows
    // -------------------------------------------------------------------------

    /// Stamp rows and build the patch replacing `entity`'s rows.
    ///
    /// Every row gets a fresh `updatedAt`; `createdAt` is only filled in when
    /// missing or blank.
    pub fn update_entity_data(&self, entity: &str, rows: Vec<Row>) -> ConfigPatch {
        let now = now_iso();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                let has_created = row
                    .get("createdAt")
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| !s.is_empty());
                if !has_created {
                    row.insert("createdAt".into(), now.clone().into());
                }
                row.insert("updatedAt".into(), now.clone().into());
                row
            })
            .collect();

        ConfigPatch::Rows {
            entity: entity.to_string(),
            rows,
        }
    }
}
