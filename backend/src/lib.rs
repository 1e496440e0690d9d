//! # csvsync - CSV sync layer for intranet entity data
//!
//! csvsync keeps the intranet's entity collections (tasks, projects, risks,
//! assets, objectives, KRAs, KPIs) in step with one CSV file per entity type
//! in a remote folder, falling back to a local key-value store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ EntityStore │────▶│ SyncEngine  │────▶│   Parser    │────▶│ FileGateway │
//! │   (CRUD)    │     │ (retry/pat) │     │ (CSV text)  │     │ (dir/graph) │
//! └──────┬──────┘     └──────┬──────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        └──────────┬────────┘
//!                   ▼
//!           ┌───────────────┐
//!           │ KeyValueStore │
//!           │ (local mode)  │
//!           └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use csvsync::{DirectoryGateway, EntityStore, EntityType, FileStore, SessionGuard, SyncConfig, SyncContext, SyncEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let kv = Arc::new(FileStore::new().unwrap());
//!     let engine = SyncEngine::new(
//!         Arc::new(DirectoryGateway::new("shared")),
//!         kv.clone(),
//!         Arc::new(SessionGuard::new()),
//!     );
//!     let sync = SyncContext::new(Arc::new(engine), SyncConfig::new("team"));
//!
//!     let mut kpis = EntityStore::new(EntityType::Kpis, kv).with_sync(sync);
//!     kpis.open().await.unwrap();
//!     println!("{} KPIs", kpis.items().len());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`models`] - Entity registry, tables, sync configuration and patches
//! - [`parser`] - CSV writing, reading and structural validation
//! - [`validation`] - JSON-Schema checks of entity rows
//! - [`notify`] - Log broadcast channel
//! - [`storage`] - Local key-value store and initialization guard
//! - [`gateway`] - Remote file gateway and its adapters
//! - [`sync`] - Sync engine
//! - [`store`] - Entity store

// Core modules
pub mod error;
pub mod models;

// CSV
pub mod parser;
pub mod validation;

// Infrastructure
pub mod gateway;
pub mod notify;
pub mod storage;

// Sync
pub mod store;
pub mod sync;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, CsvError, GatewayError, StorageError, StoreError, SyncError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{ConfigPatch, EntityType, Row, StorageMode, SyncConfig, Table};

// =============================================================================
// Re-exports - CSV
// =============================================================================

pub use parser::{
    csv_to_objects,
    csv_to_table,
    decode_content,
    detect_encoding,
    objects_to_csv,
    objects_to_csv_with_headers,
    parse_bytes,
    parse_line,
    validate_csv,
    ParseResult,
};

pub use validation::{entity_schema, is_valid, validate, validate_rows, RowIssue};

// =============================================================================
// Re-exports - Infrastructure
// =============================================================================

pub use gateway::{DirectoryGateway, FileGateway, GraphGateway, RemoteFile};
pub use notify::{LogBroadcaster, LogEntry, LogLevel, LOG_BROADCASTER};
pub use storage::{
    AttemptGuard, FileStore, KeyValueStore, MemoryStore, SessionGuard, StoreGuard,
};

// =============================================================================
// Re-exports - Sync
// =============================================================================

pub use store::{EntityStore, SyncContext};
pub use sync::{SaveMode, SaveOutcome, SaveReport, SyncEngine, SyncOptions, SyncStatus};
