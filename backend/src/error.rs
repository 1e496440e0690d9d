//! Error types for the CSV sync layer.
//!
//! This module defines one error type per layer:
//!
//! - [`CsvError`] - CSV codec and structural validation errors
//! - [`ConfigError`] - Sync configuration errors (raised before any I/O)
//! - [`GatewayError`] - Remote file gateway errors
//! - [`StorageError`] - Local key-value store errors
//! - [`SyncError`] - Sync engine orchestration errors
//! - [`StoreError`] - Entity store errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors from the CSV codec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CsvError {
    /// Input text is empty.
    #[error("CSV content is empty")]
    Empty,

    /// Required headers are absent from the header row.
    #[error("Missing required headers: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),

    /// A data row does not have as many fields as the header row.
    #[error("Row {row} has {found} columns, expected {expected}")]
    ColumnCount {
        /// 1-indexed data row number (header excluded).
        row: usize,
        expected: usize,
        found: usize,
    },

    /// Bytes could not be decoded.
    #[error("Failed to decode content: {0}")]
    Encoding(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors in the sync configuration itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No folder configured for CSV sync")]
    MissingFolderId,

    #[error("No CSV files are linked to this configuration")]
    MissingFileIds,

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),
}

// =============================================================================
// Gateway Errors
// =============================================================================

/// Errors from a remote file gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// File id is unknown to the gateway.
    #[error("File not found: {0}")]
    NotFound(String),

    /// A file with this name already exists in the folder.
    #[error("File already exists: {0}")]
    AlreadyExists(String),

    /// Rate limited by the remote service.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Missing credentials for the remote service.
    #[error("Missing {0} environment variable")]
    MissingCredentials(&'static str),

    /// Unexpected response payload.
    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    /// Local filesystem error.
    #[error("Gateway IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Gateway JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors from a local key-value store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store refused the write (quota, read-only, ...).
    #[error("Storage write rejected for '{key}': {message}")]
    Rejected { key: String, message: String },

    /// IO error.
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Storage JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Sync Errors
// =============================================================================

/// Sync engine errors.
///
/// Per-file failures never show up here; they are reported in
/// [`crate::sync::SaveReport`]. These variants cover the cases where a whole
/// operation could not proceed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Gateway error.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Local storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Every file creation failed.
    #[error("Failed to create all {failed} of {attempted} CSV files")]
    InitializationFailed { attempted: usize, failed: usize },

    /// Every file read failed.
    #[error("Failed to read all {failed} CSV files")]
    LoadFailed { failed: usize },

    /// Every file write failed. The report still carries any config patch
    /// produced while recovering missing file ids.
    #[error("Failed to save all {} CSV files", .report.failed.len())]
    AllFilesFailed {
        report: Box<crate::sync::SaveReport>,
    },

    /// Another save is still running on this engine.
    #[error("A save is already in progress")]
    SaveInProgress,
}

// =============================================================================
// Store Errors
// =============================================================================

/// Entity store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Sync engine error.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Local storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON error while reading or writing local rows.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No item with this id.
    #[error("No item with id '{0}'")]
    NotFound(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for entity store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // CsvError -> SyncError -> StoreError
        let sync_err: SyncError = CsvError::Empty.into();
        assert!(sync_err.to_string().contains("empty"));

        let store_err: StoreError = sync_err.into();
        assert!(store_err.to_string().contains("empty"));

        let sync_err: SyncError = ConfigError::MissingFolderId.into();
        assert!(sync_err.to_string().contains("folder"));
    }

    #[test]
    fn test_column_count_format() {
        let err = CsvError::ColumnCount { row: 2, expected: 2, found: 1 };
        let msg = err.to_string();
        assert!(msg.contains("Row 2"));
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("1 columns"));
    }

    #[test]
    fn test_missing_headers_lists_all() {
        let err = CsvError::MissingHeaders(vec!["name".into(), "owner".into()]);
        assert_eq!(err.to_string(), "Missing required headers: name, owner");
    }
}
