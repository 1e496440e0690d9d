//! Local persistence: a string key-value store and the initialization guard.
//!
//! - [`KeyValueStore`] - get/set/remove of UTF-8 text (browser-storage analog)
//! - [`MemoryStore`] - in-process store with an optional byte quota
//! - [`FileStore`] - one file per key under a directory
//! - [`AttemptGuard`] - remembers folders whose files were already created
//!
//! Keys are namespaced by an application prefix, see [`csv_key`],
//! [`rows_key`] and [`mode_key`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{StorageError, StorageResult};
use crate::notify::log_warning;

/// Directory used by [`FileStore::new`] (relative to current dir)
const DEFAULT_STORE_DIR: &str = ".csvsync/store";

/// Key holding an entity's CSV text: `<prefix>_csv_<entity>`.
pub fn csv_key(prefix: &str, entity: &str) -> String {
    format!("{}_csv_{}", prefix, entity)
}

/// Key holding an entity's rows as a JSON array: `<prefix>_<entity>`.
pub fn rows_key(prefix: &str, entity: &str) -> String {
    format!("{}_{}", prefix, entity)
}

/// Key of the global storage-mode flag: `<prefix>_storage_type`.
pub fn mode_key(prefix: &str) -> String {
    format!("{}_storage_type", prefix)
}

/// Key of the initialization marker for a folder.
pub fn init_attempt_key(folder_id: &str) -> String {
    format!("csv_init_attempt_{}", folder_id)
}

// =============================================================================
// Key-value store
// =============================================================================

/// String-keyed text storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// In-memory store.
///
/// With a quota, a write that would push the total size of stored values
/// past it is rejected, the way browser storage throws when full.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(quota) = self.quota {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if used + value.len() > quota {
                return Err(StorageError::Rejected {
                    key: key.to_string(),
                    message: format!("quota of {} bytes exceeded", quota),
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Directory-backed store, one file per key.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store under the default directory
    pub fn new() -> StorageResult<Self> {
        Self::with_dir(DEFAULT_STORE_DIR)
    }

    /// Store under a custom directory, created if missing
    pub fn with_dir(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = PathBuf::from(dir.as_ref());
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// File path for a key: percent-encoded, with `.` escaped too so no key
    /// maps to `.`, `..` or a hidden file. Distinct keys get distinct files.
    fn path_for(&self, key: &str) -> PathBuf {
        let name = urlencoding::encode(key).replace('.', "%2E");
        self.dir.join(name)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Initialization guard
// =============================================================================

/// Idempotency guard for file creation, keyed by folder id.
pub trait AttemptGuard: Send + Sync {
    fn has_attempted(&self, folder_id: &str) -> bool;
    fn mark_attempted(&self, folder_id: &str);
}

/// Guard that lives as long as the process (one "session").
#[derive(Default)]
pub struct SessionGuard {
    folders: Mutex<HashSet<String>>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptGuard for SessionGuard {
    fn has_attempted(&self, folder_id: &str) -> bool {
        let folders = self.folders.lock().unwrap_or_else(|e| e.into_inner());
        folders.contains(folder_id)
    }

    fn mark_attempted(&self, folder_id: &str) {
        let mut folders = self.folders.lock().unwrap_or_else(|e| e.into_inner());
        folders.insert(folder_id.to_string());
    }
}

/// Guard persisted in a key-value store under `csv_init_attempt_<folderId>`.
pub struct StoreGuard {
    store: Arc<dyn KeyValueStore>,
}

impl StoreGuard {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl AttemptGuard for StoreGuard {
    fn has_attempted(&self, folder_id: &str) -> bool {
        matches!(self.store.get(&init_attempt_key(folder_id)), Ok(Some(v)) if v == "true")
    }

    fn mark_attempted(&self, folder_id: &str) {
        if let Err(e) = self.store.set(&init_attempt_key(folder_id), "true") {
            log_warning(format!("Could not record initialization of {}: {}", folder_id, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_layout() {
        assert_eq!(csv_key("intranet", "kpis"), "intranet_csv_kpis");
        assert_eq!(rows_key("intranet", "kpis"), "intranet_kpis");
        assert_eq!(mode_key("intranet"), "intranet_storage_type");
        assert_eq!(init_attempt_key("F1"), "csv_init_attempt_F1");
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_memory_store_quota() {
        let store = MemoryStore::with_quota(10);
        store.set("a", "12345").unwrap();
        // Overwriting does not count the old value
        store.set("a", "1234567890").unwrap();

        let err = store.set("b", "x").unwrap_err();
        assert!(matches!(err, StorageError::Rejected { .. }));
        assert_eq!(store.keys(), vec!["a"]);
    }

    #[test]
    fn test_file_store() {
        let dir = tempdir().unwrap();
        let store = FileStore::with_dir(dir.path()).unwrap();

        store.set("intranet_csv_kpis", "id\n1").unwrap();
        assert_eq!(store.get("intranet_csv_kpis").unwrap().as_deref(), Some("id\n1"));
        assert_eq!(store.get("missing").unwrap(), None);

        store.remove("intranet_csv_kpis").unwrap();
        store.remove("intranet_csv_kpis").unwrap();
        assert_eq!(store.get("intranet_csv_kpis").unwrap(), None);
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let dir = tempdir().unwrap();
        let store = FileStore::with_dir(dir.path()).unwrap();

        store.set(&init_attempt_key("../etc/F 1"), "true").unwrap();
        assert!(dir
            .path()
            .join("csv_init_attempt_%2E%2E%2Fetc%2FF%201")
            .exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_file_store_keys_do_not_collide() {
        let dir = tempdir().unwrap();
        let store = FileStore::with_dir(dir.path()).unwrap();

        store.set("a.b", "dot").unwrap();
        store.set("a-b", "dash").unwrap();
        store.set("a b", "space").unwrap();

        assert_eq!(store.get("a.b").unwrap().as_deref(), Some("dot"));
        assert_eq!(store.get("a-b").unwrap().as_deref(), Some("dash"));
        assert_eq!(store.get("a b").unwrap().as_deref(), Some("space"));
    }

    #[test]
    fn test_store_guard_over_file_store_is_per_folder() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::with_dir(dir.path()).unwrap());
        let guard = StoreGuard::new(store);

        guard.mark_attempted("team.a");
        assert!(guard.has_attempted("team.a"));
        assert!(!guard.has_attempted("team-a"));
        assert!(!guard.has_attempted("team_a"));
    }

    #[test]
    fn test_guards() {
        let session = SessionGuard::new();
        assert!(!session.has_attempted("F1"));
        session.mark_attempted("F1");
        assert!(session.has_attempted("F1"));
        assert!(!session.has_attempted("F2"));

        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let guard = StoreGuard::new(store.clone());
        guard.mark_attempted("F1");
        assert!(guard.has_attempted("F1"));
        assert_eq!(store.get("csv_init_attempt_F1").unwrap().as_deref(), Some("true"));
    }
}
