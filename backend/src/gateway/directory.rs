//! Gateway over a local directory tree.
//!
//! Layout: `<root>/<folder_id>/<name>` for file contents, and
//! `<root>/.index.json` mapping generated file ids (UUID v4) to their path.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{FileGateway, RemoteFile};
use crate::error::{GatewayError, GatewayResult};

const INDEX_FILE: &str = ".index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    folder: String,
    name: String,
}

type Index = BTreeMap<String, IndexEntry>;

/// Folder-backed gateway on local disk.
pub struct DirectoryGateway {
    root: PathBuf,
    /// Serializes index read-modify-write cycles
    index_lock: Mutex<()>,
}

/// Keep a path component inside its parent directory.
fn component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '-' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "-".to_string(),
        _ => cleaned,
    }
}

impl DirectoryGateway {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: PathBuf::from(root.as_ref()),
            index_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn load_index(&self) -> GatewayResult<Index> {
        match fs::read_to_string(self.root.join(INDEX_FILE)).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_index(&self, index: &Index) -> GatewayResult<()> {
        fs::create_dir_all(&self.root).await?;
        let content = serde_json::to_string_pretty(index)?;
        fs::write(self.root.join(INDEX_FILE), content).await?;
        Ok(())
    }

    async fn path_of(&self, file_id: &str) -> GatewayResult<PathBuf> {
        let index = self.load_index().await?;
        let entry = index
            .get(file_id)
            .ok_or_else(|| GatewayError::NotFound(file_id.to_string()))?;
        Ok(self.root.join(&entry.folder).join(&entry.name))
    }
}

impl FileGateway for DirectoryGateway {
    fn create_file<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
        folder_id: &'a str,
    ) -> BoxFuture<'a, GatewayResult<RemoteFile>> {
        Box::pin(async move {
            let _guard = self.index_lock.lock().await;

            let folder = component(folder_id);
            let file_name = component(name);
            let dir = self.root.join(&folder);
            let path = dir.join(&file_name);

            if fs::try_exists(&path).await? {
                return Err(GatewayError::AlreadyExists(format!("{}/{}", folder, file_name)));
            }

            fs::create_dir_all(&dir).await?;
            fs::write(&path, content).await?;

            let id = Uuid::new_v4().to_string();
            let mut index = self.load_index().await?;
            index.insert(
                id.clone(),
                IndexEntry { folder, name: file_name.clone() },
            );
            self.save_index(&index).await?;

            Ok(RemoteFile { id, name: file_name })
        })
    }

    fn read_file<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, GatewayResult<String>> {
        Box::pin(async move {
            let path = self.path_of(file_id).await?;
            match fs::read_to_string(&path).await {
                Ok(content) => Ok(content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(GatewayError::NotFound(file_id.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn update_file<'a>(
        &'a self,
        file_id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, GatewayResult<bool>> {
        Box::pin(async move {
            let path = self.path_of(file_id).await?;
            fs::write(&path, content).await?;
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_read_update() {
        let dir = tempdir().unwrap();
        let gateway = DirectoryGateway::new(dir.path());

        let file = gateway.create_file("kpis.csv", "id,name\n", "F1").await.unwrap();
        assert_eq!(file.name, "kpis.csv");
        assert!(dir.path().join("F1").join("kpis.csv").exists());

        assert_eq!(gateway.read_file(&file.id).await.unwrap(), "id,name\n");

        assert!(gateway.update_file(&file.id, "id,name\n1,A").await.unwrap());
        assert_eq!(gateway.read_file(&file.id).await.unwrap(), "id,name\n1,A");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let dir = tempdir().unwrap();
        let gateway = DirectoryGateway::new(dir.path());

        gateway.create_file("kras.csv", "", "F1").await.unwrap();
        let err = gateway.create_file("kras.csv", "", "F1").await.unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists(_)));

        // Same name in another folder is fine
        assert!(gateway.create_file("kras.csv", "", "F2").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let dir = tempdir().unwrap();
        let gateway = DirectoryGateway::new(dir.path());

        assert!(matches!(
            gateway.read_file("nope").await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(gateway.update_file("nope", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_index_survives_new_instance() {
        let dir = tempdir().unwrap();
        let id = DirectoryGateway::new(dir.path())
            .create_file("tasks.csv", "id\n", "F1")
            .await
            .unwrap()
            .id;

        let reopened = DirectoryGateway::new(dir.path());
        assert_eq!(reopened.read_file(&id).await.unwrap(), "id\n");
    }

    #[test]
    fn test_component_sanitizing() {
        assert_eq!(component("../x"), "..-x");
        assert_eq!(component(".."), "-");
        assert_eq!(component("a/b\\c"), "a-b-c");
    }
}
