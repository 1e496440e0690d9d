//! Remote file gateway.
//!
//! The sync engine only needs three operations from the remote file store:
//! create a file in a folder, read a file by id, and overwrite a file by id.
//! [`FileGateway`] captures exactly that; adapters live in submodules:
//!
//! - [`directory`] - a folder tree on local disk (shared drives, tests, CLI)
//! - [`graph`] - a Microsoft-Graph-style drive API over HTTP
//!
//! Methods return boxed futures so the engine can hold an
//! `Arc<dyn FileGateway>`.

pub mod directory;
pub mod graph;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;

pub use directory::DirectoryGateway;
pub use graph::GraphGateway;

/// A file created by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Create/read/update capability set of a remote folder-backed file store.
pub trait FileGateway: Send + Sync {
    /// Create `name` in `folder_id` with initial text content.
    fn create_file<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
        folder_id: &'a str,
    ) -> BoxFuture<'a, GatewayResult<RemoteFile>>;

    /// Read the full text content of a file.
    fn read_file<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, GatewayResult<String>>;

    /// Overwrite a file's content. `Ok(false)` means the store refused the write.
    fn update_file<'a>(
        &'a self,
        file_id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, GatewayResult<bool>>;
}
