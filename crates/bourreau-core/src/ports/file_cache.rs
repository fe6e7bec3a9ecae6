//! FileCache port - userfile のステージング
//!
//! 具体的な task kind の stage hook だけが使います。engine 自身は使いません。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Reference to a file known to the portal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FileCacheError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file cache io: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait FileCache: Send + Sync {
    /// Make sure the cached copy is up to date.
    async fn sync_to_cache(&self, file: &FileRef) -> Result<(), FileCacheError>;

    fn cache_full_path(&self, file: &FileRef) -> PathBuf;

    /// Register a locally produced file and return its reference.
    async fn cache_copy_from_local_file(&self, path: &Path, name: &str) -> Result<FileRef, FileCacheError>;
}
