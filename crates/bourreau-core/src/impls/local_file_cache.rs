//! LocalFileCache: a directory standing in for the portal's data providers.
//!
//! Files live at `<root>/<id>/<name>`. There is no remote side, so syncing
//! only checks that the cached copy exists.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ulid::Ulid;

use crate::ports::{FileCache, FileCacheError, FileRef};

pub struct LocalFileCache {
    root: PathBuf,
}

impl LocalFileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileCache for LocalFileCache {
    async fn sync_to_cache(&self, file: &FileRef) -> Result<(), FileCacheError> {
        let path = self.cache_full_path(file);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(FileCacheError::NotFound(path.display().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileCacheError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn cache_full_path(&self, file: &FileRef) -> PathBuf {
        self.root.join(&file.id).join(&file.name)
    }

    async fn cache_copy_from_local_file(&self, path: &Path, name: &str) -> Result<FileRef, FileCacheError> {
        let file = FileRef {
            id: Ulid::new().to_string(),
            name: name.to_string(),
        };
        let dest = self.cache_full_path(&file);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &dest).await?;
        tracing::debug!(file_id = %file.id, name, "file copied into cache");
        Ok(file)
    }
}
