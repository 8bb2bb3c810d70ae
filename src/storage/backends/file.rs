//! Local directory backend

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

use crate::storage::{BlobStorage, StorageError, StorageResult};

/// Serves fragments from `<root>/<guid>/<fragment>`
///
/// Credentials are ignored; access control is whatever the file system
/// enforces.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || id.is_empty() {
            return Err(StorageError::forbidden(id));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStorage for FileStorage {
    async fn get(&self, _credentials: &str, id: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(id)?;
        trace!("Reading fragment {}", path.display());
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::not_found(id),
            ErrorKind::PermissionDenied => StorageError::forbidden(id),
            _ => StorageError::Io(e),
        })
    }
}
