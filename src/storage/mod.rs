//! Blob storage abstraction
//!
//! Fragments are immutable blobs addressed by `<guid>/<fragment>`. A
//! [`BlobStorage`] fetches one fragment with caller-supplied credentials;
//! the fetch workers never know which backend serves them. Clients are
//! built once per worker by a [`StorageRegistry`] and shared by every part.

pub mod backends;
pub mod error;
pub mod registry;


pub use backends::{CachedStorage, FileStorage, HttpStorage};
pub use error::{StorageError, StorageResult};
pub use registry::{StorageKind, StorageRegistry};

use async_trait::async_trait;

/// A fragment body and the version tag the backend reported for it
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub tag: Option<String>,
}

/// Outcome of a conditional fetch
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// The fragment still has the version tag the caller holds
    NotModified,
    Modified(Blob),
}

/// Fetch fragments by id
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Get the bytes of one fragment
    async fn get(&self, credentials: &str, id: &str) -> StorageResult<Vec<u8>>;

    /// Get a fragment unless its version tag matches `tag`
    ///
    /// The credentials are checked on every call, a match only saves the
    /// transfer. Backends without version tags always send the body.
    async fn get_if_none_match(
        &self,
        credentials: &str,
        id: &str,
        _tag: Option<&str>,
    ) -> StorageResult<Fetched> {
        let data = self.get(credentials, id).await?;
        Ok(Fetched::Modified(Blob { data, tag: None }))
    }
}
