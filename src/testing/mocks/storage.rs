//! Mock blob storage

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::storage::{Blob, BlobStorage, Fetched, StorageError, StorageResult};

/// Failure a [`MockStorage`] returns for a configured id
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockFailure {
    NotFound,
    Forbidden,
    Unavailable,
}

impl MockFailure {
    fn to_error(self, id: &str) -> StorageError {
        match self {
            Self::NotFound => StorageError::not_found(id),
            Self::Forbidden => StorageError::forbidden(id),
            Self::Unavailable => StorageError::unavailable(id),
        }
    }
}

/// In-memory blob storage that counts its calls
///
/// Unknown ids are not found. Failures, a per-call delay, the accepted
/// credentials and a number of leading transient failures can be configured
/// with the builder methods. Conditional fetches tag every blob with a
/// version derived from its id.
#[derive(Debug, Default)]
pub struct MockStorage {
    blobs: HashMap<String, Vec<u8>>,
    failures: HashMap<String, MockFailure>,
    delay: Option<Duration>,
    credentials: Option<String>,
    tagged: bool,
    transient: AtomicUsize,
    calls: AtomicUsize,
    downloads: AtomicUsize,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(mut self, id: &str, bytes: &[u8]) -> Self {
        self.blobs.insert(id.to_string(), bytes.to_vec());
        self
    }

    pub fn with_blobs<I>(mut self, blobs: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        self.blobs.extend(blobs);
        self
    }

    pub fn with_failure(mut self, id: &str, failure: MockFailure) -> Self {
        self.failures.insert(id.to_string(), failure);
        self
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reject every call whose credentials differ from `credentials`
    pub fn with_credentials(mut self, credentials: &str) -> Self {
        self.credentials = Some(credentials.to_string());
        self
    }

    /// Answer conditional fetches with version tags
    pub fn tagged(mut self) -> Self {
        self.tagged = true;
        self
    }

    /// Fail the first `n` calls as unavailable, whatever the id
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `get` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls that returned a body
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn version(id: &str) -> String {
        format!("\"{}-v1\"", id)
    }

    async fn lookup(&self, credentials: &str, id: &str) -> StorageResult<&Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let transient = self
            .transient
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(StorageError::unavailable(format!("{} (transient)", id)));
        }
        if let Some(accepted) = &self.credentials {
            if accepted != credentials {
                return Err(StorageError::forbidden(id));
            }
        }
        if let Some(failure) = self.failures.get(id) {
            return Err(failure.to_error(id));
        }
        self.blobs.get(id).ok_or_else(|| StorageError::not_found(id))
    }
}

#[async_trait]
impl BlobStorage for MockStorage {
    async fn get(&self, credentials: &str, id: &str) -> StorageResult<Vec<u8>> {
        let data = self.lookup(credentials, id).await?.clone();
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(data)
    }

    async fn get_if_none_match(
        &self,
        credentials: &str,
        id: &str,
        tag: Option<&str>,
    ) -> StorageResult<Fetched> {
        let data = self.lookup(credentials, id).await?;
        if !self.tagged {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            return Ok(Fetched::Modified(Blob {
                data: data.clone(),
                tag: None,
            }));
        }
        let version = Self::version(id);
        if tag == Some(version.as_str()) {
            return Ok(Fetched::NotModified);
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(Fetched::Modified(Blob {
            data: data.clone(),
            tag: Some(version),
        }))
    }
}
