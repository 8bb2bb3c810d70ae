//! Registry of storage clients keyed by backend kind and endpoint

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::backends::{CachedStorage, FileStorage, HttpStorage};
use super::{BlobStorage, StorageError, StorageResult};

/// Storage backend kinds a task can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    File,
    Http,
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "http" | "https" | "azure" => Ok(Self::Http),
            other => Err(StorageError::configuration(format!(
                "unknown storage kind {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Http => write!(f, "http"),
        }
    }
}

type ClientKey = (StorageKind, String);

/// Storage clients shared by every part a worker runs
///
/// Clients are created on first use and reused afterwards. When the cache
/// is enabled every client is wrapped in its own [`CachedStorage`].
pub struct StorageRegistry {
    clients: Mutex<HashMap<ClientKey, Arc<dyn BlobStorage>>>,
    cache_entries: Option<NonZeroUsize>,
    timeout: Duration,
}

impl StorageRegistry {
    pub fn new(cache_entries: usize, timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            cache_entries: NonZeroUsize::new(cache_entries),
            timeout,
        }
    }

    /// Install a client for a kind and endpoint, replacing any existing one
    pub async fn insert(&self, kind: StorageKind, endpoint: &str, client: Arc<dyn BlobStorage>) {
        self.clients
            .lock()
            .await
            .insert((kind, endpoint.to_string()), client);
    }

    /// The client for a kind and endpoint, created if needed
    pub async fn client(&self, kind: &str, endpoint: &str) -> StorageResult<Arc<dyn BlobStorage>> {
        let kind: StorageKind = kind.parse()?;
        let key = (kind, endpoint.to_string());

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        debug!("Creating {} storage client for {}", kind, endpoint);
        let backend: Arc<dyn BlobStorage> = match kind {
            StorageKind::File => Arc::new(FileStorage::new(endpoint)),
            StorageKind::Http => Arc::new(HttpStorage::new(endpoint, self.timeout)?),
        };
        let client: Arc<dyn BlobStorage> = match self.cache_entries {
            Some(capacity) => Arc::new(CachedStorage::new(backend, capacity)),
            None => backend,
        };
        clients.insert(key, client.clone());
        Ok(client)
    }
}
