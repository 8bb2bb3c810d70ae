//! Fragment cache

use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{trace, warn};

use crate::storage::{Blob, BlobStorage, Fetched, StorageError, StorageResult};

#[derive(Clone)]
struct Entry {
    tag: String,
    data: Arc<Vec<u8>>,
}

/// An LRU cache in front of another backend
///
/// Every hit is revalidated with a conditional fetch carrying the caller's
/// credentials, so the backend still decides who may read a fragment and
/// the cache only saves the transfer. Only fragments the backend tagged
/// with a version are kept. Failed fetches are not cached.
pub struct CachedStorage {
    inner: Arc<dyn BlobStorage>,
    cache: Mutex<LruCache<String, Entry>>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn BlobStorage>, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobStorage for CachedStorage {
    async fn get(&self, credentials: &str, id: &str) -> StorageResult<Vec<u8>> {
        let cached = self.cache.lock().await.get(id).cloned();
        let tag = cached.as_ref().map(|entry| entry.tag.as_str());

        match self.inner.get_if_none_match(credentials, id, tag).await? {
            Fetched::NotModified => match cached {
                Some(entry) => {
                    trace!("Cache hit {}", id);
                    Ok(entry.data.as_ref().clone())
                }
                None => Err(StorageError::unavailable(format!(
                    "{}: not modified without a cached copy",
                    id
                ))),
            },
            Fetched::Modified(Blob { data, tag }) => {
                if let Some(entry) = &cached {
                    // Fragments are immutable, a new version means storage was rewritten
                    warn!("Version tag {} of {} no longer matches", entry.tag, id);
                }
                let mut cache = self.cache.lock().await;
                match tag {
                    Some(tag) => {
                        let data = Arc::new(data);
                        cache.put(id.to_string(), Entry { tag, data: data.clone() });
                        Ok(data.as_ref().clone())
                    }
                    None => {
                        cache.pop(id);
                        Ok(data)
                    }
                }
            }
        }
    }

    async fn get_if_none_match(
        &self,
        credentials: &str,
        id: &str,
        tag: Option<&str>,
    ) -> StorageResult<Fetched> {
        self.inner.get_if_none_match(credentials, id, tag).await
    }
}
