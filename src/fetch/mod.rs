//! Concurrent fragment fetching
//!
//! A [`FetchPool`] is a fixed set of workers sharing one bounded task
//! channel. Each worker publishes downloaded fragments on the fragment
//! channel and its single failure on the error channel, then retires. The
//! pool knows nothing about parts; the gatherer decides when a part is done.

mod pool;
mod retry;

pub use pool::FetchPool;
pub use retry::RetryPolicy;

use std::sync::Arc;
use thiserror::Error;

use crate::storage::{BlobStorage, StorageError};

/// One fragment to download
#[derive(Clone)]
pub struct FetchTask {
    /// Position of the fragment in the part's enumeration
    pub index: usize,
    pub id: String,
    pub credentials: Arc<str>,
    pub storage: Arc<dyn BlobStorage>,
}

impl std::fmt::Debug for FetchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchTask")
            .field("index", &self.index)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A downloaded fragment
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub index: usize,
    pub chunk: Vec<u8>,
}

/// A worker's terminal failure
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fragment {index} ({id}): {source}")]
    Storage {
        index: usize,
        id: String,
        #[source]
        source: StorageError,
    },

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Storage {
                    source: StorageError::Cancelled,
                    ..
                }
        )
    }
}
