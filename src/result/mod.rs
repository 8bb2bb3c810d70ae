//! Process results: the per-pid log, client retrieval and the HTTP surface
//!
//! Gatherers write into a [`ResultStore`]; clients poll [`ResultApi::status`]
//! and read the assembled result with [`ResultApi::get`] or
//! [`ResultApi::stream`]. Reads never mutate the log, so repeated reads of a
//! finished process return identical bytes.

mod api;
pub mod server;
mod store;

pub use api::{collect, ProcessState, ResultApi, Status};
pub use store::{header_key, LogEntry, ResultStore, ERROR_FIELD};

use std::time::Duration;
use thiserror::Error;

use crate::broker::BrokerError;

/// Errors surfaced by result retrieval
#[derive(Debug, Error)]
pub enum ResultError {
    #[error("No process header for pid {0}")]
    NotFound(String),

    #[error("Malformed process header: {0}")]
    MalformedHeader(String),

    #[error("Process failed: {0}")]
    PartFailed(String),

    #[error("Timed out after {0:?} waiting for results")]
    Timeout(Duration),

    #[error("Result reader stopped before the process was complete")]
    Closed,

    #[error("Unable to encode result: {0}")]
    Encode(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[cfg(test)]
mod tests;
