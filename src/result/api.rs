//! Status polling and blocking retrieval of assembled results

use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::store::{LogEntry, ResultStore};
use super::ResultError;
use crate::message::ProcessHeader;

/// Longest single log read; the reader notices a departed client in between
const READ_BLOCK: Duration = Duration::from_secs(1);

/// Chunks buffered between the log reader and a streaming client
const STREAM_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// No header yet: scheduled but not started, or unknown
    Pending,
    Working,
    Finished,
}

/// Status document returned to polling clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    /// Where the client should look next
    pub location: String,
    pub status: ProcessState,
    /// `count/ntasks`, absent while pending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

impl Status {
    fn pending(pid: &str) -> Self {
        Self {
            location: format!("result/{}/status", pid),
            status: ProcessState::Pending,
            progress: None,
        }
    }

    fn progress(pid: &str, count: usize, ntasks: usize) -> Self {
        let progress = Some(format!("{}/{}", count, ntasks));
        if count >= ntasks {
            Self {
                location: format!("result/{}", pid),
                status: ProcessState::Finished,
                progress,
            }
        } else {
            Self {
                location: format!("result/{}/status", pid),
                status: ProcessState::Working,
                progress,
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == ProcessState::Finished
    }
}

/// Client-facing reads over a [`ResultStore`]
#[derive(Clone)]
pub struct ResultApi {
    store: ResultStore,
    timeout: Duration,
    block: Duration,
}

impl ResultApi {
    /// `timeout` bounds every wait for the next log entry
    pub fn new(store: ResultStore, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            block: READ_BLOCK,
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Progress of a process without blocking
    pub async fn status(&self, pid: &str) -> Result<Status, ResultError> {
        let Some((_, header)) = self.header(pid).await? else {
            return Ok(Status::pending(pid));
        };
        let count = self.store.count(pid).await?;
        Ok(Status::progress(pid, count, header.ntasks))
    }

    /// The whole result, blocking until every part has been written
    ///
    /// The output is a msgpack array: the raw header as a `bin` element,
    /// then every packed part in arrival order. An error entry in the log
    /// fails the read.
    pub async fn get(&self, pid: &str) -> Result<Vec<u8>, ResultError> {
        let (raw, header) = self.require_header(pid).await?;
        let (mut success, mut failure) = self.spawn_reader(pid, raw, header.ntasks);
        collect(header.ntasks + 1, &mut success, &mut failure, self.timeout).await
    }

    /// The same bytes as [`ResultApi::get`], delivered as they arrive
    ///
    /// The receiver yields the array header first and then one chunk per
    /// element. It ends after the last part, or after an `Err` item.
    pub async fn stream(
        &self,
        pid: &str,
    ) -> Result<mpsc::Receiver<Result<Vec<u8>, ResultError>>, ResultError> {
        let (raw, header) = self.require_header(pid).await?;
        let elements = header.ntasks + 1;
        let (mut success, mut failure) = self.spawn_reader(pid, raw, header.ntasks);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let wait = self.timeout;
        let pid = pid.to_string();

        tokio::spawn(async move {
            let head = match array_header(elements) {
                Ok(head) => head,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            if tx.send(Ok(head)).await.is_err() {
                return;
            }
            for _ in 0..elements {
                match next_chunk(&mut success, &mut failure, wait).await {
                    Ok(chunk) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            debug!(pid = %pid, "Stream client went away");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(pid = %pid, "Result stream aborted: {}", e);
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            debug!(pid = %pid, "Result stream complete");
        });

        Ok(rx)
    }

    async fn header(&self, pid: &str) -> Result<Option<(Vec<u8>, ProcessHeader)>, ResultError> {
        let Some(raw) = self.store.header(pid).await? else {
            return Ok(None);
        };
        let header = ProcessHeader::parse(&raw)
            .map_err(|e| ResultError::MalformedHeader(e.to_string()))?;
        Ok(Some((raw, header)))
    }

    async fn require_header(&self, pid: &str) -> Result<(Vec<u8>, ProcessHeader), ResultError> {
        self.header(pid)
            .await?
            .ok_or_else(|| ResultError::NotFound(pid.to_string()))
    }

    /// Tail the log in the background: the encoded header, then every part
    /// on `success`; the first error entry or broker failure on `failure`
    fn spawn_reader(
        &self,
        pid: &str,
        raw_header: Vec<u8>,
        ntasks: usize,
    ) -> (mpsc::Receiver<Vec<u8>>, mpsc::Receiver<ResultError>) {
        let (success_tx, success) = mpsc::channel(STREAM_BUFFER);
        let (failure_tx, failure) = mpsc::channel(1);
        let reader = LogReader {
            store: self.store.clone(),
            pid: pid.to_string(),
            ntasks,
            block: self.block,
        };
        tokio::spawn(reader.run(raw_header, success_tx, failure_tx));
        (success, failure)
    }
}

struct LogReader {
    store: ResultStore,
    pid: String,
    ntasks: usize,
    block: Duration,
}

impl LogReader {
    async fn run(
        self,
        raw_header: Vec<u8>,
        success: mpsc::Sender<Vec<u8>>,
        failure: mpsc::Sender<ResultError>,
    ) {
        let header = match encode_bin(&raw_header) {
            Ok(header) => header,
            Err(e) => {
                let _ = failure.send(e).await;
                return;
            }
        };
        if success.send(header).await.is_err() {
            return;
        }

        let mut cursor = "0".to_string();
        let mut labels = HashSet::new();
        let mut seen = 0;
        while seen < self.ntasks {
            if success.is_closed() {
                return;
            }
            let entries = match self.store.read(&self.pid, &cursor, self.block).await {
                Ok(entries) => entries,
                Err(e) => {
                    let _ = failure.send(e.into()).await;
                    return;
                }
            };
            for (id, entry) in entries {
                cursor = id;
                match entry {
                    LogEntry::Part { label, bytes } => {
                        // A redelivered task writes its part a second time
                        if !labels.insert(label) {
                            debug!(pid = %self.pid, "Skipping duplicate part");
                            continue;
                        }
                        seen += 1;
                        if success.send(bytes).await.is_err() {
                            return;
                        }
                    }
                    LogEntry::Error(message) => {
                        let _ = failure.send(ResultError::PartFailed(message)).await;
                        return;
                    }
                }
                if seen == self.ntasks {
                    break;
                }
            }
        }
    }
}

/// Pack `parts` chunks into one msgpack array
///
/// Every chunk must already be a single encoded msgpack value. Each wait for
/// the next chunk is bounded by `timeout`; a failure on `failure` ends the
/// collection with that error.
pub async fn collect(
    parts: usize,
    success: &mut mpsc::Receiver<Vec<u8>>,
    failure: &mut mpsc::Receiver<ResultError>,
    timeout: Duration,
) -> Result<Vec<u8>, ResultError> {
    let mut out = array_header(parts)?;
    for _ in 0..parts {
        let chunk = next_chunk(success, failure, timeout).await?;
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

async fn next_chunk(
    success: &mut mpsc::Receiver<Vec<u8>>,
    failure: &mut mpsc::Receiver<ResultError>,
    wait: Duration,
) -> Result<Vec<u8>, ResultError> {
    let next = async {
        tokio::select! {
            biased;
            Some(err) = failure.recv() => Err(err),
            Some(chunk) = success.recv() => Ok(chunk),
            else => Err(ResultError::Closed),
        }
    };
    tokio::time::timeout(wait, next)
        .await
        .map_err(|_| ResultError::Timeout(wait))?
}

fn array_header(len: usize) -> Result<Vec<u8>, ResultError> {
    let len = u32::try_from(len).map_err(|e| ResultError::Encode(e.to_string()))?;
    let mut out = Vec::with_capacity(5);
    rmp::encode::write_array_len(&mut out, len).map_err(|e| ResultError::Encode(e.to_string()))?;
    Ok(out)
}

pub(crate) fn encode_bin(bytes: &[u8]) -> Result<Vec<u8>, ResultError> {
    let mut out = Vec::with_capacity(bytes.len() + 5);
    rmp::encode::write_bin(&mut out, bytes).map_err(|e| ResultError::Encode(e.to_string()))?;
    Ok(out)
}
