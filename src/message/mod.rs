//! Messages that travel between the scheduler, the fetch workers and the
//! result readers.
//!
//! Queries and tasks are JSON documents. Tasks are stored on the queue as raw
//! bytes next to `pid` and `part`, and the raw bytes are kept after parsing so
//! the reassembly layer can read fields the pipeline itself does not care
//! about.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Field name of the process id in a queue entry
pub const FIELD_PID: &str = "pid";
/// Field name of the part label in a queue entry
pub const FIELD_PART: &str = "part";
/// Field name of the raw task in a queue entry
pub const FIELD_TASK: &str = "task";

/// Errors from parsing or validating messages
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("queue entry is missing field {0:?}")]
    MissingField(&'static str),

    #[error("field {field:?} is not valid utf-8")]
    NotUtf8 { field: &'static str },

    #[error("part label {0:?} is not of the form n/m with n < m")]
    BadPart(String),

    #[error("process header ntasks = {0}; want >= 1")]
    NoTasks(usize),
}

/// Generate a new process id
pub fn make_pid() -> String {
    Uuid::new_v4().to_string()
}

/// A client query, packed and handed to the planner as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub pid: String,
    /// Credentials forwarded to blob storage, e.g. a shared access signature
    #[serde(default)]
    pub token: String,
    pub guid: String,
    #[serde(default)]
    pub manifest: Value,
    pub storage_endpoint: String,
    #[serde(default = "default_storage_kind")]
    pub storage_kind: String,
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

impl Query {
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn unpack(doc: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(doc)?)
    }
}

/// One unit of planner output, as read by the fetch workers
///
/// Only the fields the pipeline needs are parsed; the document may carry
/// more, which the reassembly layer reads from the raw bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub pid: String,
    #[serde(default)]
    pub token: String,
    pub guid: String,
    pub storage_endpoint: String,
    #[serde(default = "default_storage_kind")]
    pub storage_kind: String,
    pub function: String,
    #[serde(default)]
    pub params: Value,
}

impl Task {
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn unpack(doc: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(doc)?)
    }

    /// Storage id of a fragment listed by the reassembly layer
    pub fn blob_id(&self, fragment: &str) -> String {
        format!("{}/{}", self.guid, fragment)
    }
}

fn default_storage_kind() -> String {
    "http".to_string()
}

/// Label of one part of a process, `n/m` with `0 <= n < m`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartLabel {
    pub index: usize,
    pub total: usize,
}

impl PartLabel {
    pub fn new(index: usize, total: usize) -> Result<Self, MessageError> {
        if index >= total {
            return Err(MessageError::BadPart(format!("{}/{}", index, total)));
        }
        Ok(Self { index, total })
    }
}

impl fmt::Display for PartLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}

impl FromStr for PartLabel {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || MessageError::BadPart(s.to_string());
        let (n, m) = s.split_once('/').ok_or_else(bad)?;
        let index = n.trim().parse().map_err(|_| bad())?;
        let total = m.trim().parse().map_err(|_| bad())?;
        Self::new(index, total).map_err(|_| bad())
    }
}

/// A task as it sits on the queue: `{pid, part, task}`
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMessage {
    pub pid: String,
    pub part: PartLabel,
    pub task: Vec<u8>,
}

impl TaskMessage {
    /// Field/value pairs for publishing
    pub fn to_fields(&self) -> Vec<(&'static str, Vec<u8>)> {
        vec![
            (FIELD_PID, self.pid.clone().into_bytes()),
            (FIELD_PART, self.part.to_string().into_bytes()),
            (FIELD_TASK, self.task.clone()),
        ]
    }

    /// Rebuild a message from the fields of a queue entry
    pub fn from_fields(fields: &HashMap<String, Vec<u8>>) -> Result<Self, MessageError> {
        let text = |name: &'static str| -> Result<String, MessageError> {
            let raw = fields.get(name).ok_or(MessageError::MissingField(name))?;
            String::from_utf8(raw.clone()).map_err(|_| MessageError::NotUtf8 { field: name })
        };
        let pid = text(FIELD_PID)?;
        let part = text(FIELD_PART)?.parse()?;
        let task = fields
            .get(FIELD_TASK)
            .cloned()
            .ok_or(MessageError::MissingField(FIELD_TASK))?;
        Ok(Self { pid, part, task })
    }
}

/// Per-process metadata written once when the process is scheduled
///
/// The header is stored as JSON and only `ntasks` is interpreted here; the
/// raw document is handed to clients untouched as the first element of the
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessHeader {
    #[serde(default)]
    pub pid: String,
    pub ntasks: usize,
    #[serde(default)]
    pub shape: Vec<usize>,
    #[serde(default)]
    pub index: Vec<Vec<i64>>,
}

impl ProcessHeader {
    /// Parse and validate a header document
    pub fn parse(doc: &[u8]) -> Result<Self, MessageError> {
        let header: Self = serde_json::from_slice(doc)?;
        if header.ntasks == 0 {
            return Err(MessageError::NoTasks(header.ntasks));
        }
        Ok(header)
    }

    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }
}
