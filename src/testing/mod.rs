//! Testing utilities and fixtures
//!
//! Shared by the unit tests, the integration tests under `tests/` and the
//! benchmarks.

pub mod mocks;

use serde_json::json;

use crate::message::{PartLabel, Task, TaskMessage};

/// A `bundle` task over the named fragments of `guid`
pub fn bundle_task(pid: &str, guid: &str, endpoint: &str, fragments: &[&str]) -> Task {
    Task {
        pid: pid.to_string(),
        token: String::new(),
        guid: guid.to_string(),
        storage_endpoint: endpoint.to_string(),
        storage_kind: "http".to_string(),
        function: "bundle".to_string(),
        params: json!({ "fragments": fragments }),
    }
}

/// The queue message for part `index` of `total`
pub fn task_message(task: &Task, index: usize, total: usize) -> TaskMessage {
    TaskMessage {
        pid: task.pid.clone(),
        part: PartLabel { index, total },
        task: serde_json::to_vec(task).unwrap_or_default(),
    }
}

/// Blobs `(<guid>/<name>, bytes)` for a fragment list, with the fragment
/// name as content
pub fn named_blobs(guid: &str, fragments: &[&str]) -> Vec<(String, Vec<u8>)> {
    fragments
        .iter()
        .map(|name| (format!("{}/{}", guid, name), name.as_bytes().to_vec()))
        .collect()
}
