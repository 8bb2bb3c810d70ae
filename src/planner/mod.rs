//! Query planning boundary
//!
//! A [`Planner`] turns a packed query into an ordered list of task
//! descriptors followed by one trailing process header descriptor. The
//! pipeline treats the planner as opaque; [`BundlePlanner`] is the reference
//! implementation used by `cubeflow submit` and the tests.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::message::{ProcessHeader, Query, Task};

/// Planning failures, split by who is to blame
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The query itself is unusable
    #[error("bad query: {0}")]
    BadInput(String),

    /// The planner failed on a well-formed query
    #[error("planner failure: {0}")]
    Internal(String),

    /// The planner returned no descriptors at all, not even a header
    #[error("planner returned an empty plan")]
    MissingHeader,
}

impl PlanningError {
    /// HTTP status hint for the layer that accepted the query
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadInput(_) => 400,
            Self::Internal(_) | Self::MissingHeader => 500,
        }
    }
}

/// Capability interface of the native planner
pub trait Planner: Send + Sync {
    /// Plan a packed query. The last descriptor is the process header.
    fn plan(&self, query: &[u8]) -> Result<Vec<Vec<u8>>, PlanningError>;
}

/// A planned query: the tasks to enqueue and the header bytes
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub header: Vec<u8>,
    pub tasks: Vec<Vec<u8>>,
}

impl QueryPlan {
    /// Split planner output into tasks and the trailing header
    pub fn from_descriptors(mut descriptors: Vec<Vec<u8>>) -> Result<Self, PlanningError> {
        let header = descriptors.pop().ok_or(PlanningError::MissingHeader)?;
        Ok(Self {
            header,
            tasks: descriptors,
        })
    }

    pub fn ntasks(&self) -> usize {
        self.tasks.len()
    }
}

#[derive(Debug, Deserialize)]
struct BundleArgs {
    fragments: Vec<String>,
}

/// Reference planner that bundles a list of named fragments
///
/// The query's `args.fragments` are split into tasks of at most `task_size`
/// fragments each. Every task uses the `bundle` reassembly kind.
#[derive(Debug, Clone)]
pub struct BundlePlanner {
    task_size: usize,
}

impl BundlePlanner {
    pub const FUNCTION: &'static str = "bundle";

    pub fn new(task_size: usize) -> Self {
        Self {
            task_size: task_size.max(1),
        }
    }
}

impl Default for BundlePlanner {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Planner for BundlePlanner {
    fn plan(&self, query: &[u8]) -> Result<Vec<Vec<u8>>, PlanningError> {
        let query =
            Query::unpack(query).map_err(|e| PlanningError::BadInput(e.to_string()))?;
        if query.function != Self::FUNCTION {
            return Err(PlanningError::BadInput(format!(
                "unsupported function {:?}",
                query.function
            )));
        }
        let args: BundleArgs = serde_json::from_value(query.args.clone())
            .map_err(|e| PlanningError::BadInput(format!("args: {}", e)))?;
        if args.fragments.is_empty() {
            return Err(PlanningError::BadInput("args.fragments is empty".into()));
        }

        let mut descriptors = Vec::new();
        for chunk in args.fragments.chunks(self.task_size) {
            let task = Task {
                pid: query.pid.clone(),
                token: query.token.clone(),
                guid: query.guid.clone(),
                storage_endpoint: query.storage_endpoint.clone(),
                storage_kind: query.storage_kind.clone(),
                function: Self::FUNCTION.to_string(),
                params: json!({ "fragments": chunk }),
            };
            descriptors.push(task.pack().map_err(|e| PlanningError::Internal(e.to_string()))?);
        }

        let header = ProcessHeader {
            pid: query.pid.clone(),
            ntasks: descriptors.len(),
            shape: vec![args.fragments.len()],
            index: Vec::new(),
        };
        descriptors.push(
            header
                .pack()
                .map_err(|e| PlanningError::Internal(e.to_string()))?,
        );
        Ok(descriptors)
    }
}

/// Fragment names listed in a bundle task's parameters
pub fn bundle_fragments(params: &Value) -> Option<Vec<String>> {
    serde_json::from_value::<BundleArgs>(params.clone())
        .ok()
        .map(|args| args.fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(fragments: &[&str]) -> Vec<u8> {
        Query {
            pid: "pid-1".into(),
            token: "sig=abc".into(),
            guid: "cube".into(),
            manifest: Value::Null,
            storage_endpoint: "https://acc.blob".into(),
            storage_kind: "http".into(),
            function: "bundle".into(),
            args: json!({ "fragments": fragments }),
        }
        .pack()
        .unwrap()
    }

    #[test]
    fn test_plan_splits_by_task_size() {
        let planner = BundlePlanner::new(2);
        let descriptors = planner.plan(&query(&["a", "b", "c"])).unwrap();
        let plan = QueryPlan::from_descriptors(descriptors).unwrap();
        assert_eq!(plan.ntasks(), 2);

        let header = ProcessHeader::parse(&plan.header).unwrap();
        assert_eq!(header.ntasks, 2);
        assert_eq!(header.shape, vec![3]);

        let last = Task::unpack(&plan.tasks[1]).unwrap();
        assert_eq!(bundle_fragments(&last.params).unwrap(), vec!["c"]);
        assert_eq!(last.token, "sig=abc");
    }

    #[test]
    fn test_bad_queries_are_client_errors() {
        let planner = BundlePlanner::default();
        let err = planner.plan(b"{").unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = planner.plan(&query(&[])).unwrap_err();
        assert!(matches!(err, PlanningError::BadInput(_)));
    }

    #[test]
    fn test_empty_descriptors_have_no_header() {
        let err = QueryPlan::from_descriptors(Vec::new()).unwrap_err();
        assert!(matches!(err, PlanningError::MissingHeader));
        assert_eq!(err.status_code(), 500);
    }
}
