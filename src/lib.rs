//! # cubeflow
//!
//! Distributed fetch and reassembly of cube slices. A query is planned into
//! tasks, the tasks are published on a broker stream, fetch workers download
//! the fragments of each task concurrently and write one packed part per
//! task to a per-process log, and clients poll or stream the assembled
//! result.
//!
//! ## Usage
//!
//! ```bash
//! cubeflow fetch --redis localhost:6379 -j 30
//! cubeflow serve --redis localhost:6379 -p 8080
//! cubeflow submit --redis localhost:6379 query.json
//! cubeflow gc --redis localhost:6379 -t 30m --dry-run
//! ```
//!
//! ## Modules
//!
//! - `broker` - Stream and key primitives over Redis, plus an in-memory broker
//! - `scheduler` - Header write and task publication
//! - `planner` - Query planning capability and the reference bundle planner
//! - `storage` - Blob storage clients, fragment cache and client registry
//! - `fetch` - Bounded fetch worker pool with retries
//! - `gather` - Per-part reassembly state machine
//! - `worker` - Consumer-group read loop
//! - `result` - Result store, retrieval API and HTTP surface
//! - `gc` - Removal of idle consumers
//! - `testing` - Fakes shared by unit and integration tests
pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gather;
pub mod gc;
pub mod message;
pub mod planner;
pub mod result;
pub mod scheduler;
pub mod storage;
pub mod worker;

pub mod testing;

pub use error::{CubeflowError, ErrorCode};
