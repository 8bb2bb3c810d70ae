//! Mock implementations for testing
//!
//! Fakes for the pipeline's external collaborators: blob storage, the
//! broker and the planner.

pub mod broker;
pub mod planner;
pub mod storage;

pub use broker::FailingBroker;
pub use planner::StaticPlanner;
pub use storage::{MockFailure, MockStorage};
