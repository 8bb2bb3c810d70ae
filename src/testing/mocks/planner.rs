//! Mock planner

use crate::planner::{Planner, PlanningError};

/// Returns the same descriptors for every query, or fails
#[derive(Debug, Clone)]
pub enum StaticPlanner {
    Plan(Vec<Vec<u8>>),
    BadInput(String),
    Internal(String),
}

impl Planner for StaticPlanner {
    fn plan(&self, _query: &[u8]) -> Result<Vec<Vec<u8>>, PlanningError> {
        match self {
            Self::Plan(descriptors) => Ok(descriptors.clone()),
            Self::BadInput(message) => Err(PlanningError::BadInput(message.clone())),
            Self::Internal(message) => Err(PlanningError::Internal(message.clone())),
        }
    }
}
