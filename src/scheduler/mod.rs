//! Scheduler: plan a query and put its tasks on the work queue

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::{Broker, BrokerError};
use crate::message::{PartLabel, Query, TaskMessage};
use crate::planner::{Planner, PlanningError, QueryPlan};
use crate::result::header_key;

/// Scheduling failures. None of them are retried here.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The header could not be written; nothing was enqueued
    #[error(transparent)]
    HeaderWrite(BrokerError),

    #[error("part={part} unable to put in storage: {source}")]
    Publish {
        part: PartLabel,
        #[source]
        source: BrokerError,
    },

    #[error("scheduling cancelled after {published} of {total} tasks")]
    Cancelled { published: usize, total: usize },

    #[error("unable to set expiry: {0}")]
    Expire(BrokerError),
}

/// Puts planned tasks on the shared queue
pub struct Scheduler {
    broker: Arc<dyn Broker>,
    planner: Arc<dyn Planner>,
    stream: String,
    ttl: Duration,
}

impl Scheduler {
    pub fn new(
        broker: Arc<dyn Broker>,
        planner: Arc<dyn Planner>,
        stream: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            broker,
            planner,
            stream: stream.into(),
            ttl,
        }
    }

    /// Plan a query
    pub fn make_query(&self, query: &Query) -> Result<QueryPlan, PlanningError> {
        let packed = query
            .pack()
            .map_err(|e| PlanningError::BadInput(e.to_string()))?;
        let descriptors = self.planner.plan(&packed)?;
        QueryPlan::from_descriptors(descriptors)
    }

    /// Write the process header, then publish one queue entry per task
    ///
    /// The header is written without expiry. Once every task is on the
    /// queue the header and the process log get the result TTL.
    ///
    /// On Redis the process log does not exist until the first part is
    /// written, and expiring a missing key does nothing. The header TTL is
    /// what cleans up a process no worker ever picks up; the log gets its
    /// expiry from the gatherer, which refreshes it on every write.
    pub async fn schedule(
        &self,
        token: &CancellationToken,
        pid: &str,
        plan: &QueryPlan,
    ) -> Result<(), ScheduleError> {
        let key = header_key(pid);
        self.broker
            .set(&key, &plan.header, None)
            .await
            .map_err(ScheduleError::HeaderWrite)?;

        let total = plan.ntasks();
        for (index, task) in plan.tasks.iter().enumerate() {
            if token.is_cancelled() {
                return Err(ScheduleError::Cancelled {
                    published: index,
                    total,
                });
            }

            let part = PartLabel { index, total };
            let message = TaskMessage {
                pid: pid.to_string(),
                part,
                task: task.clone(),
            };
            let fields = message.to_fields();
            let fields: Vec<(&str, &[u8])> =
                fields.iter().map(|(k, v)| (*k, v.as_slice())).collect();

            let id = self
                .broker
                .xadd(&self.stream, &fields)
                .await
                .map_err(|source| ScheduleError::Publish { part, source })?;
            debug!(pid, part = %part, id, "Task enqueued");
        }

        self.broker
            .expire(&key, self.ttl)
            .await
            .map_err(ScheduleError::Expire)?;
        self.broker
            .expire(pid, self.ttl)
            .await
            .map_err(ScheduleError::Expire)?;

        info!(pid, ntasks = total, stream = %self.stream, "Process scheduled");
        Ok(())
    }
}
