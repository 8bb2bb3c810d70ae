//! Query submission command

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::connect;
use crate::config::Settings;
use crate::error::CubeflowError;
use crate::message::{make_pid, Query};
use crate::planner::BundlePlanner;
use crate::scheduler::Scheduler;

/// Plan a query file with the bundle planner and schedule it
///
/// Prints `{"pid": .., "location": "result/<pid>/status"}` on success.
pub async fn run_submit(settings: Settings, path: &Path, task_size: usize) -> Result<()> {
    let doc = tokio::fs::read(path)
        .await
        .with_context(|| format!("Unable to read query {}", path.display()))?;
    let mut query = Query::unpack(&doc).with_context(|| format!("Invalid query {}", path.display()))?;
    if query.pid.is_empty() {
        query.pid = make_pid();
    }

    let broker = connect(&settings).await?;
    let scheduler = Scheduler::new(
        broker,
        Arc::new(BundlePlanner::new(task_size)),
        settings.stream.clone(),
        settings.result_ttl,
    );

    let plan = scheduler.make_query(&query).map_err(CubeflowError::from)?;
    scheduler
        .schedule(&CancellationToken::new(), &query.pid, &plan)
        .await
        .map_err(|e| CubeflowError::from(e).with_pid(query.pid.clone()))?;

    println!(
        "{}",
        json!({
            "pid": query.pid,
            "location": format!("result/{}/status", query.pid),
        })
    );
    Ok(())
}
