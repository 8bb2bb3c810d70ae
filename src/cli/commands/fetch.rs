//! Fetch worker command

use anyhow::{Context, Result};
use std::sync::Arc;

use super::{connect, shutdown_on_ctrl_c};
use crate::config::Settings;
use crate::fetch::RetryPolicy;
use crate::gather::{Gatherer, KindRegistry};
use crate::result::ResultStore;
use crate::storage::StorageRegistry;
use crate::worker::Worker;

/// Run a fetch worker until Ctrl-C or a fatal error
pub async fn run_fetch(settings: Settings) -> Result<()> {
    let broker = connect(&settings).await?;

    let gatherer = Gatherer::new(
        ResultStore::new(broker.clone(), settings.result_ttl),
        Arc::new(StorageRegistry::new(
            settings.cache_entries,
            settings.fetch_timeout,
        )),
        Arc::new(KindRegistry::builtin()),
        settings.jobs,
        RetryPolicy::from_settings(&settings),
    );
    let worker = Worker::from_settings(&settings, broker, gatherer);

    worker
        .run(shutdown_on_ctrl_c())
        .await
        .with_context(|| format!("Fetch worker {} stopped", worker.consumer_id()))
}
