//! Result server command

use anyhow::Result;
use std::sync::Arc;

use super::{connect, shutdown_on_ctrl_c};
use crate::config::Settings;
use crate::result::{server, ResultApi, ResultStore};

/// Serve results until Ctrl-C
pub async fn run_serve(settings: Settings) -> Result<()> {
    let broker = connect(&settings).await?;
    let api = ResultApi::new(
        ResultStore::new(broker, settings.result_ttl),
        settings.result_timeout,
    );
    server::serve(Arc::new(api), settings.port, shutdown_on_ctrl_c()).await
}
