//! Command implementation modules
//!
//! Each subcommand gets fully resolved [`Settings`](crate::config::Settings)
//! from the router and owns its broker connection.

pub mod fetch;
pub mod gc;
pub mod serve;
pub mod submit;

pub use fetch::run_fetch;
pub use gc::run_gc;
pub use serve::run_serve;
pub use submit::run_submit;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broker::{Broker, RedisBroker};
use crate::config::Settings;

/// Validate the settings and connect to the broker
async fn connect(settings: &Settings) -> Result<Arc<dyn Broker>> {
    settings.validate()?;
    let broker = RedisBroker::connect(settings)
        .await
        .with_context(|| format!("Unable to connect to the broker at {}", settings.redis_url))?;
    Ok(Arc::new(broker))
}

/// A token cancelled on Ctrl-C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            cancel.cancel();
        }
    });
    token
}
