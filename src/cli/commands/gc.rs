//! Garbage collection command

use anyhow::Result;

use super::connect;
use crate::config::Settings;
use crate::error::CubeflowError;
use crate::gc::GarbageCollector;

/// Run one collection pass and print what was removed
pub async fn run_gc(settings: Settings, dry_run: bool) -> Result<()> {
    let broker = connect(&settings).await?;
    let collector = GarbageCollector::new(
        broker,
        settings.stream.clone(),
        settings.group.clone(),
        settings.gc_threshold,
    )
    .dry_run(dry_run);

    let report = collector.run().await.map_err(CubeflowError::from)?;
    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    println!(
        "{} {} consumer(s) from group {} in stream {}, kept {}",
        verb,
        report.removed.len(),
        settings.group,
        settings.stream,
        report.kept
    );
    for name in &report.removed {
        println!("  {}", name);
    }
    Ok(())
}
