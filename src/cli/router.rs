//! Command routing and execution
//!
//! Resolves the settings for a subcommand (file, environment, then flags)
//! and hands them to its runner.

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::args::Commands;
use crate::cli::commands::*;
use crate::config::Settings;

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(command: Commands, config: Option<&Path>) -> Result<()> {
    let mut settings = Settings::load(config).context("Unable to load configuration")?;

    match command {
        Commands::Fetch {
            broker,
            group,
            consumer_id,
            jobs,
            parts,
            retries,
            heartbeat,
            cache_entries,
        } => {
            broker.apply(&mut settings);
            override_with(&mut settings.group, group);
            if consumer_id.is_some() {
                settings.consumer_id = consumer_id;
            }
            override_with(&mut settings.jobs, jobs);
            override_with(&mut settings.parts, parts);
            override_with(&mut settings.retries, retries);
            override_with(&mut settings.heartbeat, heartbeat);
            override_with(&mut settings.cache_entries, cache_entries);
            run_fetch(settings).await
        }
        Commands::Gc {
            broker,
            group,
            threshold,
            dry_run,
        } => {
            broker.apply(&mut settings);
            override_with(&mut settings.group, group);
            override_with(&mut settings.gc_threshold, threshold);
            run_gc(settings, dry_run).await
        }
        Commands::Serve {
            broker,
            port,
            result_timeout,
        } => {
            broker.apply(&mut settings);
            override_with(&mut settings.port, port);
            override_with(&mut settings.result_timeout, result_timeout);
            run_serve(settings).await
        }
        Commands::Submit {
            broker,
            query,
            task_size,
        } => {
            broker.apply(&mut settings);
            run_submit(settings, &query, task_size).await
        }
    }
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::Cli;
    use clap::Parser;
    use std::time::Duration;

    #[test]
    fn test_fetch_flags_parse() {
        let cli = Cli::parse_from([
            "cubeflow",
            "fetch",
            "--redis",
            "localhost:6379",
            "-j",
            "8",
            "--heartbeat",
            "2s",
            "--parts",
            "3",
        ]);
        let Commands::Fetch {
            broker,
            jobs,
            parts,
            heartbeat,
            ..
        } = cli.command
        else {
            panic!("expected fetch");
        };
        assert_eq!(broker.redis_url.as_deref(), Some("localhost:6379"));
        assert_eq!(jobs, Some(8));
        assert_eq!(parts, Some(3));
        assert_eq!(heartbeat, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_gc_flags_parse() {
        let cli = Cli::parse_from(["cubeflow", "gc", "-t", "45m", "-n", "-G", "workers"]);
        let Commands::Gc {
            threshold,
            dry_run,
            group,
            ..
        } = cli.command
        else {
            panic!("expected gc");
        };
        assert_eq!(threshold, Some(Duration::from_secs(45 * 60)));
        assert!(dry_run);
        assert_eq!(group.as_deref(), Some("workers"));
    }

    #[test]
    fn test_broker_args_override_settings() {
        let mut settings = Settings::default();
        let args = crate::cli::args::BrokerArgs {
            redis_url: Some("cache:6380".into()),
            stream: Some("tasks".into()),
            ..Default::default()
        };
        args.apply(&mut settings);
        assert_eq!(settings.redis_url, "cache:6380");
        assert_eq!(settings.stream, "tasks");
        assert!(!settings.secure);
    }

    #[test]
    fn test_override_with_keeps_existing_value() {
        let mut jobs = 30;
        override_with(&mut jobs, None);
        assert_eq!(jobs, 30);
        override_with(&mut jobs, Some(4));
        assert_eq!(jobs, 4);
    }
}
