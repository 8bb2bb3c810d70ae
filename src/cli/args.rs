//! CLI argument structures
//!
//! Every flag is optional on the command line: anything left out falls back
//! to the config file, the environment, and finally the built-in defaults.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Settings;

/// Distributed fragment fetch and reassembly
#[derive(Parser, Debug)]
#[command(name = "cubeflow")]
#[command(about = "cubeflow - fetch, reassemble and serve cube slices", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Broker connection flags shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct BrokerArgs {
    /// Broker address, e.g. host[:port] or redis://host:port
    #[arg(short = 'R', long = "redis-url", alias = "redis", value_name = "ADDR")]
    pub redis_url: Option<String>,

    /// Broker password
    #[arg(short = 'P', long, value_name = "PASSWORD")]
    pub redis_password: Option<String>,

    /// Connect to the broker over TLS
    #[arg(long)]
    pub secure: bool,

    /// Task stream. Must match between scheduler and workers
    #[arg(short = 'S', long, value_name = "NAME")]
    pub stream: Option<String>,
}

impl BrokerArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(url) = &self.redis_url {
            settings.redis_url = url.clone();
        }
        if let Some(password) = &self.redis_password {
            settings.redis_password = Some(password.clone());
        }
        if self.secure {
            settings.secure = true;
        }
        if let Some(stream) = &self.stream {
            settings.stream = stream.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a fetch worker: read tasks, download fragments, write parts
    #[command(name = "fetch")]
    Fetch {
        #[command(flatten)]
        broker: BrokerArgs,

        /// Consumer group. All workers should share one group
        #[arg(short = 'G', long, value_name = "NAME")]
        group: Option<String>,

        /// Consumer id of this worker; generated when absent
        #[arg(short = 'C', long, value_name = "ID")]
        consumer_id: Option<String>,

        /// Concurrent fragment downloads per part
        #[arg(short = 'j', long, value_name = "N")]
        jobs: Option<usize>,

        /// Parts gathered at once by this worker
        #[arg(long, value_name = "N")]
        parts: Option<usize>,

        /// Retries per fragment
        #[arg(short = 'r', long, value_name = "N")]
        retries: Option<u32>,

        /// Queue read timeout, e.g. "5s"
        #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
        heartbeat: Option<Duration>,

        /// Fragment cache capacity in entries, 0 disables it
        #[arg(long, value_name = "N")]
        cache_entries: Option<usize>,
    },

    /// Remove consumers that have been idle too long
    #[command(name = "gc")]
    Gc {
        #[command(flatten)]
        broker: BrokerArgs,

        /// Consumer group to garbage collect
        #[arg(short = 'G', long, value_name = "NAME")]
        group: Option<String>,

        /// Idle duration before a consumer is removed, e.g. "30m"
        #[arg(short = 't', long, value_parser = humantime::parse_duration, value_name = "DURATION")]
        threshold: Option<Duration>,

        /// Show what would be removed without removing it
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Serve process status and results over HTTP
    #[command(name = "serve")]
    Serve {
        #[command(flatten)]
        broker: BrokerArgs,

        /// Port to listen on
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// How long a result read waits for the next part
        #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
        result_timeout: Option<Duration>,
    },

    /// Plan a bundle query and put its tasks on the queue
    #[command(name = "submit")]
    Submit {
        #[command(flatten)]
        broker: BrokerArgs,

        /// Query document (JSON)
        query: PathBuf,

        /// Fragments per task
        #[arg(long, default_value = "10")]
        task_size: usize,
    },
}
