//! CLI command handlers
//!
//! Argument parsing structures, command routing and the subcommand runners.

pub mod args;
pub mod commands;
pub mod help;
pub mod router;

pub use args::{BrokerArgs, Cli, Commands};
pub use help::{generate_help, get_log_level};
pub use router::execute_command;
