//! Help text generation and utilities

use crate::cli::args::Cli;
use clap::CommandFactory;

/// Generate comprehensive help text for the CLI
pub fn generate_help() -> String {
    Cli::command().render_help().to_string()
}

/// Log filter for a `-v` count
pub fn get_log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,tower=debug", // -vvv shows everything including dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert_eq!(get_log_level(0), "info");
        assert_eq!(get_log_level(1), "debug");
        assert_eq!(get_log_level(2), "trace");
        assert_eq!(get_log_level(7), "trace,hyper=debug,tower=debug");
    }

    #[test]
    fn test_help_lists_subcommands() {
        let help = generate_help();
        for command in ["fetch", "gc", "serve", "submit"] {
            assert!(help.contains(command), "missing {} in help", command);
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
