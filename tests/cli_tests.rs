//! Integration tests for the CLI interface

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn cubeflow() -> Command {
    let mut cmd = Command::cargo_bin("cubeflow").unwrap();
    cmd.env_remove("REDIS_URL").env_remove("CUBEFLOW_CONFIG");
    cmd
}

#[test]
fn test_cli_help_flag() {
    cubeflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("fetch"))
        .stdout(predicate::str::contains("gc"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("submit"));
}

#[test]
fn test_gc_help() {
    cubeflow()
        .args(["gc", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--threshold"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_fetch_help() {
    cubeflow()
        .args(["fetch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--jobs"))
        .stdout(predicate::str::contains("--consumer-id"));
}

#[test]
fn test_invalid_command() {
    cubeflow()
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_missing_broker_address_fails() {
    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, "jobs = 4").unwrap();

    cubeflow()
        .args(["gc", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("redis_url is required"));
}

#[test]
fn test_bad_config_file_fails() {
    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, "jobs = \"many\"").unwrap();

    cubeflow()
        .args(["fetch", "--redis", "localhost:6379", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
