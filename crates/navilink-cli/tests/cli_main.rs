//! Basic CLI tests for the navilink command-line interface.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("navilink").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Control water heaters over MQTT"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("power"))
        .stdout(predicate::str::contains("temperature"))
        .stdout(predicate::str::contains("mode"))
        .stdout(predicate::str::contains("vacation"))
        .stdout(predicate::str::contains("reservations"));
}

/// Test that the CLI shows version information.
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("navilink").unwrap();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("navilink"));
}

/// Test that providing no subcommand shows an error.
#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = Command::cargo_bin("navilink").unwrap();

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_power_requires_on_or_off() {
    let mut cmd = Command::cargo_bin("navilink").unwrap();
    cmd.arg("power").arg("maybe");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_temperature_requires_value() {
    let mut cmd = Command::cargo_bin("navilink").unwrap();
    cmd.arg("temperature");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("<VALUE>"));
}

/// Unknown modes are rejected before the config is read.
#[test]
fn test_unknown_mode_rejected() {
    let mut cmd = Command::cargo_bin("navilink").unwrap();
    cmd.arg("mode")
        .arg("warp-speed")
        .arg("--config")
        .arg("/nonexistent/navilink.json");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Unknown operation mode"));
}

#[test]
fn test_missing_config_file() {
    let mut cmd = Command::cargo_bin("navilink").unwrap();
    cmd.arg("status")
        .arg("--config")
        .arg("/nonexistent/navilink.json");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();

    let mut cmd = Command::cargo_bin("navilink").unwrap();
    cmd.arg("status").arg("--config").arg(file.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn test_missing_reservation_file() {
    let mut cmd = Command::cargo_bin("navilink").unwrap();
    cmd.args(["reservations", "set", "/nonexistent/program.json"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read reservation file"));
}
