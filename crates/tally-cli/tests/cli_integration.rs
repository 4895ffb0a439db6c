//! Integration tests for tally-cli
//!
//! These tests verify the CLI commands work end-to-end.
//! Tests run serially to avoid database lock conflicts.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the tally binary
fn tally() -> Command {
    Command::cargo_bin("tally").unwrap()
}

/// Get a Command for the tally binary bound to a throwaway database
fn tally_in(dir: &TempDir) -> Command {
    let mut cmd = tally();
    cmd.env("TALLY_DB_PATH", dir.path().join("tally.db"));
    cmd
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
#[serial]
fn test_cli_help() {
    tally()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tally"))
        .stdout(predicate::str::contains("COMMAND").or(predicate::str::contains("Commands")));
}

#[test]
#[serial]
fn test_cli_version() {
    tally()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tally"));
}

#[test]
#[serial]
fn test_credits_help() {
    tally()
        .args(["credits", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("consume"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("sync-total"));
}

#[test]
#[serial]
fn test_config_help() {
    tally()
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config"));
}

#[test]
#[serial]
fn test_invalid_command() {
    tally()
        .arg("nonexistent")
        .assert()
        .failure();
}

// =============================================================================
// Credits Command Tests
// =============================================================================

#[test]
#[serial]
fn test_status_on_empty_ledger() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["credits", "status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"consumed_total\": 0"))
        .stdout(predicate::str::contains("\"remaining\": 1000"))
        .stdout(predicate::str::contains("\"tier\": \"healthy\""));
}

#[test]
#[serial]
fn test_consume_then_status() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["config", "set", "allotment", "10000"])
        .assert()
        .success();
    tally_in(&dir)
        .args(["credits", "consume", "7500", "--cursor", "e1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded 7500 credits"));

    tally_in(&dir)
        .args(["credits", "status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"remaining\": 2500"))
        .stdout(predicate::str::contains("\"percentage_remaining\": 25.0"))
        .stdout(predicate::str::contains("\"tier\": \"warning\""));
}

#[test]
#[serial]
fn test_repeated_cursor_is_ignored() {
    let dir = TempDir::new().unwrap();
    for _ in 0..2 {
        tally_in(&dir)
            .args(["credits", "consume", "10", "--cursor", "evt-1"])
            .assert()
            .success();
    }

    tally_in(&dir)
        .args(["credits", "status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"consumed_total\": 10"));
}

#[test]
#[serial]
fn test_negative_delta_is_rejected() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["credits", "consume", "-5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("non-negative"));

    tally_in(&dir)
        .args(["credits", "status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"consumed_total\": 0"));
}

#[test]
#[serial]
fn test_sync_total_never_goes_backwards() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["credits", "sync-total", "50"])
        .assert()
        .success();
    tally_in(&dir)
        .args(["credits", "sync-total", "40"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing applied"));

    tally_in(&dir)
        .args(["credits", "status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"consumed_total\": 50"));
}

#[test]
#[serial]
fn test_scopes_are_isolated() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["--scope", "acme", "credits", "consume", "300"])
        .assert()
        .success();

    tally_in(&dir)
        .args(["--scope", "globex", "credits", "status", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"consumed_total\": 0"));
}

#[test]
#[serial]
fn test_history_and_daily() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["credits", "consume", "3", "--cursor", "a"])
        .assert()
        .success();
    tally_in(&dir)
        .args(["credits", "consume", "4", "--cursor", "b"])
        .assert()
        .success();

    tally_in(&dir)
        .args(["credits", "history", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"delta\": 3"))
        .stdout(predicate::str::contains("\"consumed_total_after\": 7"));

    tally_in(&dir)
        .args(["credits", "daily", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"credits\": 7"))
        .stdout(predicate::str::contains("\"events\": 2"));
}

#[test]
#[serial]
fn test_history_empty_table() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["credits", "history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No items found."));
}

// =============================================================================
// Config Command Tests
// =============================================================================

#[test]
#[serial]
fn test_config_get_default_allotment() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["config", "get", "allotment"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allotment = 1000"));
}

#[test]
#[serial]
fn test_config_set_and_show() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["config", "set", "granularity", "daily"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set granularity = daily"));

    tally_in(&dir)
        .args(["config", "show", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"daily\""))
        .stdout(predicate::str::contains("TALLY_DB_PATH"));
}

#[test]
#[serial]
fn test_config_set_unknown_key_fails() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["config", "set", "bogus", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown setting"));
}

#[test]
#[serial]
fn test_config_list_scopes() {
    let dir = TempDir::new().unwrap();
    tally_in(&dir)
        .args(["--scope", "acme", "config", "set", "allotment", "500"])
        .assert()
        .success();

    tally_in(&dir)
        .args(["config", "list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"scope\": \"acme\""))
        .stdout(predicate::str::contains("\"allotment\": 500"));
}
