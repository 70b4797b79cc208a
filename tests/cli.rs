//! End-to-end tests for the `triptel` binary.
//!
//! These drive the real binary against a temporary ledger. The only
//! network-touching test points at a closed local port, so every upload
//! fails fast and deterministically.

use anyhow::Result;
use assert_cmd::Command;
use std::path::Path;

fn triptel(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("triptel").unwrap();
    cmd.arg("--db").arg(db).arg("--no-color");
    cmd.env_remove("TRIPTEL_TOKEN");
    cmd.env_remove("TRIPTEL_API_URL");
    cmd
}

fn stdout_json(cmd: &mut Command) -> Result<serde_json::Value> {
    let output = cmd.arg("--json").assert().success().get_output().clone();
    Ok(serde_json::from_slice(&output.stdout)?)
}

#[test]
fn test_enqueue_location_then_status() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("telemetry.db");

    let enqueued = stdout_json(triptel(&db).args([
        "enqueue", "location", "12.9714", "77.5946", "--accuracy", "8.5",
    ]))?;
    assert!(enqueued["id"].as_i64().unwrap() > 0);
    assert_eq!(enqueued["status"], "PENDING");

    let status = stdout_json(triptel(&db).arg("status"))?;
    assert_eq!(status["total"], 1);
    assert_eq!(status["pending"], 1);
    assert_eq!(status["synced"], 0);
    Ok(())
}

#[test]
fn test_enqueue_error_buffer_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("telemetry.db");

    let result = stdout_json(triptel(&db).args([
        "enqueue",
        "error",
        "LocationTimeout",
        "no fix within 30s",
        "--context",
        "location_tracking",
        "--buffer-only",
    ]))?;
    assert_eq!(result["delivered"], false);
    assert!(result["id"].as_i64().unwrap() > 0);

    let status = stdout_json(triptel(&db).arg("status"))?;
    assert_eq!(status["pending"], 1);
    Ok(())
}

#[test]
fn test_sync_against_dead_endpoint_requeues() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("telemetry.db");

    triptel(&db)
        .args(["enqueue", "location", "12.9714", "77.5946"])
        .assert()
        .success();

    // Connection refused on every upload: the cycle succeeds, the record
    // stays pending with one attempt burned.
    let report = stdout_json(
        triptel(&db)
            .args(["--api-url", "http://127.0.0.1:9", "--token", "tok", "sync"]),
    )?;
    assert_eq!(report["attempted"], 1);
    assert_eq!(report["delivered"], 0);
    assert_eq!(report["retried"], 1);
    assert_eq!(report["pending_after"], 1);
    Ok(())
}

#[test]
fn test_backup_then_restore() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("telemetry.db");

    triptel(&db)
        .args(["enqueue", "location", "12.9714", "77.5946"])
        .assert()
        .success();
    triptel(&db).arg("backup").assert().success();

    // Add a record after the snapshot, then roll back to it.
    triptel(&db)
        .args(["enqueue", "location", "13.0", "77.6"])
        .assert()
        .success();

    let restored = stdout_json(triptel(&db).args(["restore", "--force"]))?;
    assert_eq!(restored["restored"], true);
    assert_eq!(restored["total"], 1);
    Ok(())
}

#[test]
fn test_restore_refuses_without_force() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("telemetry.db");

    triptel(&db)
        .args(["enqueue", "location", "12.9714", "77.5946"])
        .assert()
        .success();
    triptel(&db).arg("backup").assert().success();

    triptel(&db).arg("restore").assert().failure();
    Ok(())
}

#[test]
fn test_completions_emit_script() {
    let output = Command::cargo_bin("triptel")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .get_output()
        .clone();
    let script = String::from_utf8(output.stdout).unwrap();
    assert!(script.contains("triptel"));
}
