//! CLI integration tests

use std::process::{Command, Output};

/// Run tgctl with an isolated home directory
fn tgctl(args: &[&str]) -> Output {
    let home = tempfile::tempdir().expect("Failed to create temp home");
    Command::new(env!("CARGO_BIN_EXE_tgctl"))
        .args(args)
        .env("HOME", home.path())
        .env_remove("TG_API_URL")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute tgctl")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = tgctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("trust gate"), "Should show app description");
    for command in ["decision", "anomalies", "history", "evaluate", "policy"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = tgctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("tgctl"), "Should show binary name");
}

/// Test anomalies subcommand help
#[test]
fn test_anomalies_help() {
    let output = tgctl(&["anomalies", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--window-days"));
    assert!(stdout.contains("--zscore-threshold"));
}

/// Test that a decision is printed as JSON from the API
#[test]
fn test_decision_json_output() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/scope/campaign-1/decision/latest")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "scope_id": "campaign-1",
                "decision": "BLOCK",
                "recorded_decision": null,
                "stale": false,
                "composite_score": null,
                "status": "unknown",
                "components": null,
                "reason": "no decision on record, failing closed",
                "overriding_anomaly_ids": [],
                "as_of": null
            }"#,
        )
        .create();

    let url = server.url();
    let output = tgctl(&["--api-url", &url, "--format", "json", "decision", "campaign-1"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    mock.assert();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["decision"], "BLOCK");
    assert_eq!(value["status"], "unknown");
}

/// Test that a stale decision is flagged in table output
#[test]
fn test_decision_table_flags_stale() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/scope/campaign-1/decision/latest")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "scope_id": "campaign-1",
                "decision": "BLOCK",
                "recorded_decision": "PASS",
                "stale": true,
                "composite_score": 91.75,
                "status": "healthy",
                "components": {
                    "emq_score": 90.0,
                    "freshness_score": 95.0,
                    "variance_score": 85.0,
                    "anomaly_score": 100.0
                },
                "reason": "latest evaluation timed out, failing closed",
                "overriding_anomaly_ids": [],
                "as_of": "2024-05-10T12:00:00Z"
            }"#,
        )
        .create();

    let url = server.url();
    let output = tgctl(&["--api-url", &url, "decision", "campaign-1"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("BLOCK"));
    assert!(stdout.contains("Recorded:  PASS"));
    assert!(stdout.contains("91.75"));
    assert!(stdout.contains("stale"));
}

/// Test that API errors fail the command with the server's message
#[test]
fn test_policy_set_rejection() {
    let mut server = mockito::Server::new();
    server
        .mock("PUT", "/tenant/tenant-a/policy")
        .with_status(422)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"window_days must be within [1, 90], got 120"}"#)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("policy.json");
    std::fs::write(&file, r#"{"window_days": 120}"#).unwrap();

    let url = server.url();
    let output = tgctl(&[
        "--api-url",
        &url,
        "policy",
        "set",
        "tenant-a",
        "--file",
        file.to_str().unwrap(),
    ]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("422"));
    assert!(stderr.contains("window_days must be within"));
}

/// Test that an unreachable API is reported as an error
#[test]
fn test_unreachable_api() {
    let output = tgctl(&["--api-url", "http://127.0.0.1:1", "decision", "campaign-1"]);
    assert!(!output.status.success());
}
