//! CLI integration tests: runs `actl --help` and subcommand `--help` variants via `cargo run`
//! and checks the rendered usage text.

use std::process::Command;

#[test]
fn test_cli_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("smart-autoscaler"), "Should show app description");
    assert!(stdout.contains("get"), "Should show get command");
    assert!(stdout.contains("rollback"), "Should show rollback command");
}

#[test]
fn test_cli_version() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "--version"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("actl"), "Should show binary name");
}

#[test]
fn test_get_workloads_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "get", "workloads", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Get workloads help should succeed");
    assert!(stdout.contains("--namespace"), "Should show namespace option");
}

#[test]
fn test_get_workload_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "get", "workload", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Get workload help should succeed");
    assert!(stdout.contains("workload"), "Should show workload argument");
}

#[test]
fn test_get_predictions_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "get", "predictions", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Get predictions help should succeed");
    assert!(stdout.contains("workload"), "Should show workload argument");
}

#[test]
fn test_get_prescale_status_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "get", "prescale-status", "--help"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "Get prescale-status help should succeed");
}

#[test]
fn test_get_autopilot_status_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "get", "autopilot-status", "--help"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "Get autopilot-status help should succeed");
}

#[test]
fn test_rollback_prescale_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "rollback", "prescale", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Rollback prescale help should succeed");
    assert!(stdout.contains("--namespace"), "Should show namespace option");
}

#[test]
fn test_rollback_autopilot_help() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "rollback", "autopilot", "--help"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "Rollback autopilot help should succeed");
}

#[test]
fn test_format_option() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
}

#[test]
fn test_api_url_option() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("ACTL_API_URL"), "Should show env var");
}

#[test]
fn test_invalid_command() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "invalid-command"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error") || stderr.contains("invalid"), "Should show error message");
}

#[test]
fn test_missing_argument() {
    let output = Command::new("cargo")
        .args(["run", "-p", "autoscaler-cli", "--", "get", "workload"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Missing argument should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("required") || stderr.contains("error"), "Should show error about missing argument");
}
