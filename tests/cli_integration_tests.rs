// CLI behaviour of the application-broker binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const CONFIG: &str = r#"
[broker]
api_packages_support = false
mapping_max_wait_seconds = 1
shutdown_timeout_seconds = 5

[storage]
backend = "memory"
path = "unused.json"

[observability]
log_level = "warn"
log_format = "json"

[[applications]]
name = "ec-prod"
description = "EC production"

[[applications.services]]
id = "S1"
display_name = "EC events"
event_provider = true

[[mappings]]
application = "ec-prod"
namespace = "ns-a"
"#;

fn broker() -> Command {
    let mut cmd = Command::cargo_bin("application-broker").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("application-broker.toml");
    fs::write(&path, CONFIG).unwrap();
    path
}

#[test]
fn test_help_lists_commands() {
    broker()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("deprovision"))
        .stdout(predicate::str::contains("last-operation"))
        .stdout(predicate::str::contains("populate"));
}

#[test]
fn test_provision_reports_final_operation() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    broker()
        .arg("--config")
        .arg(&config)
        .args([
            "provision",
            "--instance-id",
            "I1",
            "--service-id",
            "S1",
            "--plan-id",
            "default",
            "--namespace",
            "ns-a",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"async\": true"))
        .stdout(predicate::str::contains("\"state\": \"succeeded\""))
        .stdout(predicate::str::contains("provisioning succeeded"));
}

#[test]
fn test_provision_of_unknown_service_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    broker()
        .arg("--config")
        .arg(&config)
        .args([
            "provision",
            "--instance-id",
            "I1",
            "--service-id",
            "nope",
            "--plan-id",
            "default",
            "--namespace",
            "ns-a",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Status: 400"));
}

#[test]
fn test_config_prints_effective_settings() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    broker()
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("mapping_max_wait_seconds = 1"))
        .stdout(predicate::str::contains("ec-prod"));
}

#[test]
fn test_status_of_unknown_instance() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    broker()
        .arg("--config")
        .arg(&config)
        .args(["status", "--instance-id", "ghost"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"provisioned\": false"))
        .stdout(predicate::str::contains("\"instance\": null"));
}
