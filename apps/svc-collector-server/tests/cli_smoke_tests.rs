#![allow(clippy::unwrap_used, clippy::expect_used)]

//! CLI smoke tests for the svc-collector-server binary.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::time::timeout;

fn run_server(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_svc-collector-server"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute svc-collector-server")
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const LOCAL_CONFIG: &str = r"
server:
  host: 127.0.0.1
  port: 0
registration:
  service_name: smoke-collector
metrics:
  enabled: false
";

#[derive(Deserialize)]
struct Printed {
    server: PrintedServer,
    registration: PrintedRegistration,
}

#[derive(Deserialize)]
struct PrintedServer {
    host: String,
    port: u16,
}

#[derive(Deserialize)]
struct PrintedRegistration {
    service_name: String,
}

#[test]
fn help_lists_subcommands_and_flags() {
    let output = run_server(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"), "{stdout}");
    assert!(stdout.contains("run"));
    assert!(stdout.contains("check"));
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--print-config"));
}

#[test]
fn version_is_reported() {
    let output = run_server(&["--version"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("svc-collector-server"), "{stdout}");
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}

#[test]
fn check_accepts_valid_config() {
    let file = config_file(LOCAL_CONFIG);
    let output = run_server(&["--config", file.path().to_str().unwrap(), "check"]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration is valid"), "{stdout}");
}

#[test]
fn check_rejects_invalid_config() {
    let file = config_file("metrics:\n  listen_addr: nowhere\n");
    let output = run_server(&["--config", file.path().to_str().unwrap(), "check"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("metrics.listen_addr"), "{stderr}");
}

#[test]
fn print_config_applies_cli_overrides() {
    let file = config_file(LOCAL_CONFIG);
    let output = run_server(&[
        "--config",
        file.path().to_str().unwrap(),
        "--port",
        "6100",
        "--print-config",
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let printed: Printed = serde_saphyr::from_str(&stdout).expect("valid YAML");
    assert_eq!(printed.server.host, "127.0.0.1");
    assert_eq!(printed.server.port, 6100);
    assert_eq!(printed.registration.service_name, "smoke-collector");
}

#[test]
fn missing_config_file_fails() {
    let output = run_server(&["--config", "/definitely/not/here.yaml", "check"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config file does not exist"), "{stderr}");
}

#[tokio::test]
async fn run_keeps_serving_until_stopped() {
    let file = config_file(LOCAL_CONFIG);
    let child = tokio::process::Command::new(env!("CARGO_BIN_EXE_svc-collector-server"))
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let outcome = timeout(Duration::from_secs(2), child.wait_with_output()).await;
    if let Ok(output) = outcome {
        let output = output.unwrap();
        panic!(
            "server exited early with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
}
