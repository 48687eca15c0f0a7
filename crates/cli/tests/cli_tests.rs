//! CLI integration tests

use std::process::Command;

fn fmctl(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "fmctl", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = fmctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Flowmeter classification console"),
        "Should show app description"
    );
    assert!(stdout.contains("models"), "Should show models command");
    assert!(stdout.contains("meters"), "Should show meters command");
    assert!(stdout.contains("stats"), "Should show stats command");
    assert!(stdout.contains("lookup"), "Should show lookup command");
    assert!(stdout.contains("classify"), "Should show classify command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = fmctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("fmctl"), "Should show binary name");
}

/// Test models list subcommand help
#[test]
fn test_models_list_help() {
    let output = fmctl(&["models", "list", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Models list help should succeed");
    assert!(
        stdout.contains("--active-only"),
        "Should show active-only option"
    );
}

/// Test meters create subcommand help
#[test]
fn test_meters_create_help() {
    let output = fmctl(&["meters", "create", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Meters create help should succeed");
    assert!(stdout.contains("--category"), "Should show category option");
    assert!(stdout.contains("--period"), "Should show period option");
    assert!(stdout.contains("weekday"), "Should list period values");
    assert!(stdout.contains("--meter-id"), "Should show meter-id option");
}

/// Test stats command help
#[test]
fn test_stats_help() {
    let output = fmctl(&["stats", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Stats help should succeed");
    assert!(stdout.contains("--since"), "Should show since option");
    assert!(stdout.contains("--snapshot"), "Should show snapshot option");
}

/// Test lookup subcommands
#[test]
fn test_lookup_help() {
    let output = fmctl(&["lookup", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Lookup help should succeed");
    assert!(stdout.contains("load-dns"), "Should show load-dns");
    assert!(stdout.contains("load-vpn"), "Should show load-vpn");
    assert!(stdout.contains("load-asn"), "Should show load-asn");
}

/// Test api-url option
#[test]
fn test_api_url_option() {
    let output = fmctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("FMCTL_API_URL"), "Should show env var");
    assert!(stdout.contains("--format"), "Should show format option");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = fmctl(&["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test missing required argument error handling
#[test]
fn test_missing_category() {
    let output = fmctl(&[
        "meters",
        "create",
        "--controller",
        "10.0.0.5",
        "--switch",
        "openflow:1",
        "--rate",
        "1000",
    ]);
    assert!(!output.status.success(), "Missing category should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}
