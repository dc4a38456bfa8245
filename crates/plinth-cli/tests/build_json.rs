//! Integration tests for `plinth build`.
//!
//! These tests verify:
//! - `--json` output is a single valid JSON document on stdout
//! - Success exits 0 and writes artifacts plus `manifest.json`
//! - Failures exit 1 with a SCREAMING_SNAKE_CASE error code
//! - `--dry-run` writes nothing

use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "plinth-cli", "--bin", "plinth", "--"]);
    cmd.env_remove("NODE_ENV");
    cmd
}

fn run_build(dir: &Path, extra: &[&str]) -> Output {
    cargo_bin()
        .args(["build", "--json", "--cwd"])
        .arg(dir)
        .args(extra)
        .output()
        .expect("Failed to run build command")
}

fn parse(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("Output should be valid JSON")
}

fn write_project(dir: &Path, config: &str) {
    std::fs::write(dir.join("plinth.config.json"), config).unwrap();
    std::fs::write(
        dir.join("index.js"),
        "import { greet } from './greet.js';\nconsole.log(greet('world'));\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("greet.js"),
        "export function greet(name) { return 'hello ' + name; }\n",
    )
    .unwrap();
}

#[test]
fn test_build_json_success() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), r#"{ "entry": "./index.js", "html": {} }"#);

    let output = run_build(dir.path(), &["--mode", "development"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json = parse(&output);
    assert_eq!(json["ok"], true);
    assert_eq!(json["mode"], "development");
    assert_eq!(json["stats"]["modules"], 2);
    assert!(json["artifacts"].is_array());
    assert!(json["warnings"].is_array());
    assert_eq!(json["entrypoints"]["main"]["js"][1], "js/main.js");

    let out = dir.path().join("build");
    assert!(out.join("js/main.js").is_file());
    assert!(out.join("manifest.json").is_file());
    assert!(out.join("index.html").is_file());
}

#[test]
fn test_build_production_hashes_file_names() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), r#"{ "entry": "./index.js" }"#);

    let output = run_build(dir.path(), &["--mode", "production"]);
    assert!(output.status.success());

    let json = parse(&output);
    assert_eq!(json["mode"], "production");
    let main = json["entrypoints"]["main"]["js"][1].as_str().unwrap();
    assert!(main.starts_with("js/main.") && main != "js/main.js", "got {main}");
    assert!(json["stats"]["optimize"].is_object());
}

#[test]
fn test_build_failure_exits_one_with_code() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), r#"{ "entry": "./index.js" }"#);
    std::fs::write(dir.path().join("greet.js"), "import './missing.js';\n").unwrap();

    let output = run_build(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));

    let json = parse(&output);
    assert_eq!(json["ok"], false);
    let code = json["error"]["code"].as_str().unwrap();
    assert_eq!(code, "RESOLUTION_ERROR");
    assert!(code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit()));
    assert_eq!(json["error"]["step"], "./missing.js");
    assert!(json["error"]["unit"].as_str().unwrap().ends_with("greet.js"));
}

#[test]
fn test_missing_config_is_config_error() {
    let dir = tempdir().unwrap();

    let output = run_build(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(parse(&output)["error"]["code"], "CONFIG_ERROR");
}

#[test]
fn test_unknown_loader_is_config_error() {
    let dir = tempdir().unwrap();
    write_project(
        dir.path(),
        r#"{ "entry": "./index.js", "module": { "rules": [{ "test": "\\.js$", "use": ["nope"] }] } }"#,
    );

    let output = run_build(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    let json = parse(&output);
    assert_eq!(json["error"]["code"], "CONFIG_ERROR");
    assert!(json["error"]["message"].as_str().unwrap().contains("nope"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), r#"{ "entry": "./index.js" }"#);

    let output = run_build(dir.path(), &["--dry-run"]);
    assert!(output.status.success());
    assert_eq!(parse(&output)["ok"], true);
    assert!(!dir.path().join("build").exists());
}

#[test]
fn test_build_human_output_not_json() {
    let dir = tempdir().unwrap();
    write_project(dir.path(), r#"{ "entry": "./index.js" }"#);

    let output = cargo_bin()
        .args(["build", "--mode", "development", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run build command");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(serde_json::from_str::<serde_json::Value>(&stdout).is_err());
    assert!(stdout.contains("development build"));
    assert!(stdout.contains("js/main.js"));
}

#[test]
fn test_version_json() {
    let output = cargo_bin().args(["version", "--json"]).output().unwrap();
    assert!(output.status.success());
    let json = parse(&output);
    assert_eq!(json["name"], "plinth");
    assert!(json["version"].is_string());
}
