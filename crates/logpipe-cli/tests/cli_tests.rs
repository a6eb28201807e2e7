// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the `logpipe` CLI binary.

use assert_cmd::Command;
use predicates::str::contains;
use std::io::Write;
use std::path::PathBuf;

fn logpipe() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("logpipe").expect("binary `logpipe` should be built")
}

fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("logpipe.toml");
    let mut file = std::fs::File::create(&path).expect("create config");
    file.write_all(content.as_bytes()).expect("write config");
    path
}

const TAGGING: &str = r#"
workers = 1

[pipelines.main]
steps = [
  { type = "matches", field = "level", value = "error", success = { type = "set", field = "alert", value = true }, failure = { type = "drop" } },
]

[outputs.main]
capacity = 1
"#;

// ── Help & version ──────────────────────────────────────────────────

#[test]
fn help_flag_prints_usage() {
    logpipe()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("logpipe event processing engine"))
        .stdout(contains("check"))
        .stdout(contains("run"));
}

#[test]
fn version_flag_prints_version() {
    logpipe()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

// ── check & schema ──────────────────────────────────────────────────

#[test]
fn check_accepts_valid_config() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = write_config(&tmp, TAGGING);
    logpipe()
        .arg("check")
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("ok: 1 pipeline(s), 1 output(s)"));
}

#[test]
fn check_prints_warnings() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = write_config(&tmp, "[pipelines.main]\n");
    logpipe()
        .arg("check")
        .arg(&path)
        .assert()
        .success()
        .stdout(contains("warning: pipeline 'main' has neither"));
}

#[test]
fn check_rejects_invalid_config() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = write_config(&tmp, "workers = 0\n");
    logpipe()
        .arg("check")
        .arg(&path)
        .assert()
        .failure()
        .stderr(contains("workers must be at least 1"));
}

#[test]
fn check_missing_file_fails() {
    logpipe()
        .args(["check", "/nonexistent/logpipe.toml"])
        .assert()
        .failure()
        .stderr(contains("load config"));
}

#[test]
fn schema_prints_json_schema() {
    let output = logpipe().arg("schema").assert().success().get_output().stdout.clone();
    let schema: serde_json::Value = serde_json::from_slice(&output).expect("schema is JSON");
    assert!(schema["properties"]["pipelines"].is_object());
}

// ── run ─────────────────────────────────────────────────────────────

#[test]
fn run_routes_matching_events_to_output() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = write_config(&tmp, TAGGING);
    let input = concat!(
        "{\"level\":\"error\",\"msg\":\"disk\"}\n",
        "{\"level\":\"info\",\"msg\":\"ok\"}\n",
        "\n",
        "{\"level\":\"error\",\"msg\":\"net\"}\n",
    );
    let output = logpipe()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .write_stdin(input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let lines: Vec<serde_json::Value> = String::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(|l| serde_json::from_str(l).expect("JSON line"))
        .collect();
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert_eq!(line["fields"]["alert"], serde_json::json!(true));
        assert_eq!(line["pipeline"], "main");
    }
}

#[test]
fn run_reads_input_file_and_prints_stats() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = write_config(&tmp, TAGGING);
    let input = tmp.path().join("events.jsonl");
    std::fs::write(&input, "{\"level\":\"info\"}\n").expect("write input");
    logpipe()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .arg("--input")
        .arg(&input)
        .arg("--stats")
        .assert()
        .success()
        .stdout(predicates::str::is_empty())
        .stderr(contains("Allevents.dropped"))
        .stderr(contains("Pipeline.main.timer"));
}

#[test]
fn run_test_mode_prints_sink_records() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = write_config(&tmp, TAGGING);
    logpipe()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .arg("--test")
        .write_stdin("{\"level\":\"error\"}\n")
        .assert()
        .success()
        .stdout(contains("\"alert\":true"));
}

#[test]
fn run_unknown_pipeline_fails() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = write_config(&tmp, TAGGING);
    logpipe()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .args(["--pipeline", "ghost"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(contains("unknown pipeline 'ghost'"));
}

#[test]
fn run_rejects_non_object_line() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = write_config(&tmp, TAGGING);
    logpipe()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .write_stdin("[1, 2]\n")
        .assert()
        .failure()
        .stderr(contains("line 1"));
}
