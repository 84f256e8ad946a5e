//! Scenario: the `rxt` binary against a temp state file.
//!
//! # Invariants under test
//!
//! 1. `record` then `validate` of an earlier time exits non-zero with a
//!    tamper reason; the watermark survives across invocations.
//! 2. `record` of an earlier time reports `advanced=false`.
//! 3. `sync` against a mock server persists the offset; `status` reads it back.
//! 4. `sync` with every source down exits non-zero and keeps state.
//! 5. `config-hash` prints a stable hash.

use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::prelude::*;

fn rxt(state: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("rxt").expect("binary builds");
    cmd.env_remove("RXT_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--state")
        .arg(state);
    cmd
}

fn write_config(dir: &std::path::Path, url: &str) -> String {
    let path = dir.join("rxt.yaml");
    std::fs::write(
        &path,
        format!(
            "time:\n  sources:\n    - name: mock\n      url: {url}\n  request_timeout_ms: 500\n  retry:\n    max_attempts: 2\n    initial_delay_ms: 10\n"
        ),
    )
    .unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn record_then_earlier_validate_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");

    rxt(&state)
        .args(["record", "--at", "1000000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("advanced=true"))
        .stdout(predicate::str::contains("last_transaction_ms=1000000"));

    rxt(&state)
        .args(["validate", "--at", "996000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid=true"));

    rxt(&state)
        .args(["validate", "--at", "900000"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("valid=false"))
        .stderr(predicate::str::contains("TAMPER_SUSPECTED"))
        .stderr(predicate::str::contains("tampering"));

    rxt(&state)
        .args(["record", "--at", "500"])
        .assert()
        .success()
        .stdout(predicate::str::contains("advanced=false"))
        .stdout(predicate::str::contains("last_transaction_ms=1000000"));
}

#[test]
fn sync_persists_offset_for_later_invocations() {
    let server = MockServer::start();
    // Far in the future, so the learned offset is unmistakably large.
    server.mock(|when, then| {
        when.method(GET).path("/now");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({ "unixtime": 4_102_444_800i64 }));
    });

    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let config = write_config(dir.path(), &server.url("/now"));

    rxt(&state)
        .args(["--config", &config, "sync"])
        .assert()
        .success()
        .stdout(predicate::str::contains("synced=true attempt=1"));

    rxt(&state)
        .args(["--config", &config, "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("trust=verified"))
        .stdout(predicate::str::contains("last_sync_ms=never").not());

    let raw = std::fs::read_to_string(&state).unwrap();
    let persisted: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let offset: i64 = persisted["time_offset_millis"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(offset > 1_000_000_000, "offset {offset} should reflect year 2100");
}

#[test]
fn sync_with_sources_down_fails_and_keeps_state() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/now");
        then.status(503);
    });

    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let config = write_config(dir.path(), &server.url("/now"));

    rxt(&state)
        .args(["--config", &config, "sync"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("synced=false attempts=2"))
        .stderr(predicate::str::contains("SYNC_FAILED"));
    mock.assert_hits(2);

    rxt(&state)
        .args(["--config", &config, "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("offset_ms=0"))
        .stdout(predicate::str::contains("trust=unverified"));
}

#[test]
fn config_hash_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "http://127.0.0.1:1/now");

    let first = rxt(&dir.path().join("unused.json"))
        .args(["config-hash", &config])
        .assert()
        .success()
        .stdout(predicate::str::contains("config_hash="))
        .get_output()
        .stdout
        .clone();
    let second = rxt(&dir.path().join("unused.json"))
        .args(["config-hash", &config])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(first, second);
}
