//! CLI exit-code behavior, exercised as a black-box binary.

use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn invalid_config_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    std::fs::write(&config_path, r#"{"trade_pairs":[]}"#).unwrap();

    Command::cargo_bin("tradepulse")
        .unwrap()
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .code(1)
        .stderr(contains("failed to load configuration"));
}

#[test]
fn malformed_json_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    std::fs::write(&config_path, "{ not json").unwrap();

    Command::cargo_bin("tradepulse")
        .unwrap()
        .arg("--config")
        .arg(&config_path)
        .assert()
        .failure()
        .code(1);
}
