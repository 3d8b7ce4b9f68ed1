use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("facture")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn config_show_prints_json() {
    Command::cargo_bin("facture")
        .unwrap()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("arbiter"));
}

#[test]
fn config_init_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    Command::cargo_bin("facture")
        .unwrap()
        .args(["config", "init", "--output"])
        .arg(&path)
        .assert()
        .success();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("timeout_secs"));
}

#[test]
fn process_rejects_missing_input() {
    Command::cargo_bin("facture")
        .unwrap()
        .args(["process", "no-such-page.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn batch_rejects_empty_glob() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = dir.path().join("*.png");

    Command::cargo_bin("facture")
        .unwrap()
        .arg("batch")
        .arg(pattern)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No matching files"));
}
