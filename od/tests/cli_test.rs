//! CLI surface tests: exit codes and report output

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn submit_rejects_unparseable_document_with_exit_3() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("tasks.yml");
    std::fs::write(&doc, "a: b\n- not a task list\n").unwrap();

    Command::cargo_bin("od")
        .unwrap()
        .arg("submit")
        .arg(&doc)
        .arg("--work-dir")
        .arg(dir.path())
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("parse error"));
}

#[test]
fn validate_approves_clean_single_task_plan() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("tasks.yml");
    std::fs::write(
        &doc,
        "- title: Build parser\n  description: implement the configuration parser module\n",
    )
    .unwrap();

    Command::cargo_bin("od")
        .unwrap()
        .arg("validate")
        .arg(&doc)
        .arg("--work-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"approved\""));
}

#[test]
fn submit_rejects_cyclic_plan_with_exit_2() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("tasks.yml");
    std::fs::write(
        &doc,
        "- title: Task one\n  description: depends on the second task somehow\n  dependencies: [2]\n\
         - title: Task two\n  description: depends on the first task somehow\n  dependencies: [1]\n",
    )
    .unwrap();

    Command::cargo_bin("od")
        .unwrap()
        .arg("submit")
        .arg(&doc)
        .arg("--work-dir")
        .arg(dir.path())
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("circular_dep"));
}

#[test]
fn submit_then_status_round_trip() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("tasks.yml");
    std::fs::write(
        &doc,
        "- title: Build parser\n  description: implement the configuration parser module\n",
    )
    .unwrap();

    Command::cargo_bin("od")
        .unwrap()
        .arg("submit")
        .arg(&doc)
        .arg("--work-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("1 task(s) submitted"));

    Command::cargo_bin("od")
        .unwrap()
        .args(["status", "1"])
        .arg("--work-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"pending\""));
}
