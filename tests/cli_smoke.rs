use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;

#[test]
fn help_lists_commands() {
    let mut cmd = Command::cargo_bin("gazette").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(contains("read"))
        .stdout(contains("extract"))
        .stdout(contains("csv"))
        .stdout(contains("sections"));
}

#[test]
fn csv_requires_a_document() {
    let mut cmd = Command::cargo_bin("gazette").unwrap();
    cmd.arg("csv");
    cmd.assert().failure();
}
