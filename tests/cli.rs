use assert_cmd::Command;
use fs2::FileExt;
use predicates::prelude::*;
use std::fs::OpenOptions;

fn cow() -> Command {
    Command::cargo_bin("cow").unwrap()
}

#[test]
fn test_help_exits_successfully() {
    cow().arg("--help").assert().success();
}

#[test]
fn test_help_lists_all_subcommands() {
    let assert = cow().arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for cmd in ["add", "clean", "enable-cache", "disable-cache"] {
        assert!(output.contains(cmd), "help output should list '{cmd}'");
    }
}

#[test]
fn test_no_args_fails() {
    cow().assert().failure();
}

#[test]
fn test_unknown_subcommand_fails() {
    cow()
        .arg("bogus")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_add_missing_positional_args_fails() {
    cow().arg("add").assert().failure();
}

#[test]
fn test_lock_contention_exits_with_code_2() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("cow.lock");
    let held = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .unwrap();
    held.lock_exclusive().unwrap();

    cow()
        .args([
            "-l",
            lock_path.to_str().unwrap(),
            "clean",
            "/dev/vg0/vm1",
            dir.path().join("out").to_str().unwrap(),
        ])
        .assert()
        .code(2);
}
