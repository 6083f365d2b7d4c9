//! End-to-end coverage of the `bisync` binary's CLI surface: a profile
//! file on disk, invoked as a real child process, asserting on stdout
//! and the state file it leaves behind.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_profile(profiles_dir: &Path, name: &str, a: &Path, b: &Path) {
    let contents = format!(
        r#"
[profile]
name = "{name}"
description = "CLI test profile"

[endpoints.a]
type = "local"
path = "{a}"

[endpoints.b]
type = "local"
path = "{b}"

[conflict]
policy = "newest"
"#,
        name = name,
        a = a.display(),
        b = b.display(),
    );
    std::fs::write(profiles_dir.join(format!("{name}.toml")), contents).unwrap();
}

#[test]
fn run_propagates_new_file_and_prints_summary() {
    let profiles_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    std::fs::write(a.path().join("hello.txt"), b"hello").unwrap();
    write_profile(profiles_dir.path(), "cli-run", a.path(), b.path());

    Command::cargo_bin("bisync")
        .unwrap()
        .arg("--profiles-dir")
        .arg(profiles_dir.path())
        .arg("--state-dir")
        .arg(state_dir.path())
        .arg("run")
        .arg("cli-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("applied 1 operation(s)"));

    assert_eq!(std::fs::read(b.path().join("hello.txt")).unwrap(), b"hello");
    assert!(state_dir.path().join("cli-run.json").exists());
}

#[test]
fn dry_run_leaves_destination_untouched() {
    let profiles_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    std::fs::write(a.path().join("hello.txt"), b"hello").unwrap();
    write_profile(profiles_dir.path(), "cli-dry-run", a.path(), b.path());

    Command::cargo_bin("bisync")
        .unwrap()
        .arg("--profiles-dir")
        .arg(profiles_dir.path())
        .arg("--state-dir")
        .arg(state_dir.path())
        .arg("run")
        .arg("cli-dry-run")
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("dry-run: 1 operation(s) planned"));

    assert!(!b.path().join("hello.txt").exists());
}

#[test]
fn conflicts_subcommand_reports_no_conflicts_for_a_fresh_profile() {
    let profiles_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    write_profile(profiles_dir.path(), "cli-no-conflict", a.path(), b.path());

    Command::cargo_bin("bisync")
        .unwrap()
        .arg("--profiles-dir")
        .arg(profiles_dir.path())
        .arg("--state-dir")
        .arg(state_dir.path())
        .arg("conflicts")
        .arg("cli-no-conflict")
        .assert()
        .success()
        .stdout(predicate::str::contains("No conflicts recorded"));
}

#[test]
fn conflicts_subcommand_reports_a_recorded_manual_copy_both_conflict() {
    let profiles_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let contents = format!(
        r#"
[profile]
name = "cli-conflict"
description = "CLI conflict test"

[endpoints.a]
type = "local"
path = "{a}"

[endpoints.b]
type = "local"
path = "{b}"

[conflict]
policy = "manual"
manual_behavior = "copy_both"
merge_text_files = false
"#,
        a = a.path().display(),
        b = b.path().display(),
    );
    std::fs::write(profiles_dir.path().join("cli-conflict.toml"), contents).unwrap();

    // seed identical, already-agreed state on both sides with a first run
    std::fs::write(a.path().join("f.bin"), b"\x00shared").unwrap();
    std::fs::write(b.path().join("f.bin"), b"\x00shared").unwrap();
    Command::cargo_bin("bisync")
        .unwrap()
        .arg("--profiles-dir")
        .arg(profiles_dir.path())
        .arg("--state-dir")
        .arg(state_dir.path())
        .arg("run")
        .arg("cli-conflict")
        .assert()
        .success();

    // now both sides diverge independently from that agreed state, with
    // deliberately unequal lengths so the planner's size-based change
    // detection doesn't depend on sub-second mtime resolution
    std::fs::write(a.path().join("f.bin"), b"\x00a-changed-on-a").unwrap();
    std::fs::write(b.path().join("f.bin"), b"\x00b-changed-on-b-longer").unwrap();
    Command::cargo_bin("bisync")
        .unwrap()
        .arg("--profiles-dir")
        .arg(profiles_dir.path())
        .arg("--state-dir")
        .arg(state_dir.path())
        .arg("run")
        .arg("cli-conflict")
        .assert()
        .success();

    Command::cargo_bin("bisync")
        .unwrap()
        .arg("--profiles-dir")
        .arg(profiles_dir.path())
        .arg("--state-dir")
        .arg(state_dir.path())
        .arg("conflicts")
        .arg("cli-conflict")
        .assert()
        .success()
        .stdout(predicate::str::contains("manual_copy_both"));
}
