//! End-to-end tests of the `bd` binary.

mod common;

use assert_cmd::Command;
use common::cli::{BdWorkspace, extract_json_payload, run_bd, run_bd_with_env};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;

fn init(workspace: &BdWorkspace) {
    let run = run_bd(workspace, ["init", "--prefix", "proj"], "init");
    assert!(run.success(), "init failed: {}", run.stderr);
}

fn create(workspace: &BdWorkspace, title: &str, extra: &[&str]) -> String {
    let mut args = vec!["create", title, "--json"];
    args.extend_from_slice(extra);
    let run = run_bd(workspace, &args, "create");
    assert!(run.success(), "create failed: {}", run.stderr);
    let issue: Value = serde_json::from_str(&extract_json_payload(&run.stdout)).unwrap();
    issue["id"].as_str().unwrap().to_string()
}

#[test]
fn e2e_comment_without_daemon_reaches_the_log() {
    let workspace = BdWorkspace::new();
    init(&workspace);
    let id = create(&workspace, "Offline issue", &["--no-daemon"]);
    assert!(id.starts_with("proj-"));

    let run = run_bd(
        &workspace,
        ["comment", &id, "works", "offline", "--no-daemon"],
        "comment",
    );
    assert!(run.success(), "comment failed: {}", run.stderr);
    assert!(run.stdout.contains(&format!("Comment added to {id}")));

    let log = fs::read_to_string(workspace.log_file()).unwrap();
    assert!(log.contains("works offline"), "log: {log}");

    let show = run_bd(&workspace, ["show", &id, "--json"], "show");
    assert!(show.success(), "show failed: {}", show.stderr);
    let shown: Value = serde_json::from_str(&extract_json_payload(&show.stdout)).unwrap();
    let issue = if shown.is_array() { &shown[0] } else { &shown };
    assert_eq!(issue["comments"][0]["text"], "works offline");
}

#[test]
fn e2e_no_db_mode_uses_only_the_log() {
    let workspace = BdWorkspace::new();
    init(&workspace);
    let id = create(&workspace, "Log only", &["--no-db"]);

    let run = run_bd(&workspace, ["comment", &id, "no database", "--no-db"], "comment_no_db");
    assert!(run.success(), "comment failed: {}", run.stderr);

    let list = run_bd(&workspace, ["list", "--no-db", "--json"], "list_no_db");
    assert!(list.success(), "list failed: {}", list.stderr);
    let issues: Value = serde_json::from_str(&extract_json_payload(&list.stdout)).unwrap();
    assert_eq!(issues.as_array().unwrap().len(), 1);
    assert_eq!(issues[0]["comments"][0]["text"], "no database");
}

#[test]
fn e2e_status_fails_without_daemon() {
    let workspace = BdWorkspace::new();
    init(&workspace);

    let run = run_bd(&workspace, ["status"], "status_down");
    assert_eq!(run.status.code(), Some(1));
    assert!(run.stderr.to_lowercase().contains("not running"), "{}", run.stderr);
}

#[test]
fn e2e_stop_without_daemon_is_a_noop() {
    let workspace = BdWorkspace::new();
    init(&workspace);

    let run = run_bd(&workspace, ["stop"], "stop_down");
    assert!(run.success(), "stop failed: {}", run.stderr);
    assert!(run.stdout.contains("not running"));
}

#[test]
fn e2e_daemon_start_serve_stop() {
    let workspace = BdWorkspace::new();
    init(&workspace);

    let start = run_bd(&workspace, ["start"], "start");
    assert!(start.success(), "start failed: {}", start.stderr);
    assert!(start.stdout.contains("Daemon started"), "{}", start.stdout);

    let again = run_bd(&workspace, ["start"], "start_again");
    assert!(again.success(), "second start failed: {}", again.stderr);
    assert!(again.stdout.contains("already running"), "{}", again.stdout);

    let status = run_bd(&workspace, ["status", "--json"], "status_up");
    assert!(status.success(), "status failed: {}", status.stderr);
    let status: Value = serde_json::from_str(&extract_json_payload(&status.stdout)).unwrap();
    assert_eq!(status["state"], "running");

    let id = create(&workspace, "Served by daemon", &[]);
    let comment = run_bd(&workspace, ["comment", &id, "via socket"], "comment_daemon");
    assert!(comment.success(), "comment failed: {}", comment.stderr);

    let stop = run_bd(&workspace, ["stop"], "stop");
    assert!(stop.success(), "stop failed: {}", stop.stderr);
    assert!(stop.stdout.contains("Daemon stopped"));

    let log = fs::read_to_string(workspace.log_file()).unwrap();
    assert!(log.contains("Served by daemon"));
    assert!(log.contains("via socket"));

    let down = run_bd(&workspace, ["status"], "status_after_stop");
    assert_eq!(down.status.code(), Some(1));
}

#[test]
fn e2e_beads_dir_env_selects_repository() {
    let workspace = BdWorkspace::new();
    init(&workspace);
    let elsewhere = tempfile::TempDir::new().unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("bd"));
    cmd.current_dir(elsewhere.path())
        .env("BEADS_DIR", workspace.beads_dir())
        .env("NO_COLOR", "1")
        .args(["create", "From elsewhere", "--no-daemon"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Created proj-"));

    let log = fs::read_to_string(workspace.log_file()).unwrap();
    assert!(log.contains("From elsewhere"));
}

#[test]
fn e2e_sync_full_rewrites_hand_edited_log() {
    let workspace = BdWorkspace::new();
    init(&workspace);
    create(&workspace, "Synced", &["--no-daemon"]);

    let canonical = fs::read_to_string(workspace.log_file()).unwrap();
    fs::write(workspace.log_file(), format!("\n{canonical}\n")).unwrap();

    let run = run_bd_with_env(
        &workspace,
        ["sync", "--full", "--no-daemon", "--json"],
        [("RUST_LOG", "beads_daemon=info")],
        "sync_full",
    );
    assert!(run.success(), "sync failed: {}", run.stderr);
    let summary: Value = serde_json::from_str(&extract_json_payload(&run.stdout)).unwrap();
    assert_eq!(summary["records"], 1);
    assert_eq!(fs::read_to_string(workspace.log_file()).unwrap(), canonical);
}

#[test]
fn e2e_comment_on_missing_issue_exits_nonzero() {
    let workspace = BdWorkspace::new();
    init(&workspace);

    let run = run_bd(&workspace, ["comment", "proj-zzzz", "hello", "--no-daemon"], "comment_missing");
    assert_eq!(run.status.code(), Some(1));
    assert!(run.stderr.contains("proj-zzzz"), "{}", run.stderr);
}

#[test]
fn e2e_commands_fail_outside_a_repository() {
    let workspace = BdWorkspace::new();

    let run = run_bd(&workspace, ["list"], "list_uninitialized");
    assert_eq!(run.status.code(), Some(1));
}

fn git(dir: &std::path::Path, args: &[&str]) -> bool {
    std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .is_ok_and(|o| o.status.success())
}

#[test]
fn e2e_sync_full_commits_and_pushes_the_log() {
    let workspace = BdWorkspace::new();
    let remote = tempfile::TempDir::new().unwrap();
    let ready = git(remote.path(), &["init", "--quiet", "--bare"])
        && git(&workspace.root, &["init", "--quiet"])
        && git(&workspace.root, &["config", "user.email", "test@example.com"])
        && git(&workspace.root, &["config", "user.name", "Test"])
        && git(&workspace.root, &["config", "commit.gpgsign", "false"])
        && git(
            &workspace.root,
            &["remote", "add", "origin", remote.path().to_str().unwrap()],
        );
    if !ready {
        return;
    }
    init(&workspace);
    let id = create(&workspace, "Pushed", &["--no-daemon"]);

    let run = run_bd(&workspace, ["sync", "--full", "--no-daemon", "--json"], "sync_full_git");
    assert!(run.success(), "sync failed: {}", run.stderr);
    let summary: Value = serde_json::from_str(&extract_json_payload(&run.stdout)).unwrap();
    assert_eq!(summary["committed"], true);
    assert_eq!(summary["pushed"], true);

    let branch = std::process::Command::new("git")
        .args(["symbolic-ref", "--short", "HEAD"])
        .current_dir(&workspace.root)
        .output()
        .unwrap();
    let branch = String::from_utf8_lossy(&branch.stdout).trim().to_string();
    let shown = std::process::Command::new("git")
        .args(["show", &format!("{branch}:.beads/issues.jsonl")])
        .current_dir(remote.path())
        .output()
        .unwrap();
    assert!(shown.status.success());
    assert!(String::from_utf8_lossy(&shown.stdout).contains(&id));
}
