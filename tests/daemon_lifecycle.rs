//! In-process daemon: lifecycle, single-instance locking, concurrent
//! clients over the socket, and the file fallback.

mod common;

use beads_daemon::BeadsError;
use beads_daemon::client::{BackendKind, ConnectOptions, connect};
use beads_daemon::config::{DaemonConfig, open_storage};
use beads_daemon::daemon::ipc::{DaemonClient, Request, ResponsePayload};
use beads_daemon::daemon::{Daemon, DaemonState, lock, probe};
use beads_daemon::model::{ListFilter, NewIssue};
use beads_daemon::sync::{export_records, import_records};
use chrono::Duration as ChronoDuration;
use common::{test_log, test_repo};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn second_start_reports_already_running_with_pid() {
    let _log = test_log("second_start_reports_already_running_with_pid");
    let (paths, _temp) = test_repo();
    let mut first = Daemon::new(paths.clone(), DaemonConfig::default());
    first.start().unwrap();
    assert!(lock::is_held(&paths.lock_path));

    let mut second = Daemon::new(paths.clone(), DaemonConfig::default());
    match second.start().unwrap_err() {
        BeadsError::AlreadyRunning { pid, .. } => assert_eq!(pid, Some(std::process::id())),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(second.state(), DaemonState::Stopped);

    first.stop().unwrap();
    assert!(!lock::is_held(&paths.lock_path));
}

#[test]
fn status_reports_running_state() {
    let _log = test_log("status_reports_running_state");
    let (paths, _temp) = test_repo();
    let mut daemon = Daemon::new(paths.clone(), DaemonConfig::default());
    daemon.start().unwrap();

    let client = DaemonClient::new(&paths.socket_path, Duration::from_secs(5));
    let status = match client.request(&Request::Status).unwrap() {
        ResponsePayload::Status(status) => *status,
        other => panic!("unexpected payload: {other:?}"),
    };
    assert_eq!(status.state, DaemonState::Running);
    assert_eq!(status.pid, std::process::id());
    assert!(matches!(status.records, Some(0) | None));
    assert!(!status.git);

    daemon.stop().unwrap();
}

#[test]
fn concurrent_clients_lose_no_updates() {
    let _log = test_log("concurrent_clients_lose_no_updates");
    let (paths, _temp) = test_repo();
    let mut daemon = Daemon::new(paths.clone(), DaemonConfig::default());
    daemon.start().unwrap();

    let options = ConnectOptions::new("seed");
    let shared = connect(&paths, &options)
        .create(&NewIssue::titled("shared"))
        .unwrap();
    let paths = Arc::new(paths);

    let workers: Vec<_> = (0..6)
        .map(|n| {
            let paths = Arc::clone(&paths);
            let shared_id = shared.id.clone();
            thread::spawn(move || {
                let backend = connect(&paths, &ConnectOptions::new(format!("worker{n}")));
                assert_eq!(backend.kind(), BackendKind::Daemon);
                let own = backend.create(&NewIssue::titled(format!("own {n}"))).unwrap();
                for k in 0..5 {
                    backend.add_comment(&shared_id, &format!("w{n} c{k}")).unwrap();
                }
                own.id
            })
        })
        .collect();
    let own_ids: HashSet<String> = workers.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(own_ids.len(), 6);

    let report = daemon.stop().unwrap().unwrap();
    assert_eq!(report.records, 7);

    let store = open_storage(&paths, None).unwrap();
    let shared = store.get_issue(&shared.id).unwrap().unwrap();
    assert_eq!(shared.comments.len(), 30);
    let comment_ids: HashSet<i64> = shared.comments.iter().map(|c| c.id).collect();
    assert_eq!(comment_ids.len(), 30);

    let log = fs::read_to_string(&paths.log_path).unwrap();
    assert_eq!(log, export_records(&store.snapshot().unwrap()).unwrap());
}

#[test]
fn clients_fall_back_to_files_after_stop() {
    let _log = test_log("clients_fall_back_to_files_after_stop");
    let (paths, _temp) = test_repo();
    let mut daemon = Daemon::new(paths.clone(), DaemonConfig::default());
    daemon.start().unwrap();

    let options = ConnectOptions::new("alice");
    let online = connect(&paths, &options);
    assert_eq!(online.kind(), BackendKind::Daemon);
    let issue = online.create(&NewIssue::titled("made online")).unwrap();

    daemon.stop().unwrap();
    assert!(probe(&paths, Duration::from_millis(200)).is_none());
    assert!(matches!(
        online.get(&issue.id),
        Err(BeadsError::Unreachable { .. })
    ));

    let offline = connect(&paths, &options);
    assert_eq!(offline.kind(), BackendKind::File);
    offline.add_comment(&issue.id, "made offline").unwrap();

    let records = import_records(&fs::read_to_string(&paths.log_path).unwrap()).records;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].comments[0].body, "made offline");
}

#[test]
fn explicit_sync_picks_up_external_log_edits() {
    let _log = test_log("explicit_sync_picks_up_external_log_edits");
    let (paths, _temp) = test_repo();
    let mut daemon = Daemon::new(paths.clone(), DaemonConfig::default());
    daemon.start().unwrap();

    let backend = connect(&paths, &ConnectOptions::new("alice"));
    let issue = backend.create(&NewIssue::titled("local title")).unwrap();
    let first = backend.sync(false).unwrap();
    assert_eq!(first.records, 1);

    let mut edited = backend.get(&issue.id).unwrap();
    edited.title = "edited by git pull".to_string();
    edited.updated_at += ChronoDuration::seconds(30);
    fs::write(&paths.log_path, export_records(&[edited]).unwrap()).unwrap();

    // The heartbeat may reconcile first; either way the edit is in the Store.
    let summary = backend.sync(false).unwrap();
    assert_eq!(summary.records, 1);
    assert_eq!(backend.get(&issue.id).unwrap().title, "edited by git pull");

    let listed = backend.list(&ListFilter::default()).unwrap();
    assert_eq!(listed.len(), 1);

    daemon.stop().unwrap();
}

#[test]
fn shutdown_request_stops_accepting_work() {
    let _log = test_log("shutdown_request_stops_accepting_work");
    let (paths, _temp) = test_repo();
    let mut daemon = Daemon::new(paths.clone(), DaemonConfig::default());
    daemon.start().unwrap();

    let client = DaemonClient::new(&paths.socket_path, Duration::from_secs(5));
    assert!(matches!(
        client.request(&Request::Shutdown).unwrap(),
        ResponsePayload::ShuttingDown
    ));
    let _ = daemon.wait_for_shutdown();
    daemon.stop().unwrap();

    assert_eq!(daemon.state(), DaemonState::Stopped);
    assert!(!paths.socket_path.exists());
    assert!(matches!(
        client.request(&Request::Ping),
        Err(BeadsError::Unreachable { .. })
    ));
}
