#![allow(dead_code)]

use beads_daemon::config::BeadsPaths;
use beads_daemon::storage::SqliteStorage;
use std::fs;
use std::sync::Once;
use std::time::Instant;
use tempfile::TempDir;
use tracing::info;

pub mod cli;
pub mod fixtures;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        beads_daemon::logging::init_test_logging();
    });
}

pub struct TestLogGuard {
    name: String,
    start: Instant,
}

impl TestLogGuard {
    fn new(name: &str) -> Self {
        init_test_logging();
        info!("{name}: starting");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TestLogGuard {
    fn drop(&mut self) {
        info!(
            "{}: assertions passed (elapsed {:?})",
            self.name,
            self.start.elapsed()
        );
    }
}

pub fn test_log(name: &str) -> TestLogGuard {
    TestLogGuard::new(name)
}

pub fn test_db() -> SqliteStorage {
    init_test_logging();
    SqliteStorage::open_memory().expect("Failed to create test database")
}

/// A fresh `.beads` directory inside a temp dir, with resolved paths.
pub fn test_repo() -> (BeadsPaths, TempDir) {
    init_test_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let beads = dir.path().join(".beads");
    fs::create_dir_all(&beads).expect("Failed to create .beads");
    let paths = BeadsPaths::resolve(&beads).expect("Failed to resolve paths");
    (paths, dir)
}
