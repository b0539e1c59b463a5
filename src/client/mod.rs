//! Store operations as seen by commands.
//!
//! Callers depend on [`IssueBackend`]; [`connect`] picks the variant. A
//! daemon that answers the probe gets every request ([`DaemonBacked`]);
//! otherwise the command works on the files directly ([`FileBacked`]),
//! serialized with other processes by the sync lock.

mod daemon;
mod file;

pub use daemon::DaemonBacked;
pub use file::FileBacked;

use crate::config::BeadsPaths;
use crate::daemon::ipc::SyncSummary;
use crate::daemon::probe;
use crate::error::Result;
use crate::model::{Comment, Issue, IssueUpdate, ListFilter, NewIssue};
use crate::sync::cycle::GitPlan;
use std::fmt;
use std::time::Duration;

/// How long the connectivity probe waits before falling back.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Which variant served a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Daemon,
    File,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daemon => f.write_str("daemon"),
            Self::File => f.write_str("file"),
        }
    }
}

/// The Store operations every command needs.
pub trait IssueBackend {
    fn kind(&self) -> BackendKind;

    /// # Errors
    ///
    /// Returns `IssueNotFound` for an unknown ID.
    fn get(&self, id: &str) -> Result<Issue>;

    /// # Errors
    ///
    /// Returns validation or storage errors.
    fn create(&self, new: &NewIssue) -> Result<Issue>;

    /// # Errors
    ///
    /// Returns `IssueNotFound`, validation or storage errors.
    fn update(&self, id: &str, patch: &IssueUpdate) -> Result<Issue>;

    /// # Errors
    ///
    /// Returns `IssueNotFound`, validation or storage errors.
    fn add_comment(&self, id: &str, text: &str) -> Result<Comment>;

    /// # Errors
    ///
    /// Returns `IssueNotFound` or storage errors.
    fn delete(&self, id: &str, reason: Option<&str>) -> Result<Issue>;

    /// Issues in creation order.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    fn list(&self, filter: &ListFilter) -> Result<Vec<Issue>>;

    /// Reconcile the Store with the log now. `full` also commits, pulls
    /// and pushes the log; otherwise only the configured auto actions run.
    ///
    /// # Errors
    ///
    /// Returns storage, I/O or lock-timeout errors.
    fn sync(&self, full: bool) -> Result<SyncSummary>;
}

/// Settings shared by both backends.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub actor: String,
    /// Skip the probe and use the files directly.
    pub no_daemon: bool,
    /// Build the Store in memory from the log for each command.
    pub no_db: bool,
    /// Longest wait for the sync lock or a busy database.
    pub lock_timeout: Duration,
    pub rpc_timeout: Duration,
    /// `issue-prefix` from project config, used for in-memory Stores.
    pub issue_prefix: Option<String>,
    /// Auto actions from project config, run by a plain `sync`.
    pub git_plan: GitPlan,
    pub remote: String,
    pub git_timeout: Duration,
}

impl ConnectOptions {
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            no_daemon: false,
            no_db: false,
            lock_timeout: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(10),
            issue_prefix: None,
            git_plan: GitPlan::default(),
            remote: "origin".to_string(),
            git_timeout: Duration::from_secs(60),
        }
    }
}

/// Pick the backend for this repository by probing the daemon socket.
#[must_use]
pub fn connect(paths: &BeadsPaths, options: &ConnectOptions) -> Box<dyn IssueBackend> {
    if !options.no_daemon && !options.no_db {
        if let Some(info) = probe(paths, PROBE_TIMEOUT.min(options.rpc_timeout)) {
            tracing::debug!(pid = info.pid, "using daemon");
            return Box::new(DaemonBacked::new(paths, options));
        }
        tracing::debug!(
            socket = %paths.socket_path.display(),
            "daemon unreachable; operating on files directly"
        );
    }
    Box::new(FileBacked::new(paths.clone(), options))
}
