//! The per-repository daemon.
//!
//! One daemon owns a repository's Store while it runs: it holds the
//! repository lock, serves requests over a Unix socket and keeps the log
//! file in step with the Store in the background.
//!
//! Lifecycle: `Stopped → Starting → Running → Stopping → Stopped`.

pub mod ipc;
pub mod lock;
pub mod repo;
pub mod scheduler;
pub mod server;

use crate::config::{BeadsPaths, DaemonConfig};
use crate::daemon::ipc::{DaemonClient, PingInfo};
use crate::daemon::lock::DaemonLock;
use crate::daemon::repo::RepoCore;
use crate::daemon::scheduler::Scheduler;
use crate::error::{BeadsError, Result};
use crate::sync::{ReconcileReport, SyncState};
use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Daemon lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl DaemonState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
        }
    }
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Lock-free holder of the lifecycle state, readable from any thread.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    #[must_use]
    pub const fn new(state: DaemonState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    #[must_use]
    pub fn get(&self) -> DaemonState {
        DaemonState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: DaemonState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Why the daemon is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A client sent `shutdown`.
    Requested,
    /// SIGINT/SIGTERM.
    Signal,
    /// An unrecoverable background error.
    Fatal(String),
}

/// Answer to `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub state: DaemonState,
    pub pid: u32,
    pub version: String,
    pub beads_dir: PathBuf,
    pub socket: PathBuf,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
    /// `None` while a write or reconcile holds the Store.
    pub records: Option<usize>,
    pub in_flight: usize,
    /// A git working tree was found for commit/pull/push.
    pub git: bool,
    pub sync: SyncState,
    pub config: DaemonConfig,
}

struct Running {
    core: Arc<RepoCore>,
    lock: Arc<DaemonLock>,
    acceptor: JoinHandle<()>,
    scheduler: JoinHandle<()>,
    stop_scheduler: Sender<()>,
}

/// One repository's daemon.
pub struct Daemon {
    paths: BeadsPaths,
    config: DaemonConfig,
    lifecycle: Arc<StateCell>,
    shutdown_tx: Sender<ShutdownReason>,
    shutdown_rx: Receiver<ShutdownReason>,
    running: Option<Running>,
}

impl Daemon {
    #[must_use]
    pub fn new(paths: BeadsPaths, config: DaemonConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = unbounded();
        Self {
            paths,
            config,
            lifecycle: Arc::new(StateCell::new(DaemonState::Stopped)),
            shutdown_tx,
            shutdown_rx,
            running: None,
        }
    }

    /// Take the repository lock, load the Store and start serving.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if another daemon (or this one) holds the
    /// lock, a `Config` error for invalid settings, or the storage/I/O
    /// error that prevented startup. The daemon is `Stopped` on error.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(BeadsError::AlreadyRunning {
                path: self.paths.lock_path.clone(),
                pid: Some(std::process::id()),
            });
        }
        self.config.validate()?;

        self.lifecycle.set(DaemonState::Starting);
        match self.launch() {
            Ok(running) => {
                self.running = Some(running);
                self.lifecycle.set(DaemonState::Running);
                tracing::info!(
                    beads_dir = %self.paths.beads_dir.display(),
                    socket = %self.paths.socket_path.display(),
                    pid = std::process::id(),
                    "daemon running"
                );
                Ok(())
            }
            Err(err) => {
                self.lifecycle.set(DaemonState::Stopped);
                Err(err)
            }
        }
    }

    fn launch(&self) -> Result<Running> {
        let lock = Arc::new(DaemonLock::acquire(
            &self.paths.lock_path,
            &self.paths.socket_path,
        )?);

        let (mutation_tx, mutation_rx) = bounded(1);
        let core = Arc::new(RepoCore::open(
            self.paths.clone(),
            self.config.clone(),
            Arc::clone(&self.lifecycle),
            mutation_tx,
            self.shutdown_tx.clone(),
        )?);

        let listener = bind_socket(&self.paths.socket_path)?;
        let acceptor = {
            let core = Arc::clone(&core);
            thread::Builder::new()
                .name("bd-acceptor".to_string())
                .spawn(move || server::run_acceptor(&listener, &core))?
        };

        let (stop_scheduler, stop_rx) = bounded(1);
        let scheduler = Scheduler::new(Arc::clone(&core), Arc::clone(&lock), mutation_rx, stop_rx);
        let scheduler = match thread::Builder::new()
            .name("bd-scheduler".to_string())
            .spawn(move || scheduler.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                core.stop_listening();
                let _ = acceptor.join();
                let _ = fs::remove_file(&self.paths.socket_path);
                return Err(err.into());
            }
        };

        Ok(Running {
            core,
            lock,
            acceptor,
            scheduler,
            stop_scheduler,
        })
    }

    /// Current lifecycle state. Never blocks.
    #[must_use]
    pub fn state(&self) -> DaemonState {
        self.lifecycle.get()
    }

    /// Status snapshot, `None` unless the daemon is started.
    #[must_use]
    pub fn status(&self) -> Option<DaemonStatus> {
        self.running.as_ref().map(|running| running.core.status())
    }

    #[must_use]
    pub const fn paths(&self) -> &BeadsPaths {
        &self.paths
    }

    /// Handle for requesting shutdown from another thread or a signal handler.
    #[must_use]
    pub fn shutdown_handle(&self) -> Sender<ShutdownReason> {
        self.shutdown_tx.clone()
    }

    /// Block until something requests shutdown.
    #[must_use]
    pub fn wait_for_shutdown(&self) -> ShutdownReason {
        self.shutdown_rx.recv().unwrap_or(ShutdownReason::Requested)
    }

    /// Stop serving, drain in-flight requests, run a final reconcile and
    /// release the lock. Stopping a stopped daemon is a no-op.
    ///
    /// The lock is released even when the final reconcile fails; that
    /// error is returned afterwards.
    ///
    /// # Errors
    ///
    /// Returns the final reconcile's error.
    pub fn stop(&mut self) -> Result<Option<ReconcileReport>> {
        let Some(running) = self.running.take() else {
            return Ok(None);
        };
        self.lifecycle.set(DaemonState::Stopping);
        tracing::info!("daemon stopping");

        let Running {
            core,
            lock,
            acceptor,
            scheduler,
            stop_scheduler,
        } = running;

        core.begin_stop();
        let _ = stop_scheduler.send(());
        if scheduler.join().is_err() {
            tracing::error!("scheduler thread panicked");
        }

        if !core.drain(self.config.drain_timeout) {
            tracing::warn!(
                in_flight = core.in_flight(),
                timeout = ?self.config.drain_timeout,
                "in-flight requests did not finish; stopping anyway"
            );
        }

        core.stop_listening();
        if acceptor.join().is_err() {
            tracing::error!("acceptor thread panicked");
        }

        let report = core.reconcile(false);
        match &report {
            Ok(report) => tracing::info!(
                records = report.records,
                exported = report.exported,
                "final reconcile complete"
            ),
            Err(err) => tracing::error!(error = %err, "final reconcile failed"),
        }

        if let Err(err) = fs::remove_file(&self.paths.socket_path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(error = %err, "could not remove socket");
            }
        }
        drop(core);
        drop(lock);
        self.lifecycle.set(DaemonState::Stopped);
        tracing::info!("daemon stopped");

        report.map(Some)
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if self.running.is_some() {
            let _ = self.stop();
        }
    }
}

/// Bind the socket, replacing a stale one. Only called with the lock held,
/// so any existing socket belongs to a dead daemon.
fn bind_socket(path: &Path) -> Result<UnixListener> {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(socket = %path.display(), "removed stale socket"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    let listener = UnixListener::bind(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Ask the repository's socket whether a daemon is answering.
#[must_use]
pub fn probe(paths: &BeadsPaths, timeout: Duration) -> Option<PingInfo> {
    match DaemonClient::new(&paths.socket_path, timeout).ping() {
        Ok(info) => Some(info),
        Err(err) => {
            tracing::debug!(error = %err, "daemon probe failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::ipc::{Request, ResponsePayload};
    use crate::model::NewIssue;
    use tempfile::TempDir;

    fn paths(temp: &TempDir) -> BeadsPaths {
        let dir = temp.path().join(".beads");
        fs::create_dir_all(&dir).unwrap();
        BeadsPaths::resolve(&dir).unwrap()
    }

    #[test]
    fn lifecycle_states() {
        let temp = TempDir::new().unwrap();
        let mut daemon = Daemon::new(paths(&temp), DaemonConfig::default());
        assert_eq!(daemon.state(), DaemonState::Stopped);

        daemon.start().unwrap();
        assert_eq!(daemon.state(), DaemonState::Running);
        assert_eq!(daemon.status().unwrap().state, DaemonState::Running);
        assert!(matches!(
            daemon.start(),
            Err(BeadsError::AlreadyRunning { .. })
        ));

        daemon.stop().unwrap();
        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert!(daemon.stop().unwrap().is_none());
        assert!(!daemon.paths().socket_path.exists());
    }

    #[test]
    fn second_daemon_on_same_repo_is_refused() {
        let temp = TempDir::new().unwrap();
        let mut first = Daemon::new(paths(&temp), DaemonConfig::default());
        first.start().unwrap();

        let mut second = Daemon::new(paths(&temp), DaemonConfig::default());
        assert!(matches!(
            second.start(),
            Err(BeadsError::AlreadyRunning { .. })
        ));
        assert_eq!(second.state(), DaemonState::Stopped);

        first.stop().unwrap();
        second.start().unwrap();
        second.stop().unwrap();
    }

    #[test]
    fn socket_serves_requests_and_shutdown() {
        let temp = TempDir::new().unwrap();
        let mut daemon = Daemon::new(paths(&temp), DaemonConfig::default());
        daemon.start().unwrap();

        let info = probe(daemon.paths(), Duration::from_secs(2)).unwrap();
        assert_eq!(info.pid, std::process::id());

        let client = DaemonClient::new(&daemon.paths().socket_path, Duration::from_secs(5));
        let created = match client
            .request(&Request::Create {
                issue: NewIssue::titled("via socket"),
                actor: "tester".to_string(),
            })
            .unwrap()
        {
            ResponsePayload::Issue(issue) => issue,
            other => panic!("unexpected payload: {other:?}"),
        };
        assert_eq!(created.title, "via socket");

        let payload = client.request(&Request::Shutdown).unwrap();
        assert!(matches!(payload, ResponsePayload::ShuttingDown));
        assert_eq!(daemon.wait_for_shutdown(), ShutdownReason::Requested);

        let report = daemon.stop().unwrap().unwrap();
        assert_eq!(report.records, 1);
        let log = fs::read_to_string(&daemon.paths().log_path).unwrap();
        assert!(log.contains("via socket"));
        assert!(probe(daemon.paths(), Duration::from_millis(200)).is_none());
    }
}
