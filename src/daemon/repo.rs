//! Shared repository state behind the daemon's threads.
//!
//! Lock order is `sync_guard` → sync lock file → `gate` → `writer` →
//! `sync`. `gate` gives read/write discipline over the Store: readers take
//! it shared and borrow a read-only connection from the pool, writers take
//! it exclusive and use the single writer connection. Network I/O never
//! happens while `gate` is held.

use crate::config::{BeadsPaths, DaemonConfig};
use crate::daemon::ipc::{PingInfo, shutting_down};
use crate::daemon::lock::SyncLock;
use crate::daemon::{DaemonState, DaemonStatus, ShutdownReason, StateCell};
use crate::error::{BeadsError, Result, Severity};
use crate::model::{Comment, Issue, IssueUpdate, ListFilter, NewIssue};
use crate::storage::SqliteStorage;
use crate::sync::cycle::{COMMIT_MESSAGE, ExplicitSync, GitPlan, SyncOutcome};
use crate::sync::git::{GitRepo, RemoteRef};
use crate::sync::{ReconcileReport, Reconciler, SyncState};
use chrono::{DateTime, Utc};
use crossbeam::channel::Sender;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::thread;
use std::time::{Duration, Instant};

const READER_POOL: usize = 4;

/// Repository core shared by the acceptor, client handlers and scheduler.
pub struct RepoCore {
    paths: BeadsPaths,
    config: DaemonConfig,
    lifecycle: Arc<StateCell>,
    started_at: DateTime<Utc>,

    gate: RwLock<()>,
    writer: Mutex<SqliteStorage>,
    readers: ArrayQueue<SqliteStorage>,
    sync: Mutex<SyncState>,

    sync_guard: Mutex<()>,
    reconciler: Reconciler,
    git: Option<GitRepo>,
    commit_pending: AtomicBool,
    push_pending: AtomicBool,

    in_flight: AtomicUsize,
    stopping: AtomicBool,
    listening: AtomicBool,
    mutations: Sender<()>,
    shutdown: Sender<ShutdownReason>,
}

/// Marks one request as in flight until dropped.
pub struct InFlight<'a> {
    core: &'a RepoCore,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.core.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RepoCore {
    /// Open the Store and bring it in line with the log.
    ///
    /// # Errors
    ///
    /// Returns storage or I/O errors from opening or the initial reconcile.
    pub(crate) fn open(
        paths: BeadsPaths,
        config: DaemonConfig,
        lifecycle: Arc<StateCell>,
        mutations: Sender<()>,
        shutdown: Sender<ShutdownReason>,
    ) -> Result<Self> {
        let writer = SqliteStorage::open(&paths.db_path)?;
        let state = SyncState::rebuild(&writer)?;
        let reconciler = Reconciler::new(&paths.beads_dir, &paths.log_path);

        // Discovered even with every auto action off: `sync --full` uses it.
        let wants_git = config.auto_commit || config.auto_pull || config.auto_push;
        let git = match GitRepo::discover(&paths.beads_dir, config.git_timeout) {
            Ok(Some(repo)) => Some(repo),
            Ok(None) => {
                if wants_git {
                    tracing::warn!(
                        beads_dir = %paths.beads_dir.display(),
                        "not inside a git working tree; auto-commit/pull/push will fail until it is"
                    );
                }
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "git discovery failed");
                None
            }
        };

        let core = Self {
            push_pending: AtomicBool::new(config.auto_push),
            paths,
            config,
            lifecycle,
            started_at: Utc::now(),
            gate: RwLock::new(()),
            writer: Mutex::new(writer),
            readers: ArrayQueue::new(READER_POOL),
            sync: Mutex::new(state),
            sync_guard: Mutex::new(()),
            reconciler,
            git,
            commit_pending: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            listening: AtomicBool::new(true),
            mutations,
            shutdown,
        };

        let report = core.reconcile(false)?;
        tracing::info!(
            records = report.records,
            imported = report.imported,
            exported = report.exported,
            "store loaded"
        );
        Ok(core)
    }

    #[must_use]
    pub const fn config(&self) -> &DaemonConfig {
        &self.config
    }

    #[must_use]
    pub const fn paths(&self) -> &BeadsPaths {
        &self.paths
    }

    // === Request accounting ===

    /// Register a request; refused once the daemon is stopping.
    ///
    /// # Errors
    ///
    /// Returns a `SHUTTING_DOWN` error after [`RepoCore::begin_stop`].
    pub fn enter(&self) -> Result<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.stopping.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(shutting_down());
        }
        Ok(InFlight { core: self })
    }

    pub fn begin_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Wait for in-flight requests to finish. Returns `false` on timeout.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    pub fn request_shutdown(&self, reason: ShutdownReason) {
        tracing::info!(?reason, "shutdown requested");
        let _ = self.shutdown.send(reason);
    }

    // === Store operations ===

    /// # Errors
    ///
    /// Returns `IssueNotFound` for an unknown ID.
    pub fn get(&self, id: &str) -> Result<Issue> {
        self.with_reader(|store| store.require_issue(id))
    }

    /// Issues in creation order.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Issue>> {
        self.with_reader(|store| store.list_issues(filter).collect())
    }

    /// # Errors
    ///
    /// Returns validation or database errors.
    pub fn create(&self, new: &NewIssue, actor: &str) -> Result<Issue> {
        self.mutate(|store| store.create_issue(new, actor))
    }

    /// # Errors
    ///
    /// Returns `IssueNotFound`, validation or database errors.
    pub fn update(&self, id: &str, patch: &IssueUpdate, actor: &str) -> Result<Issue> {
        self.mutate(|store| {
            let id = store.resolve_id(id)?;
            store.update_issue(&id, patch, actor)
        })
    }

    /// # Errors
    ///
    /// Returns `IssueNotFound`, validation or database errors.
    pub fn add_comment(&self, id: &str, text: &str, author: &str) -> Result<Comment> {
        self.mutate(|store| {
            let id = store.resolve_id(id)?;
            store.add_comment(&id, author, text)
        })
    }

    /// # Errors
    ///
    /// Returns `IssueNotFound` or database errors.
    pub fn delete(&self, id: &str, actor: &str, reason: Option<&str>) -> Result<Issue> {
        self.mutate(|store| {
            let id = store.resolve_id(id)?;
            store.delete_issue(&id, actor, reason)
        })
    }

    fn with_reader<R>(&self, f: impl FnOnce(&SqliteStorage) -> Result<R>) -> Result<R> {
        let _gate = read(&self.gate);
        let store = match self.readers.pop() {
            Some(store) => store,
            None => SqliteStorage::open_read_only(&self.paths.db_path)?,
        };
        let result = f(&store);
        let _ = self.readers.push(store);
        result
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut SqliteStorage) -> Result<R>) -> Result<R> {
        let _gate = write(&self.gate);
        let result = f(&mut lock(&self.writer))?;
        lock(&self.sync).dirty = true;
        let _ = self.mutations.try_send(());
        Ok(result)
    }

    // === Sync cycles ===

    /// Reconcile the Store with the log.
    ///
    /// # Errors
    ///
    /// Returns storage, I/O or lock-timeout errors.
    pub fn reconcile(&self, full: bool) -> Result<ReconcileReport> {
        let _cycle = lock(&self.sync_guard);
        self.reconcile_locked(full)
    }

    fn reconcile_locked(&self, full: bool) -> Result<ReconcileReport> {
        let _file = self.sync_lock()?;
        self.reconcile_store(full)
    }

    fn sync_lock(&self) -> Result<SyncLock> {
        SyncLock::acquire(&self.paths.sync_lock_path, self.config.rpc_timeout)
    }

    /// The Store half of a reconcile; the caller holds the sync lock file.
    fn reconcile_store(&self, full: bool) -> Result<ReconcileReport> {
        let _gate = write(&self.gate);
        let mut store = lock(&self.writer);
        let mut state = lock(&self.sync).clone();

        let report = if full {
            self.reconciler.reconcile_full(&mut store, &mut state)
        } else {
            self.reconciler.reconcile(&mut store, &mut state)
        };
        *lock(&self.sync) = state;

        let report = report?;
        if report.exported {
            self.commit_pending.store(true, Ordering::SeqCst);
        }
        Ok(report)
    }

    /// Explicit sync. With `full` the log is re-read and rewritten and
    /// commit, pull and push all run whatever the auto-* settings say;
    /// otherwise only the enabled actions run. Either way a push deferred
    /// on a detached `HEAD` goes to the remote's default branch here.
    ///
    /// # Errors
    ///
    /// Returns reconcile errors and `RemoteSync` for git failures.
    pub fn sync_now(&self, full: bool) -> Result<SyncOutcome> {
        let _cycle = lock(&self.sync_guard);
        let plan = if full {
            GitPlan::ALL
        } else {
            GitPlan {
                commit: self.config.auto_commit,
                pull: self.config.auto_pull,
                push: self.config.auto_push,
            }
        };
        let explicit = ExplicitSync {
            git: self.git.as_ref(),
            plan,
            remote: &self.config.remote,
            log_path: &self.paths.log_path,
        };
        let outcome = explicit.run(full, || self.sync_lock(), |full| self.reconcile_store(full))?;

        let now = Utc::now();
        let mut state = lock(&self.sync);
        if plan.commit && self.git.is_some() {
            self.commit_pending.store(false, Ordering::SeqCst);
        }
        if outcome.git.committed {
            self.push_pending.store(true, Ordering::SeqCst);
            state.last_commit_at = Some(now);
        }
        if outcome.git.pulled {
            state.last_pull_at = Some(now);
        }
        if outcome.git.pushed {
            self.push_pending.store(false, Ordering::SeqCst);
            state.last_push_at = Some(now);
        }
        Ok(outcome)
    }

    /// Export pending changes and, with auto-commit, commit the log.
    /// Returns whether a commit was made.
    ///
    /// # Errors
    ///
    /// Returns reconcile errors or `RemoteSync` for git failures.
    pub fn commit_cycle(&self) -> Result<bool> {
        let _cycle = lock(&self.sync_guard);
        self.reconcile_locked(false)?;
        if self.config.auto_commit {
            self.commit_locked()
        } else {
            Ok(false)
        }
    }

    fn commit_locked(&self) -> Result<bool> {
        if !self.commit_pending.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let git = self.git_repo("commit")?;
        let committed = git.commit_path(&self.paths.log_path, COMMIT_MESSAGE)?;
        self.commit_pending.store(false, Ordering::SeqCst);
        if committed {
            self.push_pending.store(true, Ordering::SeqCst);
            lock(&self.sync).last_commit_at = Some(Utc::now());
        }
        Ok(committed)
    }

    /// Fetch and merge the upstream branch, then import what changed.
    /// Returns whether anything was imported.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` for git failures (including merge conflicts)
    /// and reconcile errors.
    pub fn pull_cycle(&self) -> Result<bool> {
        let _cycle = lock(&self.sync_guard);
        let git = self.git_repo("pull")?;
        let upstream = git
            .upstream()?
            .ok_or_else(|| BeadsError::remote("pull", "current branch has no upstream"))?;
        let source = RemoteRef::parse(&upstream)?;

        git.fetch(&source.remote)?;

        // Local changes go in first so the merge sees them.
        self.reconcile_locked(false)?;
        if git.path_has_changes(&self.paths.log_path)? {
            if !self.config.auto_commit {
                return Err(BeadsError::remote(
                    "pull",
                    "log file has uncommitted changes; enable auto-commit or commit them",
                ));
            }
            self.commit_pending.store(true, Ordering::SeqCst);
            self.commit_locked()?;
        }

        let outcome = {
            let _file = self.sync_lock()?;
            git.merge(&upstream)?
        };
        lock(&self.sync).last_pull_at = Some(Utc::now());
        tracing::debug!(?outcome, upstream = %upstream, "pulled");

        let report = self.reconcile_locked(false)?;
        Ok(report.imported > 0)
    }

    /// Push committed revisions. Skipped on a detached `HEAD`, where the
    /// target branch cannot be determined; [`RepoCore::sync_now`] pushes
    /// those to the remote's default branch.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if the push fails.
    pub fn push_cycle(&self) -> Result<bool> {
        let _cycle = lock(&self.sync_guard);
        if !self.push_pending.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let git = self.git_repo("push")?;
        let Some(branch) = git.current_branch()? else {
            tracing::info!("detached HEAD; push deferred to an explicit sync");
            return Ok(false);
        };

        let push = git.push_target(&self.config.remote)?;
        git.push(&push.target.remote, &push.target.branch, push.set_upstream)?;

        self.push_pending.store(false, Ordering::SeqCst);
        lock(&self.sync).last_push_at = Some(Utc::now());
        tracing::info!(branch = %branch, "pushed");
        Ok(true)
    }

    fn git_repo(&self, operation: &str) -> Result<&GitRepo> {
        self.git
            .as_ref()
            .ok_or_else(|| BeadsError::remote(operation, "not inside a git working tree"))
    }

    /// Log a background failure and keep it for `status`. Fatal errors
    /// also request shutdown.
    pub fn record_failure(&self, action: &str, err: &BeadsError) {
        tracing::warn!(action, error = %err, "sync action failed; will retry");
        lock(&self.sync).record_error(action, err);
        if err.severity() == Severity::Fatal {
            self.request_shutdown(ShutdownReason::Fatal(format!("{action}: {err}")));
        }
    }

    // === Introspection ===

    #[must_use]
    pub fn ping_info(&self) -> PingInfo {
        PingInfo {
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            beads_dir: self.paths.beads_dir.clone(),
        }
    }

    /// Snapshot for `status`. Never waits on a running reconcile or write:
    /// the record count is omitted while the Store is busy.
    #[must_use]
    pub fn status(&self) -> DaemonStatus {
        let sync = lock(&self.sync).clone();
        DaemonStatus {
            state: self.lifecycle.get(),
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            beads_dir: self.paths.beads_dir.clone(),
            socket: self.paths.socket_path.clone(),
            log_path: self.paths.log_path.clone(),
            started_at: self.started_at,
            records: self.try_count(),
            in_flight: self.in_flight(),
            git: self.git.is_some(),
            sync,
            config: self.config.clone(),
        }
    }

    fn try_count(&self) -> Option<usize> {
        let _gate = self.gate.try_read().ok()?;
        let store = match self.readers.pop() {
            Some(store) => store,
            None => SqliteStorage::open_read_only(&self.paths.db_path).ok()?,
        };
        let count = store.count_issues().ok();
        let _ = self.readers.push(store);
        count
    }

    #[must_use]
    pub fn state(&self) -> DaemonState {
        self.lifecycle.get()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}
