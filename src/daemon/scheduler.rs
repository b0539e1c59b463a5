//! Background sync scheduler.
//!
//! Mutations trigger a debounced export (and commit/push when enabled).
//! A heartbeat re-checks the lock and picks up external log edits; pulls
//! run on the configured interval. Failures are logged and retried on the
//! next trigger; only a fatal error (a corrupt lock) ends the daemon.

use crate::daemon::lock::DaemonLock;
use crate::daemon::repo::RepoCore;
use crate::error::Result;
use crossbeam::channel::{Receiver, at, never, select, tick};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_HEARTBEAT: Duration = Duration::from_secs(2);

pub struct Scheduler {
    core: Arc<RepoCore>,
    lock: Arc<DaemonLock>,
    mutations: Receiver<()>,
    stop: Receiver<()>,
}

impl Scheduler {
    #[must_use]
    pub const fn new(
        core: Arc<RepoCore>,
        lock: Arc<DaemonLock>,
        mutations: Receiver<()>,
        stop: Receiver<()>,
    ) -> Self {
        Self {
            core,
            lock,
            mutations,
            stop,
        }
    }

    /// Run until the stop channel fires or disconnects.
    pub fn run(self) {
        let config = self.core.config().clone();
        let heartbeat = tick(config.interval.min(MAX_HEARTBEAT));
        let pulls = if config.auto_pull {
            tick(config.interval)
        } else {
            never()
        };
        let mut flush_due: Option<Instant> = None;

        tracing::debug!(
            auto_commit = config.auto_commit,
            auto_pull = config.auto_pull,
            auto_push = config.auto_push,
            "scheduler started"
        );

        loop {
            let debounce = flush_due.map_or_else(never, at);
            select! {
                recv(self.stop) -> _ => break,
                recv(self.mutations) -> msg => {
                    if msg.is_err() {
                        break;
                    }
                    // First mutation of a burst opens the window; later ones ride along.
                    flush_due.get_or_insert_with(|| Instant::now() + config.commit_debounce);
                }
                recv(debounce) -> _ => {
                    flush_due = None;
                    self.flush();
                }
                recv(heartbeat) -> _ => {
                    if let Err(err) = self.lock.verify() {
                        self.core.record_failure("lock", &err);
                        break;
                    }
                    if flush_due.is_none() {
                        self.flush();
                    }
                }
                recv(pulls) -> _ => self.pull(),
            }
        }
        tracing::debug!("scheduler stopped");
    }

    fn flush(&self) {
        self.attempt("commit", || self.core.commit_cycle());
        if self.core.config().auto_push {
            self.attempt("push", || self.core.push_cycle());
        }
    }

    fn pull(&self) {
        self.attempt("pull", || self.core.pull_cycle());
        if self.core.config().auto_push {
            self.attempt("push", || self.core.push_cycle());
        }
    }

    fn attempt<T>(&self, action: &str, f: impl FnOnce() -> Result<T>) -> Option<T> {
        match f() {
            Ok(value) => Some(value),
            Err(err) => {
                self.core.record_failure(action, &err);
                None
            }
        }
    }
}
