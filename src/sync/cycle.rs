//! The version-control half of an explicit `sync`.
//!
//! The daemon and the direct-file backend share this sequence and differ
//! only in how they lock and reconcile the Store, which they pass in as
//! closures. Network calls (fetch, push) run outside the lock.

use crate::error::{BeadsError, Result};
use crate::sync::ReconcileReport;
use crate::sync::git::{GitRepo, MergeOutcome};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const COMMIT_MESSAGE: &str = "bd: sync issues";

/// Which version-control steps to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GitPlan {
    pub commit: bool,
    pub pull: bool,
    pub push: bool,
}

impl GitPlan {
    /// `sync --full`: everything, whatever the auto-* settings say.
    pub const ALL: Self = Self {
        commit: true,
        pull: true,
        push: true,
    };

    #[must_use]
    pub const fn any(self) -> bool {
        self.commit || self.pull || self.push
    }
}

/// What the version-control steps did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitReport {
    pub committed: bool,
    pub pulled: bool,
    pub pushed: bool,
}

#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub report: ReconcileReport,
    pub git: GitReport,
}

/// One explicit sync of the log file against its remote.
#[derive(Debug)]
pub struct ExplicitSync<'a> {
    pub git: Option<&'a GitRepo>,
    pub plan: GitPlan,
    pub remote: &'a str,
    pub log_path: &'a Path,
}

impl ExplicitSync<'_> {
    /// Reconcile, commit, fetch and merge, reconcile what the merge
    /// brought in, then push.
    ///
    /// `lock` is held across every Store and working-tree step; `reconcile`
    /// is called with `full` first and `false` after a merge.
    ///
    /// # Errors
    ///
    /// Returns reconcile errors, and `RemoteSync` for git failures.
    pub fn run<G>(
        &self,
        full: bool,
        lock: impl FnOnce() -> Result<G>,
        mut reconcile: impl FnMut(bool) -> Result<ReconcileReport>,
    ) -> Result<SyncOutcome> {
        let git = match self.git {
            Some(git) if self.plan.any() => git,
            _ => {
                if self.plan.any() {
                    tracing::warn!("not inside a git working tree; skipping commit, pull and push");
                }
                let _guard = lock()?;
                return Ok(SyncOutcome {
                    report: reconcile(full)?,
                    git: GitReport::default(),
                });
            }
        };

        let source = if self.plan.pull {
            git.pull_source(self.remote)?
        } else {
            None
        };
        match &source {
            Some(source) => git.fetch(&source.remote)?,
            None if self.plan.pull => tracing::info!("no upstream to pull from"),
            None => {}
        }

        let mut outcome = GitReport::default();
        let report = {
            let _guard = lock()?;
            let mut report = reconcile(full)?;

            if self.plan.commit {
                outcome.committed = git.commit_path(self.log_path, COMMIT_MESSAGE)?;
            } else if source.is_some() && git.path_has_changes(self.log_path)? {
                return Err(BeadsError::remote(
                    "pull",
                    "log file has uncommitted changes; enable auto-commit or commit them",
                ));
            }

            if let Some(source) = &source {
                outcome.pulled = git.merge(&source.tracking())? == MergeOutcome::Merged;
                if outcome.pulled {
                    report.absorb(reconcile(false)?);
                    if self.plan.commit {
                        outcome.committed |= git.commit_path(self.log_path, COMMIT_MESSAGE)?;
                    }
                }
            }
            report
        };

        if self.plan.push {
            let push = git.push_target(self.remote)?;
            git.push(&push.target.remote, &push.target.branch, push.set_upstream)?;
            outcome.pushed = true;
            tracing::info!(remote_ref = %push.target.tracking(), "pushed");
        }

        Ok(SyncOutcome {
            report,
            git: outcome,
        })
    }
}
