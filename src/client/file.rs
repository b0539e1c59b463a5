use super::{BackendKind, ConnectOptions, IssueBackend};
use crate::config::{BeadsPaths, open_storage};
use crate::daemon::ipc::SyncSummary;
use crate::daemon::lock::SyncLock;
use crate::error::Result;
use crate::model::{Comment, Issue, IssueUpdate, ListFilter, NewIssue};
use crate::storage::{CONFIG_ISSUE_PREFIX, SqliteStorage};
use crate::sync::cycle::{ExplicitSync, GitPlan};
use crate::sync::git::GitRepo;
use crate::sync::{Reconciler, SyncState};
use std::time::Duration;

/// Works on the database and log file directly, for when no daemon runs.
///
/// Every operation holds the sync lock for its whole duration and is
/// bracketed by reconciles: the first picks up log changes, the second
/// writes the mutation back to the log.
#[derive(Debug, Clone)]
pub struct FileBacked {
    paths: BeadsPaths,
    actor: String,
    lock_timeout: Duration,
    in_memory: bool,
    issue_prefix: Option<String>,
    git_plan: GitPlan,
    remote: String,
    git_timeout: Duration,
    reconciler: Reconciler,
}

impl FileBacked {
    #[must_use]
    pub fn new(paths: BeadsPaths, options: &ConnectOptions) -> Self {
        let reconciler = Reconciler::new(&paths.beads_dir, &paths.log_path);
        Self {
            paths,
            actor: options.actor.clone(),
            lock_timeout: options.lock_timeout,
            in_memory: options.no_db,
            issue_prefix: options.issue_prefix.clone(),
            git_plan: options.git_plan,
            remote: options.remote.clone(),
            git_timeout: options.git_timeout,
            reconciler,
        }
    }

    fn open(&self) -> Result<SqliteStorage> {
        if !self.in_memory {
            return open_storage(&self.paths, Some(self.lock_timeout));
        }
        let mut store = SqliteStorage::open_memory()?;
        if let Some(prefix) = &self.issue_prefix {
            store.set_config(CONFIG_ISSUE_PREFIX, prefix)?;
        }
        Ok(store)
    }

    fn open_session(&self) -> Result<(SqliteStorage, SyncState)> {
        let store = self.open()?;
        let state = SyncState::rebuild(&store)?;
        Ok((store, state))
    }

    fn session<R>(&self, f: impl FnOnce(&mut SqliteStorage) -> Result<R>) -> Result<R> {
        self.run(false, f)
    }

    fn mutation<R>(&self, f: impl FnOnce(&mut SqliteStorage) -> Result<R>) -> Result<R> {
        self.run(true, f)
    }

    fn run<R>(&self, writes: bool, f: impl FnOnce(&mut SqliteStorage) -> Result<R>) -> Result<R> {
        let _lock = SyncLock::acquire(&self.paths.sync_lock_path, self.lock_timeout)?;
        let (mut store, mut state) = self.open_session()?;

        self.reconciler.reconcile(&mut store, &mut state)?;
        let result = f(&mut store)?;
        if writes {
            state.dirty = true;
            self.reconciler.reconcile(&mut store, &mut state)?;
        }
        Ok(result)
    }
}

impl IssueBackend for FileBacked {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn get(&self, id: &str) -> Result<Issue> {
        self.session(|store| store.require_issue(id))
    }

    fn create(&self, new: &NewIssue) -> Result<Issue> {
        self.mutation(|store| store.create_issue(new, &self.actor))
    }

    fn update(&self, id: &str, patch: &IssueUpdate) -> Result<Issue> {
        self.mutation(|store| {
            let id = store.resolve_id(id)?;
            store.update_issue(&id, patch, &self.actor)
        })
    }

    fn add_comment(&self, id: &str, text: &str) -> Result<Comment> {
        self.mutation(|store| {
            let id = store.resolve_id(id)?;
            store.add_comment(&id, &self.actor, text)
        })
    }

    fn delete(&self, id: &str, reason: Option<&str>) -> Result<Issue> {
        self.mutation(|store| {
            let id = store.resolve_id(id)?;
            store.delete_issue(&id, &self.actor, reason)
        })
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Issue>> {
        self.session(|store| store.list_issues(filter).collect())
    }

    fn sync(&self, full: bool) -> Result<SyncSummary> {
        let plan = if full { GitPlan::ALL } else { self.git_plan };
        let git = if plan.any() {
            GitRepo::discover(&self.paths.beads_dir, self.git_timeout)?
        } else {
            None
        };
        let explicit = ExplicitSync {
            git: git.as_ref(),
            plan,
            remote: &self.remote,
            log_path: &self.paths.log_path,
        };

        // Opened on the first reconcile, once the lock is held.
        let mut session = None;
        let outcome = explicit.run(
            full,
            || SyncLock::acquire(&self.paths.sync_lock_path, self.lock_timeout),
            |full| {
                let (mut store, mut state) = match session.take() {
                    Some(open) => open,
                    None => self.open_session()?,
                };
                let report = if full {
                    self.reconciler.reconcile_full(&mut store, &mut state)
                } else {
                    self.reconciler.reconcile(&mut store, &mut state)
                };
                session = Some((store, state));
                report
            },
        )?;
        Ok(outcome.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{export_records, import_records};
    use std::fs;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn configure(dir: &Path) -> bool {
        git(dir, &["config", "user.email", "test@example.com"])
            && git(dir, &["config", "user.name", "Test"])
            && git(dir, &["config", "commit.gpgsign", "false"])
    }

    fn paths(temp: &TempDir) -> BeadsPaths {
        let dir = temp.path().join(".beads");
        fs::create_dir_all(&dir).unwrap();
        BeadsPaths::resolve(&dir).unwrap()
    }

    #[test]
    fn mutations_are_written_to_the_log() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        let backend = FileBacked::new(paths.clone(), &ConnectOptions::new("alice"));

        let issue = backend.create(&NewIssue::titled("logged")).unwrap();
        let comment = backend.add_comment(&issue.id, "first").unwrap();
        assert_eq!(comment.author, "alice");

        let text = fs::read_to_string(&paths.log_path).unwrap();
        let outcome = import_records(&text);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].comments[0].body, "first");

        let store = SqliteStorage::open(&paths.db_path).unwrap();
        assert_eq!(text, export_records(&store.snapshot().unwrap()).unwrap());
        assert!(!store.has_dirty_issues().unwrap());
    }

    #[test]
    fn no_db_mode_works_from_the_log_alone() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        let mut options = ConnectOptions::new("bob");
        options.no_db = true;
        options.issue_prefix = Some("proj".to_string());
        let backend = FileBacked::new(paths.clone(), &options);

        let issue = backend.create(&NewIssue::titled("memory only")).unwrap();
        assert!(issue.id.starts_with("proj-"));
        backend.add_comment(&issue.id, "still here").unwrap();

        assert!(!paths.db_path.exists());
        let reloaded = backend.get(&issue.id).unwrap();
        assert_eq!(reloaded.comments.len(), 1);
        assert_eq!(reloaded.comments[0].body, "still here");
    }

    #[test]
    fn external_log_edits_are_visible() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        let backend = FileBacked::new(paths.clone(), &ConnectOptions::new("carol"));
        let issue = backend.create(&NewIssue::titled("before")).unwrap();

        let mut edited = issue.clone();
        edited.title = "after".to_string();
        edited.updated_at += chrono::Duration::seconds(5);
        fs::write(&paths.log_path, export_records(&[edited]).unwrap()).unwrap();

        assert_eq!(backend.get(&issue.id).unwrap().title, "after");
    }

    #[test]
    fn full_sync_commits_pushes_and_pulls_through_a_remote() {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        let a = temp.path().join("a");
        fs::create_dir_all(&remote).unwrap();
        fs::create_dir_all(a.join(".beads")).unwrap();
        if !git(&remote, &["init", "--quiet", "--bare"])
            || !git(&a, &["init", "--quiet"])
            || !configure(&a)
        {
            return;
        }
        assert!(git(&a, &["remote", "add", "origin", remote.to_str().unwrap()]));

        let paths_a = BeadsPaths::resolve(&a.join(".beads")).unwrap();
        let backend_a = FileBacked::new(paths_a, &ConnectOptions::new("alice"));
        let issue = backend_a.create(&NewIssue::titled("shared")).unwrap();

        let first = backend_a.sync(true).unwrap();
        assert!(first.committed);
        assert!(first.pushed);
        assert!(!first.pulled);

        let repo_a = GitRepo::discover(&a, Duration::from_secs(30)).unwrap().unwrap();
        let branch = repo_a.current_branch().unwrap().unwrap();
        assert!(git(
            temp.path(),
            &["clone", "--quiet", "--branch", &branch, remote.to_str().unwrap(), "b"]
        ));
        let b = temp.path().join("b");
        assert!(configure(&b));

        let paths_b = BeadsPaths::resolve(&b.join(".beads")).unwrap();
        let backend_b = FileBacked::new(paths_b, &ConnectOptions::new("bob"));
        backend_b.add_comment(&issue.id, "from b").unwrap();
        let second = backend_b.sync(true).unwrap();
        assert!(second.committed);
        assert!(second.pushed);

        let third = backend_a.sync(true).unwrap();
        assert!(third.pulled);
        assert_eq!(third.imported, 1);
        let comments = backend_a.get(&issue.id).unwrap().comments;
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author, "bob");
    }

    #[test]
    fn plain_sync_leaves_git_alone_unless_configured() {
        let temp = TempDir::new().unwrap();
        if !git(temp.path(), &["init", "--quiet"]) || !configure(temp.path()) {
            return;
        }
        let paths = paths(&temp);
        let backend = FileBacked::new(paths.clone(), &ConnectOptions::new("alice"));
        backend.create(&NewIssue::titled("local only")).unwrap();

        let summary = backend.sync(false).unwrap();
        assert!(!summary.committed && !summary.pulled && !summary.pushed);
        let repo = GitRepo::discover(temp.path(), Duration::from_secs(30)).unwrap().unwrap();
        assert!(repo.path_has_changes(&paths.log_path).unwrap());

        let mut options = ConnectOptions::new("alice");
        options.git_plan.commit = true;
        let summary = FileBacked::new(paths.clone(), &options).sync(false).unwrap();
        assert!(summary.committed);
        assert!(!summary.pushed);
        assert!(!repo.path_has_changes(&paths.log_path).unwrap());
    }
}
