//! Version-control plumbing for auto-commit, auto-pull and auto-push.
//!
//! Every invocation is bounded by a timeout, never prompts for
//! credentials, and reports failure as `RemoteSync` so callers can log
//! and retry on the next cycle.

use crate::error::{BeadsError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// What a merge did to `HEAD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    UpToDate,
    Merged,
}

/// A branch on a remote, as `remote/branch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub remote: String,
    pub branch: String,
}

impl RemoteRef {
    /// `origin/feature/x` → (`origin`, `feature/x`).
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if there is no `/`.
    pub fn parse(upstream: &str) -> Result<Self> {
        let (remote, branch) = upstream.split_once('/').ok_or_else(|| {
            BeadsError::remote("upstream", format!("cannot parse upstream '{upstream}'"))
        })?;
        Ok(Self {
            remote: remote.to_string(),
            branch: branch.to_string(),
        })
    }

    /// The remote-tracking ref to merge from.
    #[must_use]
    pub fn tracking(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

/// Where a push goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub target: RemoteRef,
    pub set_upstream: bool,
}

/// A git working tree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
    timeout: Duration,
}

impl GitRepo {
    /// Find the working tree containing `start`. `None` if it is not in one
    /// or git is not installed.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if git hangs past `timeout`.
    pub fn discover(start: &Path, timeout: Duration) -> Result<Option<Self>> {
        let probe = Self {
            root: start.to_path_buf(),
            timeout,
        };
        let output = match probe.run("discover", &["rev-parse", "--show-toplevel"]) {
            Ok(output) => output,
            Err(BeadsError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if !output.success {
            return Ok(None);
        }
        let root = output.stdout.trim();
        if root.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            root: PathBuf::from(root),
            timeout,
        }))
    }

    /// Current branch name; `None` on a detached `HEAD`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if git cannot be run.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let output = self.run("branch", &["symbolic-ref", "--quiet", "--short", "HEAD"])?;
        Ok(non_empty_line(&output))
    }

    /// Upstream of the current branch as `remote/branch`, if configured.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if git cannot be run.
    pub fn upstream(&self) -> Result<Option<String>> {
        let output = self.run(
            "upstream",
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
        )?;
        Ok(non_empty_line(&output))
    }

    /// # Errors
    ///
    /// Returns `RemoteSync` if git cannot be run.
    pub fn has_remote(&self, remote: &str) -> Result<bool> {
        Ok(self.run("remote", &["remote", "get-url", remote])?.success)
    }

    /// Branch that `remote`'s `HEAD` points at, from the local
    /// `refs/remotes/<remote>/HEAD`. `None` if that ref is unset.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if git cannot be run.
    pub fn remote_default_branch(&self, remote: &str) -> Result<Option<String>> {
        let head = format!("refs/remotes/{remote}/HEAD");
        let output = self.run("remote", &["symbolic-ref", "--quiet", "--short", &head])?;
        let prefix = format!("{remote}/");
        Ok(non_empty_line(&output)
            .and_then(|name| name.strip_prefix(&prefix).map(str::to_string))
            .filter(|branch| !branch.is_empty()))
    }

    /// What a pull merges: the upstream of the current branch, or on a
    /// detached `HEAD` the default branch of `fallback_remote`. `None` when
    /// neither is known.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if git cannot be run or the upstream is malformed.
    pub fn pull_source(&self, fallback_remote: &str) -> Result<Option<RemoteRef>> {
        if let Some(upstream) = self.upstream()? {
            return RemoteRef::parse(&upstream).map(Some);
        }
        if self.current_branch()?.is_some() || !self.has_remote(fallback_remote)? {
            return Ok(None);
        }
        Ok(self
            .remote_default_branch(fallback_remote)?
            .map(|branch| RemoteRef {
                remote: fallback_remote.to_string(),
                branch,
            }))
    }

    /// Where `HEAD` should be pushed. A branch without an upstream goes to
    /// `fallback_remote` under its own name and gains tracking; a detached
    /// `HEAD` goes to the remote's default branch.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` when no target can be determined.
    pub fn push_target(&self, fallback_remote: &str) -> Result<PushTarget> {
        if let Some(branch) = self.current_branch()? {
            return Ok(match self.upstream()? {
                Some(upstream) => PushTarget {
                    target: RemoteRef::parse(&upstream)?,
                    set_upstream: false,
                },
                None => PushTarget {
                    target: RemoteRef {
                        remote: fallback_remote.to_string(),
                        branch,
                    },
                    set_upstream: true,
                },
            });
        }
        let branch = self.remote_default_branch(fallback_remote)?.ok_or_else(|| {
            BeadsError::remote(
                "push",
                format!("detached HEAD and no default branch known for remote '{fallback_remote}'"),
            )
        })?;
        Ok(PushTarget {
            target: RemoteRef {
                remote: fallback_remote.to_string(),
                branch,
            },
            set_upstream: false,
        })
    }

    /// Whether `path` differs from `HEAD` (staged, unstaged or untracked).
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if git fails.
    pub fn path_has_changes(&self, path: &Path) -> Result<bool> {
        let path = path_arg(path);
        let out = self.run_ok("status", &["status", "--porcelain", "--", &path])?;
        Ok(!out.trim().is_empty())
    }

    /// Stage and commit only `path`. Returns `false` when there was nothing to commit.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if staging or committing fails.
    pub fn commit_path(&self, path: &Path, message: &str) -> Result<bool> {
        let path = path_arg(path);
        self.run_ok("commit", &["add", "--", &path])?;

        let diff = self.run("commit", &["diff", "--cached", "--quiet", "--", &path])?;
        if diff.success {
            return Ok(false);
        }

        self.run_ok("commit", &["commit", "--quiet", "-m", message, "--", &path])?;
        tracing::info!(path = %path, "committed log file");
        Ok(true)
    }

    /// # Errors
    ///
    /// Returns `RemoteSync` if the fetch fails or times out.
    pub fn fetch(&self, remote: &str) -> Result<()> {
        self.run_ok("fetch", &["fetch", "--quiet", remote])?;
        Ok(())
    }

    /// Merge `upstream` into the current branch. A failed merge is aborted
    /// so the working tree is never left mid-merge.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if the merge fails (conflicts included).
    pub fn merge(&self, upstream: &str) -> Result<MergeOutcome> {
        let before = self.head()?;
        let output = self.run("merge", &["merge", "--no-edit", "--quiet", upstream])?;
        if !output.success {
            let abort = self.run("merge", &["merge", "--abort"]);
            if let Err(err) = abort {
                tracing::warn!(error = %err, "git merge --abort failed");
            }
            return Err(BeadsError::remote("merge", failure_text(&output)));
        }
        let after = self.head()?;
        Ok(if before == after {
            MergeOutcome::UpToDate
        } else {
            MergeOutcome::Merged
        })
    }

    /// Push `HEAD` to `remote` as `branch`, setting upstream tracking if absent.
    ///
    /// # Errors
    ///
    /// Returns `RemoteSync` if the push is rejected or times out.
    pub fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        let mut args = vec!["push", "--quiet"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.push(remote);
        args.push(&refspec);
        self.run_ok("push", &args)?;
        Ok(())
    }

    fn head(&self) -> Result<Option<String>> {
        let output = self.run("rev-parse", &["rev-parse", "--verify", "--quiet", "HEAD"])?;
        Ok(non_empty_line(&output))
    }

    fn run_ok(&self, op: &str, args: &[&str]) -> Result<String> {
        let output = self.run(op, args)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(BeadsError::remote(op, failure_text(&output)))
        }
    }

    /// Run git in the working tree, killing it after the timeout.
    fn run(&self, op: &str, args: &[&str]) -> Result<GitOutput> {
        tracing::debug!(op, ?args, "git");
        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_MERGE_AUTOEDIT", "no")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let Some(status) = child.wait_timeout(self.timeout)? else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BeadsError::remote(
                op,
                format!("git {} timed out after {:?}", args.join(" "), self.timeout),
            ));
        };

        Ok(GitOutput {
            success: status.success(),
            stdout: stdout.map(join_drain).unwrap_or_default(),
            stderr: stderr.map(join_drain).unwrap_or_default(),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let _ = pipe.read_to_string(&mut buf);
        buf
    })
}

fn join_drain(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

fn non_empty_line(output: &GitOutput) -> Option<String> {
    if !output.success {
        return None;
    }
    let line = output.stdout.trim();
    (!line.is_empty()).then(|| line.to_string())
}

fn failure_text(output: &GitOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        output.stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn git(dir: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn init_repo(dir: &Path) -> bool {
        git(dir, &["init", "--quiet"])
            && git(dir, &["config", "user.email", "test@example.com"])
            && git(dir, &["config", "user.name", "Test"])
            && git(dir, &["config", "commit.gpgsign", "false"])
    }

    #[test]
    fn discover_outside_repo_is_none() {
        let temp = TempDir::new().unwrap();
        if !git(temp.path(), &["--version"]) {
            return;
        }
        assert!(GitRepo::discover(temp.path(), TIMEOUT).unwrap().is_none());
    }

    #[test]
    fn commit_only_when_changed() {
        let temp = TempDir::new().unwrap();
        if !init_repo(temp.path()) {
            return;
        }
        let repo = GitRepo::discover(temp.path(), TIMEOUT).unwrap().unwrap();
        let log = temp.path().join("issues.jsonl");
        fs::write(&log, "{\"id\":\"bd-1\"}\n").unwrap();
        fs::write(temp.path().join("other.txt"), "untouched").unwrap();

        assert!(repo.path_has_changes(&log).unwrap());
        assert!(repo.commit_path(&log, "bd: sync").unwrap());
        assert!(!repo.path_has_changes(&log).unwrap());
        assert!(!repo.commit_path(&log, "bd: sync").unwrap());
        assert!(repo.current_branch().unwrap().is_some());
        assert!(repo.upstream().unwrap().is_none());
        // Only the log was committed.
        assert!(repo.path_has_changes(&temp.path().join("other.txt")).unwrap());
    }

    #[test]
    fn fetch_merge_push_round_trip() {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::create_dir_all(&remote).unwrap();
        fs::create_dir_all(&a).unwrap();
        if !git(&remote, &["init", "--quiet", "--bare"]) || !init_repo(&a) {
            return;
        }
        assert!(git(&a, &["remote", "add", "origin", remote.to_str().unwrap()]));

        let repo_a = GitRepo::discover(&a, TIMEOUT).unwrap().unwrap();
        let log_a = a.join("issues.jsonl");
        fs::write(&log_a, "{\"id\":\"bd-1\"}\n").unwrap();
        repo_a.commit_path(&log_a, "first").unwrap();
        let branch = repo_a.current_branch().unwrap().unwrap();
        assert!(repo_a.has_remote("origin").unwrap());
        assert!(repo_a.pull_source("origin").unwrap().is_none());
        let first = repo_a.push_target("origin").unwrap();
        assert!(first.set_upstream);
        assert_eq!(first.target.branch, branch);
        repo_a.push("origin", &branch, true).unwrap();
        assert_eq!(repo_a.upstream().unwrap(), Some(format!("origin/{branch}")));

        assert!(git(temp.path(), &["clone", "--quiet", remote.to_str().unwrap(), "b"]));
        assert!(git(&b, &["config", "user.email", "b@example.com"]));
        assert!(git(&b, &["config", "user.name", "B"]));

        fs::write(&log_a, "{\"id\":\"bd-1\"}\n{\"id\":\"bd-2\"}\n").unwrap();
        repo_a.commit_path(&log_a, "second").unwrap();
        repo_a.push("origin", &branch, false).unwrap();

        let repo_b = GitRepo::discover(&b, TIMEOUT).unwrap().unwrap();
        repo_b.fetch("origin").unwrap();
        let upstream = repo_b.upstream().unwrap().unwrap();
        assert_eq!(repo_b.merge(&upstream).unwrap(), MergeOutcome::Merged);
        assert_eq!(repo_b.merge(&upstream).unwrap(), MergeOutcome::UpToDate);
        assert!(fs::read_to_string(b.join("issues.jsonl")).unwrap().contains("bd-2"));
    }

    #[test]
    fn detached_head_falls_back_to_remote_default_branch() {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("remote.git");
        let a = temp.path().join("a");
        fs::create_dir_all(&remote).unwrap();
        fs::create_dir_all(&a).unwrap();
        if !git(&remote, &["init", "--quiet", "--bare"]) || !init_repo(&a) {
            return;
        }
        assert!(git(&a, &["remote", "add", "origin", remote.to_str().unwrap()]));
        let repo = GitRepo::discover(&a, TIMEOUT).unwrap().unwrap();
        fs::write(a.join("issues.jsonl"), "{}\n").unwrap();
        repo.commit_path(&a.join("issues.jsonl"), "first").unwrap();
        let branch = repo.current_branch().unwrap().unwrap();
        repo.push("origin", &branch, true).unwrap();

        assert!(git(&a, &["checkout", "--quiet", "--detach"]));
        assert!(repo.current_branch().unwrap().is_none());
        assert!(matches!(
            repo.push_target("origin"),
            Err(BeadsError::RemoteSync { .. })
        ));

        let head = format!("refs/remotes/origin/{branch}");
        assert!(git(&a, &["symbolic-ref", "refs/remotes/origin/HEAD", &head]));
        assert_eq!(repo.remote_default_branch("origin").unwrap(), Some(branch.clone()));
        let target = repo.push_target("origin").unwrap();
        assert_eq!(target.target.tracking(), format!("origin/{branch}"));
        assert!(!target.set_upstream);
        assert_eq!(repo.pull_source("origin").unwrap(), Some(target.target));
    }

    #[test]
    fn upstream_parse_keeps_branch_slashes() {
        let parsed = RemoteRef::parse("origin/feature/x").unwrap();
        assert_eq!(parsed.remote, "origin");
        assert_eq!(parsed.branch, "feature/x");
        assert!(RemoteRef::parse("main").is_err());
    }

    #[test]
    fn fetch_from_missing_remote_is_remote_sync_error() {
        let temp = TempDir::new().unwrap();
        if !init_repo(temp.path()) {
            return;
        }
        let repo = GitRepo::discover(temp.path(), TIMEOUT).unwrap().unwrap();
        let err = repo.fetch("nowhere").unwrap_err();
        assert!(matches!(err, BeadsError::RemoteSync { .. }));
    }
}
