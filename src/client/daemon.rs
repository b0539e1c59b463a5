use super::{BackendKind, ConnectOptions, IssueBackend};
use crate::config::BeadsPaths;
use crate::daemon::ipc::{DaemonClient, Request, ResponsePayload, SyncSummary, unexpected};
use crate::error::Result;
use crate::model::{Comment, Issue, IssueUpdate, ListFilter, NewIssue};
use std::time::Duration;

/// An explicit sync may run git commit, fetch, merge and push inside the daemon.
const SYNC_TIMEOUT: Duration = Duration::from_secs(120);
const SYNC_GIT_STEPS: u32 = 4;

/// Forwards every operation to the running daemon.
#[derive(Debug, Clone)]
pub struct DaemonBacked {
    client: DaemonClient,
    actor: String,
    sync_timeout: Duration,
}

impl DaemonBacked {
    #[must_use]
    pub fn new(paths: &BeadsPaths, options: &ConnectOptions) -> Self {
        Self {
            client: DaemonClient::new(&paths.socket_path, options.rpc_timeout),
            actor: options.actor.clone(),
            sync_timeout: SYNC_TIMEOUT.max(options.git_timeout * SYNC_GIT_STEPS),
        }
    }

    fn issue(&self, op: &str, request: &Request) -> Result<Issue> {
        match self.client.request(request)? {
            ResponsePayload::Issue(issue) => Ok(*issue),
            other => Err(unexpected(op, &other)),
        }
    }
}

impl IssueBackend for DaemonBacked {
    fn kind(&self) -> BackendKind {
        BackendKind::Daemon
    }

    fn get(&self, id: &str) -> Result<Issue> {
        self.issue("get", &Request::Get { id: id.to_string() })
    }

    fn create(&self, new: &NewIssue) -> Result<Issue> {
        self.issue(
            "create",
            &Request::Create {
                issue: new.clone(),
                actor: self.actor.clone(),
            },
        )
    }

    fn update(&self, id: &str, patch: &IssueUpdate) -> Result<Issue> {
        self.issue(
            "update",
            &Request::Update {
                id: id.to_string(),
                patch: patch.clone(),
                actor: self.actor.clone(),
            },
        )
    }

    fn add_comment(&self, id: &str, text: &str) -> Result<Comment> {
        let request = Request::AddComment {
            id: id.to_string(),
            text: text.to_string(),
            author: self.actor.clone(),
        };
        match self.client.request(&request)? {
            ResponsePayload::Comment(comment) => Ok(comment),
            other => Err(unexpected("add_comment", &other)),
        }
    }

    fn delete(&self, id: &str, reason: Option<&str>) -> Result<Issue> {
        self.issue(
            "delete",
            &Request::Delete {
                id: id.to_string(),
                actor: self.actor.clone(),
                reason: reason.map(str::to_string),
            },
        )
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Issue>> {
        let request = Request::List {
            filter: filter.clone(),
        };
        match self.client.request(&request)? {
            ResponsePayload::Issues(issues) => Ok(issues),
            other => Err(unexpected("list", &other)),
        }
    }

    fn sync(&self, full: bool) -> Result<SyncSummary> {
        let client = DaemonClient::new(self.client.socket(), self.sync_timeout);
        match client.request(&Request::Sync { full })? {
            ResponsePayload::Synced(summary) => Ok(summary),
            other => Err(unexpected("sync", &other)),
        }
    }
}
