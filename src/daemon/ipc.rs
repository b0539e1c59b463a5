//! IPC protocol types and codec.
//!
//! Protocol: newline-delimited JSON (ndjson) over a Unix socket.
//!
//! Request format: `{"op": "create", ...}\n`
//! Response format: `{"ok": {"kind": "...", "data": ...}}\n` or
//! `{"err": {"code": "...", "message": "...", "details": ...}}\n`

use crate::daemon::DaemonStatus;
use crate::error::{BeadsError, ErrorCode, Result, StructuredError};
use crate::model::{Comment, Issue, IssueUpdate, ListFilter, NewIssue};
use crate::sync::cycle::SyncOutcome;
use crate::sync::{Conflict, CorruptLine};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Request
// =============================================================================

/// IPC request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Health check.
    Ping,

    /// Daemon state and sync bookkeeping.
    Status,

    /// Fetch one issue.
    Get { id: String },

    /// Create an issue.
    Create { issue: NewIssue, actor: String },

    /// Patch an issue.
    Update {
        id: String,
        patch: IssueUpdate,
        actor: String,
    },

    /// Append a comment.
    AddComment {
        id: String,
        text: String,
        author: String,
    },

    /// Tombstone an issue.
    Delete {
        id: String,
        actor: String,
        #[serde(default)]
        reason: Option<String>,
    },

    /// List issues in creation order.
    List {
        #[serde(default)]
        filter: ListFilter,
    },

    /// Reconcile now; `full` re-reads and rewrites the log unconditionally.
    Sync {
        #[serde(default)]
        full: bool,
    },

    /// Stop the daemon.
    Shutdown,
}

impl Request {
    /// Requests served while the daemon is stopping.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(self, Self::Ping | Self::Status)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Status => "status",
            Self::Get { .. } => "get",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::AddComment { .. } => "add_comment",
            Self::Delete { .. } => "delete",
            Self::List { .. } => "list",
            Self::Sync { .. } => "sync",
            Self::Shutdown => "shutdown",
        }
    }
}

// =============================================================================
// Response
// =============================================================================

/// IPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: ResponsePayload },
    Err { err: ErrorPayload },
}

impl Response {
    #[must_use]
    pub const fn ok(payload: ResponsePayload) -> Self {
        Self::Ok { ok: payload }
    }

    #[must_use]
    pub fn err(error: impl Into<ErrorPayload>) -> Self {
        Self::Err { err: error.into() }
    }
}

/// Successful response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResponsePayload {
    Pong(PingInfo),
    Status(Box<DaemonStatus>),
    Issue(Box<Issue>),
    Issues(Vec<Issue>),
    Comment(Comment),
    Synced(SyncSummary),
    ShuttingDown,
}

/// Identity of a live daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingInfo {
    pub pid: u32,
    pub version: String,
    pub beads_dir: PathBuf,
}

/// Outcome of an explicit sync, as reported to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncSummary {
    pub imported: usize,
    pub exported: bool,
    pub records: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Conflict>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrupt_lines: Vec<CorruptLine>,
    #[serde(default)]
    pub committed: bool,
    #[serde(default)]
    pub pulled: bool,
    #[serde(default)]
    pub pushed: bool,
}

impl From<SyncOutcome> for SyncSummary {
    fn from(outcome: SyncOutcome) -> Self {
        let SyncOutcome { report, git } = outcome;
        Self {
            imported: report.imported,
            exported: report.exported,
            records: report.records,
            conflicts: report.conflicts,
            corrupt_lines: report.corrupt_lines,
            committed: git.committed,
            pulled: git.pulled,
            pushed: git.pushed,
        }
    }
}

/// Error response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorPayload {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
            details: None,
        }
    }

    /// Rebuild the typed error on the client side.
    #[must_use]
    pub fn into_error(self) -> BeadsError {
        let Some(code) = ErrorCode::parse(&self.code) else {
            return BeadsError::Rpc {
                code: self.code,
                message: self.message,
            };
        };
        let details = self.details.unwrap_or(Value::Null);
        StructuredError {
            code,
            message: self.message,
            hint: details
                .get("hint")
                .and_then(Value::as_str)
                .map(str::to_string),
            retryable: code.is_retryable(),
            context: details.get("context").cloned().filter(|v| !v.is_null()),
        }
        .into_error()
    }
}

impl From<&BeadsError> for ErrorPayload {
    fn from(err: &BeadsError) -> Self {
        let structured = StructuredError::from_error(err);
        Self {
            code: structured.code.as_str().to_string(),
            message: structured.message,
            details: Some(json!({
                "hint": structured.hint,
                "retryable": structured.retryable,
                "context": structured.context,
            })),
        }
    }
}

impl From<BeadsError> for ErrorPayload {
    fn from(err: BeadsError) -> Self {
        Self::from(&err)
    }
}

/// The error returned for work refused while the daemon stops.
#[must_use]
pub fn shutting_down() -> BeadsError {
    BeadsError::Rpc {
        code: ErrorCode::ShuttingDown.as_str().to_string(),
        message: "daemon is shutting down".to_string(),
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encode a response as one line, newline included.
///
/// # Errors
///
/// Returns a JSON error if serialization fails.
pub fn encode_response(resp: &Response) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(resp)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode a request from a line.
///
/// # Errors
///
/// Returns a JSON error if the line is not a known request.
pub fn decode_request(line: &str) -> Result<Request> {
    Ok(serde_json::from_str(line)?)
}

// =============================================================================
// Client
// =============================================================================

/// Synchronous client for one daemon socket.
///
/// Each call opens a fresh connection bounded by `timeout`; a call that
/// times out just disconnects and the daemon finishes the work on its own.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    #[must_use]
    pub fn new(socket: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket: socket.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` when the daemon cannot be reached or does not
    /// answer in time, and the daemon's own error when it rejects the request.
    pub fn request(&self, request: &Request) -> Result<ResponsePayload> {
        let unreachable = |reason: String| BeadsError::Unreachable {
            socket: self.socket.clone(),
            reason,
        };

        let mut stream =
            UnixStream::connect(&self.socket).map_err(|err| unreachable(err.to_string()))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stream
            .write_all(line.as_bytes())
            .map_err(|err| unreachable(err.to_string()))?;

        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        match reader.read_line(&mut reply) {
            Ok(0) => return Err(unreachable("connection closed".to_string())),
            Ok(_) => {}
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(unreachable(format!(
                    "no reply to {} within {:?}",
                    request.name(),
                    self.timeout
                )));
            }
            Err(err) => return Err(unreachable(err.to_string())),
        }

        match serde_json::from_str(&reply)? {
            Response::Ok { ok } => Ok(ok),
            Response::Err { err } => Err(err.into_error()),
        }
    }

    /// # Errors
    ///
    /// Returns `Unreachable` if no daemon answers.
    pub fn ping(&self) -> Result<PingInfo> {
        match self.request(&Request::Ping)? {
            ResponsePayload::Pong(info) => Ok(info),
            other => Err(unexpected("ping", &other)),
        }
    }
}

/// Error for a well-formed reply of the wrong kind.
#[must_use]
pub fn unexpected(op: &str, payload: &ResponsePayload) -> BeadsError {
    let kind = serde_json::to_value(payload)
        .ok()
        .and_then(|v| v.get("kind").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    BeadsError::Rpc {
        code: ErrorCode::InternalError.as_str().to_string(),
        message: format!("unexpected '{kind}' reply to {op}"),
    }
}
