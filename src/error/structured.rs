//! Structured error output.
//!
//! Provides machine-parseable error information with:
//! - Error codes for categorization
//! - Hints for self-correction
//! - Retryability flags
//! - Context for debugging
//!
//! The same codes are used on the daemon socket, so a client can turn an
//! error payload back into a typed [`BeadsError`].

use crate::error::BeadsError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::PathBuf;

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // === Storage ===
    DatabaseError,
    NotInitialized,
    AlreadyInitialized,

    // === Issues ===
    IssueNotFound,
    InvalidId,

    // === Validation ===
    ValidationFailed,
    InvalidStatus,
    InvalidType,
    InvalidPriority,

    // === Log / Sync ===
    CorruptLine,
    ReconcileConflict,
    RemoteSyncFailure,

    // === Daemon ===
    AlreadyRunning,
    Unreachable,
    LockCorrupt,
    LockTimeout,
    ParseError,
    ShuttingDown,

    // === Config / I/O ===
    ConfigError,
    IoError,
    JsonError,
    YamlError,

    // === Internal ===
    InternalError,
}

impl ErrorCode {
    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseError => "DATABASE_ERROR",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::IssueNotFound => "ISSUE_NOT_FOUND",
            Self::InvalidId => "INVALID_ID",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::InvalidType => "INVALID_TYPE",
            Self::InvalidPriority => "INVALID_PRIORITY",
            Self::CorruptLine => "CORRUPT_LINE",
            Self::ReconcileConflict => "RECONCILE_CONFLICT",
            Self::RemoteSyncFailure => "REMOTE_SYNC_FAILURE",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::Unreachable => "UNREACHABLE",
            Self::LockCorrupt => "LOCK_CORRUPT",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::ParseError => "PARSE_ERROR",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteSyncFailure
                | Self::Unreachable
                | Self::LockTimeout
                | Self::ShuttingDown
                | Self::ValidationFailed
                | Self::InvalidStatus
                | Self::InvalidType
                | Self::InvalidPriority
        )
    }

    /// Get the exit code for this error category.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }

    /// Classify a [`BeadsError`].
    #[must_use]
    pub const fn from_error(err: &BeadsError) -> Self {
        match err {
            BeadsError::Database(_) => Self::DatabaseError,
            BeadsError::NotInitialized => Self::NotInitialized,
            BeadsError::AlreadyInitialized { .. } => Self::AlreadyInitialized,
            BeadsError::IssueNotFound { .. } => Self::IssueNotFound,
            BeadsError::InvalidId { .. } => Self::InvalidId,
            BeadsError::Validation { .. } => Self::ValidationFailed,
            BeadsError::InvalidStatus { .. } => Self::InvalidStatus,
            BeadsError::InvalidType { .. } => Self::InvalidType,
            BeadsError::InvalidPriority { .. } => Self::InvalidPriority,
            BeadsError::CorruptLine { .. } => Self::CorruptLine,
            BeadsError::ReconcileConflict { .. } => Self::ReconcileConflict,
            BeadsError::RemoteSync { .. } => Self::RemoteSyncFailure,
            BeadsError::AlreadyRunning { .. } => Self::AlreadyRunning,
            BeadsError::Unreachable { .. } => Self::Unreachable,
            BeadsError::LockCorrupt { .. } => Self::LockCorrupt,
            BeadsError::LockTimeout { .. } => Self::LockTimeout,
            BeadsError::Config(_) => Self::ConfigError,
            BeadsError::Io(_) => Self::IoError,
            BeadsError::Json(_) => Self::JsonError,
            BeadsError::Yaml(_) => Self::YamlError,
            BeadsError::Rpc { .. } | BeadsError::Other(_) => Self::InternalError,
        }
    }

    /// Parse a code received over the wire.
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        serde_json::from_value(Value::String(code.to_string())).ok()
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Build a structured error from a [`BeadsError`].
    #[must_use]
    pub fn from_error(err: &BeadsError) -> Self {
        let code = match err {
            BeadsError::Rpc { code, .. } => ErrorCode::parse(code).unwrap_or(ErrorCode::InternalError),
            other => ErrorCode::from_error(other),
        };
        Self {
            code,
            message: err.to_string(),
            hint: err.suggestion().map(str::to_string),
            retryable: code.is_retryable(),
            context: error_context(err),
        }
    }

    /// Rebuild a typed error from a code, message and context received from the daemon.
    #[must_use]
    pub fn into_error(self) -> BeadsError {
        let field = |name: &str| {
            self.context
                .as_ref()
                .and_then(|ctx| ctx.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        match self.code {
            ErrorCode::IssueNotFound => BeadsError::IssueNotFound {
                id: field("id").unwrap_or_default(),
            },
            ErrorCode::InvalidId => BeadsError::InvalidId {
                id: field("id").unwrap_or_default(),
            },
            ErrorCode::ValidationFailed => BeadsError::Validation {
                field: field("field").unwrap_or_default(),
                reason: field("reason").unwrap_or(self.message),
            },
            ErrorCode::InvalidStatus => BeadsError::InvalidStatus {
                status: field("status").unwrap_or_default(),
            },
            ErrorCode::RemoteSyncFailure => BeadsError::RemoteSync {
                operation: field("operation").unwrap_or_default(),
                reason: field("reason").unwrap_or(self.message),
            },
            ErrorCode::LockTimeout => BeadsError::LockTimeout {
                path: PathBuf::from(field("path").unwrap_or_default()),
            },
            ErrorCode::NotInitialized => BeadsError::NotInitialized,
            code => BeadsError::Rpc {
                code: code.as_str().to_string(),
                message: self.message,
            },
        }
    }

    /// Convert to a JSON value for output.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable terminal output.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let mut output = String::new();

        if color {
            output.push_str("\x1b[31mError:\x1b[0m ");
        } else {
            output.push_str("Error: ");
        }

        output.push_str(&self.message);

        if let Some(hint) = &self.hint {
            output.push('\n');
            if color {
                output.push_str("\x1b[33mHint:\x1b[0m ");
            } else {
                output.push_str("Hint: ");
            }
            output.push_str(hint);
        }

        output
    }
}

fn error_context(err: &BeadsError) -> Option<Value> {
    match err {
        BeadsError::IssueNotFound { id } | BeadsError::InvalidId { id } => Some(json!({ "id": id })),
        BeadsError::Validation { field, reason } => {
            Some(json!({ "field": field, "reason": reason }))
        }
        BeadsError::InvalidStatus { status } => Some(json!({ "status": status })),
        BeadsError::CorruptLine { line, reason } => {
            Some(json!({ "line": line, "reason": reason }))
        }
        BeadsError::ReconcileConflict { id } => Some(json!({ "id": id })),
        BeadsError::RemoteSync { operation, reason } => {
            Some(json!({ "operation": operation, "reason": reason }))
        }
        BeadsError::AlreadyRunning { path, pid } => {
            Some(json!({ "path": path.display().to_string(), "pid": pid }))
        }
        BeadsError::Unreachable { socket, reason } => {
            Some(json!({ "socket": socket.display().to_string(), "reason": reason }))
        }
        BeadsError::LockCorrupt { path, .. } | BeadsError::LockTimeout { path } => {
            Some(json!({ "path": path.display().to_string() }))
        }
        _ => None,
    }
}
