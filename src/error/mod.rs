//! Error types and handling for `beads_daemon`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - `anyhow` errors are accepted at the edges via `Other`
//! - Every error carries a severity so background work can decide whether
//!   to log and retry or to shut the daemon down
//! - Provides structured JSON output (see [`StructuredError`])

mod structured;

pub use structured::{ErrorCode, StructuredError};

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `beads_daemon` operations.
#[derive(Error, Debug)]
pub enum BeadsError {
    // === Storage Errors ===
    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // === Issue Errors ===
    /// Issue with the specified ID was not found.
    #[error("Issue not found: {id}")]
    IssueNotFound { id: String },

    /// Issue ID format is invalid.
    #[error("Invalid issue ID format: {id}")]
    InvalidId { id: String },

    // === Validation Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Invalid status value.
    #[error("Invalid status: {status}")]
    InvalidStatus { status: String },

    /// Invalid issue type value.
    #[error("Invalid issue type: {issue_type}")]
    InvalidType { issue_type: String },

    /// Priority out of valid range (0-4).
    #[error("Priority must be 0-4, got: {priority}")]
    InvalidPriority { priority: i32 },

    // === Log / Sync Errors ===
    /// A log line could not be decoded.
    #[error("Corrupt log line {line}: {reason}")]
    CorruptLine { line: usize, reason: String },

    /// Store and log hold different content for a record with the same timestamp.
    #[error("Reconcile conflict on {id}: equal timestamps, different content (kept store copy)")]
    ReconcileConflict { id: String },

    /// A git operation against the remote failed.
    #[error("Remote sync failed during {operation}: {reason}")]
    RemoteSync { operation: String, reason: String },

    // === Daemon Errors ===
    /// Another daemon holds the repository lock.
    #[error("Daemon already running for {path}{}", .pid.map_or_else(String::new, |p| format!(" (pid {p})")))]
    AlreadyRunning { path: PathBuf, pid: Option<u32> },

    /// The daemon socket did not answer.
    #[error("Daemon unreachable at {socket}: {reason}")]
    Unreachable { socket: PathBuf, reason: String },

    /// The lock file vanished or was rewritten underneath the daemon.
    #[error("Lock file corrupt at {path}: {reason}")]
    LockCorrupt { path: PathBuf, reason: String },

    /// A file lock could not be acquired in time.
    #[error("Timed out waiting for lock {path}")]
    LockTimeout { path: PathBuf },

    /// The daemon answered with an error this client has no typed variant for.
    #[error("Daemon error [{code}]: {message}")]
    Rpc { code: String, message: String },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Beads workspace not initialized.
    #[error("Beads not initialized: run 'bd init' first")]
    NotInitialized,

    /// Already initialized.
    #[error("Already initialized at '{path}'")]
    AlreadyInitialized { path: PathBuf },

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How far an error is allowed to travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Report to the caller; nothing else is affected.
    Recoverable,
    /// Produced by background sync work: log it and retry on the next tick.
    Background,
    /// The daemon must stop after a final export attempt.
    Fatal,
}

impl BeadsError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::IssueNotFound { .. }
                | Self::InvalidId { .. }
                | Self::Validation { .. }
                | Self::InvalidStatus { .. }
                | Self::InvalidType { .. }
                | Self::InvalidPriority { .. }
                | Self::AlreadyRunning { .. }
                | Self::Unreachable { .. }
                | Self::Config(_)
        )
    }

    /// Classify the error for the propagation policy.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::LockCorrupt { .. } => Severity::Fatal,
            Self::Database(err) if is_unrecoverable_sqlite(err) => Severity::Fatal,
            Self::CorruptLine { .. }
            | Self::ReconcileConflict { .. }
            | Self::RemoteSync { .. }
            | Self::LockTimeout { .. } => Severity::Background,
            _ => Severity::Recoverable,
        }
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: bd init"),
            Self::AlreadyInitialized { .. } => Some("Use --force to reinitialize"),
            Self::Unreachable { .. } => Some("Run: bd start (or pass --no-daemon)"),
            Self::AlreadyRunning { .. } => Some("Run: bd status"),
            Self::LockTimeout { .. } => Some("Another bd process is syncing; retry shortly"),
            Self::CorruptLine { .. } => {
                Some("Fix or remove the line; a backup is kept in .beads/.br_history")
            }
            Self::InvalidPriority { .. } => {
                Some("Use a priority between 0 (critical) and 4 (backlog)")
            }
            Self::InvalidStatus { .. } => {
                Some("Valid statuses: open, in_progress, blocked, deferred, closed")
            }
            Self::InvalidType { .. } => Some("Valid types: task, bug, feature, epic, chore"),
            _ => None,
        }
    }

    /// Get the exit code for this error. Every failure exits with 1.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a remote sync failure.
    #[must_use]
    pub fn remote(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteSync {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

fn is_unrecoverable_sqlite(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode as Code;
    matches!(
        err.sqlite_error_code(),
        Some(
            Code::SystemIoFailure
                | Code::DiskFull
                | Code::DatabaseCorrupt
                | Code::NotADatabase
                | Code::CannotOpen
        )
    )
}

/// Result type using `BeadsError`.
pub type Result<T> = std::result::Result<T, BeadsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BeadsError::IssueNotFound {
            id: "bd-abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Issue not found: bd-abc123");
    }

    #[test]
    fn test_already_running_display_includes_pid() {
        let err = BeadsError::AlreadyRunning {
            path: PathBuf::from("/repo/.beads"),
            pid: Some(42),
        };
        assert_eq!(
            err.to_string(),
            "Daemon already running for /repo/.beads (pid 42)"
        );
    }

    #[test]
    fn test_severity_policy() {
        assert_eq!(
            BeadsError::remote("push", "rejected").severity(),
            Severity::Background
        );
        assert_eq!(
            BeadsError::CorruptLine {
                line: 3,
                reason: "bad".into()
            }
            .severity(),
            Severity::Background
        );
        assert_eq!(
            BeadsError::LockCorrupt {
                path: PathBuf::from("x"),
                reason: "missing".into()
            }
            .severity(),
            Severity::Fatal
        );
        assert_eq!(
            BeadsError::IssueNotFound { id: "bd-1".into() }.severity(),
            Severity::Recoverable
        );
    }

    #[test]
    fn test_disk_full_is_fatal() {
        let err = BeadsError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        ));
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn test_user_recoverable() {
        assert!(BeadsError::NotInitialized.is_user_recoverable());

        let not_recoverable = BeadsError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            None,
        ));
        assert!(!not_recoverable.is_user_recoverable());
    }

    #[test]
    fn test_suggestion() {
        assert_eq!(BeadsError::NotInitialized.suggestion(), Some("Run: bd init"));
        assert_eq!(BeadsError::validation("title", "empty").suggestion(), None);
    }
}
