//! `beads_daemon` - single-writer coordination daemon for a git-synced issue tracker.
//!
//! The repository's issues live in two representations: a `SQLite` store
//! (authoritative while running) and a JSONL log file tracked by git
//! (authoritative across machines). The daemon serializes access to the store,
//! keeps both representations consistent, and syncs the log with the remote.

pub mod cli;
pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod model;
pub mod storage;
pub mod sync;
pub mod util;

pub use error::{BeadsError, ErrorCode, Result, Severity, StructuredError};
