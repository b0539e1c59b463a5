//! The Store: `SQLite`-backed issue records, comments, audit events and metadata.

pub mod schema;
pub mod sqlite;

pub use sqlite::{CONFIG_ISSUE_PREFIX, DEFAULT_PREFIX, IssueIter, MutationContext, SqliteStorage};
