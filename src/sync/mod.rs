//! Log Codec: the git-friendly JSONL form of the record set.
//!
//! One issue per line, keys in the fixed order of [`Issue`]'s fields,
//! lines sorted by ID, trailing newline. Import is best-effort: bad lines
//! are reported with their line number and skipped, everything else loads.
//!
//! Submodules:
//! - [`reconcile`]: keeps the Store and the log file consistent
//! - [`git`]: version-control plumbing for commit/pull/push
//! - [`cycle`]: the commit/pull/push sequence of an explicit sync
//! - [`history`]: backups taken before the log is overwritten

pub mod cycle;
pub mod git;
pub mod history;
pub mod reconcile;

pub use reconcile::{Conflict, LogSignature, ReconcileReport, Reconciler, SyncState};

use crate::error::{BeadsError, Result};
use crate::model::Issue;
use crate::util::{is_valid_id_format, write_atomic};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Metadata key for the content hash of the last exported/imported log.
pub const METADATA_JSONL_CONTENT_HASH: &str = "jsonl_content_hash";
/// Metadata key for the last export timestamp (RFC3339).
pub const METADATA_LAST_EXPORT_TIME: &str = "last_export_time";
/// Metadata key for the last import timestamp (RFC3339).
pub const METADATA_LAST_IMPORT_TIME: &str = "last_import_time";

const CONFLICT_START: &str = "<<<<<<<";
const CONFLICT_SEPARATOR: &str = "=======";
const CONFLICT_END: &str = ">>>>>>>";
const MAX_TITLE_LEN: usize = 500;

/// A log line that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptLine {
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

impl From<CorruptLine> for BeadsError {
    fn from(value: CorruptLine) -> Self {
        Self::CorruptLine {
            line: value.line,
            reason: value.reason,
        }
    }
}

/// Result of decoding a log: the records that loaded plus one entry per bad line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Sorted by ID, at most one record per ID.
    pub records: Vec<Issue>,
    pub errors: Vec<CorruptLine>,
}

/// Encode a single record as one log line (no newline).
///
/// # Errors
///
/// Returns a JSON error if serialization fails.
pub fn encode_record(issue: &Issue) -> Result<String> {
    Ok(serde_json::to_string(issue)?)
}

/// Encode a record set: sorted by ID, comments by ID, one line each.
///
/// # Errors
///
/// Returns a JSON error if serialization fails.
pub fn export_records(records: &[Issue]) -> Result<String> {
    let mut sorted: Vec<&Issue> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::new();
    for issue in sorted {
        let line = if issue.comments.windows(2).all(|w| w[0].id < w[1].id) {
            encode_record(issue)?
        } else {
            let mut normalized = issue.clone();
            normalized.comments.sort_by_key(|c| c.id);
            encode_record(&normalized)?
        };
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Decode log text.
///
/// Blank lines and trailing whitespace are ignored. Each bad line yields a
/// [`CorruptLine`] and decoding continues. If an ID appears twice the copy
/// with the later `updated_at` is kept (the first on a tie).
#[must_use]
pub fn import_records(text: &str) -> ImportOutcome {
    let mut records: BTreeMap<String, (usize, Issue)> = BTreeMap::new();
    let mut errors = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_start_matches('\u{feff}').trim_end();
        if line.trim_start().is_empty() {
            continue;
        }

        if let Some(marker) = conflict_marker(line) {
            errors.push(CorruptLine {
                line: line_no,
                reason: format!("merge conflict marker ({marker})"),
            });
            continue;
        }

        let issue: Issue = match serde_json::from_str(line) {
            Ok(issue) => issue,
            Err(err) => {
                errors.push(CorruptLine {
                    line: line_no,
                    reason: format!("invalid JSON: {err}"),
                });
                continue;
            }
        };

        if let Err(reason) = validate_record(&issue) {
            errors.push(CorruptLine {
                line: line_no,
                reason,
            });
            continue;
        }

        match records.entry(issue.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert((line_no, issue));
            }
            Entry::Occupied(mut slot) => {
                let (first_line, existing) = slot.get();
                tracing::warn!(
                    id = %issue.id,
                    first_line,
                    line = line_no,
                    "duplicate record in log; keeping the newer copy"
                );
                if issue.updated_at > existing.updated_at {
                    slot.insert((line_no, issue));
                }
            }
        }
    }

    ImportOutcome {
        records: records.into_values().map(|(_, issue)| issue).collect(),
        errors,
    }
}

/// Read and decode the log at `path`. A missing file is an empty log.
///
/// # Errors
///
/// Returns an I/O error if the file exists but cannot be read.
pub fn read_log(path: &Path) -> Result<(String, ImportOutcome)> {
    let text = read_log_text(path)?;
    let outcome = import_records(&text);
    Ok((text, outcome))
}

/// Raw log text; empty when the file does not exist.
///
/// # Errors
///
/// Returns an I/O error if the file exists but cannot be read.
pub fn read_log_text(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err.into()),
    }
}

/// Atomically replace the log with `text`.
///
/// # Errors
///
/// Returns an I/O error if the write or rename fails.
pub fn write_log(path: &Path, text: &str) -> Result<()> {
    write_atomic(path, text.as_bytes())?;
    Ok(())
}

fn conflict_marker(line: &str) -> Option<&str> {
    [CONFLICT_START, CONFLICT_SEPARATOR, CONFLICT_END]
        .into_iter()
        .find(|marker| line.starts_with(marker))
}

fn validate_record(issue: &Issue) -> std::result::Result<(), String> {
    if !is_valid_id_format(&issue.id) {
        return Err(format!("invalid issue id '{}'", issue.id));
    }
    let title_len = issue.title.chars().count();
    if title_len == 0 || title_len > MAX_TITLE_LEN {
        return Err(format!(
            "{}: title must be 1-{MAX_TITLE_LEN} characters",
            issue.id
        ));
    }
    if !(0..=4).contains(&issue.priority.0) {
        return Err(format!(
            "{}: priority {} out of range 0-4",
            issue.id, issue.priority.0
        ));
    }
    let mut seen = BTreeSet::new();
    for comment in &issue.comments {
        if comment.issue_id != issue.id {
            return Err(format!(
                "{}: comment {} belongs to {}",
                issue.id, comment.id, comment.issue_id
            ));
        }
        if !seen.insert(comment.id) {
            return Err(format!("{}: duplicate comment id {}", issue.id, comment.id));
        }
    }
    Ok(())
}
