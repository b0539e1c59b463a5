//! Reconciler: keeps the Store and the log file equivalent.
//!
//! Staleness is detected two ways. The log is stale relative to the Store
//! when the Store is dirty; the Store is stale relative to the log when the
//! file's signature no longer matches the one recorded at the last
//! reconcile. A reconcile imports first (last-writer-wins on `updated_at`),
//! then exports the merged set and records the new signature.

use crate::error::{BeadsError, Result};
use crate::model::Issue;
use crate::storage::SqliteStorage;
use crate::sync::history::{HistoryConfig, backup_log};
use crate::sync::{
    CorruptLine, METADATA_JSONL_CONTENT_HASH, METADATA_LAST_EXPORT_TIME,
    METADATA_LAST_IMPORT_TIME, export_records, read_log, read_log_text, write_log,
};
use crate::util::log_content_hash;
use crate::util::time::format_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Identity of the log file as of the last reconcile.
///
/// `len` and `modified_ms` are a cheap first check; `content_hash` decides
/// when they differ, so touching the file without changing it is not an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSignature {
    pub len: u64,
    pub modified_ms: i64,
    pub content_hash: String,
}

/// Daemon-lifetime synchronization state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub last_signature: Option<LogSignature>,
    /// Mutations exist that are not yet in the log.
    pub dirty: bool,
    pub last_reconcile_at: Option<DateTime<Utc>>,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncState {
    /// Rebuild state after a restart from what the Store persisted.
    ///
    /// The stored content hash stands in for the signature; its zero length
    /// and mtime force a hash comparison on the first check.
    ///
    /// # Errors
    ///
    /// Returns a database error if the Store cannot be read.
    pub fn rebuild(store: &SqliteStorage) -> Result<Self> {
        let last_signature = store
            .get_metadata(METADATA_JSONL_CONTENT_HASH)?
            .map(|content_hash| LogSignature {
                len: 0,
                modified_ms: 0,
                content_hash,
            });
        Ok(Self {
            last_signature,
            dirty: store.has_dirty_issues()?,
            ..Self::default()
        })
    }

    /// Record a background failure for `status` to report.
    pub fn record_error(&mut self, action: &str, err: &BeadsError) {
        self.last_error = Some(format!("{action}: {err}"));
    }
}

/// Two copies of one record with equal revision markers and different content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    /// Content hash of the Store copy, which is kept.
    pub kept_hash: String,
    /// Content hash of the log copy, which is discarded.
    pub discarded_hash: String,
}

/// What one reconcile did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records adopted from the log.
    pub imported: usize,
    /// The log file was rewritten.
    pub exported: bool,
    /// Records in the Store after the reconcile.
    pub records: usize,
    pub conflicts: Vec<Conflict>,
    pub corrupt_lines: Vec<CorruptLine>,
    pub backup: Option<PathBuf>,
}

impl ReconcileReport {
    /// Non-blocking problems surfaced as typed warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<BeadsError> {
        self.conflicts
            .iter()
            .map(|c| BeadsError::ReconcileConflict { id: c.id.clone() })
            .chain(self.corrupt_lines.iter().cloned().map(BeadsError::from))
            .collect()
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.imported == 0 && !self.exported
    }

    /// Fold in the report of a later reconcile in the same sync.
    pub fn absorb(&mut self, later: Self) {
        self.imported += later.imported;
        self.exported |= later.exported;
        self.records = later.records;
        self.conflicts.extend(later.conflicts);
        if !later.corrupt_lines.is_empty() {
            self.corrupt_lines = later.corrupt_lines;
        }
        if later.backup.is_some() {
            self.backup = later.backup;
        }
    }
}

/// Result of merging the log's records into the Store's.
#[derive(Debug, Default)]
struct MergePlan {
    adopt: Vec<Issue>,
    conflicts: Vec<Conflict>,
}

/// Reconciles one repository's Store with its log file.
#[derive(Debug, Clone)]
pub struct Reconciler {
    beads_dir: PathBuf,
    log_path: PathBuf,
    history: HistoryConfig,
}

impl Reconciler {
    #[must_use]
    pub fn new(beads_dir: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            beads_dir: beads_dir.into(),
            log_path: log_path.into(),
            history: HistoryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// True when the log changed since the last known signature.
    ///
    /// A missing file never needs import. When only the stat fields moved
    /// but the content hash matches, the cached signature is refreshed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read.
    pub fn needs_import(&self, state: &mut SyncState) -> Result<bool> {
        let Some((len, modified_ms)) = stat(&self.log_path)? else {
            return Ok(false);
        };

        if let Some(last) = &state.last_signature {
            if last.len == len && last.modified_ms == modified_ms {
                return Ok(false);
            }
        }

        let text = read_log_text(&self.log_path)?;
        let content_hash = log_content_hash(&text);
        match &mut state.last_signature {
            Some(last) if last.content_hash == content_hash => {
                last.len = len;
                last.modified_ms = modified_ms;
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(!text.trim().is_empty()),
        }
    }

    #[must_use]
    pub const fn needs_export(&self, state: &SyncState) -> bool {
        state.dirty
    }

    /// Bring the Store and the log into agreement.
    ///
    /// Import runs first when the log changed: for each record in the log,
    /// the copy with the later `updated_at` wins. Equal markers with
    /// different content keep the Store copy and report a [`Conflict`].
    /// The merged set is then exported if it differs from the file.
    ///
    /// # Errors
    ///
    /// Returns storage or I/O errors. Conflicts and corrupt lines are
    /// reported in the [`ReconcileReport`], not as errors.
    pub fn reconcile(
        &self,
        store: &mut SqliteStorage,
        state: &mut SyncState,
    ) -> Result<ReconcileReport> {
        state.dirty = state.dirty || store.has_dirty_issues()?;
        let log_exists = self.log_path.is_file();
        let import = self.needs_import(state)?;
        let missing_log = !log_exists && store.count_issues()? > 0;

        let mut report = ReconcileReport::default();
        if !import && !self.needs_export(state) && !missing_log {
            state.last_reconcile_at = Some(Utc::now());
            return Ok(report);
        }

        let now = format_timestamp(&Utc::now());
        let (text, outcome) = read_log(&self.log_path)?;
        let dirty_ids = store.get_dirty_issue_ids()?;

        if import {
            for err in &outcome.errors {
                tracing::warn!(line = err.line, reason = %err.reason, "skipping corrupt log line");
            }
            let plan = merge(&store.snapshot()?, outcome.records)?;
            if !plan.adopt.is_empty() {
                store.import_issues(&plan.adopt)?;
            }
            report.imported = plan.adopt.len();
            report.conflicts = plan.conflicts;
            report.corrupt_lines = outcome.errors;
            store.set_metadata(METADATA_LAST_IMPORT_TIME, &now)?;
            tracing::debug!(imported = report.imported, "imported log changes");
        }

        let snapshot = store.snapshot()?;
        let exported = export_records(&snapshot)?;
        report.records = snapshot.len();

        if exported != text {
            if log_exists {
                match backup_log(&self.beads_dir, &self.history, &self.log_path) {
                    Ok(path) => report.backup = path,
                    Err(err) => tracing::warn!(error = %err, "log backup failed"),
                }
            }
            write_log(&self.log_path, &exported)?;
            store.set_metadata(METADATA_LAST_EXPORT_TIME, &now)?;
            report.exported = true;
            tracing::debug!(records = report.records, path = %self.log_path.display(), "exported log");
        }

        store.clear_dirty_issues(&dirty_ids)?;
        let content_hash = log_content_hash(&exported);
        store.set_metadata(METADATA_JSONL_CONTENT_HASH, &content_hash)?;

        state.last_signature = stat(&self.log_path)?.map(|(len, modified_ms)| LogSignature {
            len,
            modified_ms,
            content_hash,
        });
        state.dirty = store.has_dirty_issues()?;
        state.last_reconcile_at = Some(Utc::now());

        if !report.is_noop() {
            tracing::info!(
                imported = report.imported,
                exported = report.exported,
                conflicts = report.conflicts.len(),
                corrupt_lines = report.corrupt_lines.len(),
                "reconciled"
            );
        }
        Ok(report)
    }

    /// Reconcile as if both sides were stale: re-read the log and rewrite it.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::reconcile`].
    pub fn reconcile_full(
        &self,
        store: &mut SqliteStorage,
        state: &mut SyncState,
    ) -> Result<ReconcileReport> {
        state.last_signature = None;
        state.dirty = true;
        self.reconcile(store, state)
    }
}

/// Decide, per log record, whether it replaces the Store copy.
///
/// Records are visited in ID order so conflict reports are deterministic.
fn merge(store_records: &[Issue], log_records: Vec<Issue>) -> Result<MergePlan> {
    let by_id: HashMap<&str, &Issue> = store_records.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut plan = MergePlan::default();

    let mut log_records = log_records;
    log_records.sort_by(|a, b| a.id.cmp(&b.id));

    for incoming in log_records {
        let Some(current) = by_id.get(incoming.id.as_str()) else {
            plan.adopt.push(incoming);
            continue;
        };

        match incoming.updated_at.cmp(&current.updated_at) {
            Ordering::Greater => plan.adopt.push(incoming),
            Ordering::Less => {}
            Ordering::Equal => {
                let kept_hash = content_hash(current);
                let discarded_hash = content_hash(&incoming);
                if kept_hash != discarded_hash {
                    tracing::warn!(
                        id = %incoming.id,
                        updated_at = %format_timestamp(&incoming.updated_at),
                        store = %serde_json::to_string(current)?,
                        log = %serde_json::to_string(&incoming)?,
                        "reconcile conflict: equal revision, different content; keeping store copy"
                    );
                    plan.conflicts.push(Conflict {
                        id: incoming.id,
                        updated_at: incoming.updated_at,
                        kept_hash,
                        discarded_hash,
                    });
                }
            }
        }
    }
    Ok(plan)
}

fn content_hash(issue: &Issue) -> String {
    if issue.comments.windows(2).all(|w| w[0].id < w[1].id) {
        return issue.compute_content_hash();
    }
    let mut normalized = issue.clone();
    normalized.comments.sort_by_key(|c| c.id);
    normalized.compute_content_hash()
}

fn stat(path: &Path) -> Result<Option<(u64, i64)>> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let modified_ms = meta
        .modified()
        .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
        .unwrap_or_default();
    Ok(Some((meta.len(), modified_ms)))
}
