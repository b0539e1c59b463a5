//! Local history backups of the log file.
//!
//! Before the reconciler overwrites `issues.jsonl`, a timestamped copy is
//! saved under `.beads/.br_history/`. Identical consecutive copies are
//! skipped and old copies are rotated out by count and age.

use crate::error::Result;
use crate::util::sha256_hex;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

pub const HISTORY_DIR: &str = ".br_history";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6f";

/// Configuration for history backups.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub max_count: usize,
    pub max_age_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_count: 100,
            max_age_days: 30,
        }
    }
}

/// Backup entry metadata.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// Copy `log_path` into the history directory.
///
/// Returns the backup path, or `None` when backups are disabled, the log
/// does not exist, or it matches the most recent backup.
///
/// # Errors
///
/// Returns an error if the copy or the rotation fails.
pub fn backup_log(beads_dir: &Path, config: &HistoryConfig, log_path: &Path) -> Result<Option<PathBuf>> {
    if !config.enabled || !log_path.is_file() {
        return Ok(None);
    }

    let history_dir = beads_dir.join(HISTORY_DIR);
    fs::create_dir_all(&history_dir)?;

    let stem = log_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("issues");
    let current = fs::read(log_path)?;

    let latest = list_backups(&history_dir)?
        .into_iter()
        .find(|entry| backup_stem(&entry.path) == Some(stem));
    if let Some(latest) = latest {
        if sha256_hex(&fs::read(&latest.path)?) == sha256_hex(&current) {
            tracing::debug!(latest = %latest.path.display(), "skipping backup: identical to latest");
            return Ok(None);
        }
    }

    let backup_path = history_dir.join(format!(
        "{stem}.{}.jsonl",
        Utc::now().format(STAMP_FORMAT)
    ));
    fs::write(&backup_path, &current)?;
    tracing::debug!(backup = %backup_path.display(), "created log backup");

    rotate_history(&history_dir, config)?;
    Ok(Some(backup_path))
}

/// Delete backups beyond `max_count` (newest kept) or older than `max_age_days`.
fn rotate_history(history_dir: &Path, config: &HistoryConfig) -> Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(config.max_age_days));
    let mut deleted = 0;
    for (idx, entry) in list_backups(history_dir)?.iter().enumerate() {
        if idx >= config.max_count || entry.timestamp < cutoff {
            fs::remove_file(&entry.path)?;
            deleted += 1;
        }
    }
    if deleted > 0 {
        tracing::debug!(deleted, "pruned old log backups");
    }
    Ok(deleted)
}

/// List backups, newest first. Files not named `<stem>.<stamp>.jsonl` are ignored.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_backups(history_dir: &Path) -> Result<Vec<BackupEntry>> {
    if !history_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(history_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(stamp) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".jsonl"))
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, stamp)| stamp.to_string())
        else {
            continue;
        };
        let Ok(naive) = NaiveDateTime::parse_from_str(&stamp, STAMP_FORMAT) else {
            continue;
        };
        backups.push(BackupEntry {
            path,
            timestamp: naive.and_utc(),
        });
    }

    backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(backups)
}

fn backup_stem(path: &Path) -> Option<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split_once('.'))
        .map(|(stem, _)| stem)
}
