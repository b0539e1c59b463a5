//! Sync command implementation.

use super::{open_backend, print_json};
use crate::cli::SyncArgs;
use crate::config::CliOverrides;
use crate::daemon::ipc::SyncSummary;
use crate::error::Result;
use std::fmt::Write as FmtWrite;

/// Execute the sync command: reconcile the Store with the log file, via
/// the daemon when one answers. `--full` also commits, pulls and pushes.
///
/// Conflicts and corrupt lines are warnings; the command still succeeds.
///
/// # Errors
///
/// Returns storage, I/O or lock-timeout errors.
pub fn execute(args: &SyncArgs, cli: &CliOverrides) -> Result<()> {
    let backend = open_backend(cli)?;
    let summary = backend.sync(args.full)?;
    tracing::debug!(backend = %backend.kind(), full = args.full, "sync finished");

    for conflict in &summary.conflicts {
        tracing::warn!(id = %conflict.id, "equal timestamps, different content; kept database copy");
    }
    for line in &summary.corrupt_lines {
        tracing::warn!(line = line.line, reason = %line.reason, "skipped corrupt log line");
    }

    if cli.json.unwrap_or(false) {
        return print_json(&summary);
    }
    if !cli.quiet {
        print!("{}", format_summary(&summary));
    }
    Ok(())
}

fn format_summary(summary: &SyncSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Synced {} issue(s): {} imported, log {}",
        summary.records,
        summary.imported,
        if summary.exported { "rewritten" } else { "unchanged" }
    );
    let steps: Vec<&str> = [
        (summary.committed, "committed"),
        (summary.pulled, "pulled"),
        (summary.pushed, "pushed"),
    ]
    .into_iter()
    .filter_map(|(done, step)| done.then_some(step))
    .collect();
    if !steps.is_empty() {
        let _ = writeln!(out, "Git: {}", steps.join(", "));
    }
    if !summary.conflicts.is_empty() {
        let _ = writeln!(out, "Conflicts (kept database copy):");
        for conflict in &summary.conflicts {
            let _ = writeln!(out, "  {} at {}", conflict.id, conflict.updated_at);
        }
    }
    if !summary.corrupt_lines.is_empty() {
        let _ = writeln!(out, "Skipped corrupt lines:");
        for line in &summary.corrupt_lines {
            let _ = writeln!(out, "  line {}: {}", line.line, line.reason);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::CorruptLine;

    #[test]
    fn summary_lists_corrupt_lines() {
        let summary = SyncSummary {
            imported: 2,
            exported: true,
            records: 5,
            conflicts: Vec::new(),
            corrupt_lines: vec![CorruptLine {
                line: 3,
                reason: "expected value".to_string(),
            }],
            ..SyncSummary::default()
        };
        let text = format_summary(&summary);
        assert!(text.starts_with("Synced 5 issue(s): 2 imported, log rewritten"));
        assert!(text.contains("line 3: expected value"));
        assert!(!text.contains("Git:"));
    }

    #[test]
    fn summary_names_git_steps() {
        let summary = SyncSummary {
            records: 1,
            committed: true,
            pushed: true,
            ..SyncSummary::default()
        };
        assert!(format_summary(&summary).contains("Git: committed, pushed\n"));
    }
}
