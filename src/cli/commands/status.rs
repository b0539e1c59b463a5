//! Status command implementation.

use super::{Workspace, print_json};
use crate::config::{CliOverrides, DaemonConfig};
use crate::daemon::DaemonStatus;
use crate::daemon::ipc::{DaemonClient, Request, ResponsePayload, unexpected};
use crate::daemon::lock;
use crate::error::{BeadsError, Result};
use chrono::{DateTime, Utc};
use std::fmt::Write as FmtWrite;

/// Execute the status command. Succeeds only if the daemon answers.
///
/// # Errors
///
/// Returns `Unreachable` when no daemon answers on the repository socket.
pub fn execute(cli: &CliOverrides) -> Result<()> {
    let workspace = Workspace::discover()?;
    let timeout = DaemonConfig::from_layer(&workspace.layer)?.rpc_timeout;
    let client = DaemonClient::new(&workspace.paths.socket_path, timeout);

    let status = match client.request(&Request::Status) {
        Ok(ResponsePayload::Status(status)) => *status,
        Ok(other) => return Err(unexpected("status", &other)),
        Err(BeadsError::Unreachable { socket, reason }) => {
            let lock_path = &workspace.paths.lock_path;
            let reason = match lock::read_info(lock_path) {
                Some(info) if lock::is_held(lock_path) => {
                    format!("daemon pid {} holds the lock but is not answering ({reason})", info.pid)
                }
                _ => "daemon is not running".to_string(),
            };
            return Err(BeadsError::Unreachable { socket, reason });
        }
        Err(err) => return Err(err),
    };

    if cli.json.unwrap_or(false) {
        return print_json(&status);
    }
    if !cli.quiet {
        print!("{}", format_status(&status));
    }
    Ok(())
}

fn format_status(status: &DaemonStatus) -> String {
    let mut out = String::new();
    let on = |flag: bool| if flag { "on" } else { "off" };
    let _ = writeln!(
        out,
        "Daemon: {} (pid {}, v{})",
        status.state, status.pid, status.version
    );
    let _ = writeln!(out, "Repository: {}", status.beads_dir.display());
    let _ = writeln!(out, "Socket: {}", status.socket.display());
    let _ = writeln!(out, "Started: {}", status.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(
        out,
        "Records: {}",
        status
            .records
            .map_or_else(|| "(busy)".to_string(), |n| n.to_string())
    );
    let _ = writeln!(out, "Dirty: {}", if status.sync.dirty { "yes" } else { "no" });
    let _ = writeln!(
        out,
        "Auto-sync: commit={} pull={} push={} every {}{}",
        on(status.config.auto_commit),
        on(status.config.auto_pull),
        on(status.config.auto_push),
        crate::util::time::format_duration(status.config.interval),
        if status.git { "" } else { " (no git repository)" }
    );
    for (label, at) in [
        ("reconcile", status.sync.last_reconcile_at),
        ("commit", status.sync.last_commit_at),
        ("pull", status.sync.last_pull_at),
        ("push", status.sync.last_push_at),
    ] {
        let _ = writeln!(out, "Last {label}: {}", format_time(at));
    }
    if let Some(err) = &status.sync.last_error {
        let _ = writeln!(out, "Last error: {err}");
    }
    out
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || "never".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}
