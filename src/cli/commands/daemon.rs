//! `bd daemon run`: the daemon process itself.

use super::Workspace;
use crate::cli::DaemonArgs;
use crate::config::{BeadsPaths, DaemonConfig};
use crate::daemon::{Daemon, ShutdownReason};
use crate::error::{BeadsError, Result};

/// Run the daemon in the foreground until shutdown is requested.
///
/// # Errors
///
/// Returns `AlreadyRunning`, startup errors, or the final reconcile's error.
pub fn run(args: &DaemonArgs) -> Result<()> {
    let workspace = Workspace::discover()?;
    let config = workspace.daemon_config(args)?;
    run_daemon(workspace.paths, config)
}

/// Start a daemon, wait for SIGINT/SIGTERM or a shutdown request, stop it.
///
/// # Errors
///
/// Returns startup errors, the final reconcile's error, or the fatal
/// error that ended the daemon.
pub fn run_daemon(paths: BeadsPaths, config: DaemonConfig) -> Result<()> {
    let mut daemon = Daemon::new(paths, config);
    daemon.start()?;

    let handle = daemon.shutdown_handle();
    ctrlc::set_handler(move || {
        let _ = handle.send(ShutdownReason::Signal);
    })
    .map_err(|err| BeadsError::Other(anyhow::anyhow!("failed to install signal handler: {err}")))?;

    let reason = daemon.wait_for_shutdown();
    tracing::info!(?reason, "shutting down");
    daemon.stop()?;

    match reason {
        ShutdownReason::Fatal(message) => Err(BeadsError::Other(anyhow::anyhow!(
            "daemon stopped after a fatal error: {message}"
        ))),
        ShutdownReason::Requested | ShutdownReason::Signal => Ok(()),
    }
}
