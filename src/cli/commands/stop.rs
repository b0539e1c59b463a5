//! Stop command implementation.

use super::Workspace;
use crate::config::{CliOverrides, DaemonConfig};
use crate::daemon::ipc::{DaemonClient, Request, ResponsePayload, unexpected};
use crate::daemon::lock;
use crate::error::{BeadsError, ErrorCode, Result};
use std::thread;
use std::time::{Duration, Instant};

/// Allowance beyond the drain timeout for the final reconcile.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Execute the stop command. Stopping a stopped daemon is a no-op.
///
/// # Errors
///
/// Returns an error if the daemon holds its lock but does not answer, or
/// does not release the lock in time.
pub fn execute(cli: &CliOverrides) -> Result<()> {
    let workspace = Workspace::discover()?;
    let config = DaemonConfig::from_layer(&workspace.layer)?;
    let lock_path = &workspace.paths.lock_path;
    let client = DaemonClient::new(&workspace.paths.socket_path, config.rpc_timeout);

    match client.request(&Request::Shutdown) {
        Ok(ResponsePayload::ShuttingDown) => {}
        Ok(other) => return Err(unexpected("shutdown", &other)),
        Err(BeadsError::Rpc { code, .. }) if code == ErrorCode::ShuttingDown.as_str() => {}
        Err(BeadsError::Unreachable { .. }) if !lock::is_held(lock_path) => {
            if !cli.quiet {
                println!("Daemon not running");
            }
            return Ok(());
        }
        Err(err) => return Err(err),
    }

    let deadline = Instant::now() + config.drain_timeout + STOP_GRACE;
    while lock::is_held(lock_path) {
        if Instant::now() >= deadline {
            return Err(BeadsError::Other(anyhow::anyhow!(
                "daemon did not stop within {:?}",
                config.drain_timeout + STOP_GRACE
            )));
        }
        thread::sleep(Duration::from_millis(50));
    }

    if !cli.quiet {
        println!("Daemon stopped");
    }
    Ok(())
}
