//! Start command implementation.

use super::Workspace;
use super::daemon::run_daemon;
use crate::cli::StartArgs;
use crate::config::{BEADS_DIR_ENV, BeadsPaths, CliOverrides, DaemonConfig};
use crate::daemon::ipc::PingInfo;
use crate::daemon::probe;
use crate::error::{BeadsError, Result};
use std::env;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const START_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// Execute the start command.
///
/// Starting an already running daemon is a successful no-op.
///
/// # Errors
///
/// Returns configuration errors, or an error if the daemon does not come
/// up within the startup timeout.
pub fn execute(args: &StartArgs, cli: &CliOverrides) -> Result<()> {
    let workspace = Workspace::discover()?;
    let config = workspace.daemon_config(&args.daemon)?;
    config.validate()?;

    if args.foreground {
        return match run_daemon(workspace.paths, config) {
            Err(BeadsError::AlreadyRunning { pid, .. }) => {
                report_running(pid, cli);
                Ok(())
            }
            other => other,
        };
    }

    if let Some(info) = probe(&workspace.paths, PROBE_TIMEOUT) {
        report_running(Some(info.pid), cli);
        return Ok(());
    }

    let mut child = spawn_detached(&workspace.paths, &config, cli)?;
    let info = wait_until_ready(&workspace.paths, &mut child)?;
    tracing::info!(pid = info.pid, "daemon started");
    if !cli.quiet {
        println!("Daemon started (pid {})", info.pid);
    }
    Ok(())
}

fn report_running(pid: Option<u32>, cli: &CliOverrides) {
    if !cli.quiet {
        match pid {
            Some(pid) => println!("Daemon already running (pid {pid})"),
            None => println!("Daemon already running"),
        }
    }
}

fn spawn_detached(paths: &BeadsPaths, config: &DaemonConfig, cli: &CliOverrides) -> Result<Child> {
    let exe = env::current_exe()?;
    let mut cmd = Command::new(exe);
    cmd.arg("daemon").arg("run").args(config.to_args());
    for _ in 0..cli.verbose {
        cmd.arg("-v");
    }
    cmd.env(BEADS_DIR_ENV, &paths.beads_dir)
        .current_dir(&paths.beads_dir);
    detach(&mut cmd);
    tracing::debug!(?cmd, "spawning daemon");
    Ok(cmd.spawn()?)
}

/// No inherited stdio, and a process group of its own so signals aimed at
/// the launching terminal (Ctrl-C, hangup) do not reach the daemon.
fn detach(cmd: &mut Command) {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);
}

fn wait_until_ready(paths: &BeadsPaths, child: &mut Child) -> Result<PingInfo> {
    let deadline = Instant::now() + START_TIMEOUT;
    let mut backoff = Duration::from_millis(50);
    loop {
        if let Some(info) = probe(paths, PROBE_TIMEOUT) {
            return Ok(info);
        }
        if let Some(status) = child.try_wait()? {
            // Another `start` may have won the lock in the meantime.
            if let Some(info) = probe(paths, PROBE_TIMEOUT) {
                return Ok(info);
            }
            return Err(BeadsError::Other(anyhow::anyhow!(
                "daemon exited during startup ({status}); see {}",
                paths.daemon_log.display()
            )));
        }
        if Instant::now() >= deadline {
            return Err(BeadsError::Unreachable {
                socket: paths.socket_path.clone(),
                reason: format!(
                    "daemon did not answer within {START_TIMEOUT:?}; see {}",
                    paths.daemon_log.display()
                ),
            });
        }
        thread::sleep(backoff);
        backoff = (backoff * 2).min(Duration::from_millis(500));
    }
}
