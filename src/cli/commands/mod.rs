//! Command implementations.

pub mod comment;
pub mod create;
pub mod daemon;
pub mod delete;
pub mod init;
pub mod list;
pub mod show;
pub mod start;
pub mod status;
pub mod stop;
pub mod sync;
pub mod update;

use crate::cli::DaemonArgs;
use crate::client::{self, ConnectOptions, IssueBackend};
use crate::config::{
    self, BeadsPaths, CliOverrides, ConfigLayer, DaemonConfig, DaemonFlags,
};
use crate::error::Result;
use crate::sync::cycle::GitPlan;
use crate::util::time::parse_duration;
use std::time::Duration;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// A discovered repository with its project configuration loaded.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub paths: BeadsPaths,
    pub layer: ConfigLayer,
}

impl Workspace {
    /// # Errors
    ///
    /// Returns `NotInitialized` if no data directory is found, or a
    /// `Config` error for a malformed config file.
    pub fn discover() -> Result<Self> {
        let paths = BeadsPaths::discover(None)?;
        let layer = config::load_project_config(&paths.beads_dir)?;
        Ok(Self { paths, layer })
    }

    /// Daemon options from config.yaml with CLI switches applied.
    ///
    /// # Errors
    ///
    /// Returns `Config` for malformed values.
    pub fn daemon_config(&self, args: &DaemonArgs) -> Result<DaemonConfig> {
        let interval = args.interval.as_deref().map(parse_duration).transpose()?;
        Ok(DaemonConfig::from_layer(&self.layer)?.with_flags(DaemonFlags {
            auto_commit: args.auto_commit,
            auto_pull: args.auto_pull,
            auto_push: args.auto_push,
            interval,
        }))
    }

    /// # Errors
    ///
    /// Returns `Config` for malformed daemon settings.
    pub fn connect_options(&self, cli: &CliOverrides) -> Result<ConnectOptions> {
        let daemon = DaemonConfig::from_layer(&self.layer)?;
        Ok(ConnectOptions {
            actor: config::resolve_actor(cli.actor.as_deref(), &self.layer),
            no_daemon: cli.no_daemon.unwrap_or(false),
            no_db: cli.no_db.unwrap_or(false),
            lock_timeout: cli.lock_timeout().unwrap_or(DEFAULT_LOCK_TIMEOUT),
            rpc_timeout: daemon.rpc_timeout,
            issue_prefix: config::issue_prefix(&self.layer),
            git_plan: GitPlan {
                commit: daemon.auto_commit,
                pull: daemon.auto_pull,
                push: daemon.auto_push,
            },
            remote: daemon.remote,
            git_timeout: daemon.git_timeout,
        })
    }
}

/// Discover the workspace and pick a backend for it.
///
/// # Errors
///
/// Returns discovery or configuration errors.
pub fn open_backend(cli: &CliOverrides) -> Result<Box<dyn IssueBackend>> {
    let workspace = Workspace::discover()?;
    let options = workspace.connect_options(cli)?;
    Ok(client::connect(&workspace.paths, &options))
}

/// Print `value` as pretty JSON.
///
/// # Errors
///
/// Returns a JSON error if serialization fails.
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
