//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand};

pub mod commands;

/// Issue tracker with a per-repository sync daemon (`SQLite` + JSONL)
#[derive(Parser, Debug)]
#[command(name = "bd", author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Actor name for audit trail
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Never contact the daemon; operate on the files directly
    #[arg(long, global = true)]
    pub no_daemon: bool,

    /// Log-file-only mode: build the store in memory for each command
    #[arg(long, global = true)]
    pub no_db: bool,

    /// Lock wait and `SQLite` busy timeout in ms
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a beads workspace
    Init {
        /// Issue ID prefix (e.g., "bd")
        #[arg(long)]
        prefix: Option<String>,

        /// Overwrite existing DB
        #[arg(long)]
        force: bool,
    },

    /// Create a new issue
    Create(CreateArgs),

    /// Show issue details
    Show {
        /// Issue IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List issues in creation order
    List(ListArgs),

    /// Update an issue
    Update(UpdateArgs),

    /// Delete an issue (creates tombstone)
    Delete(DeleteArgs),

    /// Add a comment to an issue (works without a daemon)
    #[command(alias = "comments")]
    Comment(CommentArgs),

    /// Reconcile the database with the log file
    Sync(SyncArgs),

    /// Report whether the daemon is reachable (exit 1 if not)
    Status,

    /// Start the daemon in the background
    Start(StartArgs),

    /// Stop the daemon
    Stop,

    /// Daemon process entry points
    #[command(hide = true)]
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Run the daemon in the foreground
    Run(DaemonArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct CreateArgs {
    /// Issue title
    pub title: Option<String>,

    /// Issue title (alternative to positional argument)
    #[arg(long = "title", conflicts_with = "title")]
    pub title_flag: Option<String>,

    /// Issue description
    #[arg(short = 'd', long, visible_alias = "body")]
    pub description: Option<String>,

    /// Issue type (task, bug, feature, epic, chore)
    #[arg(short = 't', long = "type")]
    pub type_: Option<String>,

    /// Priority (0-4 or P0-P4)
    #[arg(short = 'p', long)]
    pub priority: Option<String>,

    /// Initial status
    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UpdateArgs {
    /// Issue ID
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    /// New description (empty string clears it)
    #[arg(short = 'd', long, visible_alias = "body")]
    pub description: Option<String>,

    /// New status (open, in_progress, blocked, deferred, closed)
    #[arg(short = 's', long)]
    pub status: Option<String>,

    #[arg(short = 'p', long)]
    pub priority: Option<String>,

    #[arg(short = 't', long = "type")]
    pub type_: Option<String>,

    /// Close reason (with --status closed)
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DeleteArgs {
    /// Issue ID
    pub id: String,

    /// Reason for deletion
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Filter by status (repeatable)
    #[arg(short = 's', long)]
    pub status: Vec<String>,

    /// Filter by issue type
    #[arg(short = 't', long = "type")]
    pub type_: Option<String>,

    /// Include closed issues
    #[arg(long)]
    pub all: bool,

    /// Include deleted issues (tombstones)
    #[arg(long)]
    pub deleted: bool,

    /// Maximum number of issues
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommentArgs {
    /// Issue ID
    pub id: String,

    /// Comment text
    pub text: Vec<String>,

    /// Read comment text from file
    #[arg(short = 'f', long = "file")]
    pub file: Option<std::path::PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SyncArgs {
    /// Re-read and rewrite the log even if nothing looks stale
    #[arg(long)]
    pub full: bool,
}

/// Auto-sync switches shared by `start` and `daemon run`.
///
/// Switches only enable actions; `config.yaml` can enable them too.
#[derive(Args, Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DaemonArgs {
    /// Commit the log file after changes
    #[arg(long)]
    pub auto_commit: bool,

    /// Periodically fetch and merge the upstream branch
    #[arg(long)]
    pub auto_pull: bool,

    /// Push commits to the remote (requires auto-commit)
    #[arg(long)]
    pub auto_push: bool,

    /// Auto-pull interval (e.g. 30s, 5m)
    #[arg(long)]
    pub interval: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    #[command(flatten)]
    pub daemon: DaemonArgs,

    /// Run in the foreground instead of detaching
    #[arg(long)]
    pub foreground: bool,
}
