use beads_daemon::cli::commands;
use beads_daemon::cli::{Cli, Commands, DaemonCommands};
use beads_daemon::config::{self, BeadsPaths};
use beads_daemon::logging::init_logging;
use beads_daemon::{BeadsError, StructuredError};
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

fn main() {
    let cli = Cli::parse();

    // The daemon process also keeps a JSON log next to its socket.
    let log_file = daemon_log_path(&cli.command);
    if let Err(e) = init_logging(cli.verbose, cli.quiet, log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let overrides = build_cli_overrides(&cli);

    let result = match cli.command {
        Commands::Init { prefix, force } => commands::init::execute(prefix, force, None),
        Commands::Create(args) => commands::create::execute(args, &overrides),
        Commands::Show { ids } => commands::show::execute(&ids, &overrides),
        Commands::List(args) => commands::list::execute(&args, &overrides),
        Commands::Update(args) => commands::update::execute(&args, &overrides),
        Commands::Delete(args) => commands::delete::execute(&args, &overrides),
        Commands::Comment(args) => commands::comment::execute(&args, &overrides),
        Commands::Sync(args) => commands::sync::execute(&args, &overrides),
        Commands::Status => commands::status::execute(&overrides),
        Commands::Start(args) => commands::start::execute(&args, &overrides),
        Commands::Stop => commands::stop::execute(&overrides),
        Commands::Daemon {
            command: DaemonCommands::Run(args),
        } => commands::daemon::run(&args),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json);
    }
}

fn daemon_log_path(command: &Commands) -> Option<PathBuf> {
    let runs_daemon = match command {
        Commands::Daemon { .. } => true,
        Commands::Start(args) => args.foreground,
        _ => false,
    };
    if !runs_daemon {
        return None;
    }
    BeadsPaths::discover(None).ok().map(|paths| paths.daemon_log)
}

/// Handle errors with structured output support.
///
/// When --json is set or stdout is not a TTY, outputs structured JSON to stderr.
/// Otherwise, outputs human-readable error with optional color.
fn handle_error(err: &BeadsError, json_mode: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = structured.code.exit_code();

    let use_json = json_mode || !io::stdout().is_terminal();

    if use_json {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        let use_color = io::stderr().is_terminal();
        eprintln!("{}", structured.to_human(use_color));
    }

    std::process::exit(exit_code);
}

fn build_cli_overrides(cli: &Cli) -> config::CliOverrides {
    config::CliOverrides {
        actor: cli.actor.clone(),
        json: Some(cli.json),
        no_db: Some(cli.no_db),
        no_daemon: Some(cli.no_daemon),
        lock_timeout: cli.lock_timeout,
        verbose: cli.verbose,
        quiet: cli.quiet,
    }
}
