use super::{open_backend, print_json};
use crate::cli::DeleteArgs;
use crate::config::CliOverrides;
use crate::error::Result;

/// Execute the delete command. The issue becomes a tombstone that stays in
/// the log so the deletion reaches other clones.
///
/// # Errors
///
/// Returns `IssueNotFound` if the issue does not exist.
pub fn execute(args: &DeleteArgs, cli: &CliOverrides) -> Result<()> {
    let backend = open_backend(cli)?;
    let issue = backend.delete(&args.id, args.reason.as_deref())?;

    if cli.json.unwrap_or(false) {
        return print_json(&issue);
    }
    if !cli.quiet {
        println!("Deleted {}", issue.id);
    }
    Ok(())
}
