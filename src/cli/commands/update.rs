use super::{open_backend, print_json};
use crate::cli::UpdateArgs;
use crate::config::CliOverrides;
use crate::error::{BeadsError, Result};
use crate::model::IssueUpdate;

/// Execute the update command.
///
/// # Errors
///
/// Returns an error if no field is given, a value is invalid or the issue
/// does not exist.
pub fn execute(args: &UpdateArgs, cli: &CliOverrides) -> Result<()> {
    let patch = build_patch(args)?;
    let backend = open_backend(cli)?;
    let issue = backend.update(&args.id, &patch)?;

    if cli.json.unwrap_or(false) {
        return print_json(&issue);
    }
    if !cli.quiet {
        println!("Updated {}: {}", issue.id, issue.title);
    }
    Ok(())
}

fn build_patch(args: &UpdateArgs) -> Result<IssueUpdate> {
    let patch = IssueUpdate {
        title: args.title.clone(),
        description: args.description.clone(),
        status: args.status.as_deref().map(str::parse).transpose()?,
        priority: args.priority.as_deref().map(str::parse).transpose()?,
        issue_type: args.type_.as_deref().map(str::parse).transpose()?,
        close_reason: args.reason.clone(),
    };
    if patch.is_empty() {
        return Err(BeadsError::validation("update", "no fields to update"));
    }
    Ok(patch)
}
