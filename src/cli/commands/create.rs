use super::{open_backend, print_json};
use crate::cli::CreateArgs;
use crate::config::CliOverrides;
use crate::error::{BeadsError, Result};
use crate::model::NewIssue;

/// Execute the create command.
///
/// # Errors
///
/// Returns an error if validation fails or the issue cannot be created.
pub fn execute(args: CreateArgs, cli: &CliOverrides) -> Result<()> {
    let new = build_new_issue(args)?;
    let backend = open_backend(cli)?;
    let issue = backend.create(&new)?;

    if cli.json.unwrap_or(false) {
        return print_json(&issue);
    }
    if !cli.quiet {
        println!("Created {}: {}", issue.id, issue.title);
    }
    Ok(())
}

fn build_new_issue(args: CreateArgs) -> Result<NewIssue> {
    let title = args
        .title
        .or(args.title_flag)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| BeadsError::validation("title", "cannot be empty"))?;

    Ok(NewIssue {
        title,
        description: args.description.filter(|d| !d.trim().is_empty()),
        status: args.status.as_deref().map(str::parse).transpose()?,
        priority: args.priority.as_deref().map(str::parse).transpose()?,
        issue_type: args.type_.as_deref().map(str::parse).transpose()?,
    })
}
