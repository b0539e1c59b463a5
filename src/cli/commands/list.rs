//! List command implementation.

use super::{open_backend, print_json};
use crate::cli::ListArgs;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::model::{Issue, ListFilter, Status};

/// Execute the list command.
///
/// # Errors
///
/// Returns an error for invalid filters or if the store cannot be read.
pub fn execute(args: &ListArgs, cli: &CliOverrides) -> Result<()> {
    let filter = build_filter(args)?;
    let backend = open_backend(cli)?;
    let issues = backend.list(&filter)?;

    if cli.json.unwrap_or(false) {
        return print_json(&issues);
    }
    if issues.is_empty() {
        if !cli.quiet {
            println!("No issues found.");
        }
        return Ok(());
    }
    for issue in &issues {
        println!("{}", format_issue_line(issue));
    }
    Ok(())
}

fn build_filter(args: &ListArgs) -> Result<ListFilter> {
    let mut statuses = args
        .status
        .iter()
        .map(|s| s.parse::<Status>())
        .collect::<Result<Vec<_>>>()?;

    // Default view hides closed work.
    if statuses.is_empty() && !args.all {
        statuses = vec![
            Status::Open,
            Status::InProgress,
            Status::Blocked,
            Status::Deferred,
        ];
        if args.deleted {
            statuses.push(Status::Tombstone);
        }
    }

    Ok(ListFilter {
        statuses,
        issue_type: args.type_.as_deref().map(str::parse).transpose()?,
        include_deleted: args.deleted,
        limit: args.limit,
    })
}

fn format_issue_line(issue: &Issue) -> String {
    format!(
        "{} [{}] [{}] {} - {}",
        issue.id, issue.priority, issue.issue_type, issue.status, issue.title
    )
}
