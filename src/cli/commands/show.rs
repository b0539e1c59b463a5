//! Show command implementation.

use super::{open_backend, print_json};
use crate::config::CliOverrides;
use crate::error::Result;
use crate::model::Issue;
use std::fmt::Write as FmtWrite;

/// Execute the show command.
///
/// # Errors
///
/// Returns `IssueNotFound` for the first unknown ID.
pub fn execute(ids: &[String], cli: &CliOverrides) -> Result<()> {
    let backend = open_backend(cli)?;
    let issues = ids
        .iter()
        .map(|id| backend.get(id))
        .collect::<Result<Vec<_>>>()?;

    if cli.json.unwrap_or(false) {
        return print_json(&issues);
    }
    for (i, issue) in issues.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print!("{}", format_issue_details(issue));
    }
    Ok(())
}

fn format_issue_details(issue: &Issue) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{} · {}   [{} · {}]",
        issue.id,
        issue.title,
        issue.priority,
        issue.status.as_str().to_uppercase()
    );
    let _ = writeln!(
        output,
        "Type: {} · Created: {} · Updated: {}",
        issue.issue_type,
        issue.created_at.format("%Y-%m-%d"),
        issue.updated_at.format("%Y-%m-%d")
    );
    if let Some(creator) = &issue.created_by {
        let _ = writeln!(output, "Created by: {creator}");
    }
    if let Some(reason) = &issue.close_reason {
        let _ = writeln!(output, "Close reason: {reason}");
    }

    if let Some(desc) = &issue.description {
        output.push('\n');
        let _ = writeln!(output, "{desc}");
    }

    if !issue.comments.is_empty() {
        output.push('\n');
        let _ = writeln!(output, "Comments:");
        for comment in &issue.comments {
            let _ = writeln!(
                output,
                "  [{}] {}: {}",
                comment.created_at.format("%Y-%m-%d %H:%M UTC"),
                comment.author,
                comment.body
            );
        }
    }
    output
}
