//! Comment command implementation.

use super::{open_backend, print_json};
use crate::cli::CommentArgs;
use crate::config::CliOverrides;
use crate::error::{BeadsError, Result};
use std::fs;

/// Execute the comment command.
///
/// Goes through the daemon when one answers, otherwise straight to the
/// files (with `--no-db`, to the log file alone).
///
/// # Errors
///
/// Returns an error if the text is empty or the issue does not exist.
pub fn execute(args: &CommentArgs, cli: &CliOverrides) -> Result<()> {
    let text = read_comment_text(args)?;
    let backend = open_backend(cli)?;
    let comment = backend.add_comment(&args.id, &text)?;
    tracing::debug!(backend = %backend.kind(), issue = %comment.issue_id, "comment added");

    if cli.json.unwrap_or(false) {
        return print_json(&comment);
    }
    if !cli.quiet {
        println!("Comment added to {}", comment.issue_id);
    }
    Ok(())
}

fn read_comment_text(args: &CommentArgs) -> Result<String> {
    let text = match &args.file {
        Some(path) => fs::read_to_string(path)?,
        None => args.text.join(" "),
    };
    if text.trim().is_empty() {
        return Err(BeadsError::validation(
            "text",
            "comment text cannot be empty",
        ));
    }
    Ok(text)
}
