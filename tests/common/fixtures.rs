#![allow(dead_code)]

use beads_daemon::model::{Comment, Issue, IssueType, Priority, Status};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Fixed base time so fixtures are deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_735_689_600, 0).unwrap() // 2025-01-01 00:00:00 UTC
}

pub fn issue(id: &str, title: &str) -> Issue {
    let base = base_time();
    Issue {
        id: id.to_string(),
        title: title.to_string(),
        description: None,
        status: Status::Open,
        priority: Priority::MEDIUM,
        issue_type: IssueType::Task,
        created_at: base,
        created_by: None,
        updated_at: base + Duration::seconds(1),
        closed_at: None,
        close_reason: None,
        deleted_at: None,
        deleted_by: None,
        delete_reason: None,
        comments: vec![],
    }
}

pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            issue: issue(id, title),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.issue.description = Some(description.to_string());
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        if status == Status::Closed && self.issue.closed_at.is_none() {
            self.issue.closed_at = Some(self.issue.updated_at);
        }
        self.issue.status = status;
        self
    }

    pub fn updated_after(mut self, seconds: i64) -> Self {
        self.issue.updated_at = base_time() + Duration::seconds(seconds);
        self
    }

    pub fn with_comment(mut self, author: &str, body: &str) -> Self {
        let id = i64::try_from(self.issue.comments.len()).unwrap() + 1;
        self.issue.comments.push(Comment {
            id,
            issue_id: self.issue.id.clone(),
            author: author.to_string(),
            body: body.to_string(),
            created_at: self.issue.updated_at,
        });
        self
    }

    pub fn build(self) -> Issue {
        self.issue
    }
}
