//! `SQLite` storage implementation.

use crate::error::{BeadsError, Result};
use crate::model::{
    Comment, Event, EventType, Issue, IssueType, IssueUpdate, ListFilter, NewIssue, Priority,
    Status,
};
use crate::storage::schema::apply_schema;
use crate::util::id::{IdConfig, IdGenerator, IdSeed, normalize_id};
use crate::util::time::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params, params_from_iter};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

/// Prefix used when `issue_prefix` is not configured.
pub const DEFAULT_PREFIX: &str = "bd";
/// Config key holding the issue ID prefix.
pub const CONFIG_ISSUE_PREFIX: &str = "issue_prefix";

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const LIST_PAGE_SIZE: usize = 64;
const MAX_TITLE_LEN: usize = 500;

const ISSUE_COLUMNS: &str = "id, title, description, status, priority, issue_type, created_at, \
     created_by, updated_at, closed_at, close_reason, deleted_at, deleted_by, delete_reason";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation, tracking side effects.
pub struct MutationContext {
    pub op_name: String,
    pub actor: String,
    /// Wall clock captured once per mutation.
    pub now: DateTime<Utc>,
    pub events: Vec<Event>,
    pub dirty_ids: BTreeSet<String>,
}

impl MutationContext {
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            now: Utc::now(),
            events: Vec::new(),
            dirty_ids: BTreeSet::new(),
        }
    }

    pub fn record_event(&mut self, event_type: EventType, issue_id: &str, details: Option<String>) {
        self.record_field_change(event_type, issue_id, None, None, details);
    }

    /// Record a field change event with old and new values.
    pub fn record_field_change(
        &mut self,
        event_type: EventType,
        issue_id: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        comment: Option<String>,
    ) {
        self.events.push(Event {
            id: 0,
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value,
            new_value,
            comment,
            created_at: self.now,
        });
    }

    pub fn mark_dirty(&mut self, issue_id: &str) {
        self.dirty_ids.insert(issue_id.to_string());
    }

    /// Next revision marker for a record last touched at `previous`.
    ///
    /// Never goes backwards, so a local edit always wins against the copy it replaced.
    #[must_use]
    pub fn revision_after(&self, previous: DateTime<Utc>) -> DateTime<Utc> {
        let floor = previous + chrono::Duration::nanoseconds(1);
        self.now.max(floor)
    }
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open with a busy timeout; `None` uses five seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open_with_timeout(path: &Path, busy_timeout: Option<Duration>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout.unwrap_or(DEFAULT_BUSY_TIMEOUT))?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open a read-only connection for concurrent readers. The schema must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Run `f` in an immediate transaction, then persist the events and dirty
    /// marks it collected. Nothing is visible unless every step succeeds.
    ///
    /// # Errors
    ///
    /// Returns the first error from `f` or from persisting side effects; the
    /// transaction is rolled back.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut ctx = MutationContext::new(op, actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            tx.execute(
                "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    event.issue_id,
                    event.event_type.as_str(),
                    event.actor,
                    event.old_value,
                    event.new_value,
                    event.comment,
                    format_timestamp(&event.created_at)
                ],
            )?;
        }

        let marked_at = format_timestamp(&ctx.now);
        for id in &ctx.dirty_ids {
            tx.execute(
                "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at) VALUES (?, ?)",
                params![id, marked_at],
            )?;
        }

        tx.commit()?;
        tracing::trace!(op = %ctx.op_name, dirty = ctx.dirty_ids.len(), "mutation committed");

        Ok(result)
    }

    /// Create a new issue with a freshly generated ID.
    ///
    /// # Errors
    ///
    /// Returns `Validation`/`InvalidPriority` for bad input, or a database error.
    pub fn create_issue(&mut self, new: &NewIssue, actor: &str) -> Result<Issue> {
        let title = validate_title(&new.title)?;
        let priority = new.priority.unwrap_or_default();
        validate_priority(priority)?;
        if new.status == Some(Status::Tombstone) {
            return Err(BeadsError::validation(
                "status",
                "cannot create a deleted issue",
            ));
        }

        let prefix = self
            .get_config(CONFIG_ISSUE_PREFIX)?
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        let issue_count = self.count_issues()?;

        self.mutate("create_issue", actor, |tx, ctx| {
            // Creation order must be total even when the clock does not advance.
            let latest: Option<String> =
                tx.query_row("SELECT MAX(created_at) FROM issues", [], |row| row.get(0))?;
            if let Some(latest) = latest {
                let latest = parse_timestamp(&latest, "created_at")?;
                ctx.now = ctx.revision_after(latest);
            }

            let generator = IdGenerator::new(IdConfig::with_prefix(prefix));
            let seed = IdSeed {
                title: &title,
                description: new.description.as_deref(),
                creator: Some(actor),
                created_at: ctx.now,
            };
            let id = generator.generate(&seed, issue_count, |candidate| {
                id_exists_in(tx, candidate)
            })?;

            let status = new.status.clone().unwrap_or_default();
            let closed_at = (status == Status::Closed).then_some(ctx.now);
            let issue = Issue {
                id,
                title,
                description: new.description.clone(),
                status,
                priority,
                issue_type: new.issue_type.clone().unwrap_or_default(),
                created_at: ctx.now,
                created_by: Some(actor.to_string()),
                updated_at: ctx.now,
                closed_at,
                close_reason: None,
                deleted_at: None,
                deleted_by: None,
                delete_reason: None,
                comments: Vec::new(),
            };
            upsert_issue_row(tx, &issue)?;

            ctx.record_event(
                EventType::Created,
                &issue.id,
                Some(format!("Created issue: {}", issue.title)),
            );
            ctx.mark_dirty(&issue.id);

            Ok(issue)
        })
    }

    /// Apply a partial update.
    ///
    /// Closing sets `closed_at`; moving out of `closed` clears it along with
    /// the close reason. An empty description clears the description.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue doesn't exist, `Validation` for
    /// deleted issues or bad values.
    pub fn update_issue(&mut self, id: &str, updates: &IssueUpdate, actor: &str) -> Result<Issue> {
        let new_title = updates.title.as_deref().map(validate_title).transpose()?;
        if let Some(priority) = updates.priority {
            validate_priority(priority)?;
        }
        if updates.status == Some(Status::Tombstone) {
            return Err(BeadsError::validation(
                "status",
                "use delete to remove an issue",
            ));
        }

        self.mutate("update_issue", actor, |tx, ctx| {
            let mut issue = fetch_live_issue(tx, id)?;
            if updates.is_empty() {
                return Ok(issue);
            }

            if let Some(title) = new_title {
                let old = std::mem::replace(&mut issue.title, title);
                ctx.record_field_change(
                    EventType::Updated,
                    id,
                    Some(old),
                    Some(issue.title.clone()),
                    Some("Title changed".to_string()),
                );
            }

            if let Some(description) = &updates.description {
                issue.description = non_empty(description);
                ctx.record_event(EventType::Updated, id, Some("Description changed".to_string()));
            }

            if let Some(status) = &updates.status {
                if *status != issue.status {
                    let old = std::mem::replace(&mut issue.status, status.clone());
                    let event_type = if *status == Status::Closed {
                        issue.closed_at = Some(ctx.now);
                        EventType::Closed
                    } else if old == Status::Closed {
                        issue.closed_at = None;
                        issue.close_reason = None;
                        EventType::Reopened
                    } else {
                        EventType::StatusChanged
                    };
                    ctx.record_field_change(
                        event_type,
                        id,
                        Some(old.as_str().to_string()),
                        Some(status.as_str().to_string()),
                        None,
                    );
                }
            }

            if let Some(reason) = &updates.close_reason {
                issue.close_reason = non_empty(reason);
            }

            if let Some(priority) = updates.priority {
                if priority != issue.priority {
                    ctx.record_field_change(
                        EventType::Updated,
                        id,
                        Some(issue.priority.to_string()),
                        Some(priority.to_string()),
                        Some("Priority changed".to_string()),
                    );
                    issue.priority = priority;
                }
            }

            if let Some(issue_type) = &updates.issue_type {
                issue.issue_type = issue_type.clone();
            }

            issue.updated_at = ctx.revision_after(issue.updated_at);
            upsert_issue_row(tx, &issue)?;
            ctx.mark_dirty(id);

            Ok(issue)
        })
    }

    /// Append a comment. Bumps the parent's revision marker.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue doesn't exist or `Validation` for
    /// an empty body or a deleted issue.
    pub fn add_comment(&mut self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        if text.trim().is_empty() {
            return Err(BeadsError::validation("text", "comment cannot be empty"));
        }

        self.mutate("add_comment", author, |tx, ctx| {
            let mut issue = fetch_live_issue(tx, issue_id)?;

            let next_id: i64 = tx.query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM comments WHERE issue_id = ?",
                [issue_id],
                |row| row.get(0),
            )?;
            let timestamp = ctx.revision_after(issue.updated_at);
            let comment = Comment {
                id: next_id,
                issue_id: issue_id.to_string(),
                author: author.to_string(),
                body: text.to_string(),
                created_at: timestamp,
            };
            insert_comment_row(tx, &comment)?;

            issue.updated_at = timestamp;
            tx.execute(
                "UPDATE issues SET updated_at = ? WHERE id = ?",
                params![format_timestamp(&issue.updated_at), issue_id],
            )?;

            ctx.record_event(EventType::Commented, issue_id, Some(text.to_string()));
            ctx.mark_dirty(issue_id);

            Ok(comment)
        })
    }

    /// Turn an issue into a tombstone and drop its comments.
    ///
    /// The tombstone stays in the log so the deletion reaches other clones.
    /// Deleting a tombstone again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if the issue doesn't exist.
    pub fn delete_issue(&mut self, id: &str, actor: &str, reason: Option<&str>) -> Result<Issue> {
        self.mutate("delete_issue", actor, |tx, ctx| {
            let mut issue = fetch_issue(tx, id)?
                .ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;
            if issue.is_tombstone() {
                return Ok(issue);
            }

            issue.status = Status::Tombstone;
            issue.deleted_at = Some(ctx.now);
            issue.deleted_by = Some(actor.to_string());
            issue.delete_reason = reason.and_then(non_empty);
            issue.updated_at = ctx.revision_after(issue.updated_at);
            issue.comments.clear();

            tx.execute("DELETE FROM comments WHERE issue_id = ?", [id])?;
            upsert_issue_row(tx, &issue)?;

            ctx.record_event(
                EventType::Deleted,
                id,
                Some(format!(
                    "Deleted issue: {}",
                    issue.delete_reason.as_deref().unwrap_or("no reason given")
                )),
            );
            ctx.mark_dirty(id);

            Ok(issue)
        })
    }

    /// Get an issue (comments included) by ID. Tombstones are returned too.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        fetch_issue(&self.conn, id)
    }

    /// Expand user input (`abc`, `BD-abc`) into a full ID using the configured prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config table cannot be read.
    pub fn resolve_id(&self, input: &str) -> Result<String> {
        let prefix = self
            .get_config(CONFIG_ISSUE_PREFIX)?
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        Ok(normalize_id(input, &prefix))
    }

    /// Resolve and fetch an issue, failing with `IssueNotFound`.
    ///
    /// # Errors
    ///
    /// Returns `IssueNotFound` if no issue has the resolved ID.
    pub fn require_issue(&self, input: &str) -> Result<Issue> {
        let id = self.resolve_id(input)?;
        self.get_issue(&id)?
            .ok_or(BeadsError::IssueNotFound { id })
    }

    /// Lazily iterate issues in creation order.
    ///
    /// Pages are fetched on demand with a keyset cursor, so the iterator
    /// holds no statement open between items and can be rewound.
    #[must_use]
    pub fn list_issues(&self, filter: &ListFilter) -> IssueIter<'_> {
        IssueIter {
            conn: &self.conn,
            filter: filter.clone(),
            cursor: None,
            buffer: VecDeque::new(),
            yielded: 0,
            exhausted: false,
        }
    }

    /// Every issue, tombstones included, sorted by ID with comments attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn snapshot(&self) -> Result<Vec<Issue>> {
        let mut comments = self.get_all_comments()?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ISSUE_COLUMNS} FROM issues ORDER BY id ASC"))?;
        let mut issues = stmt
            .query_map([], issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for issue in &mut issues {
            if let Some(list) = comments.remove(&issue.id) {
                issue.comments = list;
            }
        }
        Ok(issues)
    }

    /// Write records taken from the log, replacing each record's comments.
    ///
    /// Runs in one transaction. Imported records are already in the log, so
    /// they are not marked dirty.
    ///
    /// # Errors
    ///
    /// Returns an error if any record cannot be written; nothing is applied then.
    pub fn import_issues(&mut self, issues: &[Issue]) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        for issue in issues {
            upsert_issue_row(&tx, issue)?;
            tx.execute("DELETE FROM comments WHERE issue_id = ?", [&issue.id])?;
            for comment in &issue.comments {
                insert_comment_row(&tx, comment)?;
            }
        }
        tx.commit()?;
        Ok(issues.len())
    }

    /// Count all issues, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn count_issues(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM issues", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Audit events for an issue, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn events_for(&self, issue_id: &str) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
             FROM events WHERE issue_id = ? ORDER BY id ASC",
        )?;
        let events = stmt
            .query_map([issue_id], |row| {
                Ok(Event {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    event_type: serde_json::from_value(serde_json::Value::String(row.get(2)?))
                        .unwrap_or(EventType::Custom(String::new())),
                    actor: row.get(3)?,
                    old_value: row.get(4)?,
                    new_value: row.get(5)?,
                    comment: row.get(6)?,
                    created_at: timestamp_column(row, 7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    // ========================================================================
    // Dirty tracking
    // ========================================================================

    /// IDs mutated since the last export.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_dirty_issue_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM dirty_issues ORDER BY marked_at, issue_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn has_dirty_issues(&self) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM dirty_issues LIMIT 1", [], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Clear dirty marks for the given IDs.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn clear_dirty_issues(&mut self, issue_ids: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut cleared = 0;
        for id in issue_ids {
            cleared += tx.execute("DELETE FROM dirty_issues WHERE issue_id = ?", [id])?;
        }
        tx.commit()?;
        Ok(cleared)
    }

    // ========================================================================
    // Config and metadata
    // ========================================================================

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    fn get_all_comments(&self) -> Result<HashMap<String, Vec<Comment>>> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id, id, author, text, created_at FROM comments ORDER BY issue_id, id",
        )?;
        let mut map: HashMap<String, Vec<Comment>> = HashMap::new();
        for comment in stmt.query_map([], comment_from_row)? {
            let comment = comment?;
            map.entry(comment.issue_id.clone()).or_default().push(comment);
        }
        Ok(map)
    }
}

/// Lazy, restartable cursor over issues ordered by `(created_at, id)`.
pub struct IssueIter<'a> {
    conn: &'a Connection,
    filter: ListFilter,
    cursor: Option<(String, String)>,
    buffer: VecDeque<Issue>,
    yielded: usize,
    exhausted: bool,
}

impl IssueIter<'_> {
    /// Start again from the first issue.
    pub fn rewind(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.yielded = 0;
        self.exhausted = false;
    }

    fn fill(&mut self) -> Result<()> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if let Some((created_at, id)) = &self.cursor {
            sql.push_str(" AND (created_at > ? OR (created_at = ? AND id > ?))");
            args.extend([created_at.clone(), created_at.clone(), id.clone()]);
        }

        if self.filter.statuses.is_empty() {
            if !self.filter.include_deleted {
                sql.push_str(" AND status != 'tombstone'");
            }
        } else {
            let placeholders = vec!["?"; self.filter.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
            args.extend(self.filter.statuses.iter().map(|s| s.as_str().to_string()));
        }

        if let Some(issue_type) = &self.filter.issue_type {
            sql.push_str(" AND issue_type = ?");
            args.push(issue_type.as_str().to_string());
        }

        sql.push_str(&format!(
            " ORDER BY created_at ASC, id ASC LIMIT {LIST_PAGE_SIZE}"
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let page = stmt
            .query_map(params_from_iter(args.iter()), issue_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if page.len() < LIST_PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some((format_timestamp(&last.created_at), last.id.clone()));
        }
        for mut issue in page {
            issue.comments = fetch_comments(self.conn, &issue.id)?;
            self.buffer.push_back(issue);
        }
        Ok(())
    }
}

impl Iterator for IssueIter<'_> {
    type Item = Result<Issue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.filter.limit.is_some_and(|limit| self.yielded >= limit) {
            return None;
        }
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        let issue = self.buffer.pop_front()?;
        self.yielded += 1;
        Some(Ok(issue))
    }
}

// ============================================================================
// Row helpers (shared by transactions and plain connections)
// ============================================================================

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(BeadsError::validation("title", "cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(BeadsError::validation(
            "title",
            format!("exceeds {MAX_TITLE_LEN} characters"),
        ));
    }
    Ok(title.to_string())
}

fn validate_priority(priority: Priority) -> Result<()> {
    if (0..=4).contains(&priority.0) {
        Ok(())
    } else {
        Err(BeadsError::InvalidPriority {
            priority: priority.0,
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn id_exists_in(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM issues WHERE id = ?", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn fetch_issue(conn: &Connection, id: &str) -> Result<Option<Issue>> {
    let issue = conn
        .query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"),
            [id],
            issue_from_row,
        )
        .optional()?;
    match issue {
        Some(mut issue) => {
            issue.comments = fetch_comments(conn, id)?;
            Ok(Some(issue))
        }
        None => Ok(None),
    }
}

/// Fetch an issue that must exist and must not be deleted.
fn fetch_live_issue(conn: &Connection, id: &str) -> Result<Issue> {
    let issue =
        fetch_issue(conn, id)?.ok_or_else(|| BeadsError::IssueNotFound { id: id.to_string() })?;
    if issue.is_tombstone() {
        return Err(BeadsError::validation("id", format!("{id} is deleted")));
    }
    Ok(issue)
}

fn fetch_comments(conn: &Connection, issue_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, id, author, text, created_at
         FROM comments WHERE issue_id = ? ORDER BY id ASC",
    )?;
    let comments = stmt
        .query_map([issue_id], comment_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(comments)
}

fn upsert_issue_row(conn: &Connection, issue: &Issue) -> Result<()> {
    conn.execute(
        "INSERT INTO issues (
            id, title, description, status, priority, issue_type, created_at, created_by,
            updated_at, closed_at, close_reason, deleted_at, deleted_by, delete_reason
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            status = excluded.status,
            priority = excluded.priority,
            issue_type = excluded.issue_type,
            created_at = excluded.created_at,
            created_by = excluded.created_by,
            updated_at = excluded.updated_at,
            closed_at = excluded.closed_at,
            close_reason = excluded.close_reason,
            deleted_at = excluded.deleted_at,
            deleted_by = excluded.deleted_by,
            delete_reason = excluded.delete_reason",
        params![
            issue.id,
            issue.title,
            issue.description,
            issue.status.as_str(),
            issue.priority.0,
            issue.issue_type.as_str(),
            format_timestamp(&issue.created_at),
            issue.created_by,
            format_timestamp(&issue.updated_at),
            issue.closed_at.as_ref().map(format_timestamp),
            issue.close_reason,
            issue.deleted_at.as_ref().map(format_timestamp),
            issue.deleted_by,
            issue.delete_reason,
        ],
    )?;
    Ok(())
}

fn insert_comment_row(conn: &Connection, comment: &Comment) -> Result<()> {
    conn.execute(
        "INSERT INTO comments (issue_id, id, author, text, created_at) VALUES (?, ?, ?, ?, ?)",
        params![
            comment.issue_id,
            comment.id,
            comment.author,
            comment.body,
            format_timestamp(&comment.created_at)
        ],
    )?;
    Ok(())
}

fn timestamp_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw, "timestamp")
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn optional_timestamp_column(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn issue_from_row(row: &rusqlite::Row) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: Status::from(row.get::<_, String>(3)?),
        priority: Priority(row.get(4)?),
        issue_type: IssueType::from(row.get::<_, String>(5)?),
        created_at: timestamp_column(row, 6)?,
        created_by: row.get(7)?,
        updated_at: timestamp_column(row, 8)?,
        closed_at: optional_timestamp_column(row, 9)?,
        close_reason: row.get(10)?,
        deleted_at: optional_timestamp_column(row, 11)?,
        deleted_by: row.get(12)?,
        delete_reason: row.get(13)?,
        comments: Vec::new(),
    })
}

fn comment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        issue_id: row.get(0)?,
        id: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}
