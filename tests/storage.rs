//! Store behavior through the public API: mutations, lookups and the
//! lazy, restartable listing.

mod common;

use beads_daemon::BeadsError;
use beads_daemon::model::{IssueUpdate, ListFilter, NewIssue, Priority, Status};
use common::{test_db, test_log};

#[test]
fn create_assigns_prefixed_id_and_marks_dirty() {
    let _log = test_log("create_assigns_prefixed_id_and_marks_dirty");
    let mut store = test_db();

    let issue = store.create_issue(&NewIssue::titled("first"), "alice").unwrap();

    assert!(issue.id.starts_with("bd-"), "unexpected id {}", issue.id);
    assert_eq!(issue.status, Status::Open);
    assert_eq!(issue.created_by.as_deref(), Some("alice"));
    assert_eq!(issue.created_at, issue.updated_at);
    assert_eq!(store.get_dirty_issue_ids().unwrap(), vec![issue.id.clone()]);
    assert_eq!(store.get_issue(&issue.id).unwrap(), Some(issue));
}

#[test]
fn create_rejects_blank_title() {
    let _log = test_log("create_rejects_blank_title");
    let mut store = test_db();

    let err = store.create_issue(&NewIssue::titled("   "), "alice").unwrap_err();
    assert!(matches!(err, BeadsError::Validation { ref field, .. } if field == "title"));
    assert_eq!(store.count_issues().unwrap(), 0);
}

#[test]
fn update_bumps_revision_and_close_sets_closed_at() {
    let _log = test_log("update_bumps_revision_and_close_sets_closed_at");
    let mut store = test_db();
    let issue = store.create_issue(&NewIssue::titled("to close"), "alice").unwrap();

    let patch = IssueUpdate {
        status: Some(Status::Closed),
        priority: Some(Priority::HIGH),
        close_reason: Some("done".to_string()),
        ..IssueUpdate::default()
    };
    let closed = store.update_issue(&issue.id, &patch, "bob").unwrap();

    assert!(closed.updated_at > issue.updated_at);
    assert_eq!(closed.status, Status::Closed);
    assert_eq!(closed.priority, Priority::HIGH);
    assert!(closed.closed_at.is_some());
    assert_eq!(closed.close_reason.as_deref(), Some("done"));

    let reopened = store
        .update_issue(
            &issue.id,
            &IssueUpdate {
                status: Some(Status::Open),
                ..IssueUpdate::default()
            },
            "bob",
        )
        .unwrap();
    assert!(reopened.closed_at.is_none());
    assert!(reopened.close_reason.is_none());
}

#[test]
fn update_unknown_issue_is_not_found() {
    let _log = test_log("update_unknown_issue_is_not_found");
    let mut store = test_db();

    let patch = IssueUpdate {
        title: Some("x".to_string()),
        ..IssueUpdate::default()
    };
    let err = store.update_issue("bd-nope", &patch, "alice").unwrap_err();
    assert!(matches!(err, BeadsError::IssueNotFound { ref id } if id == "bd-nope"));
}

#[test]
fn comments_are_numbered_in_order_and_bump_the_parent() {
    let _log = test_log("comments_are_numbered_in_order_and_bump_the_parent");
    let mut store = test_db();
    let issue = store.create_issue(&NewIssue::titled("discuss"), "alice").unwrap();

    let first = store.add_comment(&issue.id, "bob", "one").unwrap();
    let second = store.add_comment(&issue.id, "carol", "two").unwrap();

    assert_eq!((first.id, second.id), (1, 2));
    let reloaded = store.get_issue(&issue.id).unwrap().unwrap();
    assert_eq!(
        reloaded
            .comments
            .iter()
            .map(|c| c.body.as_str())
            .collect::<Vec<_>>(),
        ["one", "two"]
    );
    assert_eq!(reloaded.updated_at, second.created_at);
    assert!(reloaded.updated_at > issue.updated_at);
}

#[test]
fn empty_comment_is_rejected() {
    let _log = test_log("empty_comment_is_rejected");
    let mut store = test_db();
    let issue = store.create_issue(&NewIssue::titled("quiet"), "alice").unwrap();

    let err = store.add_comment(&issue.id, "bob", "  \n").unwrap_err();
    assert!(matches!(err, BeadsError::Validation { .. }));
    assert!(store.get_issue(&issue.id).unwrap().unwrap().comments.is_empty());
}

#[test]
fn delete_leaves_a_tombstone_hidden_from_default_list() {
    let _log = test_log("delete_leaves_a_tombstone_hidden_from_default_list");
    let mut store = test_db();
    let keep = store.create_issue(&NewIssue::titled("keep"), "alice").unwrap();
    let gone = store.create_issue(&NewIssue::titled("gone"), "alice").unwrap();
    store.add_comment(&gone.id, "alice", "bye").unwrap();

    let tombstone = store.delete_issue(&gone.id, "alice", Some("dup")).unwrap();
    assert!(tombstone.is_tombstone());
    assert!(tombstone.comments.is_empty());
    assert_eq!(tombstone.delete_reason.as_deref(), Some("dup"));

    let visible: Vec<String> = store
        .list_issues(&ListFilter::default())
        .map(|r| r.unwrap().id)
        .collect();
    assert_eq!(visible, vec![keep.id.clone()]);

    let all: Vec<String> = store
        .list_issues(&ListFilter {
            include_deleted: true,
            ..ListFilter::default()
        })
        .map(|r| r.unwrap().id)
        .collect();
    assert_eq!(all, vec![keep.id, gone.id]);
}

#[test]
fn list_is_lazy_ordered_and_restartable_across_pages() {
    let _log = test_log("list_is_lazy_ordered_and_restartable_across_pages");
    let mut store = test_db();
    let created: Vec<String> = (0..150)
        .map(|n| {
            store
                .create_issue(&NewIssue::titled(format!("issue {n}")), "alice")
                .unwrap()
                .id
        })
        .collect();

    let mut iter = store.list_issues(&ListFilter::default());
    let first_pass: Vec<String> = iter.by_ref().map(|r| r.unwrap().id).collect();
    assert_eq!(first_pass, created);

    iter.rewind();
    let head: Vec<String> = iter.by_ref().take(3).map(|r| r.unwrap().id).collect();
    assert_eq!(head, created[..3]);
}

#[test]
fn list_honors_status_filter_and_limit() {
    let _log = test_log("list_honors_status_filter_and_limit");
    let mut store = test_db();
    for n in 0..5 {
        let issue = store
            .create_issue(&NewIssue::titled(format!("n{n}")), "alice")
            .unwrap();
        if n % 2 == 0 {
            let patch = IssueUpdate {
                status: Some(Status::InProgress),
                ..IssueUpdate::default()
            };
            store.update_issue(&issue.id, &patch, "alice").unwrap();
        }
    }

    let filter = ListFilter {
        statuses: vec![Status::InProgress],
        limit: Some(2),
        ..ListFilter::default()
    };
    let titles: Vec<String> = store
        .list_issues(&filter)
        .map(|r| r.unwrap().title)
        .collect();
    assert_eq!(titles, ["n0", "n2"]);
}

#[test]
fn short_ids_resolve_with_configured_prefix() {
    let _log = test_log("short_ids_resolve_with_configured_prefix");
    let mut store = test_db();
    store
        .set_config(beads_daemon::storage::CONFIG_ISSUE_PREFIX, "proj")
        .unwrap();
    let issue = store.create_issue(&NewIssue::titled("prefixed"), "alice").unwrap();
    let hash = issue.id.strip_prefix("proj-").unwrap();

    assert_eq!(store.require_issue(hash).unwrap().id, issue.id);
}
