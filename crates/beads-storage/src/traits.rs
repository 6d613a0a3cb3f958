//! Storage and Transaction traits -- the public API for issue persistence.
//!
//! Consumers depend on these traits rather than on concrete implementations so
//! that alternative backends (mocks, proxies, etc.) can be substituted.

use chrono::{DateTime, Utc};

use beads_core::comment::{Comment, Event};
use beads_core::dependency::Dependency;
use beads_core::enums::{DependencyType, IssueType, Status};
use beads_core::filter::{IssueFilter, WorkFilter};
use beads_core::issue::Issue;

use crate::error::Result;

// ---------------------------------------------------------------------------
// View / helper types
// ---------------------------------------------------------------------------

/// Typed partial-update struct for issues.
///
/// Only `Some` fields are applied; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdates {
    pub title: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub notes: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub owner: Option<String>,
    pub estimated_minutes: Option<Option<i32>>,
    pub external_ref: Option<Option<String>>,
    pub source_system: Option<String>,
    pub close_reason: Option<String>,
    pub closed_by_session: Option<String>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub defer_until: Option<Option<DateTime<Utc>>>,
    pub pinned: Option<bool>,
    pub is_template: Option<bool>,
    pub ephemeral: Option<bool>,
    pub sender: Option<String>,
    pub metadata: Option<Option<String>>,
}

/// A node in a dependency tree traversal.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The issue at this node.
    pub issue: Issue,
    /// Depth from the root (0 = root).
    pub depth: i32,
    /// The dependency type of the edge leading to this node.
    pub dep_type: DependencyType,
    /// Whether this node was reached via a reverse traversal.
    pub reverse: bool,
}

/// An issue with its associated dependency edge metadata.
#[derive(Debug, Clone)]
pub struct IssueWithDependencyMetadata {
    /// The related issue.
    pub issue: Issue,
    /// The dependency edge connecting the issue.
    pub dependency: Dependency,
}

/// An issue that is blocked, along with the IDs of its open blockers.
#[derive(Debug, Clone)]
pub struct BlockedIssue {
    /// The blocked issue.
    pub issue: Issue,
    /// IDs of the issues currently blocking it.
    pub blocked_by: Vec<String>,
}

/// Status of an epic with respect to its children.
#[derive(Debug, Clone)]
pub struct EpicStatus {
    /// The epic issue.
    pub epic: Issue,
    /// Total number of child issues.
    pub total_children: i32,
    /// Number of closed child issues.
    pub closed_children: i32,
}

/// Aggregate statistics about the issue database.
///
/// Exposes both a strict count (honoring the full blocked-cache, including
/// `conditional-blocks` and `waits-for`) and a legacy-compatible count
/// (considering only `blocks` and `parent-child`), computed from the same
/// row set in a single pass.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_issues: i64,
    pub open_issues: i64,
    pub closed_issues: i64,
    pub in_progress_issues: i64,
    pub deferred_issues: i64,
    pub tombstoned_issues: i64,

    /// Strict ready count, from the materialized blocked cache.
    pub ready_issues: i64,
    /// Strict blocked count, from the materialized blocked cache.
    pub blocked_issues: i64,
    /// Legacy-compatible ready count (`blocks`/`parent-child` only).
    pub ready_issues_legacy: i64,
    /// Legacy-compatible blocked count (`blocks`/`parent-child` only).
    pub blocked_issues_legacy: i64,

    /// Breakdown by issue type: `(type_name, count)`.
    pub by_type: Vec<(String, i64)>,
    /// Breakdown by priority: `(priority, count)`.
    pub by_priority: Vec<(i32, i64)>,
    /// Breakdown by assignee: `(assignee, count)`.
    pub by_assignee: Vec<(String, i64)>,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary storage interface for issue persistence.
///
/// All methods return [`Result`] to propagate [`crate::error::StorageError`]s.
pub trait Storage: Send + Sync {
    // -- Issue CRUD ----------------------------------------------------------

    /// Creates a new issue and emits a "created" event.
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;

    /// Creates multiple issues in a single batch.
    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()>;

    /// Retrieves an issue by its exact ID.
    fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Resolves a partial ID (full ID, bare hash, or unhyphenated form)
    /// against all known IDs, per the partial-ID resolution rules.
    /// Returns `AmbiguousId` when more than one issue matches.
    fn resolve_id(&self, query: &str) -> Result<String>;

    /// Retrieves an issue by its external reference.
    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Issue>;

    /// Retrieves multiple issues by their IDs.
    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>>;

    /// Applies partial updates to an issue and emits an "updated" event.
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;

    /// Closes an issue (sets status=closed, closed_at=now) and emits a
    /// "closed" event. Fails with `Blocked` if the issue has unresolved
    /// blockers and `force` is false.
    fn close_issue(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
        session: &str,
        force: bool,
    ) -> Result<()>;

    /// Reopens a closed issue (sets status=open, clears closed_at) and
    /// emits a "reopened" event. Refuses to resurrect a tombstone.
    fn reopen_issue(&self, id: &str, actor: &str) -> Result<()>;

    /// Soft-deletes an issue: tombstones it, preserving `original_type`, and
    /// rewrites plain-text references to it in connected issues' prose
    /// fields to `[deleted:<id>]`.
    fn delete_issue(&self, id: &str, actor: &str, reason: &str) -> Result<()>;

    /// Hard-deletes an issue and its related rows. Only permitted for
    /// ephemeral issues that were never exported.
    fn hard_delete_issue(&self, id: &str) -> Result<()>;

    /// Searches issues by text query and optional filter.
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependencies --------------------------------------------------------

    /// Adds a dependency edge between two issues.
    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;

    /// Removes a dependency edge.
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;

    /// Returns raw outgoing dependency records for an issue (used by the
    /// export pipeline to embed edges verbatim on the wire).
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    /// Returns the issues that the given issue depends on.
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Returns the issues that depend on the given issue.
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<Issue>>;

    /// Returns dependencies with their edge metadata.
    fn get_dependencies_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>>;

    /// Returns dependents with their edge metadata.
    fn get_dependents_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<IssueWithDependencyMetadata>>;

    /// Traverses the dependency tree from the given root.
    fn get_dependency_tree(
        &self,
        issue_id: &str,
        max_depth: i32,
        show_all_paths: bool,
        reverse: bool,
    ) -> Result<Vec<TreeNode>>;

    // -- Labels --------------------------------------------------------------

    /// Adds a label to an issue.
    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Removes a label from an issue.
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Returns all labels for an issue.
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    /// Returns all issues with the given label.
    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>>;

    // -- Ready/Blocked engine --------------------------------------------------

    /// Rebuilds the materialized blocked cache from scratch in one
    /// transaction (two-phase: direct blocking, then transitive
    /// parent-child propagation).
    fn rebuild_blocked_cache(&self) -> Result<()>;

    /// Returns issues that are ready to work on per the ready predicate.
    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>>;

    /// Returns issues that have at least one unresolved blocker.
    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>>;

    /// Returns epics where all children are closed.
    fn get_epics_eligible_for_closure(&self) -> Result<Vec<EpicStatus>>;

    // -- Comments and events -------------------------------------------------

    /// Adds a comment to an issue and returns the created comment.
    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;

    /// Returns all comments for an issue.
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    /// Returns recent events for an issue.
    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    /// Returns all events with id > `since_id`.
    fn get_all_events_since(&self, since_id: i64) -> Result<Vec<Event>>;

    // -- Statistics -----------------------------------------------------------

    /// Returns aggregate statistics about the issue database.
    fn get_statistics(&self) -> Result<Statistics>;

    // -- Configuration -------------------------------------------------------

    /// Sets a configuration key-value pair.
    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Gets a configuration value by key.
    fn get_config(&self, key: &str) -> Result<String>;

    /// Returns all configuration key-value pairs.
    fn get_all_config(&self) -> Result<std::collections::HashMap<String, String>>;

    /// Sets an engine-internal metadata key-value pair (sync state, hashes).
    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;

    /// Gets an engine-internal metadata value by key.
    fn get_metadata(&self, key: &str) -> Result<String>;

    // -- Export/import sync bookkeeping ---------------------------------------

    /// Returns all dirty issue IDs, in the order they were marked.
    fn get_dirty_ids(&self) -> Result<Vec<String>>;

    /// Clears dirty marks for exactly the given IDs.
    fn clear_dirty(&self, ids: &[String]) -> Result<()>;

    /// Returns the export hash last recorded for an issue, if any.
    fn get_export_hash(&self, issue_id: &str) -> Result<Option<String>>;

    /// Upserts the export hash for an issue.
    fn set_export_hash(&self, issue_id: &str, content_hash: &str) -> Result<()>;

    /// Invalidates every recorded export hash (the import pipeline calls this
    /// before a transactional apply, since every prior hash is now stale).
    fn clear_all_export_hashes(&self) -> Result<()>;

    /// Best-effort WAL checkpoint. Failures are not surfaced.
    fn checkpoint_wal(&self);

    // -- Transactions --------------------------------------------------------

    /// Executes a closure within a database transaction.
    ///
    /// If the closure returns `Ok`, the transaction is committed.
    /// If it returns `Err` or panics, the transaction is rolled back.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;

    // -- Lifecycle -----------------------------------------------------------

    /// Closes the database connection and releases resources.
    fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// Subset of [`Storage`] methods available inside a transaction.
///
/// All operations share a single database connection and are committed or
/// rolled back atomically. Used by the import pipeline to apply a batch of
/// records with all-or-nothing semantics.
pub trait Transaction {
    // -- Issue operations ----------------------------------------------------

    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()>;
    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<()>;
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;
    fn close_issue(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
        session: &str,
        force: bool,
    ) -> Result<()>;
    fn reopen_issue(&self, id: &str, actor: &str) -> Result<()>;
    fn delete_issue(&self, id: &str, actor: &str, reason: &str) -> Result<()>;
    fn get_issue(&self, id: &str) -> Result<Issue>;
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependency operations -----------------------------------------------

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    // -- Label operations ----------------------------------------------------

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    // -- Config operations ---------------------------------------------------

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<String>;

    // -- Metadata operations -------------------------------------------------

    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    fn get_metadata(&self, key: &str) -> Result<String>;

    // -- Comment operations --------------------------------------------------

    fn add_comment(&self, issue_id: &str, actor: &str, comment: &str) -> Result<()>;
    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment>;
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    // -- Ready/Blocked engine -------------------------------------------------

    fn rebuild_blocked_cache(&self) -> Result<()>;

    // -- Export/import sync bookkeeping ---------------------------------------

    /// Invalidates every recorded export hash.
    fn clear_all_export_hashes(&self) -> Result<()>;

    /// Upserts an issue record from an import stream: recomputes its
    /// content hash from the given fields, does not emit a "created" or
    /// "updated" event, and does not mark the issue dirty (an imported
    /// record is by definition already in sync with the stream it came
    /// from).
    fn import_issue(&self, issue: &Issue) -> Result<()>;

    /// Re-syncs an issue's labels to exactly the given set (delete-then-insert).
    fn resync_labels(&self, issue_id: &str, labels: &[String]) -> Result<()>;

    /// Re-syncs an issue's outgoing dependency edges to exactly the given set
    /// (delete-then-insert).
    fn resync_dependencies(&self, issue_id: &str, deps: &[Dependency]) -> Result<()>;

    /// Re-syncs an issue's comments to exactly the given set (delete-then-insert).
    fn resync_comments(&self, issue_id: &str, comments: &[Comment]) -> Result<()>;
}
