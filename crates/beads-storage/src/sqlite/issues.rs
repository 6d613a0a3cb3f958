//! Issue CRUD operations for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use tracing::debug;

use beads_core::content_hash::compute_content_hash;
use beads_core::enums::{EventType, IssueType, Status};
use beads_core::filter::IssueFilter;
use beads_core::idgen::{self, Resolution};
use beads_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;
use crate::traits::IssueUpdates;

// ---------------------------------------------------------------------------
// Column list (shared between INSERT and SELECT)
// ---------------------------------------------------------------------------

/// All issue columns in a deterministic order for SELECT queries.
pub(crate) const ISSUE_COLUMNS: &str = r#"
    id, content_hash, title, description, design, acceptance_criteria, notes,
    status, priority, issue_type, assignee, owner, estimated_minutes,
    created_at, created_by, updated_at, closed_at, close_reason, closed_by_session,
    deleted_at, deleted_by, delete_reason, original_type,
    due_at, defer_until,
    external_ref, source_system,
    metadata, sender, ephemeral, pinned, is_template
"#;

/// Same columns as [`ISSUE_COLUMNS`], qualified with `issues.` so they can be
/// selected unambiguously alongside a joined table (e.g. `dependencies`).
pub(crate) const ISSUE_COLUMNS_PREFIXED: &str = r#"
    issues.id, issues.content_hash, issues.title, issues.description, issues.design,
    issues.acceptance_criteria, issues.notes,
    issues.status, issues.priority, issues.issue_type, issues.assignee, issues.owner,
    issues.estimated_minutes,
    issues.created_at, issues.created_by, issues.updated_at, issues.closed_at,
    issues.close_reason, issues.closed_by_session,
    issues.deleted_at, issues.deleted_by, issues.delete_reason, issues.original_type,
    issues.due_at, issues.defer_until,
    issues.external_ref, issues.source_system,
    issues.metadata, issues.sender, issues.ephemeral, issues.pinned, issues.is_template
"#;

// ---------------------------------------------------------------------------
// Row scanning
// ---------------------------------------------------------------------------

/// Deserialises a row into an [`Issue`].
///
/// The column order MUST match [`ISSUE_COLUMNS`].
pub(crate) fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let id: String = row.get("id")?;
    let content_hash: String = row.get("content_hash")?;
    let title: String = row.get("title")?;
    let description: String = row.get("description")?;
    let design: String = row.get("design")?;
    let acceptance_criteria: String = row.get("acceptance_criteria")?;
    let notes: String = row.get("notes")?;

    let status_str: String = row.get("status")?;
    let priority: i32 = row.get("priority")?;
    let issue_type_str: String = row.get("issue_type")?;
    let assignee: String = row.get::<_, Option<String>>("assignee")?.unwrap_or_default();
    let owner: String = row.get::<_, Option<String>>("owner")?.unwrap_or_default();
    let estimated_minutes: Option<i32> = row.get("estimated_minutes")?;

    let created_at_str: String = row.get("created_at")?;
    let created_by: String = row.get::<_, Option<String>>("created_by")?.unwrap_or_default();
    let updated_at_str: String = row.get("updated_at")?;
    let closed_at_str: Option<String> = row.get("closed_at")?;
    let close_reason: String = row.get::<_, Option<String>>("close_reason")?.unwrap_or_default();
    let closed_by_session: String = row
        .get::<_, Option<String>>("closed_by_session")?
        .unwrap_or_default();

    let deleted_at_str: Option<String> = row.get("deleted_at")?;
    let deleted_by: String = row.get::<_, Option<String>>("deleted_by")?.unwrap_or_default();
    let delete_reason: String = row.get::<_, Option<String>>("delete_reason")?.unwrap_or_default();
    let original_type_str: Option<String> = row.get("original_type")?;

    let due_at_str: Option<String> = row.get("due_at")?;
    let defer_until_str: Option<String> = row.get("defer_until")?;

    let external_ref: Option<String> = row.get("external_ref")?;
    let source_system: String = row
        .get::<_, Option<String>>("source_system")?
        .unwrap_or_default();

    let metadata_str: Option<String> = row.get("metadata")?;
    let sender: String = row.get::<_, Option<String>>("sender")?.unwrap_or_default();
    let ephemeral_int: i32 = row.get("ephemeral")?;
    let pinned_int: i32 = row.get("pinned")?;
    let is_template_int: i32 = row.get("is_template")?;

    let created_at = parse_datetime(&created_at_str);
    let updated_at = parse_datetime(&updated_at_str);
    let closed_at = closed_at_str.as_deref().map(parse_datetime);
    let deleted_at = deleted_at_str.as_deref().map(parse_datetime);
    let due_at = due_at_str.as_deref().map(parse_datetime);
    let defer_until = defer_until_str.as_deref().map(parse_datetime);

    let metadata = metadata_str
        .filter(|s| !s.is_empty() && s != "{}")
        .and_then(|s| serde_json::value::RawValue::from_string(s).ok());

    Ok(Issue {
        id,
        content_hash,
        title,
        description,
        design,
        acceptance_criteria,
        notes,
        status: Status::from(status_str),
        priority,
        issue_type: IssueType::from(issue_type_str),
        assignee,
        owner,
        estimated_minutes,
        created_at,
        created_by,
        updated_at,
        closed_at,
        close_reason,
        closed_by_session,
        deleted_at,
        deleted_by,
        delete_reason,
        original_type: original_type_str.map(IssueType::from),
        due_at,
        defer_until,
        external_ref,
        source_system,
        metadata,
        source_repo: String::new(),
        labels: Vec::new(),
        dependencies: Vec::new(),
        comments: Vec::new(),
        sender,
        ephemeral: ephemeral_int != 0,
        pinned: pinned_int != 0,
        is_template: is_template_int != 0,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as ISO 8601 TEXT for SQLite.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses an ISO 8601 TEXT string from SQLite into a `DateTime<Utc>`.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

/// Validates an issue against the shared invariants before it is persisted.
fn validate(issue: &Issue) -> Result<()> {
    beads_core::validation::validate(issue)
        .map_err(|e| StorageError::validation("issue", e.to_string()))
}

// ---------------------------------------------------------------------------
// Issue insert helper (shared between store and transaction)
// ---------------------------------------------------------------------------

/// Inserts a single issue into the database using the provided connection.
pub(crate) fn insert_issue(conn: &Connection, issue: &Issue, actor: &str) -> Result<()> {
    validate(issue)?;

    let now_str = format_datetime(&Utc::now());
    let content_hash = compute_content_hash(issue);

    let metadata_str = issue.metadata.as_ref().map(|m| m.get().to_string());
    let created_at_str = format_datetime(&issue.created_at);
    let updated_at_str = format_datetime(&issue.updated_at);
    let closed_at_str = issue.closed_at.as_ref().map(format_datetime);
    let deleted_at_str = issue.deleted_at.as_ref().map(format_datetime);
    let due_at_str = issue.due_at.as_ref().map(format_datetime);
    let defer_until_str = issue.defer_until.as_ref().map(format_datetime);

    conn.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18, ?19,
                ?20, ?21, ?22, ?23,
                ?24, ?25,
                ?26, ?27,
                ?28, ?29, ?30, ?31, ?32
            )"
        ),
        params![
            issue.id,
            content_hash,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            issue.status.as_str(),
            issue.priority,
            issue.issue_type.as_str(),
            issue.assignee,
            issue.owner,
            issue.estimated_minutes,
            created_at_str,
            issue.created_by,
            updated_at_str,
            closed_at_str,
            issue.close_reason,
            issue.closed_by_session,
            deleted_at_str,
            issue.deleted_by,
            issue.delete_reason,
            issue.original_type.as_ref().map(|t| t.as_str().to_string()),
            due_at_str,
            defer_until_str,
            issue.external_ref,
            issue.source_system,
            metadata_str,
            issue.sender,
            issue.ephemeral as i32,
            issue.pinned as i32,
            issue.is_template as i32,
        ],
    )?;

    emit_event(
        conn,
        &issue.id,
        EventType::Created,
        actor,
        None,
        None,
        None,
        &now_str,
    )?;
    mark_dirty(conn, &issue.id)?;

    Ok(())
}

/// Upserts a row into the `dirty` table, marking the issue for re-export.
pub(crate) fn mark_dirty(conn: &Connection, issue_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO dirty (issue_id, marked_at) VALUES (?1, ?2)
         ON CONFLICT(issue_id) DO UPDATE SET marked_at = excluded.marked_at",
        params![issue_id, format_datetime(&Utc::now())],
    )?;
    Ok(())
}

/// Emits an event row into the events table.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    comment: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            issue_id,
            event_type.as_str(),
            actor,
            old_value,
            new_value,
            comment,
            created_at,
        ],
    )?;
    Ok(())
}

/// Rewrites plain-text references to `deleted_id` in connected issues' prose
/// fields (title, description, design, acceptance_criteria, notes) to the
/// token `[deleted:<id>]`, using a word-boundary-aware match so that e.g.
/// `bd-abc` is not rewritten inside `bd-abcdef`.
fn rewrite_references(conn: &Connection, deleted_id: &str) -> Result<()> {
    let replacement = format!("[deleted:{deleted_id}]");
    let mut stmt = conn.prepare(
        "SELECT id, title, description, design, acceptance_criteria, notes FROM issues WHERE id != ?1",
    )?;
    let rows: Vec<(String, String, String, String, String, String)> = stmt
        .query_map(params![deleted_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (id, title, description, design, acceptance_criteria, notes) in rows {
        let new_title = rewrite_token(&title, deleted_id, &replacement);
        let new_description = rewrite_token(&description, deleted_id, &replacement);
        let new_design = rewrite_token(&design, deleted_id, &replacement);
        let new_ac = rewrite_token(&acceptance_criteria, deleted_id, &replacement);
        let new_notes = rewrite_token(&notes, deleted_id, &replacement);

        if new_title != title
            || new_description != description
            || new_design != design
            || new_ac != acceptance_criteria
            || new_notes != notes
        {
            conn.execute(
                "UPDATE issues SET title = ?1, description = ?2, design = ?3,
                 acceptance_criteria = ?4, notes = ?5 WHERE id = ?6",
                params![new_title, new_description, new_design, new_ac, new_notes, id],
            )?;
        }
    }
    Ok(())
}

/// Replaces every token-boundary-delimited occurrence of `needle` in `text`
/// with `replacement`. A boundary is any non-alphanumeric, non-`-`, non-`.`
/// character (or start/end of string), so `bd-abc` will not match inside
/// `bd-abcdef` or `xbd-abc`.
fn rewrite_token(text: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() || !text.contains(needle) {
        return text.to_string();
    }
    let is_boundary_char = |c: char| !(c.is_alphanumeric() || c == '-' || c == '.');
    let mut result = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let needle_len = needle.len();
    let mut i = 0;
    while i < bytes.len() {
        if text[i..].starts_with(needle) {
            let before_ok = i == 0 || text[..i].chars().last().is_some_and(is_boundary_char);
            let after_ok = i + needle_len >= text.len()
                || text[i + needle_len..]
                    .chars()
                    .next()
                    .is_some_and(is_boundary_char);
            if before_ok && after_ok {
                result.push_str(replacement);
                i += needle_len;
                continue;
            }
        }
        let ch = text[i..].chars().next().unwrap();
        result.push(ch);
        i += ch.len_utf8();
    }
    result
}

// ---------------------------------------------------------------------------
// SqliteStore issue methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn create_issue_impl(&self, issue: &Issue, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_issue(&conn, issue, actor)
    }

    pub fn create_issues_impl(&self, issues: &[Issue], actor: &str) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        for issue in issues {
            insert_issue(&tx, issue, actor)?;
        }
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    pub fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_on_conn(&conn, id)
    }

    pub fn resolve_id_impl(&self, query: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        resolve_id_on_conn(&conn, query)
    }

    pub fn get_issue_by_external_ref_impl(&self, external_ref: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE external_ref = ?1");
        conn.query_row(&sql, params![external_ref], scan_issue)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StorageError::not_found("issue", format!("external_ref={external_ref}"))
                }
                other => StorageError::Query(other),
            })
    }

    pub fn get_issues_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Issue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(ids.iter());
        let rows = stmt.query_map(params, scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    pub fn update_issue_impl(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        update_issue_on_conn(&conn, id, updates, actor)
    }

    pub fn close_issue_impl(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
        session: &str,
        force: bool,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        close_issue_on_conn(&conn, id, reason, actor, session, force)
    }

    pub fn reopen_issue_impl(&self, id: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        reopen_issue_on_conn(&conn, id, actor)
    }

    pub fn delete_issue_impl(&self, id: &str, actor: &str, reason: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        delete_issue_on_conn(&conn, id, actor, reason)
    }

    pub fn hard_delete_issue_impl(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        hard_delete_issue_on_conn(&conn, id)
    }

    pub fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        search_issues_on_conn(&conn, query, filter)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (used by both SqliteStore and Transaction)
// ---------------------------------------------------------------------------

/// Retrieves a single issue by ID on the given connection.
pub(crate) fn get_issue_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_issue)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
            other => StorageError::Query(other),
        })
}

/// Resolves a partial ID against all known IDs per the partial-ID resolution
/// rules (exact, normalized-prefix, substring).
pub(crate) fn resolve_id_on_conn(conn: &Connection, query: &str) -> Result<String> {
    let mut stmt = conn.prepare("SELECT id FROM issues")?;
    let ids: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    match idgen::resolve_partial_id(query, ids.iter().map(String::as_str)) {
        Resolution::Found(id) => Ok(id),
        Resolution::NotFound => Err(StorageError::not_found("issue", query)),
        Resolution::Ambiguous(candidates) => Err(StorageError::AmbiguousId {
            query: query.to_string(),
            candidates,
        }),
    }
}

/// Applies partial updates on the given connection.
pub(crate) fn update_issue_on_conn(
    conn: &Connection,
    id: &str,
    updates: &IssueUpdates,
    actor: &str,
) -> Result<()> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    let mut set_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    macro_rules! add_field {
        ($field:ident, $col:expr) => {
            if let Some(ref val) = updates.$field {
                set_clauses.push(format!("{} = ?", $col));
                param_values.push(Box::new(val.clone()));
            }
        };
    }

    macro_rules! add_bool_field {
        ($field:ident, $col:expr) => {
            if let Some(val) = updates.$field {
                set_clauses.push(format!("{} = ?", $col));
                param_values.push(Box::new(val as i32));
            }
        };
    }

    add_field!(title, "title");
    add_field!(description, "description");
    add_field!(design, "design");
    add_field!(acceptance_criteria, "acceptance_criteria");
    add_field!(notes, "notes");
    add_field!(assignee, "assignee");
    add_field!(owner, "owner");
    add_field!(source_system, "source_system");
    add_field!(close_reason, "close_reason");
    add_field!(closed_by_session, "closed_by_session");
    add_field!(sender, "sender");

    let mut status_changed = false;
    if let Some(ref status) = updates.status {
        set_clauses.push("status = ?".to_string());
        param_values.push(Box::new(status.as_str().to_string()));
        status_changed = true;
    }
    if let Some(ref issue_type) = updates.issue_type {
        set_clauses.push("issue_type = ?".to_string());
        param_values.push(Box::new(issue_type.as_str().to_string()));
    }
    if let Some(priority) = updates.priority {
        set_clauses.push("priority = ?".to_string());
        param_values.push(Box::new(priority));
    }

    if let Some(ref est) = updates.estimated_minutes {
        set_clauses.push("estimated_minutes = ?".to_string());
        param_values.push(Box::new(*est));
    }
    if let Some(ref ext) = updates.external_ref {
        set_clauses.push("external_ref = ?".to_string());
        param_values.push(Box::new(ext.clone()));
    }
    if let Some(ref meta) = updates.metadata {
        set_clauses.push("metadata = ?".to_string());
        param_values.push(Box::new(meta.clone()));
    }
    if let Some(ref due) = updates.due_at {
        set_clauses.push("due_at = ?".to_string());
        param_values.push(Box::new(due.as_ref().map(format_datetime)));
    }
    if let Some(ref defer) = updates.defer_until {
        set_clauses.push("defer_until = ?".to_string());
        param_values.push(Box::new(defer.as_ref().map(format_datetime)));
    }

    add_bool_field!(pinned, "pinned");
    add_bool_field!(is_template, "is_template");
    add_bool_field!(ephemeral, "ephemeral");

    if set_clauses.is_empty() {
        return Ok(());
    }

    set_clauses.push("updated_at = ?".to_string());
    param_values.push(Box::new(now_str.clone()));

    let sql = format!("UPDATE issues SET {} WHERE id = ?", set_clauses.join(", "));
    param_values.push(Box::new(id.to_string()));

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let affected = conn.execute(&sql, param_refs.as_slice())?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    // Recompute content hash from the now-current row.
    let issue = get_issue_on_conn(conn, id)?;
    let content_hash = compute_content_hash(&issue);
    conn.execute(
        "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
        params![content_hash, id],
    )?;

    emit_event(
        conn,
        id,
        EventType::Updated,
        actor,
        None,
        None,
        None,
        &now_str,
    )?;
    mark_dirty(conn, id)?;

    if status_changed {
        debug!(id, "status changed, blocked cache needs rebuild");
    }

    Ok(())
}

/// Closes an issue on the given connection, honoring the blocked-on-close
/// guard unless `force` is set.
pub(crate) fn close_issue_on_conn(
    conn: &Connection,
    id: &str,
    reason: &str,
    actor: &str,
    session: &str,
    force: bool,
) -> Result<()> {
    if !force {
        let blockers = current_blockers(conn, id)?;
        if !blockers.is_empty() {
            return Err(StorageError::Blocked { blockers });
        }
    }

    let now_str = format_datetime(&Utc::now());

    let affected = conn.execute(
        "UPDATE issues SET status = 'closed', closed_at = ?1, close_reason = ?2,
         closed_by_session = ?3, updated_at = ?1 WHERE id = ?4",
        params![now_str, reason, session, id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    let issue = get_issue_on_conn(conn, id)?;
    let content_hash = compute_content_hash(&issue);
    conn.execute(
        "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
        params![content_hash, id],
    )?;

    emit_event(
        conn,
        id,
        EventType::Closed,
        actor,
        None,
        Some(reason),
        None,
        &now_str,
    )?;
    mark_dirty(conn, id)?;

    Ok(())
}

/// Looks up the blocked cache for unresolved blockers of `id`.
fn current_blockers(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let blocked_by: Option<String> = conn
        .query_row(
            "SELECT blocked_by FROM blocked_cache WHERE issue_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .ok();
    Ok(blocked_by
        .and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default())
}

/// Reopens a closed issue, refusing to resurrect a tombstone.
pub(crate) fn reopen_issue_on_conn(conn: &Connection, id: &str, actor: &str) -> Result<()> {
    let issue = get_issue_on_conn(conn, id)?;
    if issue.status == Status::Tombstone {
        return Err(StorageError::Conflict(format!(
            "cannot reopen tombstoned issue {id}"
        )));
    }

    let now_str = format_datetime(&Utc::now());
    let affected = conn.execute(
        "UPDATE issues SET status = 'open', closed_at = NULL, updated_at = ?1 WHERE id = ?2",
        params![now_str, id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    let issue = get_issue_on_conn(conn, id)?;
    let content_hash = compute_content_hash(&issue);
    conn.execute(
        "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
        params![content_hash, id],
    )?;

    emit_event(
        conn,
        id,
        EventType::Reopened,
        actor,
        None,
        None,
        None,
        &now_str,
    )?;
    mark_dirty(conn, id)?;

    Ok(())
}

/// Soft-deletes (tombstones) an issue and rewrites references to it.
pub(crate) fn delete_issue_on_conn(
    conn: &Connection,
    id: &str,
    actor: &str,
    reason: &str,
) -> Result<()> {
    let issue = get_issue_on_conn(conn, id)?;
    let now_str = format_datetime(&Utc::now());
    let original_type = issue.issue_type.as_str().to_string();

    let affected = conn.execute(
        "UPDATE issues SET status = 'tombstone', deleted_at = ?1, deleted_by = ?2,
         delete_reason = ?3, original_type = ?4, updated_at = ?1, closed_at = NULL WHERE id = ?5",
        params![now_str, actor, reason, original_type, id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }

    let issue = get_issue_on_conn(conn, id)?;
    let content_hash = compute_content_hash(&issue);
    conn.execute(
        "UPDATE issues SET content_hash = ?1 WHERE id = ?2",
        params![content_hash, id],
    )?;

    rewrite_references(conn, id)?;

    emit_event(
        conn,
        id,
        EventType::Deleted,
        actor,
        None,
        Some(reason),
        None,
        &now_str,
    )?;
    mark_dirty(conn, id)?;

    Ok(())
}

/// Hard-deletes an issue and its related rows. Only permitted for ephemeral
/// issues that were never exported (no export-hash row).
pub(crate) fn hard_delete_issue_on_conn(conn: &Connection, id: &str) -> Result<()> {
    let issue = get_issue_on_conn(conn, id)?;
    if !issue.ephemeral {
        return Err(StorageError::validation(
            "id",
            "hard delete is only permitted for ephemeral issues",
        ));
    }
    let exported: Option<String> = conn
        .query_row(
            "SELECT issue_id FROM export_hashes WHERE issue_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .ok();
    if exported.is_some() {
        return Err(StorageError::validation(
            "id",
            "hard delete is only permitted for issues never exported",
        ));
    }

    let affected = conn.execute("DELETE FROM issues WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", id));
    }
    conn.execute("DELETE FROM dirty WHERE issue_id = ?1", params![id])?;
    conn.execute(
        "DELETE FROM blocked_cache WHERE issue_id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Searches issues on the given connection.
pub(crate) fn search_issues_on_conn(
    conn: &Connection,
    query: &str,
    filter: &IssueFilter,
) -> Result<Vec<Issue>> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;

    if !query.is_empty() {
        where_clauses.push(format!(
            "(title LIKE ?{pi} OR description LIKE ?{pi} OR notes LIKE ?{pi})",
            pi = param_idx
        ));
        param_values.push(Box::new(format!("%{query}%")));
        param_idx += 1;
    }

    if let Some(ref status) = filter.status {
        where_clauses.push(format!("status = ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(priority) = filter.priority {
        where_clauses.push(format!("priority = ?{param_idx}"));
        param_values.push(Box::new(priority));
        param_idx += 1;
    }
    if let Some(ref issue_type) = filter.issue_type {
        where_clauses.push(format!("issue_type = ?{param_idx}"));
        param_values.push(Box::new(issue_type.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(ref assignee) = filter.assignee {
        where_clauses.push(format!("assignee = ?{param_idx}"));
        param_values.push(Box::new(assignee.clone()));
        param_idx += 1;
    }
    if let Some(ref title_contains) = filter.title_contains {
        where_clauses.push(format!("title LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{title_contains}%")));
        param_idx += 1;
    }
    if let Some(ref desc_contains) = filter.description_contains {
        where_clauses.push(format!("description LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{desc_contains}%")));
        param_idx += 1;
    }
    if let Some(ref notes_contains) = filter.notes_contains {
        where_clauses.push(format!("notes LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("%{notes_contains}%")));
        param_idx += 1;
    }
    if let Some(ref created_after) = filter.created_after {
        where_clauses.push(format!("created_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_after)));
        param_idx += 1;
    }
    if let Some(ref created_before) = filter.created_before {
        where_clauses.push(format!("created_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(created_before)));
        param_idx += 1;
    }
    if let Some(ref updated_after) = filter.updated_after {
        where_clauses.push(format!("updated_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_after)));
        param_idx += 1;
    }
    if let Some(ref updated_before) = filter.updated_before {
        where_clauses.push(format!("updated_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(updated_before)));
        param_idx += 1;
    }
    if let Some(ref closed_after) = filter.closed_after {
        where_clauses.push(format!("closed_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(closed_after)));
        param_idx += 1;
    }
    if let Some(ref closed_before) = filter.closed_before {
        where_clauses.push(format!("closed_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(closed_before)));
        param_idx += 1;
    }
    if filter.no_assignee {
        where_clauses.push("(assignee IS NULL OR assignee = '')".to_string());
    }
    if filter.empty_description {
        where_clauses.push("(description IS NULL OR description = '')".to_string());
    }
    if let Some(ref id_prefix) = filter.id_prefix {
        where_clauses.push(format!("id LIKE ?{param_idx}"));
        param_values.push(Box::new(format!("{id_prefix}%")));
        param_idx += 1;
    }
    if let Some(ephemeral) = filter.ephemeral {
        where_clauses.push(format!("ephemeral = ?{param_idx}"));
        param_values.push(Box::new(ephemeral as i32));
        param_idx += 1;
    }
    if let Some(pinned) = filter.pinned {
        where_clauses.push(format!("pinned = ?{param_idx}"));
        param_values.push(Box::new(pinned as i32));
        param_idx += 1;
    }
    if let Some(is_template) = filter.is_template {
        where_clauses.push(format!("is_template = ?{param_idx}"));
        param_values.push(Box::new(is_template as i32));
        param_idx += 1;
    }
    if let Some(priority_min) = filter.priority_min {
        where_clauses.push(format!("priority >= ?{param_idx}"));
        param_values.push(Box::new(priority_min));
        param_idx += 1;
    }
    if let Some(priority_max) = filter.priority_max {
        where_clauses.push(format!("priority <= ?{param_idx}"));
        param_values.push(Box::new(priority_max));
        param_idx += 1;
    }
    if let Some(ref parent_id) = filter.parent_id {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM dependencies WHERE dependencies.issue_id = issues.id \
             AND dependencies.depends_on_id = ?{param_idx} AND dependencies.type = 'parent-child')"
        ));
        param_values.push(Box::new(parent_id.clone()));
        param_idx += 1;
    }
    if filter.no_parent {
        where_clauses.push(
            "NOT EXISTS (SELECT 1 FROM dependencies WHERE dependencies.issue_id = issues.id \
             AND dependencies.type = 'parent-child')"
                .to_string(),
        );
    }
    if filter.deferred {
        where_clauses.push("defer_until IS NOT NULL".to_string());
    }
    if let Some(ref defer_after) = filter.defer_after {
        where_clauses.push(format!("defer_until >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(defer_after)));
        param_idx += 1;
    }
    if let Some(ref defer_before) = filter.defer_before {
        where_clauses.push(format!("defer_until <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(defer_before)));
        param_idx += 1;
    }
    if let Some(ref due_after) = filter.due_after {
        where_clauses.push(format!("due_at >= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(due_after)));
        param_idx += 1;
    }
    if let Some(ref due_before) = filter.due_before {
        where_clauses.push(format!("due_at <= ?{param_idx}"));
        param_values.push(Box::new(format_datetime(due_before)));
        param_idx += 1;
    }
    if filter.overdue {
        where_clauses.push(format!("(due_at IS NOT NULL AND due_at < ?{param_idx} AND status != 'closed')"));
        param_values.push(Box::new(format_datetime(&Utc::now())));
        param_idx += 1;
    }

    for status in &filter.exclude_status {
        where_clauses.push(format!("status != ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }
    for itype in &filter.exclude_types {
        where_clauses.push(format!("issue_type != ?{param_idx}"));
        param_values.push(Box::new(itype.as_str().to_string()));
        param_idx += 1;
    }

    if !filter.ids.is_empty() {
        let placeholders: Vec<String> = filter
            .ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!("id IN ({})", placeholders.join(",")));
        for id in &filter.ids {
            param_values.push(Box::new(id.clone()));
        }
        param_idx += filter.ids.len();
    }

    for label in &filter.labels {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?{param_idx})"
        ));
        param_values.push(Box::new(label.clone()));
        param_idx += 1;
    }

    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            param_values.push(Box::new(label.clone()));
        }
        param_idx += filter.labels_any.len();
    }

    if filter.no_labels {
        where_clauses.push(
            "NOT EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id)".to_string(),
        );
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    let limit_sql = filter
        .limit
        .map(|l| format!(" LIMIT {l}"))
        .unwrap_or_default();

    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues {where_sql} ORDER BY created_at DESC{limit_sql}"
    );

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;

    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }

    let _ = param_idx;

    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::SqliteStore;
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_get_issue() {
        let store = test_store();
        let issue = IssueBuilder::new("Test issue")
            .id("bd-test1")
            .description("A test description")
            .priority(2)
            .build();

        store.create_issue_impl(&issue, "alice").unwrap();

        let got = store.get_issue_impl("bd-test1").unwrap();
        assert_eq!(got.title, "Test issue");
        assert_eq!(got.description, "A test description");
        assert_eq!(got.priority, 2);
        assert!(!got.content_hash.is_empty());
    }

    #[test]
    fn get_nonexistent_issue_returns_not_found() {
        let store = test_store();
        let err = store.get_issue_impl("bd-nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_issue_partial() {
        let store = test_store();
        let issue = IssueBuilder::new("Original title").id("bd-upd1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let updates = IssueUpdates {
            title: Some("Updated title".into()),
            priority: Some(3),
            ..Default::default()
        };
        store.update_issue_impl("bd-upd1", &updates, "bob").unwrap();

        let got = store.get_issue_impl("bd-upd1").unwrap();
        assert_eq!(got.title, "Updated title");
        assert_eq!(got.priority, 3);
    }

    #[test]
    fn close_issue_without_blockers() {
        let store = test_store();
        let issue = IssueBuilder::new("To close").id("bd-close1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        store
            .close_issue_impl("bd-close1", "completed", "alice", "session-1", false)
            .unwrap();

        let got = store.get_issue_impl("bd-close1").unwrap();
        assert_eq!(got.status, Status::Closed);
        assert!(got.closed_at.is_some());
        assert_eq!(got.close_reason, "completed");
    }

    #[test]
    fn close_issue_blocked_without_force_fails() {
        let store = test_store();
        let issue = IssueBuilder::new("Blocked issue").id("bd-blk1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let conn = store.lock_conn().unwrap();
        conn.execute(
            "INSERT INTO blocked_cache (issue_id, blocked_by) VALUES (?1, ?2)",
            params!["bd-blk1", r#"["bd-other"]"#],
        )
        .unwrap();
        drop(conn);

        let err = store
            .close_issue_impl("bd-blk1", "done", "alice", "s1", false)
            .unwrap_err();
        assert!(matches!(err, StorageError::Blocked { .. }));

        store
            .close_issue_impl("bd-blk1", "done", "alice", "s1", true)
            .unwrap();
    }

    #[test]
    fn reopen_refuses_tombstone() {
        let store = test_store();
        let issue = IssueBuilder::new("To delete").id("bd-tomb1").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store
            .delete_issue_impl("bd-tomb1", "alice", "duplicate")
            .unwrap();

        let err = store.reopen_issue_impl("bd-tomb1", "alice").unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn delete_issue_rewrites_references() {
        let store = test_store();
        let target = IssueBuilder::new("Target").id("bd-target1").build();
        let referrer = IssueBuilder::new("Referrer")
            .id("bd-ref1")
            .description("See bd-target1 for context")
            .build();
        store.create_issue_impl(&target, "alice").unwrap();
        store.create_issue_impl(&referrer, "alice").unwrap();

        store
            .delete_issue_impl("bd-target1", "alice", "duplicate")
            .unwrap();

        let got = store.get_issue_impl("bd-ref1").unwrap();
        assert_eq!(got.description, "See [deleted:bd-target1] for context");

        let tombstoned = store.get_issue_impl("bd-target1").unwrap();
        assert_eq!(tombstoned.status, Status::Tombstone);
        assert!(tombstoned.deleted_at.is_some());
        assert_eq!(tombstoned.original_type, Some(IssueType::Task));
    }

    #[test]
    fn delete_does_not_rewrite_prefix_collisions() {
        let store = test_store();
        let target = IssueBuilder::new("Target").id("bd-abc").build();
        let referrer = IssueBuilder::new("Referrer")
            .id("bd-ref1")
            .description("Mentions bd-abcdef, not the target")
            .build();
        store.create_issue_impl(&target, "alice").unwrap();
        store.create_issue_impl(&referrer, "alice").unwrap();

        store.delete_issue_impl("bd-abc", "alice", "dup").unwrap();

        let got = store.get_issue_impl("bd-ref1").unwrap();
        assert_eq!(got.description, "Mentions bd-abcdef, not the target");
    }

    #[test]
    fn hard_delete_requires_ephemeral() {
        let store = test_store();
        let issue = IssueBuilder::new("Not ephemeral").id("bd-perm1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let err = store.hard_delete_issue_impl("bd-perm1").unwrap_err();
        assert!(matches!(err, StorageError::Validation { .. }));

        let ephemeral = IssueBuilder::new("Ephemeral")
            .id("bd-wisp-xyz")
            .ephemeral(true)
            .build();
        store.create_issue_impl(&ephemeral, "alice").unwrap();
        store.hard_delete_issue_impl("bd-wisp-xyz").unwrap();

        let err = store.get_issue_impl("bd-wisp-xyz").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn resolve_id_exact_and_ambiguous() {
        let store = test_store();
        let a = IssueBuilder::new("A").id("bd-abc123").build();
        let b = IssueBuilder::new("B").id("bd-abcdef").build();
        store.create_issue_impl(&a, "alice").unwrap();
        store.create_issue_impl(&b, "alice").unwrap();

        assert_eq!(store.resolve_id_impl("bd-abc123").unwrap(), "bd-abc123");

        let err = store.resolve_id_impl("bd-abc").unwrap_err();
        assert!(matches!(err, StorageError::AmbiguousId { .. }));
    }

    #[test]
    fn search_issues_by_text() {
        let store = test_store();
        let issue1 = IssueBuilder::new("Fix login bug")
            .id("bd-s1")
            .description("Users cannot log in")
            .build();
        let issue2 = IssueBuilder::new("Add dashboard")
            .id("bd-s2")
            .description("New dashboard feature")
            .build();
        store.create_issue_impl(&issue1, "alice").unwrap();
        store.create_issue_impl(&issue2, "alice").unwrap();

        let results = store
            .search_issues_impl("login", &IssueFilter::default())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "bd-s1");
    }

    #[test]
    fn search_issues_by_status_filter() {
        let store = test_store();
        let issue1 = IssueBuilder::new("Open issue")
            .id("bd-sf1")
            .status(Status::Open)
            .build();
        let issue2 = IssueBuilder::new("Closed issue")
            .id("bd-sf2")
            .status(Status::Closed)
            .closed_at(Utc::now())
            .build();
        store.create_issue_impl(&issue1, "alice").unwrap();
        store.create_issue_impl(&issue2, "alice").unwrap();

        let filter = IssueFilter {
            status: Some(Status::Open),
            ..Default::default()
        };
        let results = store.search_issues_impl("", &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "bd-sf1");
    }
}
