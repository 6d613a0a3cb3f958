//! Dirty-mark and export-hash bookkeeping, used by the export/import
//! pipeline (`beads-query`) to drive incremental sync.

use chrono::Utc;
use rusqlite::{params, Connection};

use beads_core::content_hash::compute_content_hash;
use beads_core::issue::Issue;

use crate::error::Result;
use crate::sqlite::issues::{format_datetime, ISSUE_COLUMNS};
use crate::sqlite::store::SqliteStore;

/// Upserts an issue record by ID, recomputing its content hash from the
/// given fields rather than trusting any hash carried on the incoming
/// struct. Used by the import pipeline, which applies records outside the
/// normal create/update lifecycle (no "created"/"updated" event, no dirty
/// mark -- an imported record is, by definition, already in sync with the
/// export stream it came from).
pub(crate) fn import_issue_on_conn(conn: &Connection, issue: &Issue) -> Result<()> {
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
            )
            ON CONFLICT(id) DO UPDATE SET
                content_hash = excluded.content_hash, title = excluded.title,
                description = excluded.description, design = excluded.design,
                acceptance_criteria = excluded.acceptance_criteria, notes = excluded.notes,
                status = excluded.status, priority = excluded.priority,
                issue_type = excluded.issue_type, assignee = excluded.assignee,
                owner = excluded.owner, estimated_minutes = excluded.estimated_minutes,
                created_at = excluded.created_at, created_by = excluded.created_by,
                updated_at = excluded.updated_at, closed_at = excluded.closed_at,
                close_reason = excluded.close_reason, closed_by_session = excluded.closed_by_session,
                deleted_at = excluded.deleted_at, deleted_by = excluded.deleted_by,
                delete_reason = excluded.delete_reason, original_type = excluded.original_type,
                due_at = excluded.due_at, defer_until = excluded.defer_until,
                external_ref = excluded.external_ref, source_system = excluded.source_system,
                metadata = excluded.metadata, sender = excluded.sender,
                ephemeral = excluded.ephemeral, pinned = excluded.pinned,
                is_template = excluded.is_template"
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
    Ok(())
}

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

/// Returns all dirty issue IDs in the order they were marked.
pub(crate) fn get_dirty_ids_on_conn(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT issue_id FROM dirty ORDER BY marked_at ASC, rowid ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Clears dirty marks for exactly the given IDs.
pub(crate) fn clear_dirty_on_conn(conn: &Connection, ids: &[String]) -> Result<()> {
    for id in ids {
        conn.execute("DELETE FROM dirty WHERE issue_id = ?1", params![id])?;
    }
    Ok(())
}

/// Returns the export hash last recorded for an issue, if any.
pub(crate) fn get_export_hash_on_conn(conn: &Connection, issue_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT content_hash FROM export_hashes WHERE issue_id = ?1",
        params![issue_id],
        |row| row.get(0),
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    })
}

/// Upserts the export hash for an issue.
pub(crate) fn set_export_hash_on_conn(
    conn: &Connection,
    issue_id: &str,
    content_hash: &str,
) -> Result<()> {
    let now_str = format_datetime(&Utc::now());
    conn.execute(
        "INSERT INTO export_hashes (issue_id, content_hash, exported_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(issue_id) DO UPDATE SET content_hash = excluded.content_hash,
             exported_at = excluded.exported_at",
        params![issue_id, content_hash, now_str],
    )?;
    Ok(())
}

/// Invalidates every recorded export hash. Used by import before a
/// transactional apply, since every hash on disk may now be stale.
pub(crate) fn clear_all_export_hashes_on_conn(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM export_hashes", [])?;
    Ok(())
}

/// Re-syncs an issue's labels to exactly the given set: delete then insert,
/// so the result does not depend on what was there before.
pub(crate) fn resync_labels_on_conn(conn: &Connection, issue_id: &str, labels: &[String]) -> Result<()> {
    conn.execute("DELETE FROM labels WHERE issue_id = ?1", params![issue_id])?;
    for label in labels {
        conn.execute(
            "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
            params![issue_id, label],
        )?;
    }
    Ok(())
}

/// Re-syncs an issue's outgoing dependency edges to exactly the given set.
pub(crate) fn resync_dependencies_on_conn(
    conn: &Connection,
    issue_id: &str,
    deps: &[beads_core::dependency::Dependency],
) -> Result<()> {
    conn.execute("DELETE FROM dependencies WHERE issue_id = ?1", params![issue_id])?;
    for dep in deps {
        let created_at_str = format_datetime(&dep.created_at);
        conn.execute(
            "INSERT OR REPLACE INTO dependencies
             (issue_id, depends_on_id, type, created_at, created_by, metadata, thread_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                dep.issue_id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                created_at_str,
                dep.created_by,
                dep.metadata,
                dep.thread_id,
            ],
        )?;
    }
    Ok(())
}

/// Re-syncs an issue's comments to exactly the given set.
pub(crate) fn resync_comments_on_conn(
    conn: &Connection,
    issue_id: &str,
    comments: &[beads_core::comment::Comment],
) -> Result<()> {
    conn.execute("DELETE FROM comments WHERE issue_id = ?1", params![issue_id])?;
    for comment in comments {
        let created_at_str = format_datetime(&comment.created_at);
        conn.execute(
            "INSERT INTO comments (issue_id, author, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![comment.issue_id, comment.author, comment.text, created_at_str],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Returns all dirty issue IDs in FIFO order.
    pub fn get_dirty_ids_impl(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        get_dirty_ids_on_conn(&conn)
    }

    /// Clears dirty marks for exactly the given IDs.
    pub fn clear_dirty_impl(&self, ids: &[String]) -> Result<()> {
        let conn = self.lock_conn()?;
        clear_dirty_on_conn(&conn, ids)
    }

    /// Returns the export hash last recorded for an issue, if any.
    pub fn get_export_hash_impl(&self, issue_id: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        get_export_hash_on_conn(&conn, issue_id)
    }

    /// Upserts the export hash for an issue.
    pub fn set_export_hash_impl(&self, issue_id: &str, content_hash: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        set_export_hash_on_conn(&conn, issue_id, content_hash)
    }

    /// Invalidates every recorded export hash.
    pub fn clear_all_export_hashes_impl(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        clear_all_export_hashes_on_conn(&conn)
    }

    /// Best-effort WAL checkpoint, run after a large transactional write
    /// (e.g. import) to bound WAL file growth. Failures are not fatal.
    pub fn checkpoint_wal_impl(&self) {
        if let Ok(conn) = self.lock_conn() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn dirty_marks_follow_issue_creation() {
        let store = test_store();
        let issue = beads_core::issue::IssueBuilder::new("A")
            .id("bd-dty1")
            .build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let dirty = store.get_dirty_ids_impl().unwrap();
        assert_eq!(dirty, vec!["bd-dty1".to_string()]);

        store
            .clear_dirty_impl(&["bd-dty1".to_string()])
            .unwrap();
        assert!(store.get_dirty_ids_impl().unwrap().is_empty());
    }

    #[test]
    fn export_hash_roundtrip() {
        let store = test_store();
        assert_eq!(store.get_export_hash_impl("bd-eh1").unwrap(), None);

        store.set_export_hash_impl("bd-eh1", "abc").unwrap();
        assert_eq!(
            store.get_export_hash_impl("bd-eh1").unwrap(),
            Some("abc".to_string())
        );

        store.set_export_hash_impl("bd-eh1", "def").unwrap();
        assert_eq!(
            store.get_export_hash_impl("bd-eh1").unwrap(),
            Some("def".to_string())
        );

        store.clear_all_export_hashes_impl().unwrap();
        assert_eq!(store.get_export_hash_impl("bd-eh1").unwrap(), None);
    }
}
