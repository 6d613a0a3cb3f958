//! Transaction wrapper for [`SqliteStore`].

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use beads_core::comment::Comment;
use beads_core::dependency::Dependency;
use beads_core::filter::IssueFilter;
use beads_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::comments;
use crate::sqlite::config;
use crate::sqlite::dependencies;
use crate::sqlite::issues;
use crate::sqlite::labels;
use crate::sqlite::queries::rebuild_blocked_cache_on_conn;
use crate::sqlite::store::SqliteStore;
use crate::traits::{IssueUpdates, Transaction};

/// Initial retry backoff when a transaction cannot acquire the write lock.
const RETRY_BASE_DELAY_MS: u64 = 10;
/// Backoff is capped here regardless of attempt count.
const RETRY_MAX_DELAY_MS: u64 = 5_000;
/// Give up after this many attempts.
const RETRY_MAX_ATTEMPTS: u32 = 10;

/// A thin wrapper around a SQLite connection that is inside a transaction.
///
/// The [`SqliteTx`] holds a reference to the connection (which already has an
/// active transaction via `BEGIN IMMEDIATE`). It implements [`Transaction`]
/// by delegating to the same connection-level helpers used by
/// [`SqliteStore`].
pub(crate) struct SqliteTx<'a> {
    pub(crate) conn: &'a Connection,
}

impl Transaction for SqliteTx<'_> {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<()> {
        issues::insert_issue(self.conn, issue, actor)
    }

    fn create_issues(&self, issue_list: &[Issue], actor: &str) -> Result<()> {
        for issue in issue_list {
            issues::insert_issue(self.conn, issue, actor)?;
        }
        Ok(())
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        issues::update_issue_on_conn(self.conn, id, updates, actor)
    }

    fn close_issue(
        &self,
        id: &str,
        reason: &str,
        actor: &str,
        session: &str,
        force: bool,
    ) -> Result<()> {
        issues::close_issue_on_conn(self.conn, id, reason, actor, session, force)
    }

    fn reopen_issue(&self, id: &str, actor: &str) -> Result<()> {
        issues::reopen_issue_on_conn(self.conn, id, actor)
    }

    fn delete_issue(&self, id: &str, actor: &str, reason: &str) -> Result<()> {
        issues::delete_issue_on_conn(self.conn, id, actor, reason)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        issues::get_issue_on_conn(self.conn, id)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        issues::search_issues_on_conn(self.conn, query, filter)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        dependencies::add_dependency_on_conn(self.conn, dep, actor)
    }

    fn remove_dependency(&self, issue_id: &str, depends_on_id: &str, actor: &str) -> Result<()> {
        dependencies::remove_dependency_on_conn(self.conn, issue_id, depends_on_id, actor)
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        dependencies::get_dependency_records_on_conn(self.conn, issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::add_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::remove_label_on_conn(self.conn, issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        labels::get_labels_on_conn(self.conn, issue_id)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        config::set_config_on_conn(self.conn, key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        config::get_config_on_conn(self.conn, key)
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        config::set_metadata_on_conn(self.conn, key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        config::get_metadata_on_conn(self.conn, key)
    }

    fn add_comment(&self, issue_id: &str, actor: &str, comment: &str) -> Result<()> {
        comments::add_comment_no_event(self.conn, issue_id, actor, comment)
    }

    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        comments::import_comment_on_conn(self.conn, issue_id, author, text, created_at)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        comments::get_comments_on_conn(self.conn, issue_id)
    }

    fn rebuild_blocked_cache(&self) -> Result<()> {
        rebuild_blocked_cache_on_conn(self.conn)
    }

    fn clear_all_export_hashes(&self) -> Result<()> {
        crate::sqlite::sync::clear_all_export_hashes_on_conn(self.conn)
    }

    fn import_issue(&self, issue: &Issue) -> Result<()> {
        crate::sqlite::sync::import_issue_on_conn(self.conn, issue)
    }

    fn resync_labels(&self, issue_id: &str, labels: &[String]) -> Result<()> {
        crate::sqlite::sync::resync_labels_on_conn(self.conn, issue_id, labels)
    }

    fn resync_dependencies(&self, issue_id: &str, deps: &[Dependency]) -> Result<()> {
        crate::sqlite::sync::resync_dependencies_on_conn(self.conn, issue_id, deps)
    }

    fn resync_comments(&self, issue_id: &str, comments: &[Comment]) -> Result<()> {
        crate::sqlite::sync::resync_comments_on_conn(self.conn, issue_id, comments)
    }
}

// ---------------------------------------------------------------------------
// SqliteStore::run_in_transaction
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Runs a closure inside a database transaction.
    ///
    /// Begins with `BEGIN IMMEDIATE` so the write lock is acquired eagerly,
    /// rather than upgraded lazily on first write -- this avoids the
    /// "upgrade deadlock" two readers can hit when both try to become
    /// writers mid-transaction. On `SQLITE_BUSY`/lock contention, retries
    /// with exponential backoff (starting at [`RETRY_BASE_DELAY_MS`],
    /// doubling up to [`RETRY_MAX_DELAY_MS`], capped at
    /// [`RETRY_MAX_ATTEMPTS`] attempts).
    pub fn run_in_transaction_impl(
        &self,
        f: &dyn Fn(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        let mut attempt = 0u32;
        let mut delay_ms = RETRY_BASE_DELAY_MS;

        loop {
            attempt += 1;
            match self.try_run_in_transaction(f) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < RETRY_MAX_ATTEMPTS => {
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms = (delay_ms * 2).min(RETRY_MAX_DELAY_MS);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute_batch("BEGIN IMMEDIATE;").map_err(|e| {
            if is_busy(&e) {
                StorageError::Locked(format!("could not acquire write lock: {e}"))
            } else {
                StorageError::Transaction(format!("failed to begin: {e}"))
            }
        })?;

        let sqlite_tx = SqliteTx { conn: &conn };
        match f(&sqlite_tx) {
            Ok(()) => {
                conn.execute_batch("COMMIT;")
                    .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
                Ok(())
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK;").ok();
                Err(e)
            }
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::dependency::Dependency;
    use beads_core::enums::DependencyType;
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn transaction_commit() {
        let store = test_store();

        store
            .run_in_transaction_impl(&|tx| {
                let issue = IssueBuilder::new("In transaction").id("bd-tx1").build();
                tx.create_issue(&issue, "alice")?;
                tx.add_label("bd-tx1", "transacted", "alice")?;
                Ok(())
            })
            .unwrap();

        // Verify committed.
        let issue = store.get_issue_impl("bd-tx1").unwrap();
        assert_eq!(issue.title, "In transaction");
        let labels = store.get_labels_impl("bd-tx1").unwrap();
        assert_eq!(labels, vec!["transacted"]);
    }

    #[test]
    fn transaction_rollback_on_error() {
        let store = test_store();

        let result = store.run_in_transaction_impl(&|tx| {
            let issue = IssueBuilder::new("Should rollback").id("bd-tx2").build();
            tx.create_issue(&issue, "alice")?;
            // Force an error.
            Err(StorageError::Internal("test rollback".into()))
        });

        assert!(result.is_err());

        // Issue should NOT exist.
        let err = store.get_issue_impl("bd-tx2").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn transaction_with_dependencies() {
        let store = test_store();

        store
            .run_in_transaction_impl(&|tx| {
                let parent = IssueBuilder::new("Parent").id("bd-txp1").build();
                let child = IssueBuilder::new("Child").id("bd-txc1").build();
                tx.create_issue(&parent, "alice")?;
                tx.create_issue(&child, "alice")?;

                let dep = Dependency {
                    issue_id: "bd-txc1".into(),
                    depends_on_id: "bd-txp1".into(),
                    dep_type: DependencyType::ParentChild,
                    created_at: chrono::Utc::now(),
                    created_by: "alice".into(),
                    metadata: String::new(),
                    thread_id: String::new(),
                };
                tx.add_dependency(&dep, "alice")?;
                Ok(())
            })
            .unwrap();

        let deps = store.get_dependencies_impl("bd-txc1").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].id, "bd-txp1");
    }

    #[test]
    fn transaction_can_rebuild_blocked_cache() {
        let store = test_store();
        store
            .run_in_transaction_impl(&|tx| {
                let issue = IssueBuilder::new("Solo").id("bd-txbc1").build();
                tx.create_issue(&issue, "alice")?;
                tx.rebuild_blocked_cache()?;
                Ok(())
            })
            .unwrap();

        let ready = store
            .get_ready_work_impl(&beads_core::filter::WorkFilter::default())
            .unwrap();
        assert!(ready.iter().any(|i| i.id == "bd-txbc1"));
    }

    #[test]
    fn transaction_close_with_force() {
        let store = test_store();
        let blocker = IssueBuilder::new("Blocker").id("bd-txf1").build();
        let blocked = IssueBuilder::new("Blocked").id("bd-txf2").build();
        store.create_issue_impl(&blocker, "alice").unwrap();
        store.create_issue_impl(&blocked, "alice").unwrap();
        store
            .add_dependency_impl(
                &Dependency {
                    issue_id: "bd-txf2".into(),
                    depends_on_id: "bd-txf1".into(),
                    dep_type: DependencyType::Blocks,
                    created_at: chrono::Utc::now(),
                    created_by: "alice".into(),
                    metadata: String::new(),
                    thread_id: String::new(),
                },
                "alice",
            )
            .unwrap();
        store.rebuild_blocked_cache_impl().unwrap();

        let result = store.run_in_transaction_impl(&|tx| {
            tx.close_issue("bd-txf2", "done", "alice", "s1", false)
        });
        assert!(result.is_err());

        store
            .run_in_transaction_impl(&|tx| tx.close_issue("bd-txf2", "done", "alice", "s1", true))
            .unwrap();
    }

    #[test]
    fn transaction_import_issue_and_resync() {
        let store = test_store();
        let issue = IssueBuilder::new("Imported").id("bd-imp1").build();

        store
            .run_in_transaction_impl(&|tx| {
                tx.import_issue(&issue)?;
                tx.resync_labels("bd-imp1", &["synced".to_string()])?;
                tx.clear_all_export_hashes()?;
                Ok(())
            })
            .unwrap();

        let stored = store.get_issue_impl("bd-imp1").unwrap();
        assert_eq!(stored.title, "Imported");
        assert_eq!(store.get_labels_impl("bd-imp1").unwrap(), vec!["synced"]);
        // Importing does not mark the issue dirty.
        assert!(!store.get_dirty_ids_impl().unwrap().contains(&"bd-imp1".to_string()));
    }
}
