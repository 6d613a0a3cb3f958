//! [`SqliteStore`] -- SQLite-backed storage implementation.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{Result, StorageError};
use crate::sqlite::schema;

/// SQLite-backed implementation of the [`Storage`](crate::traits::Storage) trait.
///
/// Wraps a [`rusqlite::Connection`] in a `Mutex` for thread safety.  All
/// public methods acquire the lock, execute SQL, and release it.
pub struct SqliteStore {
    /// The mutex-protected SQLite connection.
    pub(crate) conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at the given path.
    ///
    /// Enables WAL mode (falling back to the rollback journal when WAL is
    /// unavailable, e.g. certain networked filesystems) and foreign keys,
    /// then initialises the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening SQLite database");

        let conn = Connection::open(path).map_err(|e| {
            StorageError::Connection(format!("failed to open {}: {e}", path.display()))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.init_schema()?;

        Ok(store)
    }

    /// Opens an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory SQLite database");
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Connection(format!("failed to open in-memory db: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_connection()?;
        store.init_schema()?;

        Ok(store)
    }

    /// Sets connection pragmas: WAL (with graceful fallback), foreign keys,
    /// a generous busy timeout, and the cache/mmap settings the engine relies
    /// on for acceptable throughput against large repos.
    fn configure_connection(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 30000;
             PRAGMA cache_size = -65536;
             PRAGMA temp_store = MEMORY;
             PRAGMA mmap_size = 268435456;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .unwrap_or_default();
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!(
                mode = %journal_mode,
                "WAL mode unavailable, falling back to rollback journal"
            );
            conn.execute_batch("PRAGMA journal_mode = DELETE;")
                .map_err(|e| StorageError::Connection(format!("failed to set journal mode: {e}")))?;
        }

        Ok(())
    }

    /// Creates all tables and indexes if they do not exist, then applies
    /// every migration whose version exceeds the current maximum recorded
    /// in `schema_migrations`. Each migration runs in its own transaction.
    fn init_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))?;

        // Execute base DDL statements; these are all `IF NOT EXISTS` and so
        // safe to re-run on every open.
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).map_err(|e| StorageError::Migration {
                name: "init_schema".into(),
                reason: format!("{e}\nStatement: {}", truncate(stmt, 120)),
            })?;
        }

        // Insert default config (INSERT OR IGNORE to be idempotent).
        for &(key, value) in schema::DEFAULT_CONFIG {
            conn.execute(
                "INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)",
                rusqlite::params![key, value],
            )
            .map_err(|e| StorageError::Migration {
                name: "default_config".into(),
                reason: format!("failed to insert {key}: {e}"),
            })?;
        }

        Self::run_migrations_on_conn(&conn)?;

        info!(
            version = schema::CURRENT_SCHEMA_VERSION,
            "schema initialized"
        );
        Ok(())
    }

    /// Applies pending migrations tracked in `schema_migrations`.
    fn run_migrations_on_conn(conn: &Connection) -> Result<()> {
        let current_max: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for &(version, sql) in schema::MIGRATIONS {
            if version <= current_max {
                debug!(version, "migration already applied, skipping");
                continue;
            }

            debug!(version, "applying migration");
            conn.execute_batch("BEGIN;")
                .map_err(|e| StorageError::Migration {
                    name: version.to_string(),
                    reason: e.to_string(),
                })?;

            let result: rusqlite::Result<()> = (|| {
                conn.execute_batch(sql)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version) VALUES (?1)",
                    rusqlite::params![version],
                )?;
                Ok(())
            })();

            match result {
                Ok(()) => conn.execute_batch("COMMIT;").map_err(|e| StorageError::Migration {
                    name: version.to_string(),
                    reason: e.to_string(),
                })?,
                Err(e) => {
                    conn.execute_batch("ROLLBACK;").ok();
                    return Err(StorageError::Migration {
                        name: version.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // schema_migrations starts empty; record the baseline version once so
        // a fresh database doesn't re-walk MIGRATIONS below CURRENT_SCHEMA_VERSION.
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (version) VALUES (?1)",
            rusqlite::params![schema::CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StorageError::Migration {
            name: "baseline".into(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    /// Acquires the connection lock. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Connection(format!("mutex poisoned: {e}")))
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

/// Truncates a string for error messages.
fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        // Verify tables exist by querying config.
        let conn = store.lock_conn().unwrap();
        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))
            .unwrap();
        assert!(count > 0, "default config should be inserted");
    }

    #[test]
    fn schema_baseline_version_recorded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, schema::CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn idempotent_init() {
        let store = SqliteStore::open_in_memory().unwrap();
        // Re-init should succeed without error.
        store.init_schema().unwrap();
    }

    #[test]
    fn foreign_keys_enforced() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.lock_conn().unwrap();
        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }
}
