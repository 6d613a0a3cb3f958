//! DDL statements and migrations for the SQLite schema.
//!
//! Timestamps are stored as TEXT in ISO 8601 format (SQLite has no native
//! datetime type). Booleans are stored as INTEGER (0/1). JSON blobs are TEXT.

/// Current schema version. Bumped whenever a migration is added.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Core DDL statements executed on first open.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Schema version tracking ---------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY
    )
    "#,
    // -- Issues table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id                  TEXT PRIMARY KEY,
        content_hash        TEXT DEFAULT '',
        title               TEXT NOT NULL CHECK(length(title) BETWEEN 1 AND 500),
        description         TEXT NOT NULL DEFAULT '',
        design              TEXT NOT NULL DEFAULT '',
        acceptance_criteria TEXT NOT NULL DEFAULT '',
        notes               TEXT NOT NULL DEFAULT '',
        status              TEXT NOT NULL DEFAULT 'open',
        priority            INTEGER NOT NULL DEFAULT 2 CHECK(priority BETWEEN 0 AND 4),
        issue_type          TEXT NOT NULL DEFAULT 'task',
        assignee            TEXT DEFAULT '',
        owner               TEXT DEFAULT '',
        estimated_minutes   INTEGER,
        created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by          TEXT DEFAULT '',
        updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        closed_at           TEXT,
        close_reason        TEXT DEFAULT '',
        closed_by_session   TEXT DEFAULT '',
        deleted_at          TEXT,
        deleted_by          TEXT DEFAULT '',
        delete_reason       TEXT DEFAULT '',
        original_type       TEXT,
        due_at              TEXT,
        defer_until         TEXT,
        external_ref        TEXT,
        source_system       TEXT DEFAULT '',
        source_repo         TEXT DEFAULT '',
        metadata            TEXT DEFAULT '{}',
        sender              TEXT DEFAULT '',
        ephemeral           INTEGER DEFAULT 0,
        pinned              INTEGER DEFAULT 0,
        is_template         INTEGER DEFAULT 0,
        CHECK(
            (status = 'closed' AND closed_at IS NOT NULL)
            OR (status != 'closed' AND closed_at IS NULL)
        ),
        CHECK(
            (status = 'tombstone' AND deleted_at IS NOT NULL AND original_type IS NOT NULL)
            OR (status != 'tombstone' AND deleted_at IS NULL)
        )
    )
    "#,
    // -- Indexes on issues ---------------------------------------------------
    // Hot path for ready queries: active, non-ephemeral, non-pinned issues.
    r#"
    CREATE INDEX IF NOT EXISTS idx_issues_ready_path
    ON issues(status, priority, created_at)
    WHERE status IN ('open', 'in_progress') AND ephemeral = 0 AND pinned = 0
    "#,
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    "CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type)",
    "CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee)",
    "CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_due_at ON issues(due_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_defer_until ON issues(defer_until)",
    "CREATE INDEX IF NOT EXISTS idx_issues_content_hash ON issues(content_hash)",
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_issues_external_ref_unique
    ON issues(external_ref)
    WHERE external_ref IS NOT NULL
    "#,
    // -- Dependencies table --------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id      TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        type          TEXT NOT NULL DEFAULT 'blocks',
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by    TEXT NOT NULL,
        metadata      TEXT DEFAULT '{}',
        thread_id     TEXT DEFAULT '',
        PRIMARY KEY (issue_id, depends_on_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE,
        CHECK(issue_id != depends_on_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_issue ON dependencies(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id)",
    r#"
    CREATE INDEX IF NOT EXISTS idx_dependencies_blocking
    ON dependencies(depends_on_id, issue_id)
    WHERE type IN ('blocks', 'parent-child', 'conditional-blocks', 'waits-for')
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_thread ON dependencies(thread_id)",
    // -- Labels table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL,
        label    TEXT NOT NULL CHECK(length(label) BETWEEN 1 AND 100),
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label)",
    // -- Comments table ------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id   TEXT NOT NULL,
        author     TEXT NOT NULL,
        text       TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_comments_created_at ON comments(created_at)",
    // -- Events table (audit trail) ------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id    TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        actor       TEXT NOT NULL,
        old_value   TEXT,
        new_value   TEXT,
        comment     TEXT,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
    // -- Blocked cache (materialized Ready/Blocked Engine output) ------------
    r#"
    CREATE TABLE IF NOT EXISTS blocked_cache (
        issue_id    TEXT PRIMARY KEY,
        blocked_by  TEXT NOT NULL DEFAULT '[]',
        blocked_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Child counters (hierarchical dotted child IDs) ----------------------
    r#"
    CREATE TABLE IF NOT EXISTS child_counters (
        parent_id        TEXT PRIMARY KEY,
        last_child_number INTEGER NOT NULL DEFAULT 0
    )
    "#,
    // -- Dirty marks (pending export queue) -----------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dirty (
        issue_id  TEXT PRIMARY KEY,
        marked_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    // -- Export hashes (what was last written to the export stream) ----------
    r#"
    CREATE TABLE IF NOT EXISTS export_hashes (
        issue_id     TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        exported_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    // -- Config table (user-facing) -------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Metadata table (engine-internal) --------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

/// Default configuration values inserted on first init.
pub const DEFAULT_CONFIG: &[(&str, &str)] = &[
    ("issue_prefix", "bd"),
    ("default_priority", "2"),
    ("default_type", "task"),
    ("max_collision_prob", "0.25"),
    ("min_hash_length", "3"),
    ("max_hash_length", "8"),
    ("import.orphan_handling", "allow"),
    ("export.error_policy", "strict"),
    ("auto_export.error_policy", "best-effort"),
    ("export.retry_attempts", "3"),
    ("export.retry_backoff_ms", "100"),
    ("export.write_manifest", "false"),
];

/// Schema migrations applied after initial DDL.
///
/// Each migration is a `(version, sql)` pair, applied in its own transaction
/// for every version greater than the current maximum recorded in
/// `schema_migrations`. Migrations must be idempotent and forward-only.
pub const MIGRATIONS: &[(i32, &str)] = &[
    // Future migrations go here, e.g.:
    // (2, "ALTER TABLE issues ADD COLUMN foo TEXT DEFAULT ''"),
];
