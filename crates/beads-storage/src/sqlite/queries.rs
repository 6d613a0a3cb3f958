//! Ready/Blocked engine: materialized blocked cache, ready work, blocked
//! issues, epic closure eligibility, and aggregate statistics.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{params, Connection};

use beads_core::dependency::{is_failure_close, waits_for_gate, WaitsForMeta};
use beads_core::enums::{SortPolicy, Status};
use beads_core::filter::WorkFilter;
use beads_core::issue::Issue;

use crate::error::Result;
use crate::sqlite::issues::{format_datetime, scan_issue, ISSUE_COLUMNS};
use crate::sqlite::store::SqliteStore;
use crate::traits::{BlockedIssue, EpicStatus, Statistics};

/// Parent-child propagation stops after this many hops, to bound pathological
/// hierarchies.
const MAX_PROPAGATION_DEPTH: i32 = 50;

// ---------------------------------------------------------------------------
// Blocked cache rebuild
// ---------------------------------------------------------------------------

/// Rebuilds the materialized `blocked_cache` table from scratch.
///
/// Phase 1 computes direct blockers per issue from the `blocks`,
/// `conditional-blocks`, and `waits-for` edge types. Phase 2 propagates
/// blocked status transitively through `parent-child` edges: a child whose
/// parent is blocked is itself blocked, up to [`MAX_PROPAGATION_DEPTH`] hops.
pub(crate) fn rebuild_blocked_cache_on_conn(conn: &Connection) -> Result<()> {
    let statuses: HashMap<String, String> = {
        let mut stmt = conn.prepare("SELECT id, status FROM issues")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (id, status) = row?;
            map.insert(id, status);
        }
        map
    };

    // Direct blocking edges: issue_id is blocked by depends_on_id unless the
    // blocker is resolved (closed/tombstoned), with the conditional-blocks
    // exception (only blocks if the blocker did NOT fail) and the waits-for
    // gate semantics (ALL_CHILDREN requires every spawned child closed,
    // ANY_CHILDREN requires at least one closed).
    let mut direct_blockers: HashMap<String, Vec<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT issue_id, depends_on_id, type, metadata FROM dependencies
             WHERE type IN ('blocks', 'conditional-blocks', 'waits-for')",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        for row in rows {
            let (issue_id, depends_on_id, dep_type, metadata) = row?;
            let blocker_status = match statuses.get(&depends_on_id) {
                Some(s) => s.as_str(),
                None => continue, // dangling edge, ignore
            };
            let blocker_closed = blocker_status == "closed" || blocker_status == "tombstone";

            let is_blocking = match dep_type.as_str() {
                "blocks" => !blocker_closed,
                "conditional-blocks" => {
                    // Only blocks if the blocker closed WITHOUT failing, or
                    // hasn't closed yet at all.
                    if !blocker_closed {
                        true
                    } else {
                        let close_reason: String = conn
                            .query_row(
                                "SELECT close_reason FROM issues WHERE id = ?1",
                                params![depends_on_id],
                                |r| r.get(0),
                            )
                            .unwrap_or_default();
                        !is_failure_close(&close_reason)
                    }
                }
                "waits-for" => {
                    let gate: WaitsForMeta = serde_json::from_str(&metadata).unwrap_or(WaitsForMeta {
                        gate: waits_for_gate::ALL_CHILDREN.to_string(),
                        spawner_id: String::new(),
                    });
                    waits_for_unmet(conn, &issue_id, &gate)?
                }
                _ => false,
            };

            if is_blocking {
                direct_blockers.entry(issue_id).or_default().push(depends_on_id);
            }
        }
    }

    // Parent-child edges, used for Phase 2 propagation.
    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT issue_id, depends_on_id FROM dependencies WHERE type = 'parent-child'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (child_id, parent_id) = row?;
            children_of.entry(parent_id).or_default().push(child_id);
        }
    }

    let mut blocked: HashMap<String, HashSet<String>> = HashMap::new();
    for (id, blockers) in &direct_blockers {
        blocked.entry(id.clone()).or_default().extend(blockers.iter().cloned());
    }

    // Phase 2: propagate from each directly-blocked issue down through its
    // children, breadth-first, capped at MAX_PROPAGATION_DEPTH.
    let mut queue: VecDeque<(String, i32)> = direct_blockers
        .keys()
        .map(|id| (id.clone(), 0))
        .collect();
    let mut seen: HashSet<String> = direct_blockers.keys().cloned().collect();

    while let Some((parent_id, depth)) = queue.pop_front() {
        if depth >= MAX_PROPAGATION_DEPTH {
            continue;
        }
        let Some(kids) = children_of.get(&parent_id) else {
            continue;
        };
        for child in kids {
            blocked
                .entry(child.clone())
                .or_default()
                .insert(parent_id.clone());
            if seen.insert(child.clone()) {
                queue.push_back((child.clone(), depth + 1));
            }
        }
    }

    conn.execute("DELETE FROM blocked_cache", [])?;
    let now_str = format_datetime(&Utc::now());
    for (id, blockers) in &blocked {
        let mut list: Vec<&String> = blockers.iter().collect();
        list.sort();
        let json = serde_json::to_string(&list)?;
        conn.execute(
            "INSERT INTO blocked_cache (issue_id, blocked_by, blocked_at) VALUES (?1, ?2, ?3)",
            params![id, json, now_str],
        )?;
    }

    Ok(())
}

/// Returns `true` if a waits-for gate on `issue_id` is not yet satisfied,
/// i.e. the issue should remain blocked.
fn waits_for_unmet(conn: &Connection, issue_id: &str, gate: &WaitsForMeta) -> Result<bool> {
    let spawner = if gate.spawner_id.is_empty() {
        issue_id
    } else {
        gate.spawner_id.as_str()
    };

    let mut stmt = conn.prepare(
        "SELECT child.status FROM dependencies d
         INNER JOIN issues child ON child.id = d.issue_id
         WHERE d.depends_on_id = ?1 AND d.type = 'parent-child'",
    )?;
    let statuses: Vec<String> = stmt
        .query_map(params![spawner], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if statuses.is_empty() {
        // No spawned children yet: the gate cannot be satisfied.
        return Ok(true);
    }

    let closed = |s: &str| s == "closed" || s == "tombstone";
    match gate.gate.as_str() {
        waits_for_gate::ANY_CHILDREN => Ok(!statuses.iter().any(|s| closed(s))),
        _ => Ok(!statuses.iter().all(|s| closed(s))),
    }
}

impl SqliteStore {
    /// Rebuilds the materialized blocked cache.
    pub fn rebuild_blocked_cache_impl(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        rebuild_blocked_cache_on_conn(&conn)
    }

    /// Returns issues that are ready to work on.
    ///
    /// An issue is ready if its status is active (open/in_progress), it is
    /// not a template, it has no row in the blocked cache, and (unless the
    /// filter says otherwise) it is not ephemeral and not deferred.
    pub fn get_ready_work_impl(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let now_str = format_datetime(&Utc::now());

        let mut where_clauses: Vec<String> = vec![
            "i.status IN ('open', 'in_progress')".to_string(),
            "i.is_template = 0".to_string(),
            "i.pinned = 0".to_string(),
            "NOT EXISTS (SELECT 1 FROM blocked_cache bc WHERE bc.issue_id = i.id)".to_string(),
        ];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if !filter.include_ephemeral {
            where_clauses.push("(i.ephemeral = 0 OR i.ephemeral IS NULL)".to_string());
        }
        if !filter.include_deferred {
            where_clauses.push(format!("(i.defer_until IS NULL OR i.defer_until <= ?{param_idx})"));
            param_values.push(Box::new(now_str));
            param_idx += 1;
        }
        if let Some(ref status) = filter.status {
            where_clauses.push(format!("i.status = ?{param_idx}"));
            param_values.push(Box::new(status.as_str().to_string()));
            param_idx += 1;
        }
        if let Some(ref issue_type) = filter.issue_type {
            where_clauses.push(format!("i.issue_type = ?{param_idx}"));
            param_values.push(Box::new(issue_type.clone()));
            param_idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }
        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if filter.unassigned {
            where_clauses.push("(i.assignee IS NULL OR i.assignee = '')".to_string());
        }
        if let Some(ref parent_id) = filter.parent_id {
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM dependencies d WHERE d.issue_id = i.id \
                 AND d.depends_on_id = ?{param_idx} AND d.type = 'parent-child')"
            ));
            param_values.push(Box::new(parent_id.clone()));
            param_idx += 1;
        }

        for label in &filter.labels {
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = i.id AND labels.label = ?{param_idx})"
            ));
            param_values.push(Box::new(label.clone()));
            param_idx += 1;
        }
        if !filter.labels_any.is_empty() {
            let placeholders: Vec<String> = filter
                .labels_any
                .iter()
                .enumerate()
                .map(|(j, _)| format!("?{}", param_idx + j))
                .collect();
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = i.id AND labels.label IN ({}))",
                placeholders.join(",")
            ));
            for label in &filter.labels_any {
                param_values.push(Box::new(label.clone()));
            }
            param_idx += filter.labels_any.len();
        }

        let where_sql = where_clauses.join(" AND ");

        let order_sql = match filter.sort_policy {
            SortPolicy::Priority => "i.priority ASC, i.created_at ASC",
            SortPolicy::Oldest => "i.created_at ASC",
            // Hybrid: urgent tier (P0-P1) before the rest, FIFO within each tier.
            _ => "CASE WHEN i.priority <= 1 THEN 0 ELSE 1 END ASC, i.created_at ASC",
        };

        let limit_sql = filter.limit.map(|l| format!(" LIMIT {l}")).unwrap_or_default();

        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i WHERE {where_sql} ORDER BY {order_sql}{limit_sql}"
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

    /// Returns issues that have at least one unresolved blocker, per the
    /// materialized blocked cache.
    pub fn get_blocked_issues_impl(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> =
            vec!["EXISTS (SELECT 1 FROM blocked_cache bc WHERE bc.issue_id = i.id)".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }

        let where_sql = where_clauses.join(" AND ");
        let limit_sql = filter.limit.map(|l| format!(" LIMIT {l}")).unwrap_or_default();

        let sql = format!(
            "SELECT {ISSUE_COLUMNS}, bc.blocked_by AS blocked_by_json
             FROM issues i
             INNER JOIN blocked_cache bc ON bc.issue_id = i.id
             WHERE {where_sql}
             ORDER BY i.priority ASC, i.created_at ASC{limit_sql}"
        );

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let issue = scan_issue(row)?;
            let blocked_by_json: String = row.get("blocked_by_json")?;
            Ok((issue, blocked_by_json))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (issue, blocked_by_json) = row?;
            let blocked_by: Vec<String> =
                serde_json::from_str(&blocked_by_json).unwrap_or_default();
            result.push(BlockedIssue { issue, blocked_by });
        }

        let _ = param_idx;
        Ok(result)
    }

    /// Returns open epics whose children all closed (and which have at
    /// least one child), i.e. candidates for auto-closure.
    pub fn get_epics_eligible_for_closure_impl(&self) -> Result<Vec<EpicStatus>> {
        let conn = self.lock_conn()?;

        let sql = format!(
            "SELECT {ISSUE_COLUMNS},
                    (SELECT COUNT(*) FROM dependencies d
                     WHERE d.depends_on_id = i.id AND d.type = 'parent-child') AS total_children,
                    (SELECT COUNT(*) FROM dependencies d
                     INNER JOIN issues child ON child.id = d.issue_id
                     WHERE d.depends_on_id = i.id AND d.type = 'parent-child'
                       AND child.status = 'closed') AS closed_children
             FROM issues i
             WHERE i.issue_type = 'epic'
               AND i.status NOT IN ('closed', 'tombstone')
               AND (SELECT COUNT(*) FROM dependencies d
                    WHERE d.depends_on_id = i.id AND d.type = 'parent-child') > 0
             ORDER BY i.created_at ASC"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let issue = scan_issue(row)?;
            let total_children: i32 = row.get("total_children")?;
            let closed_children: i32 = row.get("closed_children")?;
            Ok(EpicStatus {
                epic: issue,
                total_children,
                closed_children,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            let status: EpicStatus = row?;
            if status.total_children == status.closed_children {
                result.push(status);
            }
        }
        Ok(result)
    }

    /// Returns aggregate statistics, computed in a single pass over `issues`.
    pub fn get_statistics_impl(&self) -> Result<Statistics> {
        let conn = self.lock_conn()?;
        let mut stats = Statistics {
            total_issues: conn.query_row("SELECT COUNT(*) FROM issues", [], |r| r.get(0))?,
            open_issues: conn.query_row(
                "SELECT COUNT(*) FROM issues WHERE status = 'open'",
                [],
                |r| r.get(0),
            )?,
            closed_issues: conn.query_row(
                "SELECT COUNT(*) FROM issues WHERE status = 'closed'",
                [],
                |r| r.get(0),
            )?,
            in_progress_issues: conn.query_row(
                "SELECT COUNT(*) FROM issues WHERE status = 'in_progress'",
                [],
                |r| r.get(0),
            )?,
            deferred_issues: conn.query_row(
                "SELECT COUNT(*) FROM issues WHERE defer_until IS NOT NULL AND defer_until > ?1",
                params![format_datetime(&Utc::now())],
                |r| r.get(0),
            )?,
            tombstoned_issues: conn.query_row(
                "SELECT COUNT(*) FROM issues WHERE status = 'tombstone'",
                [],
                |r| r.get(0),
            )?,
            ready_issues: conn.query_row(
                "SELECT COUNT(*) FROM issues i
                 WHERE i.status IN ('open', 'in_progress') AND i.is_template = 0
                   AND NOT EXISTS (SELECT 1 FROM blocked_cache bc WHERE bc.issue_id = i.id)",
                [],
                |r| r.get(0),
            )?,
            blocked_issues: conn.query_row(
                "SELECT COUNT(*) FROM blocked_cache",
                [],
                |r| r.get(0),
            )?,
            ready_issues_legacy: conn.query_row(
                "SELECT COUNT(*) FROM issues i
                 WHERE i.status = 'open'
                   AND NOT EXISTS (
                       SELECT 1 FROM dependencies d
                       INNER JOIN issues blocker ON blocker.id = d.depends_on_id
                       WHERE d.issue_id = i.id AND d.type IN ('blocks', 'parent-child')
                         AND blocker.status NOT IN ('closed', 'tombstone')
                   )",
                [],
                |r| r.get(0),
            )?,
            blocked_issues_legacy: conn.query_row(
                "SELECT COUNT(DISTINCT d.issue_id) FROM dependencies d
                 INNER JOIN issues blocker ON blocker.id = d.depends_on_id
                 WHERE d.type IN ('blocks', 'parent-child')
                   AND blocker.status NOT IN ('closed', 'tombstone')",
                [],
                |r| r.get(0),
            )?,
            ..Statistics::default()
        };

        {
            let mut stmt = conn.prepare(
                "SELECT issue_type, COUNT(*) FROM issues GROUP BY issue_type ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_type.push(row?);
            }
        }
        {
            let mut stmt = conn
                .prepare("SELECT priority, COUNT(*) FROM issues GROUP BY priority ORDER BY priority ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_priority.push(row?);
            }
        }
        {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(NULLIF(assignee, ''), '(unassigned)'), COUNT(*)
                 FROM issues WHERE status != 'closed'
                 GROUP BY 1 ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                stats.by_assignee.push(row?);
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::dependency::Dependency;
    use beads_core::enums::{DependencyType, Status};
    use beads_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn rebuild_marks_direct_blockers() {
        let store = test_store();
        let blocker = IssueBuilder::new("Blocker").id("bd-blk1").status(Status::Open).build();
        let blocked = IssueBuilder::new("Blocked").id("bd-blk2").status(Status::Open).build();
        store.create_issue_impl(&blocker, "alice").unwrap();
        store.create_issue_impl(&blocked, "alice").unwrap();

        let dep = Dependency {
            issue_id: "bd-blk2".into(),
            depends_on_id: "bd-blk1".into(),
            dep_type: DependencyType::Blocks,
            created_at: Utc::now(),
            created_by: "alice".into(),
            metadata: String::new(),
            thread_id: String::new(),
        };
        store.add_dependency_impl(&dep, "alice").unwrap();
        store.rebuild_blocked_cache_impl().unwrap();

        let ready = store.get_ready_work_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = ready.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"bd-blk1"));
        assert!(!ids.contains(&"bd-blk2"));

        let blocked_issues = store.get_blocked_issues_impl(&WorkFilter::default()).unwrap();
        assert_eq!(blocked_issues.len(), 1);
        assert_eq!(blocked_issues[0].issue.id, "bd-blk2");
        assert_eq!(blocked_issues[0].blocked_by, vec!["bd-blk1".to_string()]);
    }

    #[test]
    fn closing_blocker_clears_ready_state_after_rebuild() {
        let store = test_store();
        let blocker = IssueBuilder::new("Blocker").id("bd-cb1").build();
        let blocked = IssueBuilder::new("Blocked").id("bd-cb2").build();
        store.create_issue_impl(&blocker, "alice").unwrap();
        store.create_issue_impl(&blocked, "alice").unwrap();
        store
            .add_dependency_impl(
                &Dependency {
                    issue_id: "bd-cb2".into(),
                    depends_on_id: "bd-cb1".into(),
                    dep_type: DependencyType::Blocks,
                    created_at: Utc::now(),
                    created_by: "alice".into(),
                    metadata: String::new(),
                    thread_id: String::new(),
                },
                "alice",
            )
            .unwrap();
        store.rebuild_blocked_cache_impl().unwrap();
        assert_eq!(store.get_blocked_issues_impl(&WorkFilter::default()).unwrap().len(), 1);

        store
            .close_issue_impl("bd-cb1", "done", "alice", "s1", false)
            .unwrap();
        store.rebuild_blocked_cache_impl().unwrap();
        assert!(store.get_blocked_issues_impl(&WorkFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn parent_child_propagation() {
        let store = test_store();
        let gate = IssueBuilder::new("Gate").id("bd-pc1").build();
        let parent = IssueBuilder::new("Parent").id("bd-pc2").build();
        let child = IssueBuilder::new("Child").id("bd-pc3").build();
        store.create_issue_impl(&gate, "alice").unwrap();
        store.create_issue_impl(&parent, "alice").unwrap();
        store.create_issue_impl(&child, "alice").unwrap();

        store
            .add_dependency_impl(
                &Dependency {
                    issue_id: "bd-pc2".into(),
                    depends_on_id: "bd-pc1".into(),
                    dep_type: DependencyType::Blocks,
                    created_at: Utc::now(),
                    created_by: "alice".into(),
                    metadata: String::new(),
                    thread_id: String::new(),
                },
                "alice",
            )
            .unwrap();
        store
            .add_dependency_impl(
                &Dependency {
                    issue_id: "bd-pc3".into(),
                    depends_on_id: "bd-pc2".into(),
                    dep_type: DependencyType::ParentChild,
                    created_at: Utc::now(),
                    created_by: "alice".into(),
                    metadata: String::new(),
                    thread_id: String::new(),
                },
                "alice",
            )
            .unwrap();
        store.rebuild_blocked_cache_impl().unwrap();

        let blocked = store.get_blocked_issues_impl(&WorkFilter::default()).unwrap();
        let ids: Vec<&str> = blocked.iter().map(|b| b.issue.id.as_str()).collect();
        assert!(ids.contains(&"bd-pc2"));
        assert!(ids.contains(&"bd-pc3"));
    }

    #[test]
    fn conditional_blocks_releases_on_failure() {
        let store = test_store();
        let attempt = IssueBuilder::new("Attempt").id("bd-cond1").build();
        let fallback = IssueBuilder::new("Fallback").id("bd-cond2").build();
        store.create_issue_impl(&attempt, "alice").unwrap();
        store.create_issue_impl(&fallback, "alice").unwrap();
        store
            .add_dependency_impl(
                &Dependency {
                    issue_id: "bd-cond2".into(),
                    depends_on_id: "bd-cond1".into(),
                    dep_type: DependencyType::ConditionalBlocks,
                    created_at: Utc::now(),
                    created_by: "alice".into(),
                    metadata: String::new(),
                    thread_id: String::new(),
                },
                "alice",
            )
            .unwrap();

        store.rebuild_blocked_cache_impl().unwrap();
        assert_eq!(store.get_blocked_issues_impl(&WorkFilter::default()).unwrap().len(), 1);

        store
            .close_issue_impl("bd-cond1", "build failed", "alice", "s1", false)
            .unwrap();
        store.rebuild_blocked_cache_impl().unwrap();
        assert!(store.get_blocked_issues_impl(&WorkFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn get_statistics() {
        let store = test_store();
        let issue1 = IssueBuilder::new("Open").id("bd-st1").status(Status::Open).build();
        let issue2 = IssueBuilder::new("Closed")
            .id("bd-st2")
            .status(Status::Closed)
            .closed_at(Utc::now())
            .build();
        store.create_issue_impl(&issue1, "alice").unwrap();
        store.create_issue_impl(&issue2, "alice").unwrap();
        store.rebuild_blocked_cache_impl().unwrap();

        let stats = store.get_statistics_impl().unwrap();
        assert_eq!(stats.total_issues, 2);
        assert_eq!(stats.open_issues, 1);
        assert_eq!(stats.closed_issues, 1);
        assert_eq!(stats.ready_issues, 1);
    }
}
