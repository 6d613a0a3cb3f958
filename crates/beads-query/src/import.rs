//! Applies an incoming `.beads/issues.jsonl` stream back into storage.
//!
//! Every incoming record is normalized, matched against the current store
//! through a four-phase collision table (or, when a merge base snapshot is
//! supplied, a three-way comparison), then applied inside a single
//! transaction so a partial import can never leave the store half-updated.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use beads_core::content_hash::compute_content_hash;
use beads_core::dependency::Dependency;
use beads_core::enums::{IssueType, Status};
use beads_core::filter::IssueFilter;
use beads_core::issue::{Issue, IssueBuilder};
use beads_core::jsonl::read_jsonl;
use beads_storage::error::StorageError;
use beads_storage::traits::{Storage, Transaction};

use crate::Result;

const METADATA_CONTENT_HASH_KEY: &str = "jsonl_content_hash";
const METADATA_LAST_IMPORT_KEY: &str = "last_import_time";

/// Conflict markers left behind by a failed git merge; their presence in the
/// stream means the file must not be parsed as JSONL.
const CONFLICT_MARKERS: [&str; 3] = ["<<<<<<< ", "=======", ">>>>>>> "];

/// What to do with a dependency edge whose target does not exist post-import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanHandling {
    /// Fail the import.
    Strict,
    /// Create a placeholder issue for the missing target.
    Resurrect,
    /// Drop the edge.
    Skip,
    /// Accept the dangling edge as-is (default).
    #[default]
    Allow,
}

/// Import parameters.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub orphan_handling: OrphanHandling,
    /// IDs whose local copy must be kept unconditionally if it was exported
    /// at or after the incoming record's `updated_at` -- takes precedence
    /// over three-way merge.
    pub protect_local_export_ids: HashMap<String, DateTime<Utc>>,
    /// Optional snapshot from the last sync, enabling three-way merge.
    pub merge_base: Option<PathBuf>,
    /// When `true`, a content-hash match across different ID prefixes is
    /// always treated as a cross-project duplicate and skipped rather than
    /// considered for rename.
    pub prefix_validation: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            orphan_handling: OrphanHandling::default(),
            protect_local_export_ids: HashMap::new(),
            merge_base: None,
            prefix_validation: true,
        }
    }
}

/// Outcome of a single `import` call.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub renamed: Vec<(String, String)>,
    pub skipped: Vec<String>,
    pub tombstoned: Vec<String>,
    /// `true` if the file was already reflected in the store and nothing ran.
    pub already_up_to_date: bool,
}

#[derive(Debug, Clone)]
enum Action {
    Insert(Issue),
    Update(Issue),
    Rename { old_id: String, issue: Issue },
}

impl Action {
    fn issue(&self) -> &Issue {
        match self {
            Action::Insert(i) | Action::Update(i) => i,
            Action::Rename { issue, .. } => issue,
        }
    }
}

/// Imports issues from `path` into `store`.
pub fn import(store: &dyn Storage, path: &Path, options: &ImportOptions) -> Result<ImportReport> {
    if let Some(up_to_date) = check_staleness(store, path)? {
        return Ok(up_to_date);
    }

    let content = std::fs::read_to_string(path)?;
    if CONFLICT_MARKERS.iter().any(|m| content.contains(m)) {
        return Err(StorageError::Conflict(
            "issues.jsonl contains unresolved merge conflict markers".to_string(),
        ));
    }

    let mut incoming: Vec<Issue> = Vec::new();
    for (line_no, result) in read_jsonl(Cursor::new(content.as_bytes())).enumerate() {
        let issue = result.map_err(|e| StorageError::ParseError {
            line: line_no + 1,
            reason: e.to_string(),
        })?;
        incoming.push(issue);
    }
    for issue in &mut incoming {
        normalize(issue);
    }

    let existing = index_existing(store)?;
    let base = load_base_index(options.merge_base.as_deref())?;

    let mut actions: Vec<Action> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();
    let mut seen_incoming_ids: HashSet<String> = HashSet::new();

    for issue in incoming {
        seen_incoming_ids.insert(issue.id.clone());

        if let Some(existing_issue) = existing.by_id.get(&issue.id) {
            if existing_issue.status == Status::Tombstone {
                skipped.push(issue.id.clone());
                continue;
            }
        }
        if let Some(protected_since) = options.protect_local_export_ids.get(&issue.id) {
            if *protected_since >= issue.updated_at {
                skipped.push(issue.id.clone());
                continue;
            }
        }

        let decision = if let Some(base) = &base {
            resolve_three_way(&issue, &existing, base)
        } else {
            resolve_four_phase(&issue, &existing, options.prefix_validation)
        };

        match decision {
            Decision::Insert => actions.push(Action::Insert(issue)),
            Decision::Update => actions.push(Action::Update(issue)),
            Decision::Rename(old_id) => actions.push(Action::Rename { old_id, issue }),
            Decision::Skip => skipped.push(issue.id.clone()),
        }
    }

    let mut tombstone_ids: Vec<String> = Vec::new();
    if let Some(base) = &base {
        for id in base.by_id.keys() {
            if !seen_incoming_ids.contains(id)
                && existing.by_id.contains_key(id)
                && existing.by_id[id].status != Status::Tombstone
            {
                tombstone_ids.push(id.clone());
            }
        }
    }

    let mut report = ImportReport {
        skipped,
        ..Default::default()
    };
    for action in &actions {
        match action {
            Action::Insert(i) => report.inserted.push(i.id.clone()),
            Action::Update(i) => report.updated.push(i.id.clone()),
            Action::Rename { old_id, issue } => {
                report.renamed.push((old_id.clone(), issue.id.clone()))
            }
        }
    }
    report.tombstoned = tombstone_ids.clone();

    let known_ids: HashSet<String> = existing
        .by_id
        .keys()
        .cloned()
        .chain(actions.iter().map(|a| a.issue().id.clone()))
        .collect();
    let orphan_handling = options.orphan_handling;

    let mut sorted_actions = actions.clone();
    sorted_actions.sort_by_key(|a| hierarchy_depth(&a.issue().id));

    store.run_in_transaction(&move |tx: &dyn Transaction| -> Result<()> {
        let mut known_ids = known_ids.clone();
        tx.clear_all_export_hashes()?;

        for action in &sorted_actions {
            if let Action::Rename { old_id, issue } = action {
                tx.delete_issue(old_id, "import", &format!("renamed to {}", issue.id))?;
            }
            let issue = action.issue();
            let deps = resolve_orphan_deps(tx, &issue.dependencies, &mut known_ids, orphan_handling)?;
            tx.import_issue(issue)?;
            tx.resync_labels(&issue.id, &issue.labels)?;
            tx.resync_dependencies(&issue.id, &deps)?;
            tx.resync_comments(&issue.id, &issue.comments)?;
        }

        for id in &tombstone_ids {
            tx.delete_issue(id, "import", "removed upstream")?;
        }

        tx.rebuild_blocked_cache()?;
        Ok(())
    })?;

    store.checkpoint_wal();
    let digest = digest_file_bytes(path)?;
    store.set_metadata(METADATA_CONTENT_HASH_KEY, &digest)?;
    store.set_metadata(METADATA_LAST_IMPORT_KEY, &Utc::now().to_rfc3339())?;

    Ok(report)
}

/// Returns `Some(report)` when the file is not newer than the last import
/// (nothing to do), or `None` when import should proceed.
fn check_staleness(store: &dyn Storage, path: &Path) -> Result<Option<ImportReport>> {
    let metadata = std::fs::symlink_metadata(path)?;
    let mtime: DateTime<Utc> = metadata.modified()?.into();

    let last_import_time = store
        .get_metadata(METADATA_LAST_IMPORT_KEY)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc));

    let Some(last) = last_import_time else {
        return Ok(None);
    };
    if mtime <= last {
        return Ok(Some(ImportReport {
            already_up_to_date: true,
            ..Default::default()
        }));
    }

    let digest = digest_file_bytes(path)?;
    let stored_hash = store.get_metadata(METADATA_CONTENT_HASH_KEY).ok();
    if stored_hash.as_deref() == Some(digest.as_str()) {
        return Ok(Some(ImportReport {
            already_up_to_date: true,
            ..Default::default()
        }));
    }

    Ok(None)
}

fn digest_file_bytes(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Marks `-wisp-` IDs ephemeral and recomputes the content hash from the
/// incoming fields -- the wire never carries a trusted hash.
fn normalize(issue: &mut Issue) {
    if issue.id.contains("-wisp-") {
        issue.ephemeral = true;
    }
    if let Some(ref mut external_ref) = issue.external_ref {
        *external_ref = external_ref.trim().to_string();
    }
    issue.content_hash = compute_content_hash(issue);
}

// ---------------------------------------------------------------------------
// Existing-store and base-snapshot indices
// ---------------------------------------------------------------------------

struct ExistingIndex {
    by_id: HashMap<String, Issue>,
    by_external_ref: HashMap<String, String>,
    by_content_hash: HashMap<String, Vec<String>>,
}

fn index_existing(store: &dyn Storage) -> Result<ExistingIndex> {
    let issues = store.search_issues("", &IssueFilter::default())?;
    let mut by_id = HashMap::with_capacity(issues.len());
    let mut by_external_ref = HashMap::new();
    let mut by_content_hash: HashMap<String, Vec<String>> = HashMap::new();

    for mut issue in issues {
        issue.dependencies = store.get_dependency_records(&issue.id)?;
        issue.labels = store.get_labels(&issue.id)?;
        let hash = compute_content_hash(&issue);
        issue.content_hash = hash.clone();

        if let Some(ref external_ref) = issue.external_ref {
            if !external_ref.is_empty() {
                by_external_ref.insert(external_ref.clone(), issue.id.clone());
            }
        }
        by_content_hash.entry(hash).or_default().push(issue.id.clone());
        by_id.insert(issue.id.clone(), issue);
    }

    Ok(ExistingIndex {
        by_id,
        by_external_ref,
        by_content_hash,
    })
}

struct BaseIndex {
    by_id: HashMap<String, String>,
}

fn load_base_index(path: Option<&Path>) -> Result<Option<BaseIndex>> {
    let Some(path) = path else { return Ok(None) };
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let mut by_id = HashMap::new();
    for result in read_jsonl(Cursor::new(content.as_bytes())) {
        let issue = result.map_err(|e| StorageError::ParseError {
            line: 0,
            reason: e.to_string(),
        })?;
        let hash = compute_content_hash(&issue);
        by_id.insert(issue.id, hash);
    }
    Ok(Some(BaseIndex { by_id }))
}

// ---------------------------------------------------------------------------
// Collision resolution
// ---------------------------------------------------------------------------

enum Decision {
    Insert,
    Update,
    Rename(String),
    Skip,
}

fn resolve_four_phase(issue: &Issue, existing: &ExistingIndex, prefix_validation: bool) -> Decision {
    // Phase 0: external reference match.
    if let Some(ref external_ref) = issue.external_ref {
        if !external_ref.is_empty() {
            if let Some(existing_id) = existing.by_external_ref.get(external_ref) {
                let existing_issue = &existing.by_id[existing_id];
                return if issue.updated_at > existing_issue.updated_at {
                    Decision::Update
                } else {
                    Decision::Skip
                };
            }
        }
    }

    // Phase 1: content hash match.
    if let Some(candidates) = existing.by_content_hash.get(&issue.content_hash) {
        if candidates.iter().any(|id| id == &issue.id) {
            return Decision::Skip; // 1a: same ID, idempotent no-op.
        }
        if let Some(candidate_id) = candidates.first() {
            // 1b: content hash matches a different ID.
            let same_prefix = issue_prefix(candidate_id) == issue_prefix(&issue.id);
            return if same_prefix || !prefix_validation {
                Decision::Rename(candidate_id.clone())
            } else {
                Decision::Skip
            };
        }
    }

    // Phase 2: ID-only match.
    if let Some(existing_issue) = existing.by_id.get(&issue.id) {
        return if issue.updated_at > existing_issue.updated_at {
            Decision::Update
        } else {
            Decision::Skip
        };
    }

    // Phase 3: no match.
    Decision::Insert
}

fn resolve_three_way(issue: &Issue, existing: &ExistingIndex, base: &BaseIndex) -> Decision {
    let local = existing.by_id.get(&issue.id);
    let base_hash = base.by_id.get(&issue.id);

    match (local, base_hash) {
        (None, _) => Decision::Insert,
        (Some(local_issue), None) => {
            if issue.updated_at > local_issue.updated_at {
                Decision::Update
            } else {
                Decision::Skip
            }
        }
        (Some(local_issue), Some(base_hash)) => {
            if local_issue.content_hash == issue.content_hash {
                Decision::Skip
            } else if local_issue.content_hash == *base_hash {
                Decision::Update // Local == Base -> take Remote.
            } else if issue.content_hash == *base_hash {
                Decision::Skip // Remote == Base -> keep Local.
            } else if issue.updated_at > local_issue.updated_at {
                Decision::Update
            } else {
                Decision::Skip
            }
        }
    }
}

fn issue_prefix(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}

fn hierarchy_depth(id: &str) -> usize {
    id.matches('.').count()
}

// ---------------------------------------------------------------------------
// Orphan handling
// ---------------------------------------------------------------------------

fn resolve_orphan_deps(
    tx: &dyn Transaction,
    deps: &[Dependency],
    known_ids: &mut HashSet<String>,
    mode: OrphanHandling,
) -> Result<Vec<Dependency>> {
    let mut resolved = Vec::with_capacity(deps.len());
    for dep in deps {
        let target = &dep.depends_on_id;
        if target.starts_with("external:") || known_ids.contains(target) {
            resolved.push(dep.clone());
            continue;
        }

        match mode {
            OrphanHandling::Allow => resolved.push(dep.clone()),
            OrphanHandling::Skip => {}
            OrphanHandling::Strict => {
                return Err(StorageError::Conflict(format!(
                    "dependency target `{target}` does not exist"
                )));
            }
            OrphanHandling::Resurrect => {
                let placeholder = IssueBuilder::new("[orphaned dependency placeholder]")
                    .id(target.clone())
                    .issue_type(IssueType::Task)
                    .build();
                tx.import_issue(&placeholder)?;
                known_ids.insert(target.clone());
                resolved.push(dep.clone());
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_storage::sqlite::SqliteStore;
    use std::io::Write as _;

    fn write_file(dir: &std::path::Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn import_inserts_new_issues() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "issues.jsonl",
            &[r#"{"id":"bd-imp1","title":"Imported","status":"open","issue_type":"task"}"#],
        );

        let report = import(&store, &path, &ImportOptions::default()).unwrap();
        assert_eq!(report.inserted, vec!["bd-imp1".to_string()]);

        let issue = store.get_issue("bd-imp1").unwrap();
        assert_eq!(issue.title, "Imported");
    }

    #[test]
    fn import_marks_wisp_ids_ephemeral() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "issues.jsonl",
            &[r#"{"id":"bd-wisp-77","title":"Transient","status":"open","issue_type":"task"}"#],
        );

        import(&store, &path, &ImportOptions::default()).unwrap();
        let issue = store.get_issue("bd-wisp-77").unwrap();
        assert!(issue.ephemeral);
    }

    #[test]
    fn import_rejects_conflict_markers() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "issues.jsonl",
            &["<<<<<<< local", r#"{"id":"bd-x"}"#, "=======", r#"{"id":"bd-y"}"#, ">>>>>>> remote"],
        );

        let err = import(&store, &path, &ImportOptions::default()).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn import_skips_update_to_tombstoned_issue() {
        let store = SqliteStore::open_in_memory().unwrap();
        let issue = IssueBuilder::new("Gone").id("bd-dead").build();
        store.create_issue(&issue, "alice").unwrap();
        store.delete_issue("bd-dead", "alice", "obsolete").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "issues.jsonl",
            &[r#"{"id":"bd-dead","title":"Resurrected?","status":"open","issue_type":"task"}"#],
        );

        let report = import(&store, &path, &ImportOptions::default()).unwrap();
        assert_eq!(report.skipped, vec!["bd-dead".to_string()]);
        assert!(store.get_issue("bd-dead").unwrap().is_tombstoned());
    }

    #[test]
    fn import_allows_dangling_dependency_by_default() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "issues.jsonl",
            &[r#"{"id":"bd-child","title":"Child","status":"open","issue_type":"task","dependencies":[{"issue_id":"bd-child","depends_on_id":"bd-missing","type":"blocks","created_at":"2024-01-01T00:00:00Z"}]}"#],
        );

        let report = import(&store, &path, &ImportOptions::default()).unwrap();
        assert!(report.inserted.contains(&"bd-child".to_string()));
    }

    #[test]
    fn import_resurrects_orphan_when_configured() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "issues.jsonl",
            &[r#"{"id":"bd-child2","title":"Child2","status":"open","issue_type":"task","dependencies":[{"issue_id":"bd-child2","depends_on_id":"bd-missing2","type":"blocks","created_at":"2024-01-01T00:00:00Z"}]}"#],
        );

        let options = ImportOptions {
            orphan_handling: OrphanHandling::Resurrect,
            ..Default::default()
        };
        import(&store, &path, &options).unwrap();
        assert!(store.get_issue("bd-missing2").is_ok());
    }

    #[test]
    fn second_import_of_unchanged_file_is_a_no_op() {
        let store = SqliteStore::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "issues.jsonl",
            &[r#"{"id":"bd-imp9","title":"Stable","status":"open","issue_type":"task"}"#],
        );

        import(&store, &path, &ImportOptions::default()).unwrap();
        let report = import(&store, &path, &ImportOptions::default()).unwrap();
        assert!(report.already_up_to_date);
    }
}
