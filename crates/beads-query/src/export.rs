//! Serializes issues to `.beads/issues.jsonl`.
//!
//! Only the FIFO dirty list is re-walked on each call: each dirty issue is
//! reloaded, its content hash recomputed, and compared against the export
//! hash recorded for it last time. Only records whose hash actually changed
//! are re-serialized; unaffected lines in the existing file are carried over
//! byte-for-byte, which keeps the stream diff-friendly under version control.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};

use beads_core::content_hash::compute_content_hash;
use beads_core::filter::IssueFilter;
use beads_core::issue::Issue;
use beads_storage::error::StorageError;
use beads_storage::traits::Storage;

use crate::Result;

/// Export buffer size, per the 2 MiB minimum the contract requires.
const WRITE_BUFFER_CAPACITY: usize = 2 * 1024 * 1024;

const METADATA_CONTENT_HASH_KEY: &str = "jsonl_content_hash";
const METADATA_LAST_EXPORT_KEY: &str = "last_export_time";

/// Manifest file suffix, sibling to the export stream itself.
const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Controls how export reacts to per-issue failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort the whole export on the first failure. Default for
    /// user-initiated export.
    #[default]
    Strict,
    /// Log and skip failures, leaving the affected issue dirty for the next
    /// attempt. Default for background auto-export.
    BestEffort,
    /// Retry transient failures with 100 -> 200 -> 400 ms backoff before
    /// giving up on that issue.
    Partial,
    /// Issue and dependency failures are fatal; label and comment failures
    /// degrade to an empty set instead of aborting.
    RequiredCore,
}

/// Export parameters, sourced from the `export.*` / `auto_export.*` config keys.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub error_policy: ErrorPolicy,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub write_manifest: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::default(),
            retry_attempts: 3,
            retry_backoff_ms: 100,
            write_manifest: false,
        }
    }
}

/// Outcome of a single `export` call.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    /// Issue IDs whose line in the stream was written or updated.
    pub exported: Vec<String>,
    /// Issue IDs skipped because they no longer exist or are ephemeral.
    pub skipped: Vec<String>,
    /// Issue IDs that failed, with a description, and remain dirty.
    pub failed: Vec<(String, String)>,
    /// `true` if the on-disk file was actually rewritten.
    pub file_written: bool,
}

/// Exports dirty issues into the JSONL stream at `path`, atomically.
///
/// If `path` does not yet exist, every non-ephemeral issue in the store is
/// treated as dirty for this one call (a full bootstrap export).
pub fn export(store: &dyn Storage, path: &Path, options: &ExportOptions) -> Result<ExportReport> {
    let mut report = ExportReport::default();

    let bootstrap = !path.exists();
    let ids_to_process: Vec<String> = if bootstrap {
        all_non_ephemeral_ids(store)?
    } else {
        store.get_dirty_ids()?
    };

    if ids_to_process.is_empty() && !bootstrap {
        return Ok(report);
    }

    let mut changed: HashMap<String, Issue> = HashMap::new();
    let mut to_clear: Vec<String> = Vec::new();

    for id in &ids_to_process {
        match collect_for_export(store, id, options) {
            Ok(Some(issue)) => {
                let content_hash = compute_content_hash(&issue);
                let previous_hash = store.get_export_hash(&issue.id)?;
                if previous_hash.as_deref() != Some(content_hash.as_str()) {
                    store.set_export_hash(&issue.id, &content_hash)?;
                    changed.insert(issue.id.clone(), issue);
                }
                to_clear.push(id.clone());
                report.exported.push(id.clone());
            }
            Ok(None) => {
                report.skipped.push(id.clone());
                to_clear.push(id.clone());
            }
            Err(e) => match options.error_policy {
                ErrorPolicy::Strict | ErrorPolicy::RequiredCore => return Err(e),
                ErrorPolicy::BestEffort | ErrorPolicy::Partial => {
                    tracing::warn!(issue_id = %id, error = %e, "skipping issue during export");
                    report.failed.push((id.clone(), e.to_string()));
                }
            },
        }
    }

    if !changed.is_empty() || bootstrap {
        let final_lines = merge_lines(path, &changed)?;
        atomic_write_lines(path, &final_lines)?;
        report.file_written = true;

        if options.write_manifest {
            write_manifest(path, &final_lines)?;
        }

        let digest = digest_lines(&final_lines);
        store.set_metadata(METADATA_CONTENT_HASH_KEY, &digest)?;
    }

    if !to_clear.is_empty() {
        store.clear_dirty(&to_clear)?;
    }
    store.set_metadata(METADATA_LAST_EXPORT_KEY, &Utc::now().to_rfc3339())?;

    Ok(report)
}

/// Loads and fully populates a single issue for export, applying the
/// configured error policy to its relational sub-fetches.
///
/// Returns `Ok(None)` when the issue has vanished (hard-deleted since being
/// marked dirty) or is ephemeral (never exported).
fn collect_for_export(store: &dyn Storage, id: &str, options: &ExportOptions) -> Result<Option<Issue>> {
    let mut issue = match retry_if_partial(options, || store.get_issue(id)) {
        Ok(issue) => issue,
        Err(StorageError::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };

    if issue.ephemeral {
        return Ok(None);
    }

    issue.dependencies = retry_if_partial(options, || store.get_dependency_records(id))?;

    let labels = retry_if_partial(options, || store.get_labels(id));
    issue.labels = match (labels, options.error_policy) {
        (Ok(labels), _) => labels,
        (Err(_), ErrorPolicy::RequiredCore) => Vec::new(),
        (Err(e), _) => return Err(e),
    };

    let comments = retry_if_partial(options, || store.get_comments(id));
    issue.comments = match (comments, options.error_policy) {
        (Ok(comments), _) => comments,
        (Err(_), ErrorPolicy::RequiredCore) => Vec::new(),
        (Err(e), _) => return Err(e),
    };

    Ok(Some(issue))
}

/// Runs `f` once, or with 100 -> 200 -> ... ms backoff retries under the
/// `Partial` policy.
fn retry_if_partial<T>(options: &ExportOptions, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    if options.error_policy != ErrorPolicy::Partial {
        return f();
    }

    let mut delay_ms = options.retry_backoff_ms;
    let mut last_err = None;
    for attempt in 0..options.retry_attempts.max(1) {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < options.retry_attempts {
                    std::thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms *= 2;
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

fn all_non_ephemeral_ids(store: &dyn Storage) -> Result<Vec<String>> {
    let issues = store.search_issues("", &IssueFilter::default())?;
    Ok(issues
        .into_iter()
        .filter(|i| !i.ephemeral)
        .map(|i| i.id)
        .collect())
}

/// Merges `changed` into the existing file at `path` (if any), preserving
/// the order and exact bytes of every unaffected line, then appending any
/// changed issue that wasn't already present.
fn merge_lines(path: &Path, changed: &HashMap<String, Issue>) -> Result<Vec<String>> {
    let mut remaining = changed.clone();
    let mut lines = Vec::with_capacity(remaining.len());

    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        for raw_line in content.lines() {
            if raw_line.trim().is_empty() {
                continue;
            }
            let id = peek_id(raw_line);
            match id.and_then(|id| remaining.remove(&id)) {
                Some(issue) => lines.push(serialize_issue(&issue)?),
                None => lines.push(raw_line.to_string()),
            }
        }
    }

    // Anything left over is new: append in dirty-list encounter order isn't
    // preserved by a HashMap, so sort by ID for a stable, reviewable diff.
    let mut new_ids: Vec<&String> = remaining.keys().collect();
    new_ids.sort();
    for id in new_ids {
        lines.push(serialize_issue(&remaining[id])?);
    }

    Ok(lines)
}

fn peek_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value.get("id")?.as_str().map(str::to_owned)
}

fn serialize_issue(issue: &Issue) -> Result<String> {
    serde_json::to_string(issue).map_err(StorageError::Serialization)
}

/// Writes `<dir>/.tmp-<rand>`, flushes and fsyncs it, then renames it over
/// `path`. On any error the temp file is removed by its own `Drop` impl.
fn atomic_write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = std::io::BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, tmp.as_file_mut());
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                writer.write_all(b"\n")?;
            }
            writer.write_all(line.as_bytes())?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

fn digest_lines(lines: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(line.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn write_manifest(path: &Path, lines: &[String]) -> Result<()> {
    let manifest_path = sibling_with_suffix(path, MANIFEST_SUFFIX);
    let manifest = serde_json::json!({
        "line_count": lines.len(),
        "digest": digest_lines(lines),
        "exported_at": Utc::now().to_rfc3339(),
    });
    let body = serde_json::to_string_pretty(&manifest).map_err(StorageError::Serialization)?;
    atomic_write_lines(&manifest_path, &[body])
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::issue::IssueBuilder;
    use beads_storage::sqlite::SqliteStore;

    fn store_with_issue(id: &str, title: &str) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let issue = IssueBuilder::new(title).id(id).build();
        store.create_issue(&issue, "alice").unwrap();
        store
    }

    #[test]
    fn bootstrap_export_writes_all_issues() {
        let store = store_with_issue("bd-exp1", "First");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");

        let report = export(&store, &path, &ExportOptions::default()).unwrap();
        assert!(report.file_written);
        assert_eq!(report.exported, vec!["bd-exp1".to_string()]);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"id\":\"bd-exp1\""));
        assert!(!content.ends_with('\n'));
    }

    #[test]
    fn export_with_no_dirty_issues_is_a_no_op() {
        let store = store_with_issue("bd-exp2", "Second");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        export(&store, &path, &ExportOptions::default()).unwrap();

        let report = export(&store, &path, &ExportOptions::default()).unwrap();
        assert!(!report.file_written);
        assert!(report.exported.is_empty());
    }

    #[test]
    fn export_preserves_unaffected_lines_on_incremental_update() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = IssueBuilder::new("A").id("bd-aaa").build();
        let b = IssueBuilder::new("B").id("bd-bbb").build();
        store.create_issue(&a, "alice").unwrap();
        store.create_issue(&b, "alice").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        export(&store, &path, &ExportOptions::default()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();
        let a_line_before = before.lines().find(|l| l.contains("bd-aaa")).unwrap().to_string();

        let updates = beads_storage::traits::IssueUpdates {
            title: Some("B updated".into()),
            ..Default::default()
        };
        store.update_issue("bd-bbb", &updates, "alice").unwrap();

        export(&store, &path, &ExportOptions::default()).unwrap();
        let after = std::fs::read_to_string(&path).unwrap();
        assert!(after.lines().any(|l| l == a_line_before));
        assert!(after.contains("B updated"));
    }

    #[test]
    fn ephemeral_issues_are_never_exported() {
        let store = SqliteStore::open_in_memory().unwrap();
        let wisp = IssueBuilder::new("Transient")
            .id("bd-wisp-1")
            .ephemeral(true)
            .build();
        store.create_issue(&wisp, "alice").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        let report = export(&store, &path, &ExportOptions::default()).unwrap();
        assert!(report.skipped.contains(&"bd-wisp-1".to_string()));
        assert!(!path.exists() || !std::fs::read_to_string(&path).unwrap().contains("bd-wisp-1"));
    }

    #[test]
    fn write_manifest_emits_sibling_file() {
        let store = store_with_issue("bd-exp3", "Manifested");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        let options = ExportOptions {
            write_manifest: true,
            ..ExportOptions::default()
        };
        export(&store, &path, &options).unwrap();

        let manifest_path = dir.path().join("issues.jsonl.manifest.json");
        assert!(manifest_path.exists());
        let body = std::fs::read_to_string(&manifest_path).unwrap();
        assert!(body.contains("line_count"));
    }
}
