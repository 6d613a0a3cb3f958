//! Deterministic content hashing for issues.
//!
//! Produces a SHA-256 hex digest over all substantive content fields --
//! excluding ID, the hash itself, all timestamps, and routing metadata -- so
//! that identical content produces identical hashes across every workspace
//! that agrees on it.

use sha2::{Digest, Sha256};

use crate::issue::Issue;

/// Separator byte written between fields.
const SEP: u8 = 0;

/// Computes a deterministic content hash for an issue.
///
/// Field order is fixed: core content, classification, assignment, external
/// linkage, close/delete metadata, flags, labels (sorted), dependencies
/// (sorted). Excluded: ID, content hash, all timestamps, compaction/routing
/// metadata.
pub fn compute_content_hash(issue: &Issue) -> String {
    let mut h = Sha256::new();

    // Core content fields in stable order.
    write_str(&mut h, &issue.title);
    write_str(&mut h, &issue.description);
    write_str(&mut h, &issue.design);
    write_str(&mut h, &issue.acceptance_criteria);
    write_str(&mut h, &issue.notes);

    // Classification.
    write_str(&mut h, issue.status.as_str());
    write_int(&mut h, issue.priority);
    write_str(&mut h, issue.issue_type.as_str());

    // Assignment fields.
    write_str(&mut h, &issue.assignee);
    write_str(&mut h, &issue.owner);
    write_str(&mut h, &issue.created_by);
    write_int(&mut h, issue.estimated_minutes.unwrap_or(0));

    // External linkage.
    write_str_opt(&mut h, issue.external_ref.as_deref());
    write_str(&mut h, &issue.source_system);

    // Close / delete fields.
    write_str(&mut h, &issue.close_reason);
    write_str(&mut h, &issue.closed_by_session);
    write_str(&mut h, &issue.deleted_by);
    write_str(&mut h, &issue.delete_reason);
    write_str_opt(
        &mut h,
        issue.original_type.as_ref().map(|t| t.as_str()),
    );

    // Custom metadata.
    if let Some(ref meta) = issue.metadata {
        write_str(&mut h, meta.get());
    } else {
        h.update([SEP]);
    }

    // Flags, encoded as zero-length markers when set.
    write_flag(&mut h, issue.pinned, "pinned");
    write_flag(&mut h, issue.is_template, "template");
    write_flag(&mut h, issue.ephemeral, "ephemeral");

    // Labels, sorted lexicographically.
    let mut labels: Vec<&str> = issue.labels.iter().map(String::as_str).collect();
    labels.sort_unstable();
    for label in labels {
        write_str(&mut h, label);
    }

    // Dependencies, each rendered `depends_on_id:type:metadata`, then sorted.
    let mut dep_lines: Vec<String> = issue
        .dependencies
        .iter()
        .map(|d| format!("{}:{}:{}", d.depends_on_id, d.dep_type.as_str(), d.metadata))
        .collect();
    dep_lines.sort_unstable();
    for line in dep_lines {
        write_str(&mut h, &line);
    }

    format!("{:x}", h.finalize())
}

// -- helper writers --------------------------------------------------------

fn write_str(h: &mut Sha256, s: &str) {
    h.update(s.as_bytes());
    h.update([SEP]);
}

fn write_int(h: &mut Sha256, n: i32) {
    h.update(n.to_string().as_bytes());
    h.update([SEP]);
}

fn write_str_opt(h: &mut Sha256, s: Option<&str>) {
    if let Some(s) = s {
        h.update(s.as_bytes());
    }
    h.update([SEP]);
}

fn write_flag(h: &mut Sha256, b: bool, label: &str) {
    if b {
        h.update(label.as_bytes());
    }
    h.update([SEP]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::Dependency;
    use crate::enums::DependencyType;
    use crate::issue::IssueBuilder;

    #[test]
    fn content_hash_deterministic() {
        let issue = IssueBuilder::new("Test issue")
            .description("A description")
            .priority(2)
            .build();

        let hash1 = compute_content_hash(&issue);
        let hash2 = compute_content_hash(&issue);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 hex = 64 chars
    }

    #[test]
    fn content_hash_differs_on_change() {
        let issue1 = IssueBuilder::new("Title A").build();
        let issue2 = IssueBuilder::new("Title B").build();
        assert_ne!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_ignores_id_and_timestamps() {
        let mut issue1 = IssueBuilder::new("Same content").build();
        let mut issue2 = IssueBuilder::new("Same content").build();

        issue1.id = "bd-aaa".into();
        issue2.id = "bd-bbb".into();
        issue1.created_at = chrono::Utc::now();
        issue2.created_at = chrono::DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);

        assert_eq!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_ignores_label_order() {
        let mut issue1 = IssueBuilder::new("Labeled").build();
        let mut issue2 = IssueBuilder::new("Labeled").build();
        issue1.labels = vec!["bug".into(), "urgent".into()];
        issue2.labels = vec!["urgent".into(), "bug".into()];

        assert_eq!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_changes_with_labels() {
        let mut issue1 = IssueBuilder::new("Labeled").build();
        let mut issue2 = IssueBuilder::new("Labeled").build();
        issue1.labels = vec!["bug".into()];
        issue2.labels = vec![];

        assert_ne!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }

    #[test]
    fn content_hash_ignores_dependency_order() {
        let mut issue1 = IssueBuilder::new("Depends").build();
        let mut issue2 = IssueBuilder::new("Depends").build();
        let dep_a = Dependency {
            issue_id: "bd-x".into(),
            depends_on_id: "bd-a".into(),
            dep_type: DependencyType::Blocks,
            created_at: chrono::Utc::now(),
            created_by: "alice".into(),
            metadata: String::new(),
            thread_id: String::new(),
        };
        let dep_b = Dependency {
            depends_on_id: "bd-b".into(),
            ..dep_a.clone()
        };
        issue1.dependencies = vec![dep_a.clone(), dep_b.clone()];
        issue2.dependencies = vec![dep_b, dep_a];

        assert_eq!(compute_content_hash(&issue1), compute_content_hash(&issue2));
    }
}
