//! Issue struct -- the central domain model for the beads system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::enums::{IssueType, Status};

/// Helper for `skip_serializing_if` on `bool` fields.
fn is_false(b: &bool) -> bool {
    !b
}

/// Helper for `skip_serializing_if` on `i32` fields (priority: 0 is valid, never skip).
fn is_zero_priority(_p: &i32) -> bool {
    false
}

/// Helper for `skip_serializing_if` on `Vec` fields.
fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

/// Represents a trackable work item.
///
/// Fields are organised into logical groups for maintainability. The shape here
/// matches the export stream of `.beads/issues.jsonl`: `content_hash` and the
/// internal routing fields are never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    // ===== Core Identification =====
    #[serde(default)]
    pub id: String,

    /// Internal: SHA256 of canonical content -- NOT exported to JSONL.
    #[serde(skip)]
    pub content_hash: String,

    // ===== Issue Content =====
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub design: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    // ===== Status & Workflow =====
    #[serde(default, skip_serializing_if = "Status::is_default")]
    pub status: Status,

    /// Priority 0-4. No skip: 0 is valid (P0/critical).
    #[serde(default, skip_serializing_if = "is_zero_priority")]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "IssueType::is_default")]
    pub issue_type: IssueType,

    // ===== Assignment =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    /// Human owner for CV attribution (git author email).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i32>,

    // ===== Timestamps =====
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub close_reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub closed_by_session: String,

    // ===== Soft-delete / tombstone metadata =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deleted_by: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub delete_reason: String,

    /// The status this issue held immediately before being tombstoned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<IssueType>,

    // ===== Time-Based Scheduling =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<DateTime<Utc>>,

    // ===== External Integration =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_system: String,

    // ===== Custom Metadata =====
    /// Arbitrary JSON data for extension points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Box<serde_json::value::RawValue>>,

    // ===== Internal Routing (not exported to JSONL) =====
    /// Which repo owns this issue (multi-repo support). Out of the core engine's
    /// scope but retained as a routing hint for embedding CLIs.
    #[serde(skip)]
    pub source_repo: String,

    // ===== Relational Data (populated for export/import) =====
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub dependencies: Vec<Dependency>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub comments: Vec<crate::comment::Comment>,

    // ===== Messaging / Ephemeral Fields =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sender: String,

    /// Transient issues are never exported. Typically carries the `-wisp-` infix
    /// in their ID, but the flag itself is authoritative.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    // ===== Context Markers =====
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_template: bool,
}

impl Default for Issue {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            content_hash: String::new(),
            title: String::new(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            notes: String::new(),
            status: Status::Open,
            priority: 0,
            issue_type: IssueType::Task,
            assignee: String::new(),
            owner: String::new(),
            estimated_minutes: None,
            created_at: now,
            created_by: String::new(),
            updated_at: now,
            closed_at: None,
            close_reason: String::new(),
            closed_by_session: String::new(),
            deleted_at: None,
            deleted_by: String::new(),
            delete_reason: String::new(),
            original_type: None,
            due_at: None,
            defer_until: None,
            external_ref: None,
            source_system: String::new(),
            metadata: None,
            source_repo: String::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
            comments: Vec::new(),
            sender: String::new(),
            ephemeral: false,
            pinned: false,
            is_template: false,
        }
    }
}

impl Issue {
    /// Applies default values for fields omitted during JSONL import.
    ///
    /// - Status defaults to Open if empty
    /// - IssueType defaults to Task if empty
    pub fn set_defaults(&mut self) {
        if self.status == Status::Custom(String::new()) || self.status.as_str().is_empty() {
            self.status = Status::Open;
        }
        if self.issue_type == IssueType::Custom(String::new())
            || self.issue_type.as_str().is_empty()
        {
            self.issue_type = IssueType::Task;
        }
    }

    /// Returns `true` if this issue has been soft-deleted (tombstoned).
    pub fn is_tombstoned(&self) -> bool {
        self.status == Status::Tombstone
    }

    /// Transitions this issue into a tombstone, preserving its prior type.
    ///
    /// Does not touch dependencies, labels, or comments -- those remain for
    /// audit per the lifecycle rules in the data model.
    pub fn tombstone(&mut self, deleted_by: impl Into<String>, reason: impl Into<String>) {
        self.original_type = Some(self.issue_type.clone());
        self.status = Status::Tombstone;
        self.deleted_at = Some(Utc::now());
        self.deleted_by = deleted_by.into();
        self.delete_reason = reason.into();
    }
}

/// Builder for constructing an [`Issue`] with a fluent API.
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    /// Creates a new builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        let mut issue = Issue::default();
        issue.title = title.into();
        Self { issue }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.issue.id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.issue.description = description.into();
        self
    }

    pub fn design(mut self, design: impl Into<String>) -> Self {
        self.issue.design = design.into();
        self
    }

    pub fn acceptance_criteria(mut self, ac: impl Into<String>) -> Self {
        self.issue.acceptance_criteria = ac.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.issue.notes = notes.into();
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.issue.status = status;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.issue.priority = priority;
        self
    }

    pub fn issue_type(mut self, issue_type: IssueType) -> Self {
        self.issue.issue_type = issue_type;
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.issue.assignee = assignee.into();
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.issue.owner = owner.into();
        self
    }

    pub fn estimated_minutes(mut self, minutes: i32) -> Self {
        self.issue.estimated_minutes = Some(minutes);
        self
    }

    pub fn created_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.created_at = t;
        self
    }

    pub fn created_by(mut self, by: impl Into<String>) -> Self {
        self.issue.created_by = by.into();
        self
    }

    pub fn updated_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.updated_at = t;
        self
    }

    pub fn closed_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.closed_at = Some(t);
        self
    }

    pub fn close_reason(mut self, reason: impl Into<String>) -> Self {
        self.issue.close_reason = reason.into();
        self
    }

    pub fn due_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.due_at = Some(t);
        self
    }

    pub fn defer_until(mut self, t: DateTime<Utc>) -> Self {
        self.issue.defer_until = Some(t);
        self
    }

    pub fn external_ref(mut self, ext: impl Into<String>) -> Self {
        self.issue.external_ref = Some(ext.into());
        self
    }

    pub fn source_system(mut self, sys: impl Into<String>) -> Self {
        self.issue.source_system = sys.into();
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.issue.labels = labels;
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.issue.pinned = pinned;
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.issue.ephemeral = ephemeral;
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.issue.sender = sender.into();
        self
    }

    pub fn is_template(mut self, is_template: bool) -> Self {
        self.issue.is_template = is_template;
        self
    }

    /// Consumes the builder and returns the constructed [`Issue`].
    pub fn build(self) -> Issue {
        self.issue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_issue() {
        let issue = Issue::default();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.issue_type, IssueType::Task);
        assert_eq!(issue.priority, 0);
    }

    #[test]
    fn builder_basic() {
        let issue = IssueBuilder::new("Fix the bug")
            .priority(2)
            .status(Status::InProgress)
            .issue_type(IssueType::Bug)
            .assignee("alice")
            .build();

        assert_eq!(issue.title, "Fix the bug");
        assert_eq!(issue.priority, 2);
        assert_eq!(issue.status, Status::InProgress);
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert_eq!(issue.assignee, "alice");
    }

    #[test]
    fn issue_serde_roundtrip() {
        let issue = IssueBuilder::new("Test issue")
            .id("bd-abc123")
            .priority(1)
            .description("A test description")
            .build();

        let json = serde_json::to_string(&issue).unwrap();
        let back: Issue = serde_json::from_str(&json).unwrap();

        assert_eq!(back.title, "Test issue");
        assert_eq!(back.id, "bd-abc123");
        assert_eq!(back.priority, 1);
        assert_eq!(back.description, "A test description");
    }

    #[test]
    fn issue_set_defaults() {
        let json = r#"{"title": "hello"}"#;
        let mut issue: Issue = serde_json::from_str(json).unwrap();
        // After deserialization of empty enum, they will be Custom("") -- set_defaults fixes this
        issue.set_defaults();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.issue_type, IssueType::Task);
    }

    #[test]
    fn issue_tombstone() {
        let mut issue = IssueBuilder::new("Delete me")
            .issue_type(IssueType::Bug)
            .build();
        assert!(!issue.is_tombstoned());

        issue.tombstone("alice", "duplicate");

        assert!(issue.is_tombstoned());
        assert_eq!(issue.status, Status::Tombstone);
        assert!(issue.deleted_at.is_some());
        assert_eq!(issue.deleted_by, "alice");
        assert_eq!(issue.delete_reason, "duplicate");
        assert_eq!(issue.original_type, Some(IssueType::Bug));
    }
}
