//! Storage error types.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g., "issue", "config").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A partial ID matched more than one issue.
    #[error("ambiguous ID `{query}`: matches {}", candidates.join(", "))]
    AmbiguousId {
        /// The partial ID that was queried.
        query: String,
        /// The full IDs it could refer to.
        candidates: Vec<String>,
    },

    /// An ID did not parse into a recognizable shape (prefix-hash or hierarchical).
    #[error("invalid ID: {0}")]
    InvalidId(String),

    /// A field-level validation constraint was violated.
    #[error("validation error on `{field}`: {reason}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Description of the validation failure.
        reason: String,
    },

    /// Adding a dependency would create a cycle in the dependency graph.
    #[error("adding this dependency would create a cycle")]
    CycleDetected,

    /// An operation conflicts with existing state (duplicate external ref, merge conflict marker, etc).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An issue cannot be closed because it has unresolved blockers.
    #[error("blocked by: {}", blockers.join(", "))]
    Blocked {
        /// The issue IDs currently blocking the operation.
        blockers: Vec<String>,
    },

    /// The database has not been initialized.
    #[error("database not initialized: {reason}")]
    NotInitialized {
        /// Why the database is considered uninitialized.
        reason: String,
    },

    /// An issue ID does not match the configured prefix.
    #[error("issue {id} does not match configured prefix {prefix}")]
    PrefixMismatch {
        /// The issue ID.
        id: String,
        /// The expected prefix.
        prefix: String,
    },

    /// The database is locked by another process or writer.
    #[error("database locked: {0}")]
    Locked(String),

    /// An in-flight operation was cancelled via its deadline/cancellation token.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Failed to establish or maintain a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction operation failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A schema migration failed.
    #[error("migration {name} failed: {reason}")]
    Migration {
        /// Name of the migration that failed.
        name: String,
        /// Underlying error description.
        reason: String,
    },

    /// A raw SQLite query error.
    #[error("query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An underlying I/O operation failed (export/import file handling).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSONL stream failed to parse at a specific line.
    #[error("parse error at line {line}: {reason}")]
    ParseError {
        /// 1-based line number in the JSONL stream.
        line: usize,
        /// Description of the parse failure.
        reason: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StorageError::NotFound`] for the given entity kind and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::Validation`] for the given field and reason.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry (e.g., database locked, connection errors).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Locked(_) | Self::Connection(_) | Self::Transaction(_)
        )
    }

    /// Maps the error to the CLI shell's exit-code convention.
    ///
    /// The engine only exposes this classification; interpreting it into a
    /// process exit status is the CLI shell's responsibility.
    pub fn as_exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 3,
            Self::Validation { .. }
            | Self::InvalidId(_)
            | Self::AmbiguousId { .. }
            | Self::PrefixMismatch { .. } => 4,
            Self::Query(_)
            | Self::Connection(_)
            | Self::Transaction(_)
            | Self::Migration { .. }
            | Self::NotInitialized { .. }
            | Self::Locked(_) => 5,
            Self::CycleDetected => 6,
            Self::Conflict(_) | Self::Blocked { .. } => 7,
            _ => 1,
        }
    }
}
