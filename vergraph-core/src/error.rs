//! Error types for the versioning engine.
//!
//! Protocol violations (freezing with conflicts, foreign parents, applying
//! on top of an unrelated version) and integrity failures (content-id
//! mismatch, missing parents) are surfaced as typed errors. Field conflicts
//! are not errors; they are returned as values from merge.

use crate::value::{ChangeId, ObjectId};

/// Result type for versioning operations
pub type Result<T> = std::result::Result<T, VersionError>;

/// Errors that can occur in the versioning engine
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("change has {0} unresolved conflicts")]
    UnresolvedConflicts(usize),

    #[error("parent change belongs to a different target: expected {expected}, found {found}")]
    ForeignParent { expected: ObjectId, found: ObjectId },

    #[error("applying on top of unrelated change (parent {parent:?}, current version {version:?})")]
    UnrelatedVersion {
        parent: Option<ChangeId>,
        version: Option<ChangeId>,
    },

    #[error("unknown change {0}")]
    UnknownChange(ChangeId),

    #[error("missing parent change {0}")]
    MissingParent(ChangeId),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("value and set changes cannot be combined for one field")]
    FieldKindMismatch,

    #[error("content id mismatch: declared {declared}, computed {computed}")]
    IdentityMismatch {
        declared: ChangeId,
        computed: ChangeId,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("parent chain depth limit exceeded for {0}")]
    CyclicHistory(ObjectId),
}
