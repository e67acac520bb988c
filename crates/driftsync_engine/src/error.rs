//! Error types for the commit core.

use driftsync_model::{Entity, EntityKey, Value};
use thiserror::Error;

/// Result type for commit operations.
pub type CommitResult<T> = Result<T, CommitError>;

/// Errors surfaced through an operation's completion signal.
///
/// Structural invariant violations (an embedded entity with no
/// locatable parent operation, a populated relationship slot with no
/// descriptor, a cyclic commit graph) are programming errors and panic
/// instead of appearing here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommitError {
    /// The server rejected the commit with field-level error detail.
    ///
    /// `entity` carries the last-confirmed shadow state when the
    /// adapter produced no richer payload, so a half-applied local
    /// entity is never surfaced as if it were canonical.
    #[error("validation failed for {key}: {message}", key = .entity.key())]
    Validation {
        /// The entity state to report: the server's error payload, or
        /// the shadow when none was supplied.
        entity: Entity,
        /// Human-readable failure message.
        message: String,
        /// Server-reported error detail tied to specific fields.
        detail: Option<Value>,
    },

    /// The adapter rejected the commit of an entity with no
    /// confirmation baseline (a new entity has no shadow to report).
    #[error("commit rejected: {message}")]
    Rejected {
        /// Human-readable failure message.
        message: String,
        /// Server-reported error detail, if any.
        detail: Option<Value>,
    },

    /// A depended-upon operation failed; no remote call was attempted.
    #[error("dependency {failed} failed")]
    DependencyFailure {
        /// Key of the failed dependency's entity.
        failed: EntityKey,
    },
}

impl CommitError {
    /// Returns true for dependency-failure propagation.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, CommitError::DependencyFailure { .. })
    }

    /// The entity state reported with the failure, if any.
    pub fn reported_entity(&self) -> Option<&Entity> {
        match self {
            CommitError::Validation { entity, .. } => Some(entity),
            _ => None,
        }
    }

    /// The server-reported error detail, if any.
    pub fn detail(&self) -> Option<&Value> {
        match self {
            CommitError::Validation { detail, .. } => detail.as_ref(),
            CommitError::Rejected { detail, .. } => detail.as_ref(),
            CommitError::DependencyFailure { .. } => None,
        }
    }
}
