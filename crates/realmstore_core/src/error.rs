//! Error types for RealmStore core.

use crate::criteria::Operator;
use crate::entity::EntityId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in RealmStore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Side-document codec error.
    #[error("codec error: {0}")]
    Codec(#[from] realmstore_codec::CodecError),

    /// A criteria literal does not match the field's declared type.
    #[error("type mismatch on field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        /// Field the literal was supplied for.
        field: String,
        /// Declared semantic type (or arity requirement).
        expected: String,
        /// What was actually supplied.
        found: String,
    },

    /// The field/operator combination cannot be expressed.
    #[error("criterion not supported: field '{field}' with operator {operator}")]
    UnsupportedCriterion {
        /// The offending field.
        field: String,
        /// The offending operator.
        operator: Operator,
    },

    /// A string could not be parsed as an entity identifier.
    #[error("malformed identifier: '{value}'")]
    MalformedIdentifier {
        /// The rejected input.
        value: String,
    },

    /// Staged writes were based on stale versions.
    #[error("optimistic lock conflict in {kind} on {}", display_ids(.ids))]
    OptimisticLockConflict {
        /// Entity kind of the transaction.
        kind: String,
        /// Every entity whose backing version moved.
        ids: Vec<EntityId>,
    },

    /// The backend connection or transport failed.
    #[error("backend '{backend}' unavailable: {message}")]
    BackendUnavailable {
        /// Backend name.
        backend: String,
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid prior state: {message}")]
    InvalidPriorState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// `begin()` was called on an active transaction.
    #[error("transaction already active")]
    AlreadyActive,

    /// No schema is registered for the kind.
    #[error("unknown entity kind: {kind}")]
    UnknownKind {
        /// The requested kind.
        kind: String,
    },

    /// The field or field group is not declared by the kind.
    #[error("unknown field '{field}' for kind {kind}")]
    UnknownField {
        /// Entity kind.
        kind: String,
        /// Requested field or group.
        field: String,
    },

    /// Waiting for a row lock held by another transaction timed out.
    #[error("timed out waiting for row lock on {id}")]
    LockTimeout {
        /// The locked entity.
        id: EntityId,
    },
}

fn display_ids(ids: &[EntityId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl CoreError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates an unsupported criterion error.
    pub fn unsupported_criterion(field: impl Into<String>, operator: Operator) -> Self {
        Self::UnsupportedCriterion {
            field: field.into(),
            operator,
        }
    }

    /// Creates a backend unavailable error.
    pub fn backend_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid prior state error.
    pub fn invalid_prior_state(message: impl Into<String>) -> Self {
        Self::InvalidPriorState {
            message: message.into(),
        }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            kind: kind.into(),
            field: field.into(),
        }
    }

    /// Returns true if the caller may retry the whole transaction.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OptimisticLockConflict { .. } | Self::LockTimeout { .. }
        )
    }

    /// Returns true if the error ends the transaction that produced it.
    #[must_use]
    pub fn is_transaction_fatal(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_lists_every_id() {
        let a = EntityId::from_bytes([1; 16]);
        let b = EntityId::from_bytes([2; 16]);
        let err = CoreError::OptimisticLockConflict {
            kind: "user-session".into(),
            ids: vec![a, b],
        };
        let msg = err.to_string();
        assert!(msg.contains(&a.to_string()));
        assert!(msg.contains(&b.to_string()));
        assert!(err.is_retryable());
    }

    #[test]
    fn unsupported_criterion_names_field_and_operator() {
        let err = CoreError::unsupported_criterion("user_id", Operator::Gt);
        assert_eq!(
            err.to_string(),
            "criterion not supported: field 'user_id' with operator GT"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn backend_unavailable_is_fatal() {
        assert!(CoreError::backend_unavailable("relational", "down").is_transaction_fatal());
        assert!(!CoreError::AlreadyActive.is_transaction_fatal());
    }
}
