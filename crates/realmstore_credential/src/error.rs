//! Error types for the credential chain.

use realmstore_core::{CoreError, EntityId};
use thiserror::Error;

/// Result type for credential operations.
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Structural credential errors.
///
/// A credential that simply does not validate is not an error: validation
/// calls return `false`.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No provider handles the credential type.
    #[error("unsupported credential type: {credential_type}")]
    UnsupportedType {
        /// The credential type.
        credential_type: String,
    },

    /// The credential store cannot serve credentials.
    #[error("misconfigured credential store: {message}")]
    MisconfiguredStore {
        /// Description of the problem.
        message: String,
    },

    /// Credentials cannot be managed for the identity.
    #[error("invalid identity '{identity}': {reason}")]
    InvalidIdentity {
        /// Identity id.
        identity: String,
        /// Why the identity was rejected.
        reason: String,
    },

    /// No stored credential with the id belongs to the identity.
    #[error("credential {id} not found")]
    UnknownCredential {
        /// Credential id.
        id: EntityId,
    },

    /// A password could not be hashed.
    #[error("password hashing failed: {message}")]
    Hashing {
        /// Description of the problem.
        message: String,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),
}

impl CredentialError {
    /// Creates an unsupported type error.
    pub fn unsupported_type(credential_type: impl Into<String>) -> Self {
        Self::UnsupportedType {
            credential_type: credential_type.into(),
        }
    }

    /// Creates a misconfigured store error.
    pub fn misconfigured_store(message: impl Into<String>) -> Self {
        Self::MisconfiguredStore {
            message: message.into(),
        }
    }

    /// Creates a hashing error.
    pub fn hashing(message: impl Into<String>) -> Self {
        Self::Hashing {
            message: message.into(),
        }
    }

    /// Creates an invalid identity error.
    pub fn invalid_identity(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            identity: identity.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_convert() {
        let err: CredentialError = CoreError::AlreadyActive.into();
        assert!(matches!(err, CredentialError::Storage(_)));
        assert_eq!(err.to_string(), "storage error: transaction already active");
    }

    #[test]
    fn invalid_identity_message() {
        let err = CredentialError::invalid_identity("u1", "service account");
        assert_eq!(err.to_string(), "invalid identity 'u1': service account");
    }
}
