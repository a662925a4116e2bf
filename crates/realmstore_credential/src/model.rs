//! Realms, identities, credential inputs and stored credentials.

use realmstore_core::{Document, EntityId};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The realm a credential operation runs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Realm {
    id: String,
}

impl Realm {
    /// Creates a realm reference.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Realm id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// An identity whose credentials are managed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: String,
    federation_link: Option<String>,
    service_account_client: Option<String>,
}

impl Identity {
    /// A locally stored identity.
    pub fn local(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            federation_link: None,
            service_account_client: None,
        }
    }

    /// Links the identity to an authoritative external store.
    #[must_use]
    pub fn federated(mut self, store_id: impl Into<String>) -> Self {
        self.federation_link = Some(store_id.into());
        self
    }

    /// Marks the identity as the service account of a client.
    #[must_use]
    pub fn service_account(mut self, client_id: impl Into<String>) -> Self {
        self.service_account_client = Some(client_id.into());
        self
    }

    /// Identity id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the external store the identity is linked to.
    #[must_use]
    pub fn federation_link(&self) -> Option<&str> {
        self.federation_link.as_deref()
    }

    /// Returns true for client service accounts.
    #[must_use]
    pub fn is_service_account(&self) -> bool {
        self.service_account_client.is_some()
    }
}

/// A credential presented for validation or update.
///
/// The secret is zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CredentialInput {
    credential_type: String,
    secret: String,
}

impl CredentialInput {
    /// Creates an input of `credential_type` carrying `secret`.
    pub fn new(credential_type: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            credential_type: credential_type.into(),
            secret: secret.into(),
        }
    }

    /// A password input.
    pub fn password(secret: impl Into<String>) -> Self {
        Self::new(crate::password::PASSWORD, secret)
    }

    /// Credential type.
    #[must_use]
    pub fn credential_type(&self) -> &str {
        &self.credential_type
    }

    /// The secret.
    ///
    /// # Security
    ///
    /// Do not log or persist the result.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInput")
            .field("credential_type", &self.credential_type)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// A credential as persisted by a credential store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredCredential {
    /// Credential id.
    pub id: EntityId,
    /// Owning identity.
    pub user_id: String,
    /// Credential type.
    pub credential_type: String,
    /// Label chosen by the user.
    pub user_label: Option<String>,
    /// Creation time, milliseconds since the epoch.
    pub created_date: i64,
    /// Position among the identity's credentials; lower comes first.
    pub priority: i64,
    /// Public parameters, such as the hash algorithm.
    pub credential_data: Document,
    /// Secret material, such as the salted hash.
    pub secret_data: Document,
}

impl StoredCredential {
    /// A new credential with a fresh id and no data.
    pub fn new(user_id: impl Into<String>, credential_type: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            user_id: user_id.into(),
            credential_type: credential_type.into(),
            user_label: None,
            created_date: 0,
            priority: 0,
            credential_data: Document::new(),
            secret_data: Document::new(),
        }
    }

    /// Sets the user label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.user_label = Some(label.into());
        self
    }
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("credential_type", &self.credential_type)
            .field("user_label", &self.user_label)
            .field("priority", &self.priority)
            .field("credential_data", &self.credential_data)
            .finish_non_exhaustive()
    }
}

/// Result of authenticating a credential without a known identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    /// The credential identified this identity.
    Authenticated {
        /// The authenticated identity.
        identity_id: String,
    },
    /// The credential was rejected.
    Failed,
    /// More exchanges are needed; carries the state to send back.
    Continue {
        /// Opaque continuation state.
        state: Document,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_debug_redacts_secret() {
        let input = CredentialInput::password("hunter2");
        let printed = format!("{input:?}");
        assert!(printed.contains("password"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn stored_debug_hides_secret_data() {
        let mut cred = StoredCredential::new("u1", "password");
        cred.secret_data.insert("value", "hash-bytes");
        assert!(!format!("{cred:?}").contains("hash-bytes"));
    }

    #[test]
    fn identity_builders() {
        let identity = Identity::local("u1").federated("ldap");
        assert_eq!(identity.federation_link(), Some("ldap"));
        assert!(!identity.is_service_account());
        assert!(Identity::local("svc").service_account("c1").is_service_account());
    }
}
