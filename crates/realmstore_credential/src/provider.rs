//! Credential providers and their capability sets.
//!
//! Local providers and authoritative external stores implement the same
//! [`CredentialProvider`] trait. What a provider can do is declared up front
//! as a [`ProviderCapabilities`] set; the chain dispatches on set
//! membership and never calls an operation outside the declared set.

use crate::error::{CredentialError, CredentialResult};
use crate::model::{AuthenticationOutcome, CredentialInput, Identity, Realm, StoredCredential};
use std::fmt;

/// One thing a credential provider can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderCapability {
    /// Check a presented credential for a known identity.
    Validate,
    /// Set, replace or disable credentials.
    Update,
    /// Identify an identity from a credential alone.
    Authenticate,
}

impl ProviderCapability {
    const fn bit(self) -> u8 {
        match self {
            ProviderCapability::Validate => 1 << 0,
            ProviderCapability::Update => 1 << 1,
            ProviderCapability::Authenticate => 1 << 2,
        }
    }
}

/// A set of [`ProviderCapability`] values.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderCapabilities(u8);

impl ProviderCapabilities {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Adds `capability` to the set.
    #[must_use]
    pub const fn with(self, capability: ProviderCapability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Returns true if `capability` is in the set.
    #[must_use]
    pub const fn contains(self, capability: ProviderCapability) -> bool {
        self.0 & capability.bit() != 0
    }
}

impl fmt::Debug for ProviderCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let all = [
            ProviderCapability::Validate,
            ProviderCapability::Update,
            ProviderCapability::Authenticate,
        ];
        f.debug_set()
            .entries(all.iter().filter(|c| self.contains(**c)))
            .finish()
    }
}

/// A source of credential checks and updates.
///
/// Only `id`, `capabilities` and `supports_credential_type` are required.
/// The remaining operations default to declining, and are only invoked when
/// the matching capability is declared.
pub trait CredentialProvider: Send + Sync {
    /// Provider id, unique within a registry.
    fn id(&self) -> &str;

    /// Declared capabilities.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Returns true if the provider handles `credential_type`.
    fn supports_credential_type(&self, credential_type: &str) -> bool;

    /// Checks `input` for `identity`. Requires [`ProviderCapability::Validate`].
    fn is_valid(
        &self,
        _realm: &Realm,
        _identity: &Identity,
        _input: &CredentialInput,
    ) -> CredentialResult<bool> {
        Ok(false)
    }

    /// Returns true if `identity` has a credential of `credential_type`.
    /// Requires [`ProviderCapability::Validate`].
    fn is_configured_for(
        &self,
        _realm: &Realm,
        _identity: &Identity,
        _credential_type: &str,
    ) -> CredentialResult<bool> {
        Ok(false)
    }

    /// Sets the credential described by `input`. Returns false if the
    /// provider declined. Requires [`ProviderCapability::Update`].
    fn update_credential(
        &self,
        _realm: &Realm,
        _identity: &Identity,
        _input: &CredentialInput,
    ) -> CredentialResult<bool> {
        Ok(false)
    }

    /// Disables every credential of `credential_type` for `identity`.
    /// Requires [`ProviderCapability::Update`].
    fn disable_credential_type(
        &self,
        _realm: &Realm,
        _identity: &Identity,
        _credential_type: &str,
    ) -> CredentialResult<()> {
        Ok(())
    }

    /// Credential types this provider could disable for `identity`.
    /// Requires [`ProviderCapability::Update`].
    fn disableable_credential_types(
        &self,
        _realm: &Realm,
        _identity: &Identity,
    ) -> CredentialResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Authenticates `input` without a known identity. Returns `None` if the
    /// provider does not handle the input's type. Requires
    /// [`ProviderCapability::Authenticate`].
    fn authenticate(
        &self,
        _realm: &Realm,
        _input: &CredentialInput,
    ) -> CredentialResult<Option<AuthenticationOutcome>> {
        Ok(None)
    }

    /// Type of credential this provider creates, if it creates any.
    fn created_type(&self) -> Option<&str> {
        None
    }

    /// Creates `credential` for `identity` in the provider's own format.
    fn create_credential(
        &self,
        _realm: &Realm,
        _identity: &Identity,
        credential: StoredCredential,
    ) -> CredentialResult<StoredCredential> {
        Err(CredentialError::unsupported_type(credential.credential_type))
    }
}

impl fmt::Debug for dyn CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("id", &self.id())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
