//! Per-identity credential management.
//!
//! [`ChainedCredentialManager`] consults validators in a fixed order:
//!
//! 1. the authoritative external store the identity is linked to, if the
//!    link is enabled (a disabled link fails validation outright),
//! 2. the storage-scoped [`ValidationStrategy`],
//! 3. the registered credential providers.
//!
//! Each accepted input is removed from the pending set; validation
//! succeeds only if nothing is left.

use crate::error::{CredentialError, CredentialResult};
use crate::model::{CredentialInput, Identity, Realm, StoredCredential};
use crate::provider::{CredentialProvider, ProviderCapability};
use crate::registry::{CredentialRegistry, FederationState};
use crate::store::CredentialStore;
use crate::strategy::ValidationStrategy;
use realmstore_core::EntityId;
use std::fmt;
use std::sync::Arc;

/// Credential operations for a single identity.
pub trait CredentialManager {
    /// Returns true if every input validates.
    ///
    /// # Errors
    ///
    /// Returns a structural or storage error.
    fn is_valid(&self, inputs: &[CredentialInput]) -> CredentialResult<bool>;

    /// Sets a credential. Returns false if no validator accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::InvalidIdentity`] for service accounts.
    fn update_credential(&self, input: &CredentialInput) -> CredentialResult<bool>;

    /// Replaces a stored credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::UnknownCredential`] if it is not stored.
    fn update_stored_credential(&self, credential: &StoredCredential) -> CredentialResult<()>;

    /// Stores a new credential.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn create_stored_credential(&self, credential: StoredCredential) -> CredentialResult<StoredCredential>;

    /// Removes a stored credential. Returns false if it was not stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn remove_stored_credential_by_id(&self, id: EntityId) -> CredentialResult<bool>;

    /// Looks up a stored credential.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn stored_credential_by_id(&self, id: EntityId) -> CredentialResult<Option<StoredCredential>>;

    /// Every stored credential, by priority.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn stored_credentials(&self) -> CredentialResult<Vec<StoredCredential>>;

    /// Stored credentials of one type, by priority.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn stored_credentials_by_type(&self, credential_type: &str) -> CredentialResult<Vec<StoredCredential>>;

    /// The stored credential with the given label and type.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn stored_credential_by_name_and_type(
        &self,
        name: &str,
        credential_type: &str,
    ) -> CredentialResult<Option<StoredCredential>>;

    /// Moves a credential directly after `new_previous`, or first when
    /// `None`. Returns false if either credential is not stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    fn move_stored_credential_to(&self, id: EntityId, new_previous: Option<EntityId>) -> CredentialResult<bool>;

    /// Sets the user label of a stored credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::UnknownCredential`] if it is not stored.
    fn update_credential_label(&self, id: EntityId, label: &str) -> CredentialResult<()>;

    /// Disables every credential of `credential_type`.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    fn disable_credential_type(&self, credential_type: &str) -> CredentialResult<()>;

    /// Credential types that could be disabled, without duplicates.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    fn disableable_credential_types(&self) -> CredentialResult<Vec<String>>;

    /// Returns true if a credential of `credential_type` is set up.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    fn is_configured_for(&self, credential_type: &str) -> CredentialResult<bool>;

    /// Returns true if a local provider has a credential of
    /// `credential_type` set up.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    fn is_configured_locally(&self, credential_type: &str) -> CredentialResult<bool>;

    /// Provider credential types configured through the external store.
    ///
    /// # Errors
    ///
    /// Returns a provider error.
    fn configured_federated_credential_types(&self) -> CredentialResult<Vec<String>>;

    /// Creates `credential` through the first provider creating its type.
    /// Returns `None` if no provider does.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    fn create_credential_through_provider(
        &self,
        credential: StoredCredential,
    ) -> CredentialResult<Option<StoredCredential>>;
}

/// The validation chain for one identity.
pub struct ChainedCredentialManager {
    realm: Realm,
    identity: Identity,
    registry: Arc<CredentialRegistry>,
    strategy: Arc<dyn ValidationStrategy>,
    store: Arc<dyn CredentialStore>,
}

enum Configured {
    Yes,
    StoreDisabled,
    No,
}

impl ChainedCredentialManager {
    /// Creates the chain for `identity`.
    pub fn new(
        realm: Realm,
        identity: Identity,
        registry: Arc<CredentialRegistry>,
        strategy: Arc<dyn ValidationStrategy>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            realm,
            identity,
            registry,
            strategy,
            store,
        }
    }

    /// The identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn ensure_manageable(&self) -> CredentialResult<()> {
        if self.identity.is_service_account() {
            return Err(CredentialError::invalid_identity(
                self.identity.id(),
                "credentials of service accounts cannot be managed",
            ));
        }
        Ok(())
    }

    fn validate_with(
        &self,
        validator: &dyn CredentialProvider,
        to_validate: &mut Vec<CredentialInput>,
    ) -> CredentialResult<()> {
        let mut remaining = Vec::with_capacity(to_validate.len());
        for input in to_validate.drain(..) {
            let accepted = validator.supports_credential_type(input.credential_type())
                && validator.is_valid(&self.realm, &self.identity, &input)?;
            if accepted {
                tracing::trace!(validator = validator.id(), credential_type = input.credential_type(), "input accepted");
            } else {
                remaining.push(input);
            }
        }
        *to_validate = remaining;
        Ok(())
    }

    fn configured_through_store(&self, credential_type: &str) -> CredentialResult<Configured> {
        match self.registry.federation_state(&self.identity) {
            FederationState::Local => Ok(Configured::No),
            FederationState::Disabled => Ok(Configured::StoreDisabled),
            FederationState::Enabled(store) => {
                let configured = store.capabilities().contains(ProviderCapability::Validate)
                    && store.supports_credential_type(credential_type)
                    && store.is_configured_for(&self.realm, &self.identity, credential_type)?;
                Ok(if configured { Configured::Yes } else { Configured::No })
            }
        }
    }
}

impl CredentialManager for ChainedCredentialManager {
    fn is_valid(&self, inputs: &[CredentialInput]) -> CredentialResult<bool> {
        if self.identity.is_service_account() {
            return Ok(false);
        }
        let mut to_validate = inputs.to_vec();

        match self.registry.federation_state(&self.identity) {
            FederationState::Disabled => {
                tracing::debug!(user_id = self.identity.id(), "federation link disabled, rejecting credentials");
                return Ok(false);
            }
            FederationState::Enabled(store) => {
                if store.capabilities().contains(ProviderCapability::Validate) {
                    self.validate_with(store.as_ref(), &mut to_validate)?;
                }
            }
            FederationState::Local => {}
        }

        if !to_validate.is_empty() {
            self.strategy
                .validate_credentials(&self.identity, &mut to_validate)?;
        }

        for provider in self.registry.providers_with(ProviderCapability::Validate) {
            if to_validate.is_empty() {
                break;
            }
            self.validate_with(provider.as_ref(), &mut to_validate)?;
        }

        tracing::debug!(user_id = self.identity.id(), inputs = inputs.len(), rejected = to_validate.len(), "credential validation");
        Ok(to_validate.is_empty())
    }

    fn update_credential(&self, input: &CredentialInput) -> CredentialResult<bool> {
        self.ensure_manageable()?;
        match self.registry.federation_state(&self.identity) {
            FederationState::Disabled => return Ok(false),
            FederationState::Enabled(store) => {
                if store.capabilities().contains(ProviderCapability::Update)
                    && store.supports_credential_type(input.credential_type())
                    && store.update_credential(&self.realm, &self.identity, input)?
                {
                    return Ok(true);
                }
            }
            FederationState::Local => {}
        }

        if self.strategy.update_credential(&self.identity, input)? {
            return Ok(true);
        }

        for provider in self.registry.providers_with(ProviderCapability::Update) {
            if provider.supports_credential_type(input.credential_type())
                && provider.update_credential(&self.realm, &self.identity, input)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn update_stored_credential(&self, credential: &StoredCredential) -> CredentialResult<()> {
        self.ensure_manageable()?;
        self.store.update(credential)
    }

    fn create_stored_credential(&self, mut credential: StoredCredential) -> CredentialResult<StoredCredential> {
        self.ensure_manageable()?;
        credential.user_id = self.identity.id().to_string();
        self.store.create(credential)
    }

    fn remove_stored_credential_by_id(&self, id: EntityId) -> CredentialResult<bool> {
        self.ensure_manageable()?;
        self.store.remove(self.identity.id(), id)
    }

    fn stored_credential_by_id(&self, id: EntityId) -> CredentialResult<Option<StoredCredential>> {
        self.store.get(self.identity.id(), id)
    }

    fn stored_credentials(&self) -> CredentialResult<Vec<StoredCredential>> {
        self.store.list(self.identity.id())
    }

    fn stored_credentials_by_type(&self, credential_type: &str) -> CredentialResult<Vec<StoredCredential>> {
        self.store.list_by_type(self.identity.id(), credential_type)
    }

    fn stored_credential_by_name_and_type(
        &self,
        name: &str,
        credential_type: &str,
    ) -> CredentialResult<Option<StoredCredential>> {
        self.store
            .by_name_and_type(self.identity.id(), name, credential_type)
    }

    fn move_stored_credential_to(&self, id: EntityId, new_previous: Option<EntityId>) -> CredentialResult<bool> {
        self.ensure_manageable()?;
        self.store.move_to(self.identity.id(), id, new_previous)
    }

    fn update_credential_label(&self, id: EntityId, label: &str) -> CredentialResult<()> {
        self.ensure_manageable()?;
        let mut credential = self
            .store
            .get(self.identity.id(), id)?
            .ok_or(CredentialError::UnknownCredential { id })?;
        credential.user_label = Some(label.to_string());
        self.store.update(&credential)
    }

    fn disable_credential_type(&self, credential_type: &str) -> CredentialResult<()> {
        self.ensure_manageable()?;
        match self.registry.federation_state(&self.identity) {
            FederationState::Disabled => return Ok(()),
            FederationState::Enabled(store) => {
                if store.capabilities().contains(ProviderCapability::Update)
                    && store.supports_credential_type(credential_type)
                {
                    store.disable_credential_type(&self.realm, &self.identity, credential_type)?;
                }
            }
            FederationState::Local => {}
        }
        for provider in self.registry.providers_with(ProviderCapability::Update) {
            if provider.supports_credential_type(credential_type) {
                provider.disable_credential_type(&self.realm, &self.identity, credential_type)?;
            }
        }
        tracing::debug!(user_id = self.identity.id(), credential_type, "credential type disabled");
        Ok(())
    }

    fn disableable_credential_types(&self) -> CredentialResult<Vec<String>> {
        let mut types = Vec::new();
        match self.registry.federation_state(&self.identity) {
            FederationState::Disabled => return Ok(types),
            FederationState::Enabled(store) => {
                if store.capabilities().contains(ProviderCapability::Update) {
                    types.extend(store.disableable_credential_types(&self.realm, &self.identity)?);
                }
            }
            FederationState::Local => {}
        }
        for provider in self.registry.providers_with(ProviderCapability::Update) {
            types.extend(provider.disableable_credential_types(&self.realm, &self.identity)?);
        }
        let mut seen = std::collections::HashSet::new();
        types.retain(|t| seen.insert(t.clone()));
        Ok(types)
    }

    fn is_configured_for(&self, credential_type: &str) -> CredentialResult<bool> {
        match self.configured_through_store(credential_type)? {
            Configured::Yes => Ok(true),
            Configured::StoreDisabled => Ok(false),
            Configured::No => self.is_configured_locally(credential_type),
        }
    }

    fn is_configured_locally(&self, credential_type: &str) -> CredentialResult<bool> {
        for provider in self.registry.providers_with(ProviderCapability::Validate) {
            if provider.supports_credential_type(credential_type)
                && provider.is_configured_for(&self.realm, &self.identity, credential_type)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn configured_federated_credential_types(&self) -> CredentialResult<Vec<String>> {
        let mut types = Vec::new();
        for provider in self.registry.providers() {
            let Some(credential_type) = provider.created_type() else {
                continue;
            };
            if matches!(self.configured_through_store(credential_type)?, Configured::Yes) {
                types.push(credential_type.to_string());
            }
        }
        Ok(types)
    }

    fn create_credential_through_provider(
        &self,
        credential: StoredCredential,
    ) -> CredentialResult<Option<StoredCredential>> {
        self.ensure_manageable()?;
        let provider = self
            .registry
            .providers()
            .into_iter()
            .find(|p| p.created_type() == Some(credential.credential_type.as_str()));
        match provider {
            Some(provider) => provider
                .create_credential(&self.realm, &self.identity, credential)
                .map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for ChainedCredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedCredentialManager")
            .field("realm", &self.realm)
            .field("identity", &self.identity)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
