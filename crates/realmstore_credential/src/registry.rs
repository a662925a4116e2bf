//! Registered credential providers and authoritative external stores.

use crate::error::CredentialResult;
use crate::model::{AuthenticationOutcome, CredentialInput, Identity, Realm};
use crate::provider::{CredentialProvider, ProviderCapability};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// How an identity's federation link resolves.
#[derive(Clone)]
pub enum FederationState {
    /// The identity is not linked to an external store.
    Local,
    /// Linked to an enabled store.
    Enabled(Arc<dyn CredentialProvider>),
    /// Linked to a store that is disabled or no longer registered.
    Disabled,
}

impl fmt::Debug for FederationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FederationState::Local => f.write_str("Local"),
            FederationState::Enabled(store) => f.debug_tuple("Enabled").field(&store.id()).finish(),
            FederationState::Disabled => f.write_str("Disabled"),
        }
    }
}

struct Federated {
    store: Arc<dyn CredentialProvider>,
    enabled: bool,
}

/// The open set of credential providers plus the external stores
/// identities can be linked to.
#[derive(Default)]
pub struct CredentialRegistry {
    providers: RwLock<Vec<Arc<dyn CredentialProvider>>>,
    federation: RwLock<Vec<Federated>>,
}

impl CredentialRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a local credential provider. Providers are consulted in
    /// registration order.
    pub fn register_provider(&self, provider: Arc<dyn CredentialProvider>) {
        tracing::debug!(provider = provider.id(), capabilities = ?provider.capabilities(), "registered credential provider");
        self.providers.write().push(provider);
    }

    /// Registers an authoritative external store under its id.
    ///
    /// Stores keep their link order; relinking an id replaces the store in
    /// place.
    pub fn link_store(&self, store: Arc<dyn CredentialProvider>, enabled: bool) {
        tracing::debug!(store = store.id(), enabled, "registered external credential store");
        let mut federation = self.federation.write();
        match federation.iter_mut().find(|f| f.store.id() == store.id()) {
            Some(existing) => *existing = Federated { store, enabled },
            None => federation.push(Federated { store, enabled }),
        }
    }

    /// Enables or disables an external store. Returns false if no store has
    /// that id.
    pub fn set_store_enabled(&self, store_id: &str, enabled: bool) -> bool {
        match self.federation.write().iter_mut().find(|f| f.store.id() == store_id) {
            Some(federated) => {
                federated.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Resolves the external store `identity` is linked to.
    #[must_use]
    pub fn federation_state(&self, identity: &Identity) -> FederationState {
        let Some(link) = identity.federation_link() else {
            return FederationState::Local;
        };
        match self.federation.read().iter().find(|f| f.store.id() == link) {
            Some(federated) if federated.enabled => {
                FederationState::Enabled(Arc::clone(&federated.store))
            }
            _ => FederationState::Disabled,
        }
    }

    /// Local providers declaring `capability`, in registration order.
    #[must_use]
    pub fn providers_with(&self, capability: ProviderCapability) -> Vec<Arc<dyn CredentialProvider>> {
        self.providers
            .read()
            .iter()
            .filter(|p| p.capabilities().contains(capability))
            .cloned()
            .collect()
    }

    /// Every local provider, in registration order.
    #[must_use]
    pub fn providers(&self) -> Vec<Arc<dyn CredentialProvider>> {
        self.providers.read().clone()
    }

    /// Authenticates `input` without a known identity.
    ///
    /// Enabled external stores are asked first in link order, then local
    /// providers; the first one declaring [`ProviderCapability::Authenticate`] for the
    /// input's type decides.
    ///
    /// # Errors
    ///
    /// Propagates the deciding provider's error.
    pub fn authenticate(
        &self,
        realm: &Realm,
        input: &CredentialInput,
    ) -> CredentialResult<Option<AuthenticationOutcome>> {
        let stores: Vec<Arc<dyn CredentialProvider>> = self
            .federation
            .read()
            .iter()
            .filter(|f| f.enabled)
            .map(|f| Arc::clone(&f.store))
            .collect();
        let candidate = stores
            .into_iter()
            .chain(self.providers())
            .filter(|p| p.capabilities().contains(ProviderCapability::Authenticate))
            .find(|p| p.supports_credential_type(input.credential_type()));
        match candidate {
            Some(provider) => {
                tracing::trace!(provider = provider.id(), credential_type = input.credential_type(), "authenticating");
                provider.authenticate(realm, input)
            }
            None => Ok(None),
        }
    }
}

impl fmt::Debug for CredentialRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<String> = self.providers.read().iter().map(|p| p.id().to_string()).collect();
        let stores: Vec<String> = self
            .federation
            .read()
            .iter()
            .map(|f| f.store.id().to_string())
            .collect();
        f.debug_struct("CredentialRegistry")
            .field("providers", &providers)
            .field("stores", &stores)
            .finish()
    }
}
