//! Storage-scoped validation strategies.
//!
//! A strategy sits between the authoritative external store and the local
//! providers. Storage layers that keep credentials next to the identity use
//! it to validate inputs directly against what they hold.

use crate::error::CredentialResult;
use crate::model::{CredentialInput, Identity};
use crate::password::{self, PasswordPolicy, PASSWORD};
use crate::transactional::TransactionalCredentialStore;
use realmstore_core::StorageEngine;
use std::fmt;
use std::sync::Arc;

/// Validation step owned by the identity's storage layer.
pub trait ValidationStrategy: Send + Sync {
    /// Removes every input in `to_validate` this strategy accepts.
    fn validate_credentials(
        &self,
        identity: &Identity,
        to_validate: &mut Vec<CredentialInput>,
    ) -> CredentialResult<()>;

    /// Sets the credential described by `input`. Returns false if the
    /// strategy declined.
    fn update_credential(&self, identity: &Identity, input: &CredentialInput) -> CredentialResult<bool>;
}

/// Strategy that accepts and updates nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStrategy;

impl ValidationStrategy for NoopStrategy {
    fn validate_credentials(
        &self,
        _identity: &Identity,
        _to_validate: &mut Vec<CredentialInput>,
    ) -> CredentialResult<()> {
        Ok(())
    }

    fn update_credential(&self, _identity: &Identity, _input: &CredentialInput) -> CredentialResult<bool> {
        Ok(false)
    }
}

/// Strategy validating passwords against the credentials stored with the
/// identity in a credential-authoritative engine.
///
/// Inputs of other types are left for the registered providers.
pub struct StoredCredentialStrategy<E: StorageEngine> {
    store: Arc<TransactionalCredentialStore<E>>,
    policy: PasswordPolicy,
}

impl<E: StorageEngine> StoredCredentialStrategy<E> {
    /// Creates a strategy over `store`, hashing new passwords with `policy`.
    pub fn new(store: Arc<TransactionalCredentialStore<E>>, policy: PasswordPolicy) -> Self {
        Self { store, policy }
    }
}

impl<E: StorageEngine> ValidationStrategy for StoredCredentialStrategy<E> {
    fn validate_credentials(
        &self,
        identity: &Identity,
        to_validate: &mut Vec<CredentialInput>,
    ) -> CredentialResult<()> {
        let mut remaining = Vec::with_capacity(to_validate.len());
        for input in to_validate.drain(..) {
            let accepted = input.credential_type() == PASSWORD
                && password::verify_stored(self.store.as_ref(), &self.policy, identity, input.secret())?;
            if !accepted {
                remaining.push(input);
            }
        }
        tracing::trace!(user_id = identity.id(), remaining = remaining.len(), "stored credential validation");
        *to_validate = remaining;
        Ok(())
    }

    fn update_credential(&self, identity: &Identity, input: &CredentialInput) -> CredentialResult<bool> {
        if input.credential_type() != PASSWORD {
            return Ok(false);
        }
        password::store_password(self.store.as_ref(), &self.policy, identity, input.secret())?;
        Ok(true)
    }
}

impl<E: StorageEngine> fmt::Debug for StoredCredentialStrategy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentialStrategy")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{ChainedCredentialManager, CredentialManager};
    use crate::model::Realm;
    use crate::registry::CredentialRegistry;
    use crate::store::CredentialStore;
    use realmstore_core::{RelationalEngine, Store};

    fn chain(identity: Identity) -> (Arc<TransactionalCredentialStore<RelationalEngine>>, ChainedCredentialManager) {
        let store = Arc::new(
            TransactionalCredentialStore::new(Arc::new(Store::new(RelationalEngine::default()))).unwrap(),
        );
        let policy = PasswordPolicy::default()
            .memory_kib(PasswordPolicy::MIN_MEMORY_KIB)
            .hash_iterations(1);
        let manager = ChainedCredentialManager::new(
            Realm::new("master"),
            identity,
            Arc::new(CredentialRegistry::new()),
            Arc::new(StoredCredentialStrategy::new(Arc::clone(&store), policy)),
            Arc::clone(&store) as Arc<dyn CredentialStore>,
        );
        (store, manager)
    }

    #[test]
    fn stored_password_decides_without_providers() {
        let (store, manager) = chain(Identity::local("u1"));
        assert!(!manager.is_valid(&[CredentialInput::password("pw")]).unwrap());

        assert!(manager.update_credential(&CredentialInput::password("pw")).unwrap());
        assert_eq!(store.list_by_type("u1", PASSWORD).unwrap().len(), 1);
        assert!(manager.is_valid(&[CredentialInput::password("pw")]).unwrap());
        assert!(!manager.is_valid(&[CredentialInput::password("other")]).unwrap());

        assert!(manager.update_credential(&CredentialInput::password("next")).unwrap());
        assert_eq!(store.list_by_type("u1", PASSWORD).unwrap().len(), 1);
        assert!(!manager.is_valid(&[CredentialInput::password("pw")]).unwrap());
        assert!(manager.is_valid(&[CredentialInput::password("next")]).unwrap());
    }

    #[test]
    fn other_types_fall_through() {
        let (_, manager) = chain(Identity::local("u1"));
        manager.update_credential(&CredentialInput::password("pw")).unwrap();
        assert!(!manager.update_credential(&CredentialInput::new("otp", "123456")).unwrap());
        assert!(!manager
            .is_valid(&[CredentialInput::password("pw"), CredentialInput::new("otp", "123456")])
            .unwrap());
    }

    #[test]
    fn passwords_are_scoped_to_the_identity() {
        let (store, alice) = chain(Identity::local("alice"));
        alice.update_credential(&CredentialInput::password("pw")).unwrap();
        let strategy = StoredCredentialStrategy::new(
            store,
            PasswordPolicy::default().memory_kib(PasswordPolicy::MIN_MEMORY_KIB),
        );
        let mut inputs = vec![CredentialInput::password("pw")];
        strategy
            .validate_credentials(&Identity::local("bob"), &mut inputs)
            .unwrap();
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn noop_leaves_inputs() {
        let identity = Identity::local("u1");
        let mut inputs = vec![CredentialInput::password("pw")];
        NoopStrategy
            .validate_credentials(&identity, &mut inputs)
            .unwrap();
        assert_eq!(inputs.len(), 1);
        assert!(!NoopStrategy.update_credential(&identity, &inputs[0]).unwrap());
    }
}
