//! Password credentials.
//!
//! Passwords are stored as Argon2id PHC strings. The cost parameters live in
//! the PHC string itself, so raising the policy leaves old hashes readable;
//! a successful validation against a hash weaker than the policy rewrites
//! it.

use crate::error::{CredentialError, CredentialResult};
use crate::model::{CredentialInput, Identity, Realm, StoredCredential};
use crate::provider::{CredentialProvider, ProviderCapabilities, ProviderCapability};
use crate::store::CredentialStore;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use realmstore_core::{Document, Value};
use std::fmt;
use std::sync::Arc;

/// Credential type of passwords.
pub const PASSWORD: &str = "password";

/// Name of the hash algorithm recorded in credential data.
pub const ALGORITHM: &str = "argon2id";

const SALT_SIZE: usize = 16;

const DATA_ALGORITHM: &str = "algorithm";
const DATA_MEMORY: &str = "memory_kib";
const DATA_ITERATIONS: &str = "hash_iterations";
const DATA_PARALLELISM: &str = "parallelism";
const SECRET_VALUE: &str = "value";

/// Argon2id cost parameters for new password hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes over memory.
    pub hash_iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            hash_iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl PasswordPolicy {
    /// Smallest memory cost Argon2 accepts for one lane.
    pub const MIN_MEMORY_KIB: u32 = Params::MIN_M_COST;

    /// Sets the memory cost.
    #[must_use]
    pub const fn memory_kib(mut self, value: u32) -> Self {
        self.memory_kib = value;
        self
    }

    /// Sets the number of passes.
    #[must_use]
    pub const fn hash_iterations(mut self, value: u32) -> Self {
        self.hash_iterations = value;
        self
    }

    /// Sets the degree of parallelism.
    #[must_use]
    pub const fn parallelism(mut self, value: u32) -> Self {
        self.parallelism = value;
        self
    }

    fn hasher(&self) -> CredentialResult<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.hash_iterations, self.parallelism, None)
            .map_err(|e| CredentialError::hashing(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Returns true if `hash` was made with another algorithm or with any
    /// cost below this policy.
    fn is_stronger_than(&self, hash: &PasswordHash<'_>) -> bool {
        if hash.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }
        match Params::try_from(hash) {
            Ok(stored) => {
                stored.m_cost() < self.memory_kib
                    || stored.t_cost() < self.hash_iterations
                    || stored.p_cost() < self.parallelism
            }
            Err(_) => true,
        }
    }

    /// Hashes `password` into `credential`, replacing its secret and data.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Hashing`] if the policy parameters are
    /// out of range.
    pub fn encode(&self, credential: &mut StoredCredential, password: &str) -> CredentialResult<()> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt).map_err(|e| CredentialError::hashing(e.to_string()))?;
        let phc = self
            .hasher()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CredentialError::hashing(e.to_string()))?
            .to_string();

        let mut secret = Document::new();
        secret.insert(SECRET_VALUE, phc);
        credential.secret_data = secret;

        let mut data = Document::new();
        data.insert(DATA_ALGORITHM, ALGORITHM);
        data.insert(DATA_MEMORY, self.memory_kib);
        data.insert(DATA_ITERATIONS, self.hash_iterations);
        data.insert(DATA_PARALLELISM, self.parallelism);
        credential.credential_data = data;
        Ok(())
    }
}

/// Checks `password` against the identity's stored password, rehashing it
/// when the policy has grown stronger.
pub(crate) fn verify_stored(
    store: &dyn CredentialStore,
    policy: &PasswordPolicy,
    identity: &Identity,
    password: &str,
) -> CredentialResult<bool> {
    let Some(mut stored) = stored_password(store, identity)? else {
        return Ok(false);
    };
    let rehash = {
        let Some(phc) = stored.secret_data.get(SECRET_VALUE).and_then(Value::as_text) else {
            tracing::warn!(user_id = identity.id(), credential = %stored.id, "stored password has no hash");
            return Ok(false);
        };
        let hash = match PasswordHash::new(phc) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(user_id = identity.id(), credential = %stored.id, error = %e, "stored password hash is malformed");
                return Ok(false);
            }
        };
        if Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_err()
        {
            return Ok(false);
        }
        policy.is_stronger_than(&hash)
    };

    if rehash {
        tracing::debug!(user_id = identity.id(), credential = %stored.id, "rehashing password");
        policy.encode(&mut stored, password)?;
        store.update(&stored)?;
    }
    Ok(true)
}

/// Sets the identity's password, creating the credential if needed.
pub(crate) fn store_password(
    store: &dyn CredentialStore,
    policy: &PasswordPolicy,
    identity: &Identity,
    password: &str,
) -> CredentialResult<()> {
    match stored_password(store, identity)? {
        Some(mut stored) => {
            policy.encode(&mut stored, password)?;
            store.update(&stored)?;
        }
        None => {
            let mut created = StoredCredential::new(identity.id(), PASSWORD);
            policy.encode(&mut created, password)?;
            store.create(created)?;
        }
    }
    tracing::debug!(user_id = identity.id(), "password updated");
    Ok(())
}

pub(crate) fn stored_password(
    store: &dyn CredentialStore,
    identity: &Identity,
) -> CredentialResult<Option<StoredCredential>> {
    Ok(store.list_by_type(identity.id(), PASSWORD)?.into_iter().next())
}

/// Provider validating and setting passwords kept in a [`CredentialStore`].
pub struct PasswordProvider {
    store: Arc<dyn CredentialStore>,
    policy: PasswordPolicy,
}

impl PasswordProvider {
    /// Creates a provider over `store`.
    pub fn new(store: Arc<dyn CredentialStore>, policy: PasswordPolicy) -> Self {
        Self { store, policy }
    }

    /// The hashing policy.
    #[must_use]
    pub fn policy(&self) -> PasswordPolicy {
        self.policy
    }
}

impl CredentialProvider for PasswordProvider {
    fn id(&self) -> &str {
        PASSWORD
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::empty()
            .with(ProviderCapability::Validate)
            .with(ProviderCapability::Update)
    }

    fn supports_credential_type(&self, credential_type: &str) -> bool {
        credential_type == PASSWORD
    }

    fn is_valid(&self, _realm: &Realm, identity: &Identity, input: &CredentialInput) -> CredentialResult<bool> {
        if input.credential_type() != PASSWORD {
            return Ok(false);
        }
        verify_stored(self.store.as_ref(), &self.policy, identity, input.secret())
    }

    fn is_configured_for(&self, _realm: &Realm, identity: &Identity, credential_type: &str) -> CredentialResult<bool> {
        Ok(credential_type == PASSWORD && stored_password(self.store.as_ref(), identity)?.is_some())
    }

    fn update_credential(&self, _realm: &Realm, identity: &Identity, input: &CredentialInput) -> CredentialResult<bool> {
        if input.credential_type() != PASSWORD {
            return Ok(false);
        }
        store_password(self.store.as_ref(), &self.policy, identity, input.secret())?;
        Ok(true)
    }

    fn created_type(&self) -> Option<&str> {
        Some(PASSWORD)
    }

    fn create_credential(
        &self,
        _realm: &Realm,
        identity: &Identity,
        mut credential: StoredCredential,
    ) -> CredentialResult<StoredCredential> {
        if credential.credential_type != PASSWORD {
            return Err(CredentialError::unsupported_type(credential.credential_type));
        }
        credential.user_id = identity.id().to_string();
        self.store.create(credential)
    }
}

impl fmt::Debug for PasswordProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordProvider")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
