//! # RealmStore Credential
//!
//! Credential validation and management for identities.
//!
//! Credentials of an identity are checked and changed through a fixed
//! chain:
//!
//! 1. the identity's federated store, when it is linked to one,
//! 2. the realm's validation strategy,
//! 3. every registered credential provider with the needed capability.
//!
//! A federated store that is disabled or gone makes validation fail
//! outright. Service accounts never validate credentials.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realmstore_credential::{
//!     ChainedCredentialManager, CredentialInput, CredentialManager, CredentialRegistry,
//!     Identity, MemoryCredentialStore, NoopStrategy, PasswordPolicy, PasswordProvider, Realm,
//! };
//!
//! let store = Arc::new(MemoryCredentialStore::new());
//! let registry = Arc::new(CredentialRegistry::new());
//! registry.register_provider(Arc::new(PasswordProvider::new(store.clone(), PasswordPolicy::default())));
//!
//! let manager = ChainedCredentialManager::new(
//!     Realm::new("master"),
//!     Identity::local("u1"),
//!     registry,
//!     Arc::new(NoopStrategy),
//!     store,
//! );
//! manager.update_credential(&CredentialInput::password("s3cret"))?;
//! assert!(manager.is_valid(&[CredentialInput::password("s3cret")])?);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod error;
pub mod kind;
mod manager;
mod model;
pub mod password;
mod provider;
mod registry;
mod store;
mod strategy;
mod transactional;

pub use cache::{CacheInvalidation, CachedCredentialManager, IdentityCache};
pub use error::{CredentialError, CredentialResult};
pub use manager::{ChainedCredentialManager, CredentialManager};
pub use model::{AuthenticationOutcome, CredentialInput, Identity, Realm, StoredCredential};
pub use password::{PasswordPolicy, PasswordProvider};
pub use provider::{CredentialProvider, ProviderCapabilities, ProviderCapability};
pub use registry::{CredentialRegistry, FederationState};
pub use store::{CredentialStore, MemoryCredentialStore, PRIORITY_STEP};
pub use strategy::{NoopStrategy, StoredCredentialStrategy, ValidationStrategy};
pub use transactional::TransactionalCredentialStore;
