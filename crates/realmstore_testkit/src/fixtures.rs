//! Test fixtures and store helpers.
//!
//! Provides seeded stores over both engines and a ready-made credential
//! chain for one identity.

use realmstore_core::kinds::user_session;
use realmstore_core::{
    ConcurrentMapEngine, Criteria, Document, EntityId, RelationalEngine, StorageEngine, Store,
};
use realmstore_credential::{
    ChainedCredentialManager, CredentialRegistry, CredentialStore, Identity, NoopStrategy,
    PasswordPolicy, PasswordProvider, Realm, TransactionalCredentialStore,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A store over the relational engine with the built-in kinds.
pub fn relational_store() -> Store<RelationalEngine> {
    init_tracing();
    Store::with_builtin_kinds(RelationalEngine::default())
}

/// A store over the concurrent map engine with the built-in kinds.
pub fn map_store() -> Store<ConcurrentMapEngine> {
    init_tracing();
    Store::with_builtin_kinds(ConcurrentMapEngine::default())
}

/// Everything needed to create one user session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSeed {
    /// Owning realm.
    pub realm_id: String,
    /// Authenticated user.
    pub user_id: String,
    /// Expiration timestamp.
    pub expiration: i64,
    /// Offline flag.
    pub offline: bool,
    /// Online session an offline session was derived from.
    pub corresponding_session: Option<String>,
    /// Attached client ids.
    pub clients: BTreeSet<String>,
}

impl SessionSeed {
    /// An online session without clients.
    pub fn new(realm_id: impl Into<String>, user_id: impl Into<String>, expiration: i64) -> Self {
        Self {
            realm_id: realm_id.into(),
            user_id: user_id.into(),
            expiration,
            offline: false,
            corresponding_session: None,
            clients: BTreeSet::new(),
        }
    }

    /// Attaches a client session.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.clients.insert(client_id.into());
        self
    }

    /// Core fields of the session.
    pub fn core(&self) -> Document {
        let mut core = Document::new();
        core.insert(user_session::REALM_ID.name(), self.realm_id.as_str());
        core.insert(user_session::USER_ID.name(), self.user_id.as_str());
        core.insert(user_session::EXPIRATION.name(), self.expiration);
        core.insert(user_session::OFFLINE, self.offline);
        core.insert(user_session::LOGIN_USERNAME, self.user_id.as_str());
        core
    }

    /// Deferred groups of the session.
    pub fn groups(&self) -> BTreeMap<String, Document> {
        let mut notes = Document::new();
        if let Some(online) = &self.corresponding_session {
            notes.insert(user_session::CORRESPONDING_SESSION_ID_NOTE, online.as_str());
        }
        let clients: Document = self
            .clients
            .iter()
            .map(|c| (c.clone(), format!("cs-{c}")))
            .collect();
        BTreeMap::from([
            (user_session::NOTES.to_string(), notes),
            (user_session::CLIENT_SESSIONS.to_string(), clients),
        ])
    }
}

/// Creates every seed in one committed transaction, returning their ids in
/// seed order.
pub fn seed_sessions<E: StorageEngine>(store: &Store<E>, seeds: &[SessionSeed]) -> Vec<EntityId> {
    store
        .transaction(user_session::KIND, |txn| {
            seeds
                .iter()
                .map(|seed| Ok(txn.create_with_groups(seed.core(), seed.groups())?.id()))
                .collect()
        })
        .expect("Failed to seed sessions")
}

/// Ids of the sessions matching `criteria`, in a fresh transaction.
pub fn matching_sessions<E: StorageEngine>(store: &Store<E>, criteria: &Criteria) -> BTreeSet<EntityId> {
    store
        .transaction(user_session::KIND, |txn| Ok(txn.query(criteria)?.ids()))
        .expect("Failed to query sessions")
        .into_iter()
        .collect()
}

/// A password-validating chain for a local identity.
pub struct CredentialFixture {
    /// Credential store shared by the provider and the chain.
    pub store: Arc<TransactionalCredentialStore<RelationalEngine>>,
    /// Provider registry.
    pub registry: Arc<CredentialRegistry>,
    /// Chain for [`CredentialFixture::identity`].
    pub manager: ChainedCredentialManager,
}

impl CredentialFixture {
    /// Identity the chain manages.
    pub const IDENTITY: &'static str = "alice";

    /// Builds the fixture with a cheap password policy.
    pub fn new() -> Self {
        init_tracing();
        let engine_store = Arc::new(Store::new(RelationalEngine::default()));
        let store = Arc::new(
            TransactionalCredentialStore::new(engine_store)
                .expect("Relational engine must hold credentials"),
        );
        let shared: Arc<dyn CredentialStore> = store.clone();
        let registry = Arc::new(CredentialRegistry::new());
        registry.register_provider(Arc::new(PasswordProvider::new(
            Arc::clone(&shared),
            PasswordPolicy::default()
                .memory_kib(PasswordPolicy::MIN_MEMORY_KIB)
                .hash_iterations(1),
        )));
        let manager = ChainedCredentialManager::new(
            Realm::new("test"),
            Identity::local(Self::IDENTITY),
            Arc::clone(&registry),
            Arc::new(NoopStrategy),
            shared,
        );
        Self {
            store,
            registry,
            manager,
        }
    }

    /// The managed identity.
    pub fn identity(&self) -> Identity {
        Identity::local(Self::IDENTITY)
    }
}

impl Default for CredentialFixture {
    fn default() -> Self {
        Self::new()
    }
}
