//! Cache-invalidating credential manager decorator.

use crate::error::CredentialResult;
use crate::manager::CredentialManager;
use crate::model::{CredentialInput, StoredCredential};
use parking_lot::RwLock;
use realmstore_core::EntityId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to whatever caches identity data.
pub trait CacheInvalidation: Send + Sync {
    /// Drops the cached entry for `identity_id`.
    fn invalidate(&self, identity_id: &str);
}

/// Identity cache keyed by identity id.
pub struct IdentityCache<V> {
    entries: RwLock<HashMap<String, V>>,
    invalidations: AtomicU64,
}

impl<V: Clone> IdentityCache<V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Caches `value` for `identity_id`.
    pub fn put(&self, identity_id: impl Into<String>, value: V) {
        self.entries.write().insert(identity_id.into(), value);
    }

    /// Cached value for `identity_id`.
    #[must_use]
    pub fn get(&self, identity_id: &str) -> Option<V> {
        self.entries.read().get(identity_id).cloned()
    }

    /// Number of invalidations so far.
    #[must_use]
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

impl<V: Clone> Default for IdentityCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync> CacheInvalidation for IdentityCache<V> {
    fn invalidate(&self, identity_id: &str) {
        self.entries.write().remove(identity_id);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(identity_id, "identity cache entry invalidated");
    }
}

impl<V> fmt::Debug for IdentityCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.entries.read().len())
            .field("invalidations", &self.invalidations.load(Ordering::Relaxed))
            .finish()
    }
}

/// Wraps a [`CredentialManager`] for a cached identity.
///
/// Every operation that can change credentials, validation included since a
/// successful check may rehash, invalidates the identity's cache entry
/// before delegating. The invalidation happens even if the delegated call
/// then fails. Read-only queries pass straight through.
pub struct CachedCredentialManager<M> {
    inner: M,
    identity_id: String,
    cache: Arc<dyn CacheInvalidation>,
}

impl<M: CredentialManager> CachedCredentialManager<M> {
    /// Wraps `inner`, the manager of `identity_id`.
    pub fn new(inner: M, identity_id: impl Into<String>, cache: Arc<dyn CacheInvalidation>) -> Self {
        Self {
            inner,
            identity_id: identity_id.into(),
            cache,
        }
    }

    /// The wrapped manager.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    fn invalidate(&self) {
        self.cache.invalidate(&self.identity_id);
    }
}

impl<M: CredentialManager> CredentialManager for CachedCredentialManager<M> {
    fn is_valid(&self, inputs: &[CredentialInput]) -> CredentialResult<bool> {
        self.invalidate();
        self.inner.is_valid(inputs)
    }

    fn update_credential(&self, input: &CredentialInput) -> CredentialResult<bool> {
        self.invalidate();
        self.inner.update_credential(input)
    }

    fn update_stored_credential(&self, credential: &StoredCredential) -> CredentialResult<()> {
        self.invalidate();
        self.inner.update_stored_credential(credential)
    }

    fn create_stored_credential(&self, credential: StoredCredential) -> CredentialResult<StoredCredential> {
        self.invalidate();
        self.inner.create_stored_credential(credential)
    }

    fn remove_stored_credential_by_id(&self, id: EntityId) -> CredentialResult<bool> {
        self.invalidate();
        self.inner.remove_stored_credential_by_id(id)
    }

    fn stored_credential_by_id(&self, id: EntityId) -> CredentialResult<Option<StoredCredential>> {
        self.inner.stored_credential_by_id(id)
    }

    fn stored_credentials(&self) -> CredentialResult<Vec<StoredCredential>> {
        self.inner.stored_credentials()
    }

    fn stored_credentials_by_type(&self, credential_type: &str) -> CredentialResult<Vec<StoredCredential>> {
        self.inner.stored_credentials_by_type(credential_type)
    }

    fn stored_credential_by_name_and_type(
        &self,
        name: &str,
        credential_type: &str,
    ) -> CredentialResult<Option<StoredCredential>> {
        self.inner
            .stored_credential_by_name_and_type(name, credential_type)
    }

    fn move_stored_credential_to(&self, id: EntityId, new_previous: Option<EntityId>) -> CredentialResult<bool> {
        self.invalidate();
        self.inner.move_stored_credential_to(id, new_previous)
    }

    fn update_credential_label(&self, id: EntityId, label: &str) -> CredentialResult<()> {
        self.invalidate();
        self.inner.update_credential_label(id, label)
    }

    fn disable_credential_type(&self, credential_type: &str) -> CredentialResult<()> {
        self.invalidate();
        self.inner.disable_credential_type(credential_type)
    }

    fn disableable_credential_types(&self) -> CredentialResult<Vec<String>> {
        self.inner.disableable_credential_types()
    }

    fn is_configured_for(&self, credential_type: &str) -> CredentialResult<bool> {
        self.inner.is_configured_for(credential_type)
    }

    fn is_configured_locally(&self, credential_type: &str) -> CredentialResult<bool> {
        self.inner.is_configured_locally(credential_type)
    }

    fn configured_federated_credential_types(&self) -> CredentialResult<Vec<String>> {
        self.inner.configured_federated_credential_types()
    }

    fn create_credential_through_provider(
        &self,
        credential: StoredCredential,
    ) -> CredentialResult<Option<StoredCredential>> {
        self.invalidate();
        self.inner.create_credential_through_provider(credential)
    }
}

impl<M: fmt::Debug> fmt::Debug for CachedCredentialManager<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredentialManager")
            .field("identity_id", &self.identity_id)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CredentialError;
    use parking_lot::Mutex;

    /// Records the order of invalidations and delegated calls.
    #[derive(Default)]
    struct Journal(Mutex<Vec<&'static str>>);

    impl CacheInvalidation for Journal {
        fn invalidate(&self, _identity_id: &str) {
            self.0.lock().push("invalidate");
        }
    }

    /// Manager that logs each call into the journal and fails updates.
    struct Failing(Arc<Journal>);

    impl Failing {
        fn log(&self, call: &'static str) {
            self.0 .0.lock().push(call);
        }
    }

    impl CredentialManager for Failing {
        fn is_valid(&self, _inputs: &[CredentialInput]) -> CredentialResult<bool> {
            self.log("is_valid");
            Ok(true)
        }
        fn update_credential(&self, _input: &CredentialInput) -> CredentialResult<bool> {
            self.log("update_credential");
            Err(CredentialError::misconfigured_store("down"))
        }
        fn update_stored_credential(&self, _c: &StoredCredential) -> CredentialResult<()> {
            self.log("update_stored_credential");
            Ok(())
        }
        fn create_stored_credential(&self, c: StoredCredential) -> CredentialResult<StoredCredential> {
            self.log("create_stored_credential");
            Ok(c)
        }
        fn remove_stored_credential_by_id(&self, _id: EntityId) -> CredentialResult<bool> {
            self.log("remove");
            Ok(true)
        }
        fn stored_credential_by_id(&self, _id: EntityId) -> CredentialResult<Option<StoredCredential>> {
            self.log("get");
            Ok(None)
        }
        fn stored_credentials(&self) -> CredentialResult<Vec<StoredCredential>> {
            self.log("list");
            Ok(Vec::new())
        }
        fn stored_credentials_by_type(&self, _t: &str) -> CredentialResult<Vec<StoredCredential>> {
            self.log("list_by_type");
            Ok(Vec::new())
        }
        fn stored_credential_by_name_and_type(&self, _n: &str, _t: &str) -> CredentialResult<Option<StoredCredential>> {
            self.log("by_name");
            Ok(None)
        }
        fn move_stored_credential_to(&self, _id: EntityId, _p: Option<EntityId>) -> CredentialResult<bool> {
            self.log("move");
            Ok(true)
        }
        fn update_credential_label(&self, _id: EntityId, _l: &str) -> CredentialResult<()> {
            self.log("label");
            Ok(())
        }
        fn disable_credential_type(&self, _t: &str) -> CredentialResult<()> {
            self.log("disable");
            Ok(())
        }
        fn disableable_credential_types(&self) -> CredentialResult<Vec<String>> {
            self.log("disableable");
            Ok(Vec::new())
        }
        fn is_configured_for(&self, _t: &str) -> CredentialResult<bool> {
            self.log("configured");
            Ok(false)
        }
        fn is_configured_locally(&self, _t: &str) -> CredentialResult<bool> {
            self.log("configured_locally");
            Ok(false)
        }
        fn configured_federated_credential_types(&self) -> CredentialResult<Vec<String>> {
            self.log("federated_types");
            Ok(Vec::new())
        }
        fn create_credential_through_provider(&self, _c: StoredCredential) -> CredentialResult<Option<StoredCredential>> {
            self.log("create_through_provider");
            Ok(None)
        }
    }

    fn wrapped() -> (Arc<Journal>, CachedCredentialManager<Failing>) {
        let journal = Arc::new(Journal::default());
        let manager = CachedCredentialManager::new(
            Failing(Arc::clone(&journal)),
            "u1",
            Arc::clone(&journal) as Arc<dyn CacheInvalidation>,
        );
        (journal, manager)
    }

    #[test]
    fn update_invalidates_once_before_failing_chain() {
        let (journal, manager) = wrapped();
        assert!(manager
            .update_credential(&CredentialInput::password("pw"))
            .is_err());
        assert_eq!(*journal.0.lock(), vec!["invalidate", "update_credential"]);
    }

    #[test]
    fn mutations_invalidate_reads_do_not() {
        let (journal, manager) = wrapped();
        let id = EntityId::new();
        manager.stored_credentials().unwrap();
        manager.stored_credential_by_id(id).unwrap();
        manager.is_configured_for("otp").unwrap();
        manager.disableable_credential_types().unwrap();
        assert!(!journal.0.lock().contains(&"invalidate"));

        journal.0.lock().clear();
        manager.is_valid(&[]).unwrap();
        manager.move_stored_credential_to(id, None).unwrap();
        manager.update_credential_label(id, "x").unwrap();
        manager.disable_credential_type("otp").unwrap();
        manager.remove_stored_credential_by_id(id).unwrap();
        let calls = journal.0.lock().clone();
        assert_eq!(calls.iter().filter(|c| **c == "invalidate").count(), 5);
        assert_eq!(calls[0], "invalidate");
    }

    #[test]
    fn identity_cache_drops_entry() {
        let cache = IdentityCache::new();
        cache.put("u1", 7u32);
        cache.invalidate("u1");
        assert_eq!(cache.get("u1"), None);
        assert_eq!(cache.invalidations(), 1);
    }
}
