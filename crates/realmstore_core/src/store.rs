//! Store: kind registry and transaction factory.

use crate::engine::StorageEngine;
use crate::error::{CoreError, CoreResult};
use crate::kinds;
use crate::schema::KindSchema;
use crate::transaction::{StorageTransaction, TransactionScope};
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Entry point over one storage engine.
///
/// Holds the registered kind schemas and hands out transactions bound to
/// one kind each.
///
/// # Example
///
/// ```rust,ignore
/// use realmstore_core::{RelationalEngine, Store};
///
/// let store = Store::with_builtin_kinds(RelationalEngine::default());
/// let id = store.transaction("user-session", |txn| {
///     Ok(txn.create(fields)?.id())
/// })?;
/// ```
pub struct Store<E: StorageEngine> {
    engine: Arc<E>,
    schemas: RwLock<HashMap<String, Arc<KindSchema>>>,
    next_txid: AtomicU64,
}

impl<E: StorageEngine> Store<E> {
    /// Creates a store with no kinds registered.
    pub fn new(engine: E) -> Self {
        Self::with_engine(Arc::new(engine))
    }

    /// Creates a store over a shared engine.
    pub fn with_engine(engine: Arc<E>) -> Self {
        Self {
            engine,
            schemas: RwLock::new(HashMap::new()),
            next_txid: AtomicU64::new(1),
        }
    }

    /// Creates a store with the built-in session kinds registered.
    pub fn with_builtin_kinds(engine: E) -> Self {
        let store = Self::new(engine);
        for schema in kinds::builtin_schemas() {
            store.register_kind(schema);
        }
        store
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Registers `schema`, replacing any schema of the same kind.
    pub fn register_kind(&self, schema: KindSchema) -> Arc<KindSchema> {
        let schema = Arc::new(schema);
        tracing::debug!(
            kind = schema.name(),
            version = %schema.schema_version(),
            engine = self.engine.name(),
            "registered kind"
        );
        self.schemas
            .write()
            .insert(schema.name().to_string(), Arc::clone(&schema));
        schema
    }

    /// Schema registered for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownKind`] if no schema is registered.
    pub fn schema(&self, kind: &str) -> CoreResult<Arc<KindSchema>> {
        self.schemas
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| CoreError::UnknownKind {
                kind: kind.to_string(),
            })
    }

    /// Names of the registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Opens a transaction on `kind`. Call `begin()` before using it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownKind`] if no schema is registered.
    pub fn open_transaction(&self, kind: &str) -> CoreResult<StorageTransaction<E>> {
        let schema = self.schema(kind)?;
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::Relaxed));
        Ok(StorageTransaction::new(id, Arc::clone(&self.engine), schema))
    }

    /// Opens and begins a transaction on `kind`, wrapped in a scope.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownKind`] or the error from `begin()`.
    pub fn begin(&self, kind: &str) -> CoreResult<TransactionScope<E>> {
        let mut txn = self.open_transaction(kind)?;
        txn.begin()?;
        Ok(TransactionScope::new(txn))
    }

    /// Runs `work` in a new transaction on `kind`.
    ///
    /// Commits if `work` succeeds and did not mark the transaction
    /// rollback-only; rolls back otherwise, including when `work` panics.
    ///
    /// # Errors
    ///
    /// The error from `work`, from `begin()`, or from `commit()`.
    pub fn transaction<T, F>(&self, kind: &str, work: F) -> CoreResult<T>
    where
        F: FnOnce(&mut StorageTransaction<E>) -> CoreResult<T>,
    {
        let mut scope = self.begin(kind)?;
        let outcome = work(&mut *scope);
        scope.end(outcome)
    }
}

impl<E: StorageEngine> fmt::Debug for Store<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("engine", &self.engine.name())
            .field("kinds", &self.kinds())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConcurrentMapEngine, RelationalEngine};
    use crate::kinds::user_session;
    use crate::transaction::TransactionState;
    use realmstore_codec::Document;

    #[test]
    fn builtin_kinds_are_registered() {
        let store = Store::with_builtin_kinds(RelationalEngine::default());
        assert_eq!(store.kinds(), vec!["client-session", "user-session"]);
        assert!(matches!(
            store.open_transaction("realm"),
            Err(CoreError::UnknownKind { .. })
        ));
    }

    #[test]
    fn transaction_ids_are_unique() {
        let store = Store::with_builtin_kinds(ConcurrentMapEngine::default());
        let a = store.open_transaction(user_session::KIND).unwrap();
        let b = store.open_transaction(user_session::KIND).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), TransactionState::NotStarted);
    }

    #[test]
    fn transaction_helper_commits_and_rolls_back() {
        let store = Store::with_builtin_kinds(RelationalEngine::default());
        let kept = store
            .transaction(user_session::KIND, |txn| Ok(txn.create(Document::new())?.id()))
            .unwrap();

        let discarded = parking_lot::Mutex::new(None);
        let err = store
            .transaction::<(), _>(user_session::KIND, |txn| {
                *discarded.lock() = Some(txn.create(Document::new())?.id());
                Err(CoreError::invalid_prior_state("abort"))
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPriorState { .. }));
        let discarded = discarded.lock().take().unwrap();

        store
            .transaction(user_session::KIND, |txn| {
                assert!(txn.read(kept)?.is_some());
                assert!(txn.read(discarded)?.is_none());
                Ok(())
            })
            .unwrap();
        assert_eq!(store.engine().pool().in_use(), 0);
    }
}
