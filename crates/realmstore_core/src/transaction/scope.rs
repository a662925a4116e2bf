//! Request-scoped transaction wrapper.

use super::state::TransactionState;
use super::storage::StorageTransaction;
use crate::engine::StorageEngine;
use crate::error::{CoreError, CoreResult};
use std::ops::{Deref, DerefMut};

/// Owns a transaction for the duration of one unit of work.
///
/// [`end`](Self::end) commits when the work succeeded and the transaction
/// is not rollback-only, and rolls back otherwise. Work that reports success
/// after a backend failure already rolled the transaction back is an error.
/// A scope dropped without
/// `end`, including during a panic, rolls back.
#[derive(Debug)]
pub struct TransactionScope<E: StorageEngine> {
    txn: StorageTransaction<E>,
}

impl<E: StorageEngine> TransactionScope<E> {
    /// Wraps an already begun transaction.
    #[must_use]
    pub fn new(txn: StorageTransaction<E>) -> Self {
        Self { txn }
    }

    /// Ends the scope according to the outcome of the work.
    ///
    /// Returns the work's value on commit. A work error is returned after
    /// rolling back; a commit error is returned as is.
    ///
    /// # Errors
    ///
    /// The work's error, or the error that prevented the commit.
    pub fn end<T>(mut self, outcome: CoreResult<T>) -> CoreResult<T> {
        match outcome {
            Ok(value) if !self.txn.is_rollback_only() => match self.txn.state() {
                TransactionState::Committed => Ok(value),
                TransactionState::RolledBack => {
                    tracing::warn!(txid = %self.txn.id(), "work succeeded on a rolled back transaction");
                    Err(CoreError::invalid_prior_state(
                        "transaction was rolled back before it could commit",
                    ))
                }
                TransactionState::NotStarted | TransactionState::Active => {
                    self.txn.commit()?;
                    Ok(value)
                }
            },
            Ok(value) => {
                self.txn.rollback()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.txn.rollback() {
                    tracing::warn!(txid = %self.txn.id(), error = %rollback, "rollback after failed work");
                }
                Err(err)
            }
        }
    }
}

impl<E: StorageEngine> Deref for TransactionScope<E> {
    type Target = StorageTransaction<E>;

    fn deref(&self) -> &Self::Target {
        &self.txn
    }
}

impl<E: StorageEngine> DerefMut for TransactionScope<E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.txn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RelationalEngine;
    use crate::criteria::Criteria;
    use crate::schema::KindSchema;
    use crate::types::TransactionId;
    use realmstore_codec::Document;
    use std::sync::Arc;

    fn scope(engine: &Arc<RelationalEngine>, id: u64) -> TransactionScope<RelationalEngine> {
        let mut txn = StorageTransaction::new(
            TransactionId(id),
            Arc::clone(engine),
            Arc::new(KindSchema::new("sample")),
        );
        txn.begin().unwrap();
        TransactionScope::new(txn)
    }

    fn exists(engine: &Arc<RelationalEngine>, id: crate::entity::EntityId) -> bool {
        let mut check = scope(engine, 99);
        check.read(id).unwrap().is_some()
    }

    #[test]
    fn success_commits() {
        let engine = Arc::new(RelationalEngine::default());
        let mut s = scope(&engine, 1);
        let id = s.create(Document::new()).unwrap().id();
        assert_eq!(s.end(Ok(id)).unwrap(), id);
        assert!(exists(&engine, id));
    }

    #[test]
    fn failure_rolls_back() {
        let engine = Arc::new(RelationalEngine::default());
        let mut s = scope(&engine, 1);
        let id = s.create(Document::new()).unwrap().id();
        let err = s
            .end::<()>(Err(CoreError::invalid_prior_state("work failed")))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPriorState { .. }));
        assert!(!exists(&engine, id));
        assert_eq!(engine.pool().in_use(), 0);
    }

    #[test]
    fn swallowed_outage_is_not_reported_as_commit() {
        let engine = Arc::new(RelationalEngine::default());
        let mut s = scope(&engine, 1);
        let id = s.create(Document::new()).unwrap().id();
        engine.pool().set_available(false);
        assert!(s.query(&Criteria::all()).is_err());
        engine.pool().set_available(true);

        let err = s.end(Ok(id)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPriorState { .. }));
        assert!(!exists(&engine, id));
        assert_eq!(engine.pool().in_use(), 0);
    }

    #[test]
    fn work_may_commit_itself() {
        let engine = Arc::new(RelationalEngine::default());
        let mut s = scope(&engine, 1);
        let id = s.create(Document::new()).unwrap().id();
        s.commit().unwrap();
        assert_eq!(s.end(Ok(id)).unwrap(), id);
        assert!(exists(&engine, id));
    }

    #[test]
    fn rollback_only_rolls_back() {
        let engine = Arc::new(RelationalEngine::default());
        let mut s = scope(&engine, 1);
        let id = s.create(Document::new()).unwrap().id();
        s.set_rollback_only();
        s.end(Ok(())).unwrap();
        assert!(!exists(&engine, id));
    }

    #[test]
    fn drop_rolls_back() {
        let engine = Arc::new(RelationalEngine::default());
        let id = {
            let mut s = scope(&engine, 1);
            let id = s.create(Document::new()).unwrap().id();
            assert_eq!(s.state(), TransactionState::Active);
            id
        };
        assert!(!exists(&engine, id));
        assert_eq!(engine.pool().in_use(), 0);
    }

    #[test]
    fn panic_rolls_back() {
        let engine = Arc::new(RelationalEngine::default());
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut s = scope(&engine, 1);
            *seen.lock() = Some(s.create(Document::new()).unwrap().id());
            panic!("work panicked");
        }));
        assert!(result.is_err());
        let id = seen.lock().take().unwrap();
        assert!(!exists(&engine, id));
        assert_eq!(engine.pool().in_use(), 0);
    }
}
