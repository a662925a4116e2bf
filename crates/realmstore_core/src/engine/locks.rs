//! Pessimistic row locks.
//!
//! A row lock is owned by one transaction until that transaction ends.
//! Other transactions block in `lock` and in commit until the owner
//! releases, or fail with [`CoreError::LockTimeout`].
//!
//! Lock order: the lock table is always taken before any engine table, and
//! commits apply their writes while still holding the lock table guard
//! returned by [`RowLocks::wait_unlocked`].

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::time::{Duration, Instant};

type LockKey = (String, EntityId);

/// Guard over the lock table, held while a commit applies its writes.
pub(crate) type LockTableGuard<'a> = MutexGuard<'a, HashMap<LockKey, TransactionId>>;

/// Row lock table of one engine.
#[derive(Debug)]
pub(crate) struct RowLocks {
    owners: Mutex<HashMap<LockKey, TransactionId>>,
    released: Condvar,
    timeout: Duration,
}

impl RowLocks {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            owners: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Takes the lock on `(kind, id)` for `owner`. Re-entrant.
    pub(crate) fn lock(&self, owner: TransactionId, kind: &str, id: EntityId) -> CoreResult<()> {
        let key = (kind.to_string(), id);
        let deadline = Instant::now() + self.timeout;
        let mut owners = self.owners.lock();
        loop {
            match owners.get(&key).copied() {
                None => {
                    owners.insert(key, owner);
                    tracing::trace!(txid = %owner, kind, %id, "row lock taken");
                    return Ok(());
                }
                Some(holder) if holder == owner => return Ok(()),
                Some(holder) => {
                    tracing::debug!(txid = %owner, holder = %holder, kind, %id, "waiting for row lock");
                    if self.released.wait_until(&mut owners, deadline).timed_out()
                        && owners.get(&key).is_some_and(|h| *h != owner)
                    {
                        return Err(CoreError::LockTimeout { id });
                    }
                }
            }
        }
    }

    /// Waits until none of `ids` is locked by a transaction other than
    /// `owner`, then returns the lock table guard.
    pub(crate) fn wait_unlocked(
        &self,
        owner: TransactionId,
        kind: &str,
        ids: &[EntityId],
    ) -> CoreResult<LockTableGuard<'_>> {
        let deadline = Instant::now() + self.timeout;
        let mut owners = self.owners.lock();
        loop {
            let blocked = ids.iter().find(|id| {
                owners
                    .get(&(kind.to_string(), **id))
                    .is_some_and(|holder| *holder != owner)
            });
            let Some(&id) = blocked else {
                return Ok(owners);
            };
            tracing::debug!(txid = %owner, kind, %id, "commit waiting for row lock");
            if self.released.wait_until(&mut owners, deadline).timed_out() {
                let still_blocked = owners
                    .get(&(kind.to_string(), id))
                    .is_some_and(|holder| *holder != owner);
                if still_blocked {
                    return Err(CoreError::LockTimeout { id });
                }
            }
        }
    }

    /// Releases every lock held by `owner`. Returns how many were held.
    pub(crate) fn release_all(&self, owner: TransactionId) -> usize {
        let mut owners = self.owners.lock();
        let before = owners.len();
        owners.retain(|_, holder| *holder != owner);
        let released = before - owners.len();
        if released > 0 {
            self.released.notify_all();
            tracing::trace!(txid = %owner, released, "row locks released");
        }
        released
    }

    pub(crate) fn holder(&self, kind: &str, id: EntityId) -> Option<TransactionId> {
        self.owners.lock().get(&(kind.to_string(), id)).copied()
    }
}
