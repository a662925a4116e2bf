//! Storage engines.
//!
//! An engine is one physical backend. It stores records for any number of
//! kinds, executes its own compiled queries, and applies write batches
//! atomically with version checks. Engines are `Send + Sync`, shared
//! through `Arc`, and declare what they can do through a [`Capabilities`]
//! set instead of being discovered at runtime.
//!
//! Two engines are provided:
//!
//! - [`RelationalEngine`]: promoted columns, a CBOR side-document and one
//!   child table per deferred group. Supports partial fetches and
//!   pessimistic row locks.
//! - [`ConcurrentMapEngine`]: whole records in a concurrent map. Optimistic
//!   locking only; deferred groups are loaded all at once.

mod connection;
mod locks;
mod map;
mod relational;

pub use connection::{Connection, ConnectionPool};
pub use map::ConcurrentMapEngine;
pub use relational::RelationalEngine;

use crate::criteria::Criteria;
use crate::entity::{CompositeKey, CoreRow, EntityId, EntityRecord};
use crate::error::{CoreError, CoreResult};
use crate::schema::KindSchema;
use crate::stats::EngineStats;
use crate::types::{TransactionId, Version};
use realmstore_codec::Document;
use std::collections::BTreeMap;
use std::fmt;

/// Something an engine can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Create, read, update and remove by id.
    Crud,
    /// Execute compiled criteria.
    CriteriaQuery,
    /// Authoritative credential validation.
    CredentialAuth,
    /// Pessimistic row locks.
    RowLocking,
    /// Fetching a single deferred group.
    PartialFetch,
}

impl Capability {
    const ALL: [Capability; 5] = [
        Capability::Crud,
        Capability::CriteriaQuery,
        Capability::CredentialAuth,
        Capability::RowLocking,
        Capability::PartialFetch,
    ];

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// A set of [`Capability`] values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns the set with `capability` added.
    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Returns true if `capability` is in the set.
    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Members of the set.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Concurrency control a transaction gets from `lock_for_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockingPolicy {
    /// The row is locked until the transaction ends.
    Pessimistic,
    /// No lock was taken; conflicts surface at commit.
    Optimistic,
}

/// Fetches stored fields of single entities.
///
/// This is the part of an engine a lazy delegate needs, kept object safe so
/// delegates can hold `Arc<dyn FieldSource>`.
pub trait FieldSource: Send + Sync {
    /// Fetches the core fields of `id`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable or the stored row
    /// cannot be decoded.
    fn fetch_core(&self, schema: &KindSchema, id: EntityId) -> CoreResult<Option<CoreRow>>;

    /// Fetches one deferred group of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the entity no longer
    /// exists.
    fn fetch_group(&self, schema: &KindSchema, id: EntityId, group: &str) -> CoreResult<Document>;

    /// Fetches every deferred group of `id` at once.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the entity no longer
    /// exists.
    fn fetch_groups(
        &self,
        schema: &KindSchema,
        id: EntityId,
    ) -> CoreResult<BTreeMap<String, Document>>;

    /// Whether `fetch_group` is cheaper than `fetch_groups`.
    fn supports_partial_fetch(&self) -> bool;
}

/// A physical backend.
pub trait StorageEngine: FieldSource + 'static {
    /// Compiled query representation.
    type Query: fmt::Debug + Send;

    /// Backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Declared capabilities.
    fn capabilities(&self) -> Capabilities;

    /// The policy `lock_for_update` applies.
    fn locking_policy(&self) -> LockingPolicy {
        if self.capabilities().contains(Capability::RowLocking) {
            LockingPolicy::Pessimistic
        } else {
            LockingPolicy::Optimistic
        }
    }

    /// Connection pool of the backend.
    fn pool(&self) -> &ConnectionPool;

    /// Compiles `criteria` for this backend.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedCriterion`] for leaves the backend
    /// cannot express.
    fn compile(&self, schema: &KindSchema, criteria: &Criteria) -> CoreResult<Self::Query>;

    /// Runs a compiled query, returning matching core rows.
    ///
    /// Rows come back in backend order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackendUnavailable`] if the connection is lost.
    fn execute(
        &self,
        conn: &Connection,
        schema: &KindSchema,
        query: &Self::Query,
    ) -> CoreResult<Vec<CoreRow>>;

    /// Locks the row of `id` for `owner` until `release_locks(owner)`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if another transaction keeps the
    /// lock past the configured timeout, or `InvalidPriorState` on engines
    /// without [`Capability::RowLocking`].
    fn lock_row(&self, owner: TransactionId, schema: &KindSchema, id: EntityId) -> CoreResult<()> {
        let _ = (owner, id);
        Err(CoreError::invalid_prior_state(format!(
            "{} does not support row locks for {}",
            self.name(),
            schema.name()
        )))
    }

    /// Releases every row lock held by `owner`.
    fn release_locks(&self, owner: TransactionId) {
        let _ = owner;
    }

    /// Applies `batch` atomically.
    ///
    /// Every operation's expected version is checked first. If any check
    /// fails nothing is written and the error lists every offending id.
    /// On success each written entity's version advances by exactly one.
    ///
    /// # Errors
    ///
    /// - [`CoreError::OptimisticLockConflict`] on stale versions.
    /// - [`CoreError::LockTimeout`] if a row stays locked by another
    ///   transaction.
    /// - [`CoreError::BackendUnavailable`] if the connection is lost.
    fn apply(
        &self,
        conn: &Connection,
        owner: TransactionId,
        schema: &KindSchema,
        batch: &WriteBatch,
    ) -> CoreResult<Vec<(EntityId, Version)>>;

    /// Returns the stored join record equal to `key` in `relation`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackendUnavailable`] if the backend is down.
    fn find_relation(&self, relation: &str, key: CompositeKey) -> CoreResult<Option<CompositeKey>>;

    /// Children of `parent` in `relation`, ordered by child id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackendUnavailable`] if the backend is down.
    fn children_of(&self, relation: &str, parent: EntityId) -> CoreResult<Vec<EntityId>>;

    /// Engine counters.
    fn stats(&self) -> &EngineStats;
}

/// One staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Store a new entity at version 1.
    Insert(EntityRecord),
    /// Replace an entity currently at `expected`.
    Update {
        /// New contents.
        record: EntityRecord,
        /// Version the transaction read.
        expected: Version,
    },
    /// Delete an entity currently at `expected`.
    Remove {
        /// Entity to remove.
        id: EntityId,
        /// Version the transaction read.
        expected: Version,
    },
}

impl WriteOp {
    /// The entity written.
    #[must_use]
    pub fn id(&self) -> EntityId {
        match self {
            WriteOp::Insert(record) | WriteOp::Update { record, .. } => record.id,
            WriteOp::Remove { id, .. } => *id,
        }
    }
}

/// A staged change to a join relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationChange {
    /// Add the pair. Adding an existing pair is a no-op.
    Add(CompositeKey),
    /// Remove the pair.
    Remove(CompositeKey),
}

/// Everything a transaction commits, applied all or nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    /// Entity writes.
    pub ops: Vec<WriteOp>,
    /// Relation changes, keyed by relation name.
    pub relations: Vec<(String, RelationChange)>,
}

impl WriteBatch {
    /// Returns true if the batch writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.relations.is_empty()
    }

    /// Ids of every written entity.
    #[must_use]
    pub fn ids(&self) -> Vec<EntityId> {
        self.ops.iter().map(WriteOp::id).collect()
    }
}

/// Checks every op of `batch` against `current`, the committed version of
/// each id (or `None` if absent). Returns the ids whose check fails.
pub(crate) fn stale_ids(
    batch: &WriteBatch,
    mut current: impl FnMut(EntityId) -> Option<Version>,
) -> Vec<EntityId> {
    batch
        .ops
        .iter()
        .filter(|op| match op {
            WriteOp::Insert(record) => current(record.id).is_some(),
            WriteOp::Update { record, expected } => current(record.id) != Some(*expected),
            WriteOp::Remove { id, expected } => current(*id) != Some(*expected),
        })
        .map(WriteOp::id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SchemaVersion;

    #[test]
    fn capability_sets() {
        let caps: Capabilities = [Capability::Crud, Capability::PartialFetch]
            .into_iter()
            .collect();
        assert!(caps.contains(Capability::Crud));
        assert!(caps.contains(Capability::PartialFetch));
        assert!(!caps.contains(Capability::RowLocking));
        assert_eq!(caps.iter().count(), 2);
        assert!(!Capabilities::empty().contains(Capability::Crud));
    }

    #[test]
    fn stale_ids_reports_every_mismatch() {
        let fresh = EntityId::from_bytes([1; 16]);
        let stale = EntityId::from_bytes([2; 16]);
        let gone = EntityId::from_bytes([3; 16]);
        let record = |id| {
            EntityRecord::new(
                id,
                Version::new(1),
                SchemaVersion::new(1),
                Document::new(),
                BTreeMap::new(),
            )
        };
        let batch = WriteBatch {
            ops: vec![
                WriteOp::Update {
                    record: record(fresh),
                    expected: Version::new(1),
                },
                WriteOp::Update {
                    record: record(stale),
                    expected: Version::new(1),
                },
                WriteOp::Remove {
                    id: gone,
                    expected: Version::new(1),
                },
            ],
            relations: Vec::new(),
        };
        let versions = |id: EntityId| {
            if id == gone {
                None
            } else if id == stale {
                Some(Version::new(2))
            } else {
                Some(Version::new(1))
            }
        };
        assert_eq!(stale_ids(&batch, versions), vec![stale, gone]);
    }
}
