//! Transaction state and staged writes.

use crate::engine::{RelationChange, WriteBatch, WriteOp};
use crate::entity::{CompositeKey, EntityId, EntityRecord};
use crate::error::{CoreError, CoreResult};
use crate::types::Version;
use std::collections::HashMap;

/// State of a storage transaction.
///
/// `NotStarted -> Active -> {Committed, RolledBack}`. Terminal states are
/// final: a transaction is used once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Opened but `begin()` not called yet.
    NotStarted,
    /// Holding a connection and accepting operations.
    Active,
    /// Writes applied.
    Committed,
    /// Writes discarded.
    RolledBack,
}

impl TransactionState {
    /// Ensures the transaction accepts operations.
    pub(crate) fn ensure_active(self) -> CoreResult<()> {
        match self {
            TransactionState::Active => Ok(()),
            TransactionState::NotStarted => {
                Err(CoreError::invalid_prior_state("transaction not started"))
            }
            TransactionState::Committed => {
                Err(CoreError::invalid_prior_state("transaction already committed"))
            }
            TransactionState::RolledBack => {
                Err(CoreError::invalid_prior_state("transaction already rolled back"))
            }
        }
    }

    /// Returns true for `Committed` and `RolledBack`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack
        )
    }
}

/// A staged write to one entity.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Staged {
    /// Created in this transaction.
    Insert(EntityRecord),
    /// Modified; `expected` is the version first read.
    Update {
        record: EntityRecord,
        expected: Version,
    },
    /// Removed; `expected` is the version first read.
    Remove { expected: Version },
}

/// Writes staged by a transaction, in first-touched order.
#[derive(Debug, Default)]
pub(crate) struct WriteSet {
    entries: HashMap<EntityId, Staged>,
    order: Vec<EntityId>,
    relations: Vec<(String, RelationChange)>,
}

impl WriteSet {
    pub(crate) fn get(&self, id: EntityId) -> Option<&Staged> {
        self.entries.get(&id)
    }

    pub(crate) fn insert(&mut self, record: EntityRecord) {
        self.touch(record.id);
        self.entries.insert(record.id, Staged::Insert(record));
    }

    /// Stages an update of `record`, read at `expected`.
    pub(crate) fn update(&mut self, record: EntityRecord, expected: Version) -> CoreResult<()> {
        let id = record.id;
        let staged = match self.entries.get(&id) {
            Some(Staged::Insert(_)) => Staged::Insert(record),
            Some(Staged::Update { expected, .. }) => Staged::Update {
                record,
                expected: *expected,
            },
            Some(Staged::Remove { .. }) => {
                return Err(CoreError::invalid_prior_state(format!(
                    "{id} was removed in this transaction"
                )))
            }
            None => Staged::Update { record, expected },
        };
        self.touch(id);
        self.entries.insert(id, staged);
        Ok(())
    }

    /// Stages removal of `id`, read at `expected`. Returns false if it was
    /// already removed.
    pub(crate) fn remove(&mut self, id: EntityId, expected: Version) -> bool {
        match self.entries.get(&id) {
            Some(Staged::Remove { .. }) => false,
            Some(Staged::Insert(_)) => {
                self.entries.remove(&id);
                self.order.retain(|o| *o != id);
                true
            }
            Some(Staged::Update { expected, .. }) => {
                let expected = *expected;
                self.entries.insert(id, Staged::Remove { expected });
                true
            }
            None => {
                self.touch(id);
                self.entries.insert(id, Staged::Remove { expected });
                true
            }
        }
    }

    pub(crate) fn stage_relation(&mut self, relation: &str, change: RelationChange) {
        self.relations.push((relation.to_string(), change));
    }

    /// The latest staged change for `key` in `relation`.
    pub(crate) fn relation_change(&self, relation: &str, key: CompositeKey) -> Option<RelationChange> {
        self.relations
            .iter()
            .rev()
            .find(|(name, change)| {
                name == relation
                    && match change {
                        RelationChange::Add(k) | RelationChange::Remove(k) => *k == key,
                    }
            })
            .map(|(_, change)| *change)
    }

    pub(crate) fn relation_changes<'a>(
        &'a self,
        relation: &'a str,
    ) -> impl Iterator<Item = RelationChange> + 'a {
        self.relations
            .iter()
            .filter(move |(name, _)| name == relation)
            .map(|(_, change)| *change)
    }

    /// Staged inserts and updates, in first-touched order.
    pub(crate) fn live_records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.order
            .iter()
            .filter_map(|id| match self.entries.get(id) {
                Some(Staged::Insert(record) | Staged::Update { record, .. }) => Some(record),
                _ => None,
            })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len() + self.relations.len()
    }

    pub(crate) fn to_batch(&self) -> WriteBatch {
        let ops = self
            .order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|staged| (id, staged)))
            .map(|(id, staged)| match staged {
                Staged::Insert(record) => WriteOp::Insert(record.clone()),
                Staged::Update { record, expected } => WriteOp::Update {
                    record: record.clone(),
                    expected: *expected,
                },
                Staged::Remove { expected } => WriteOp::Remove {
                    id: *id,
                    expected: *expected,
                },
            })
            .collect();
        WriteBatch {
            ops,
            relations: self.relations.clone(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.relations.clear();
    }

    fn touch(&mut self, id: EntityId) {
        if !self.entries.contains_key(&id) {
            self.order.push(id);
        }
    }
}
