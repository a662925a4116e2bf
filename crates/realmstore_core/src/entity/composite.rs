//! Composite-key join records.
//!
//! Many-to-many relations (a composite role and its child roles, for
//! example) are stored as join records keyed by the ordered pair
//! `(parent, child)`. Two records are equal when their pairs are equal, no
//! matter how they were constructed, so inserting the same pair twice can
//! never produce two records.

use crate::entity::EntityId;
use std::collections::BTreeSet;
use std::fmt;

/// Key of a join record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeKey {
    parent: EntityId,
    child: EntityId,
}

impl CompositeKey {
    /// Creates a key for `parent -> child`.
    #[must_use]
    pub const fn new(parent: EntityId, child: EntityId) -> Self {
        Self { parent, child }
    }

    /// The composite (owning) side.
    #[must_use]
    pub const fn parent(&self) -> EntityId {
        self.parent
    }

    /// The child side.
    #[must_use]
    pub const fn child(&self) -> EntityId {
        self.child
    }
}

impl fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CompositeKey [parent={}, child={}]",
            self.parent, self.child
        )
    }
}

/// A set of join records for one relation.
///
/// Ordered by `(parent, child)`, so the children of a parent come out in
/// child id order.
#[derive(Debug, Default, Clone)]
pub struct RelationTable {
    pairs: BTreeSet<CompositeKey>,
}

impl RelationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pair. Returns `false` if it was already present.
    pub fn insert(&mut self, key: CompositeKey) -> bool {
        self.pairs.insert(key)
    }

    /// Removes a pair. Returns `false` if it was absent.
    pub fn remove(&mut self, key: &CompositeKey) -> bool {
        self.pairs.remove(key)
    }

    /// Returns the stored record equal to `key`.
    #[must_use]
    pub fn find(&self, key: &CompositeKey) -> Option<CompositeKey> {
        self.pairs.get(key).copied()
    }

    /// Children of `parent`, ordered by child id.
    pub fn children_of(&self, parent: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        let lo = CompositeKey::new(parent, EntityId::from_bytes([0; 16]));
        let hi = CompositeKey::new(parent, EntityId::from_bytes([0xff; 16]));
        self.pairs.range(lo..=hi).map(|k| k.child)
    }

    /// Removes every record whose parent or child is `id`.
    pub fn remove_entity(&mut self, id: EntityId) -> usize {
        let before = self.pairs.len();
        self.pairs.retain(|k| k.parent != id && k.child != id);
        before - self.pairs.len()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn id(b: u8) -> EntityId {
        EntityId::from_bytes([b; 16])
    }

    #[test]
    fn equality_and_hash_follow_the_pair() {
        let a = CompositeKey::new(id(1), id(2));
        let b = CompositeKey::new(id(1), id(2));
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(a, b);
        assert_eq!(set.len(), 1);
        assert_ne!(a, CompositeKey::new(id(2), id(1)));
    }

    #[test]
    fn double_insert_keeps_one_record() {
        let mut table = RelationTable::new();
        assert!(table.insert(CompositeKey::new(id(1), id(2))));
        assert!(!table.insert(CompositeKey::new(id(1), id(2))));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.find(&CompositeKey::new(id(1), id(2))),
            Some(CompositeKey::new(id(1), id(2)))
        );
    }

    #[test]
    fn children_are_ordered_by_child_id() {
        let mut table = RelationTable::new();
        table.insert(CompositeKey::new(id(1), id(9)));
        table.insert(CompositeKey::new(id(1), id(3)));
        table.insert(CompositeKey::new(id(2), id(4)));
        table.insert(CompositeKey::new(id(1), id(5)));

        let children: Vec<_> = table.children_of(id(1)).collect();
        assert_eq!(children, vec![id(3), id(5), id(9)]);
    }

    #[test]
    fn remove_entity_drops_both_sides() {
        let mut table = RelationTable::new();
        table.insert(CompositeKey::new(id(1), id(2)));
        table.insert(CompositeKey::new(id(2), id(3)));
        table.insert(CompositeKey::new(id(4), id(5)));
        assert_eq!(table.remove_entity(id(2)), 2);
        assert_eq!(table.len(), 1);
    }
}
