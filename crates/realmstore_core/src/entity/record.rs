//! Versioned entity records.

use crate::entity::EntityId;
use crate::types::{SchemaVersion, Version};
use realmstore_codec::{Document, Value};
use std::collections::BTreeMap;

/// A fully materialized entity.
///
/// `core` holds the always-loaded fields, whether an engine stores them in
/// dedicated columns or in the side-document. `groups` holds every deferred
/// field group by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    /// Entity identifier.
    pub id: EntityId,
    /// Version the record was read at (or will be written over).
    pub version: Version,
    /// Layout the fields follow.
    pub schema_version: SchemaVersion,
    /// Always-loaded fields.
    pub core: Document,
    /// Deferred field groups.
    pub groups: BTreeMap<String, Document>,
}

impl EntityRecord {
    /// Creates a record.
    pub fn new(
        id: EntityId,
        version: Version,
        schema_version: SchemaVersion,
        core: Document,
        groups: BTreeMap<String, Document>,
    ) -> Self {
        Self {
            id,
            version,
            schema_version,
            core,
            groups,
        }
    }

    /// Returns a core field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.core.get(name)
    }

    /// Returns a deferred group.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&Document> {
        self.groups.get(name)
    }

    /// Splits the record into its core row and its deferred groups.
    #[must_use]
    pub fn into_parts(self) -> (CoreRow, BTreeMap<String, Document>) {
        (
            CoreRow {
                id: self.id,
                version: self.version,
                schema_version: self.schema_version,
                core: self.core,
            },
            self.groups,
        )
    }
}

/// The always-loaded part of a stored entity.
///
/// Engines return core rows from point reads and queries; deferred groups
/// are fetched separately on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreRow {
    /// Entity identifier.
    pub id: EntityId,
    /// Committed version.
    pub version: Version,
    /// Layout the stored fields follow.
    pub schema_version: SchemaVersion,
    /// Core fields.
    pub core: Document,
}

impl CoreRow {
    /// Joins the row with its groups into a full record.
    #[must_use]
    pub fn with_groups(self, groups: BTreeMap<String, Document>) -> EntityRecord {
        EntityRecord::new(
            self.id,
            self.version,
            self.schema_version,
            self.core,
            groups,
        )
    }
}
