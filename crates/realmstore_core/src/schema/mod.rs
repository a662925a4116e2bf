//! Entity kind schemas.
//!
//! A [`KindSchema`] tells engines and compilers how a kind is laid out:
//!
//! - which core fields live in dedicated columns (all other core fields go
//!   to the side-document, encoded as CBOR by engines that persist it),
//! - which deferred field groups exist,
//! - which fields are searchable and where each one physically lives,
//! - the optional sort field for query results,
//! - the current schema version and the migrations leading up to it.

mod migration;

pub use migration::{RenameField, SchemaMigration};

use crate::criteria::SearchableField;
use crate::error::{CoreError, CoreResult};
use crate::types::SchemaVersion;
use realmstore_codec::Document;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Name of the column holding the entity id itself.
pub const ID_COLUMN: &str = "id";

/// Where a searchable field physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMapping {
    /// A native-key column. [`ID_COLUMN`] is the entity id; any other
    /// column holds the textual id of a related entity.
    Identifier {
        /// Column name.
        column: &'static str,
    },
    /// A dedicated column.
    Column {
        /// Column name.
        column: &'static str,
    },
    /// A key of the side-document.
    Document {
        /// Side-document key.
        key: &'static str,
    },
    /// The value of a named entry in a deferred group.
    GroupEntry {
        /// Group name.
        group: &'static str,
        /// Entry name.
        entry: &'static str,
    },
    /// The entry names of a deferred group.
    GroupKey {
        /// Group name.
        group: &'static str,
    },
}

impl FieldMapping {
    /// Returns true for mappings that need a join on a deferred group.
    #[must_use]
    pub const fn is_join(&self) -> bool {
        matches!(
            self,
            FieldMapping::GroupEntry { .. } | FieldMapping::GroupKey { .. }
        )
    }
}

/// Layout description of one entity kind.
pub struct KindSchema {
    name: String,
    version: SchemaVersion,
    columns: BTreeSet<String>,
    groups: BTreeSet<String>,
    searchable: BTreeMap<&'static str, (SearchableField, FieldMapping)>,
    sort_field: Option<String>,
    migrations: Vec<Arc<dyn SchemaMigration>>,
}

impl KindSchema {
    /// Starts a schema for `name` at schema version 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: SchemaVersion::new(1),
            columns: BTreeSet::new(),
            groups: BTreeSet::new(),
            searchable: BTreeMap::new(),
            sort_field: None,
            migrations: Vec::new(),
        }
    }

    /// Sets the current schema version.
    #[must_use]
    pub fn version(mut self, version: SchemaVersion) -> Self {
        self.version = version;
        self
    }

    /// Declares a core field stored in a dedicated column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.insert(name.into());
        self
    }

    /// Declares a deferred field group.
    #[must_use]
    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.groups.insert(name.into());
        self
    }

    /// Declares a searchable field.
    ///
    /// Column-backed mappings also declare their column; group-backed
    /// mappings also declare their group.
    #[must_use]
    pub fn searchable(mut self, field: SearchableField, mapping: FieldMapping) -> Self {
        match mapping {
            FieldMapping::Identifier { column } if column == ID_COLUMN => {}
            FieldMapping::Identifier { column } | FieldMapping::Column { column } => {
                self.columns.insert(column.to_string());
            }
            FieldMapping::Document { .. } => {}
            FieldMapping::GroupEntry { group, .. } | FieldMapping::GroupKey { group } => {
                self.groups.insert(group.to_string());
            }
        }
        self.searchable.insert(field.name(), (field, mapping));
        self
    }

    /// Orders query results by the given core field.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>) -> Self {
        self.sort_field = Some(field.into());
        self
    }

    /// Registers a migration.
    #[must_use]
    pub fn migration(mut self, migration: impl SchemaMigration + 'static) -> Self {
        self.migrations.push(Arc::new(migration));
        self
    }

    /// Kind name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current schema version.
    #[must_use]
    pub fn schema_version(&self) -> SchemaVersion {
        self.version
    }

    /// Returns true if `field` is stored in a dedicated column.
    #[must_use]
    pub fn is_column(&self, field: &str) -> bool {
        self.columns.contains(field)
    }

    /// Dedicated columns.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    /// Deferred groups.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(String::as_str)
    }

    /// Returns true if `group` is declared.
    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Ensures `group` is declared.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] otherwise.
    pub fn check_group(&self, group: &str) -> CoreResult<()> {
        if self.has_group(group) {
            Ok(())
        } else {
            Err(CoreError::unknown_field(&self.name, group))
        }
    }

    /// Looks up a searchable field by name.
    #[must_use]
    pub fn searchable_field(&self, name: &str) -> Option<(SearchableField, FieldMapping)> {
        self.searchable.get(name).copied()
    }

    /// Core field query results are ordered by, if any.
    #[must_use]
    pub fn sort_field(&self) -> Option<&str> {
        self.sort_field.as_deref()
    }

    /// Splits core fields into column values and side-document values.
    #[must_use]
    pub fn split_core(&self, core: &Document) -> (Document, Document) {
        let mut columns = Document::new();
        let mut metadata = Document::new();
        for (name, value) in core {
            if self.is_column(name) {
                columns.insert(name.clone(), value.clone());
            } else {
                metadata.insert(name.clone(), value.clone());
            }
        }
        (columns, metadata)
    }

    /// Brings `core`, stored at `stored`, up to the current version.
    ///
    /// Returns true if any migration ran.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if `stored` is newer than
    /// the current version or the migration chain has a gap.
    pub fn upgrade(&self, stored: SchemaVersion, core: &mut Document) -> CoreResult<bool> {
        migration::migrate(&self.name, &self.migrations, stored, self.version, core)
            .map(|applied| applied > 0)
    }
}

impl fmt::Debug for KindSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindSchema")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("columns", &self.columns)
            .field("groups", &self.groups)
            .field("sort_field", &self.sort_field)
            .finish_non_exhaustive()
    }
}
