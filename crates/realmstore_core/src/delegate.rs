//! Lazily materialized entities.
//!
//! A [`Delegate`] is one entity as seen by one transaction. It starts with
//! as little as its id, loads its core fields on first access and each
//! deferred field group on first access to that group. The state only moves
//! forward:
//!
//! ```text
//! Unloaded ──► PartiallyLoaded(core, loaded groups) ──► FullyLoaded
//! ```
//!
//! Reading a core field never fetches a deferred group. Reading a group
//! fetches it exactly once (or, on engines without partial fetches, fetches
//! everything still missing at once). Writes materialize the whole entity
//! first so the staged record is complete.

use crate::engine::FieldSource;
use crate::entity::{CoreRow, EntityId, EntityRecord};
use crate::error::{CoreError, CoreResult};
use crate::schema::KindSchema;
use crate::types::{SchemaVersion, TransactionId, Version};
use realmstore_codec::{Document, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How much of an entity a delegate holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadState {
    /// Only the id is known.
    Unloaded,
    /// Core fields and some deferred groups are loaded.
    PartiallyLoaded,
    /// Everything is loaded.
    FullyLoaded,
}

#[derive(Debug, Clone, Default)]
struct Loaded {
    core: Document,
    groups: BTreeMap<String, Document>,
}

#[derive(Debug)]
enum State {
    Unloaded,
    PartiallyLoaded(Loaded),
    FullyLoaded(Loaded),
}

/// An entity bound to one storage transaction.
pub struct Delegate {
    id: EntityId,
    owner: TransactionId,
    schema: Arc<KindSchema>,
    source: Arc<dyn FieldSource>,
    version: Version,
    stored_schema: SchemaVersion,
    state: State,
    fetches: u64,
    dirty: bool,
}

impl Delegate {
    /// A delegate knowing only its id.
    pub(crate) fn unloaded(
        id: EntityId,
        owner: TransactionId,
        schema: Arc<KindSchema>,
        source: Arc<dyn FieldSource>,
    ) -> Self {
        let stored_schema = schema.schema_version();
        Self {
            id,
            owner,
            schema,
            source,
            version: Version::UNCOMMITTED,
            stored_schema,
            state: State::Unloaded,
            fetches: 0,
            dirty: false,
        }
    }

    /// A delegate over a fetched core row, migrated to the current layout.
    pub(crate) fn from_core(
        row: CoreRow,
        owner: TransactionId,
        schema: Arc<KindSchema>,
        source: Arc<dyn FieldSource>,
    ) -> CoreResult<Self> {
        let mut delegate = Self::unloaded(row.id, owner, schema, source);
        delegate.adopt(row)?;
        Ok(delegate)
    }

    /// A fully loaded delegate over a complete record.
    pub(crate) fn from_record(
        record: EntityRecord,
        owner: TransactionId,
        schema: Arc<KindSchema>,
        source: Arc<dyn FieldSource>,
    ) -> Self {
        let mut delegate = Self::unloaded(record.id, owner, schema, source);
        delegate.version = record.version;
        delegate.stored_schema = record.schema_version;
        delegate.state = State::FullyLoaded(Loaded {
            core: record.core,
            groups: record.groups,
        });
        delegate
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Entity kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.schema.name()
    }

    /// Version this delegate was read at. `UNCOMMITTED` for entities created
    /// in the current transaction or not loaded yet.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Schema version of the stored record before any migration on read.
    #[must_use]
    pub fn stored_schema_version(&self) -> SchemaVersion {
        self.stored_schema
    }

    /// Transaction this delegate belongs to.
    #[must_use]
    pub fn owner(&self) -> TransactionId {
        self.owner
    }

    /// Current load state.
    #[must_use]
    pub fn load_state(&self) -> LoadState {
        match self.state {
            State::Unloaded => LoadState::Unloaded,
            State::PartiallyLoaded(_) => LoadState::PartiallyLoaded,
            State::FullyLoaded(_) => LoadState::FullyLoaded,
        }
    }

    /// Returns true once every field and group is in memory.
    #[must_use]
    pub fn is_fully_loaded(&self) -> bool {
        matches!(self.state, State::FullyLoaded(_))
    }

    /// Returns true if a group is in memory.
    #[must_use]
    pub fn is_group_loaded(&self, group: &str) -> bool {
        self.loaded().is_some_and(|l| l.groups.contains_key(group))
    }

    /// Returns true if fields changed since the last `update`.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Backend fetches issued by this delegate.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches
    }

    /// Reads a core field, loading core fields if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the entity was removed,
    /// or a backend error from the fetch.
    pub fn get(&mut self, field: &str) -> CoreResult<Option<&Value>> {
        Ok(self.core()?.get(field))
    }

    /// Reads a text core field.
    ///
    /// # Errors
    ///
    /// See [`Delegate::get`].
    pub fn get_text(&mut self, field: &str) -> CoreResult<Option<String>> {
        Ok(self.get(field)?.and_then(Value::as_text).map(str::to_string))
    }

    /// Reads an integer core field.
    ///
    /// # Errors
    ///
    /// See [`Delegate::get`].
    pub fn get_integer(&mut self, field: &str) -> CoreResult<Option<i64>> {
        Ok(self.get(field)?.and_then(Value::as_integer))
    }

    /// All core fields, loading them if needed.
    ///
    /// # Errors
    ///
    /// See [`Delegate::get`].
    pub fn core(&mut self) -> CoreResult<&Document> {
        self.ensure_core()?;
        self.loaded()
            .map(|l| &l.core)
            .ok_or_else(|| self.not_loaded())
    }

    /// Reads a deferred group, fetching it on first access.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] if the kind has no such group,
    /// [`CoreError::InvalidPriorState`] if the entity was removed, or a
    /// backend error from the fetch.
    pub fn group(&mut self, group: &str) -> CoreResult<&Document> {
        self.schema.check_group(group)?;
        self.ensure_core()?;
        if !self.is_group_loaded(group) {
            if self.source.supports_partial_fetch() {
                let doc = self.source.fetch_group(&self.schema, self.id, group)?;
                self.fetches += 1;
                self.add_groups(BTreeMap::from([(group.to_string(), doc)]));
            } else {
                self.load_missing_groups()?;
            }
        }
        self.loaded()
            .and_then(|l| l.groups.get(group))
            .ok_or_else(|| self.not_loaded())
    }

    /// Reads one entry of a deferred group.
    ///
    /// # Errors
    ///
    /// See [`Delegate::group`].
    pub fn group_entry(&mut self, group: &str, entry: &str) -> CoreResult<Option<&Value>> {
        Ok(self.group(group)?.get(entry))
    }

    /// Sets a core field. Materializes the whole entity first.
    ///
    /// Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if materialization fails.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> CoreResult<Option<Value>> {
        let loaded = self.materialize_mut()?;
        let previous = loaded.core.insert(field, value);
        self.dirty = true;
        Ok(previous)
    }

    /// Removes a core field. Materializes the whole entity first.
    ///
    /// # Errors
    ///
    /// Returns an error if materialization fails.
    pub fn unset(&mut self, field: &str) -> CoreResult<Option<Value>> {
        let loaded = self.materialize_mut()?;
        let previous = loaded.core.remove(field);
        self.dirty = true;
        Ok(previous)
    }

    /// Sets an entry of a deferred group. Materializes the whole entity
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] for undeclared groups, or an
    /// error if materialization fails.
    pub fn set_group_entry(
        &mut self,
        group: &str,
        entry: &str,
        value: impl Into<Value>,
    ) -> CoreResult<Option<Value>> {
        self.schema.check_group(group)?;
        let loaded = self.materialize_mut()?;
        let previous = loaded
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(entry, value);
        self.dirty = true;
        Ok(previous)
    }

    /// Removes an entry of a deferred group. Materializes the whole entity
    /// first.
    ///
    /// # Errors
    ///
    /// See [`Delegate::set_group_entry`].
    pub fn remove_group_entry(&mut self, group: &str, entry: &str) -> CoreResult<Option<Value>> {
        self.schema.check_group(group)?;
        let loaded = self.materialize_mut()?;
        let previous = loaded.groups.get_mut(group).and_then(|g| g.remove(entry));
        self.dirty = true;
        Ok(previous)
    }

    /// Replaces a whole deferred group. Materializes the whole entity first.
    ///
    /// Returns the previous contents.
    ///
    /// # Errors
    ///
    /// See [`Delegate::set_group_entry`].
    pub fn replace_group(&mut self, group: &str, contents: Document) -> CoreResult<Document> {
        self.schema.check_group(group)?;
        let loaded = self.materialize_mut()?;
        let previous = loaded
            .groups
            .insert(group.to_string(), contents)
            .unwrap_or_default();
        self.dirty = true;
        Ok(previous)
    }

    /// Loads everything still missing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the entity was removed,
    /// or a backend error.
    pub fn materialize(&mut self) -> CoreResult<()> {
        self.materialize_mut().map(|_| ())
    }

    /// Copies the fully loaded entity into a record.
    pub(crate) fn to_record(&mut self) -> CoreResult<EntityRecord> {
        let schema_version = self.schema.schema_version();
        self.materialize_mut()?;
        let (id, version) = (self.id, self.version);
        let loaded = self.materialize_mut()?;
        Ok(EntityRecord::new(
            id,
            version,
            schema_version,
            loaded.core.clone(),
            loaded.groups.clone(),
        ))
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn loaded(&self) -> Option<&Loaded> {
        match &self.state {
            State::Unloaded => None,
            State::PartiallyLoaded(l) | State::FullyLoaded(l) => Some(l),
        }
    }

    fn not_loaded(&self) -> CoreError {
        CoreError::invalid_prior_state(format!("{} {} is not loaded", self.kind(), self.id))
    }

    fn adopt(&mut self, row: CoreRow) -> CoreResult<()> {
        let mut core = row.core;
        if self.schema.upgrade(row.schema_version, &mut core)? {
            tracing::debug!(
                kind = self.schema.name(),
                id = %self.id,
                from = %row.schema_version,
                to = %self.schema.schema_version(),
                "upgraded record on read"
            );
        }
        self.version = row.version;
        self.stored_schema = row.schema_version;
        self.state = State::PartiallyLoaded(Loaded {
            core,
            groups: BTreeMap::new(),
        });
        self.promote();
        Ok(())
    }

    fn ensure_core(&mut self) -> CoreResult<()> {
        if matches!(self.state, State::Unloaded) {
            let row = self
                .source
                .fetch_core(&self.schema, self.id)?
                .ok_or_else(|| {
                    CoreError::invalid_prior_state(format!(
                        "{} {} was removed",
                        self.schema.name(),
                        self.id
                    ))
                })?;
            self.fetches += 1;
            self.adopt(row)?;
        }
        Ok(())
    }

    fn load_missing_groups(&mut self) -> CoreResult<()> {
        let missing = self
            .schema
            .groups()
            .any(|g| !self.is_group_loaded(g));
        if missing {
            let groups = self.source.fetch_groups(&self.schema, self.id)?;
            self.fetches += 1;
            self.add_groups(groups);
        }
        self.promote();
        Ok(())
    }

    fn materialize_mut(&mut self) -> CoreResult<&mut Loaded> {
        self.ensure_core()?;
        if !self.is_fully_loaded() {
            self.load_missing_groups()?;
        }
        match &mut self.state {
            State::FullyLoaded(l) => Ok(l),
            _ => Err(CoreError::invalid_prior_state(format!(
                "{} {} could not be fully loaded",
                self.schema.name(),
                self.id
            ))),
        }
    }

    /// Adds fetched groups, keeping any already in memory.
    fn add_groups(&mut self, groups: BTreeMap<String, Document>) {
        if let State::PartiallyLoaded(l) = &mut self.state {
            for (name, doc) in groups {
                l.groups.entry(name).or_insert(doc);
            }
        }
        self.promote();
    }

    fn promote(&mut self) {
        let complete = match &self.state {
            State::PartiallyLoaded(l) => self.schema.groups().all(|g| l.groups.contains_key(g)),
            _ => false,
        };
        if complete {
            if let State::PartiallyLoaded(l) = std::mem::replace(&mut self.state, State::Unloaded) {
                self.state = State::FullyLoaded(l);
            }
        }
    }
}

impl fmt::Debug for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate")
            .field("kind", &self.schema.name())
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.load_state())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConcurrentMapEngine, RelationalEngine, StorageEngine};
    use crate::schema::RenameField;

    const OWNER: TransactionId = TransactionId(1);

    fn schema() -> Arc<KindSchema> {
        Arc::new(
            KindSchema::new("sample")
                .version(SchemaVersion::new(2))
                .column("user_id")
                .group("notes")
                .group("children")
                .migration(RenameField::new(SchemaVersion::new(1), "uid", "user_id")),
        )
    }

    fn stored(id: EntityId, schema_version: u32, user_field: &str) -> EntityRecord {
        let mut core = Document::new();
        core.insert(user_field, "u1");
        let mut notes = Document::new();
        notes.insert("k", "v");
        let mut children = Document::new();
        children.insert("c", "1");
        EntityRecord::new(
            id,
            Version::new(3),
            SchemaVersion::new(schema_version),
            core,
            BTreeMap::from([
                ("notes".to_string(), notes),
                ("children".to_string(), children),
            ]),
        )
    }

    fn relational(schema: &KindSchema, record: EntityRecord) -> Arc<RelationalEngine> {
        let engine = Arc::new(RelationalEngine::default());
        engine.load_record(schema, record).unwrap();
        engine
    }

    #[test]
    fn core_read_never_fetches_groups() {
        let schema = schema();
        let id = EntityId::new();
        let engine = relational(&schema, stored(id, 2, "user_id"));
        let mut d = Delegate::unloaded(id, OWNER, Arc::clone(&schema), engine.clone());

        assert_eq!(d.load_state(), LoadState::Unloaded);
        assert_eq!(d.get_text("user_id").unwrap().as_deref(), Some("u1"));
        assert_eq!(d.load_state(), LoadState::PartiallyLoaded);
        assert_eq!(d.version(), Version::new(3));
        assert_eq!(d.fetch_count(), 1);
        assert_eq!(engine.stats().snapshot().deferred_fetches(), 0);
    }

    #[test]
    fn group_is_fetched_exactly_once() {
        let schema = schema();
        let id = EntityId::new();
        let engine = relational(&schema, stored(id, 2, "user_id"));
        let row = engine.fetch_core(&schema, id).unwrap().unwrap();
        let mut d = Delegate::from_core(row, OWNER, Arc::clone(&schema), engine.clone()).unwrap();

        assert_eq!(d.group_entry("notes", "k").unwrap(), Some(&Value::from("v")));
        assert_eq!(d.fetch_count(), 1);
        d.group("notes").unwrap();
        assert_eq!(d.fetch_count(), 1);
        assert!(!d.is_group_loaded("children"));
        assert_eq!(d.load_state(), LoadState::PartiallyLoaded);

        d.group("children").unwrap();
        assert_eq!(d.fetch_count(), 2);
        assert_eq!(d.load_state(), LoadState::FullyLoaded);
        assert_eq!(engine.stats().snapshot().group_fetches, 2);
    }

    #[test]
    fn engine_without_partial_fetch_loads_all_groups() {
        let schema = schema();
        let id = EntityId::new();
        let engine = Arc::new(ConcurrentMapEngine::default());
        engine.load_record(&schema, stored(id, 2, "user_id"));
        let mut d = Delegate::unloaded(id, OWNER, Arc::clone(&schema), engine.clone());

        d.group("notes").unwrap();
        assert!(d.is_fully_loaded());
        d.group("children").unwrap();
        assert_eq!(d.fetch_count(), 2);
        assert_eq!(engine.stats().snapshot().full_fetches, 1);
    }

    #[test]
    fn write_materializes_everything_once() {
        let schema = schema();
        let id = EntityId::new();
        let engine = relational(&schema, stored(id, 2, "user_id"));
        let mut d = Delegate::unloaded(id, OWNER, Arc::clone(&schema), engine.clone());
        d.get("user_id").unwrap();
        d.group("notes").unwrap();
        assert_eq!(d.fetch_count(), 2);

        d.set("user_id", "u2").unwrap();
        assert!(d.is_fully_loaded());
        assert!(d.is_dirty());
        assert_eq!(d.fetch_count(), 3);
        // Already loaded groups are kept, not refetched over.
        assert_eq!(d.group_entry("children", "c").unwrap(), Some(&Value::from("1")));
        d.set_group_entry("notes", "k", "w").unwrap();
        assert_eq!(d.fetch_count(), 3);
    }

    #[test]
    fn old_records_are_migrated_on_read() {
        let schema = schema();
        let id = EntityId::new();
        let engine = relational(&schema, stored(id, 1, "uid"));
        let mut d = Delegate::unloaded(id, OWNER, Arc::clone(&schema), engine);
        assert_eq!(d.get_text("user_id").unwrap().as_deref(), Some("u1"));
        assert_eq!(d.stored_schema_version(), SchemaVersion::new(1));
        let record = d.to_record().unwrap();
        assert_eq!(record.schema_version, SchemaVersion::new(2));
    }

    #[test]
    fn newer_layout_is_rejected() {
        let schema = schema();
        let id = EntityId::new();
        let engine = relational(&schema, stored(id, 3, "user_id"));
        let mut d = Delegate::unloaded(id, OWNER, Arc::clone(&schema), engine);
        assert!(matches!(
            d.get("user_id"),
            Err(CoreError::InvalidPriorState { .. })
        ));
    }

    #[test]
    fn missing_entity_and_unknown_group() {
        let schema = schema();
        let engine = Arc::new(RelationalEngine::default());
        let mut d = Delegate::unloaded(EntityId::new(), OWNER, Arc::clone(&schema), engine);
        assert!(matches!(
            d.get("user_id"),
            Err(CoreError::InvalidPriorState { .. })
        ));
        assert!(matches!(
            d.group("nope"),
            Err(CoreError::UnknownField { .. })
        ));
    }
}
