//! Storage transactions.

use super::state::{Staged, TransactionState, WriteSet};
use crate::compiler::{CriteriaCompiler, MapCompiler};
use crate::criteria::Criteria;
use crate::delegate::Delegate;
use crate::engine::{Connection, FieldSource, LockingPolicy, RelationChange, StorageEngine};
use crate::entity::{CompositeKey, CoreRow, EntityId, EntityRecord};
use crate::error::{CoreError, CoreResult};
use crate::schema::KindSchema;
use crate::types::{TransactionId, Version};
use realmstore_codec::Document;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A unit of work over one entity kind.
///
/// Single use: `NotStarted -> Active -> {Committed, RolledBack}`. While
/// active it owns one engine connection. Writes are staged in memory and
/// applied atomically by [`commit`](Self::commit), which re-validates the
/// version every staged write was based on.
///
/// Reads see the transaction's own staged writes; other transactions'
/// writes become visible once they commit. A transaction dropped while
/// still active rolls back.
pub struct StorageTransaction<E: StorageEngine> {
    id: TransactionId,
    engine: Arc<E>,
    schema: Arc<KindSchema>,
    state: TransactionState,
    rollback_only: bool,
    connection: Option<Connection>,
    writes: WriteSet,
}

impl<E: StorageEngine> StorageTransaction<E> {
    pub(crate) fn new(id: TransactionId, engine: Arc<E>, schema: Arc<KindSchema>) -> Self {
        Self {
            id,
            engine,
            schema,
            state: TransactionState::NotStarted,
            rollback_only: false,
            connection: None,
            writes: WriteSet::default(),
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Entity kind this transaction works on.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.schema.name()
    }

    /// Schema of the kind.
    #[must_use]
    pub fn schema(&self) -> &Arc<KindSchema> {
        &self.schema
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while operations are accepted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Number of staged entity writes and relation changes.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Starts the transaction and acquires an engine connection.
    ///
    /// # Errors
    ///
    /// - [`CoreError::AlreadyActive`] if already active.
    /// - [`CoreError::InvalidPriorState`] if the transaction has ended.
    /// - [`CoreError::BackendUnavailable`] if no connection could be
    ///   acquired; the transaction is then rolled back.
    pub fn begin(&mut self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => return Err(CoreError::AlreadyActive),
            TransactionState::Committed | TransactionState::RolledBack => {
                return Err(CoreError::invalid_prior_state(
                    "transaction cannot be restarted",
                ))
            }
            TransactionState::NotStarted => {}
        }
        match self.engine.pool().acquire() {
            Ok(conn) => {
                tracing::debug!(txid = %self.id, kind = self.kind(), connection = conn.id(), "transaction begin");
                self.connection = Some(conn);
                self.state = TransactionState::Active;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(txid = %self.id, kind = self.kind(), error = %err, "transaction begin failed");
                self.state = TransactionState::RolledBack;
                Err(err)
            }
        }
    }

    /// Creates a new entity with the given core fields.
    ///
    /// The entity gets a fresh id and is visible to this transaction's
    /// reads immediately; it is stored at commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the transaction is not
    /// active.
    pub fn create(&mut self, fields: Document) -> CoreResult<Delegate> {
        self.create_with_groups(fields, BTreeMap::new())
    }

    /// Creates a new entity with core fields and deferred group contents.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] for undeclared groups, or
    /// [`CoreError::InvalidPriorState`] if the transaction is not active.
    pub fn create_with_groups(
        &mut self,
        fields: Document,
        groups: BTreeMap<String, Document>,
    ) -> CoreResult<Delegate> {
        self.state.ensure_active()?;
        for group in groups.keys() {
            self.schema.check_group(group)?;
        }
        let mut all_groups: BTreeMap<String, Document> = self
            .schema
            .groups()
            .map(|g| (g.to_string(), Document::new()))
            .collect();
        all_groups.extend(groups);

        let record = EntityRecord::new(
            EntityId::new(),
            Version::UNCOMMITTED,
            self.schema.schema_version(),
            fields,
            all_groups,
        );
        tracing::trace!(txid = %self.id, kind = self.kind(), id = %record.id, "staged insert");
        self.writes.insert(record.clone());
        Ok(self.staged_delegate(record))
    }

    /// Reads an entity by id, returning `None` if it does not exist or was
    /// removed in this transaction.
    ///
    /// Only core fields are fetched; deferred groups load on first access.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the transaction is not
    /// active, or a backend error. A `BackendUnavailable` error rolls the
    /// transaction back.
    pub fn read(&mut self, id: EntityId) -> CoreResult<Option<Delegate>> {
        self.state.ensure_active()?;
        match self.writes.get(id) {
            Some(Staged::Insert(record) | Staged::Update { record, .. }) => {
                return Ok(Some(self.staged_delegate(record.clone())))
            }
            Some(Staged::Remove { .. }) => return Ok(None),
            None => {}
        }
        let fetched = self.engine.fetch_core(&self.schema, id);
        match self.guard(fetched)? {
            Some(row) => self.row_delegate(row).map(Some),
            None => Ok(None),
        }
    }

    /// A delegate for `id` that fetches nothing until first accessed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the transaction is not
    /// active.
    pub fn reference(&self, id: EntityId) -> CoreResult<Delegate> {
        self.state.ensure_active()?;
        Ok(match self.writes.get(id) {
            Some(Staged::Insert(record) | Staged::Update { record, .. }) => {
                self.staged_delegate(record.clone())
            }
            _ => Delegate::unloaded(id, self.id, Arc::clone(&self.schema), self.source()),
        })
    }

    /// Runs `criteria` against the engine and this transaction's staged
    /// writes.
    ///
    /// Every call executes again. Results are in ascending order of the
    /// kind's sort field (ties by id) when one is declared, in backend order
    /// otherwise.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnsupportedCriterion`] before the backend is touched
    ///   if the engine cannot express `criteria`.
    /// - [`CoreError::BackendUnavailable`], which rolls the transaction
    ///   back.
    pub fn query(&mut self, criteria: &Criteria) -> CoreResult<QueryResults> {
        self.state.ensure_active()?;
        let query = self.engine.compile(&self.schema, criteria)?;
        let overlay = MapCompiler.compile(&self.schema, criteria)?;

        let executed = match self.connection.as_ref() {
            Some(conn) => self.engine.execute(conn, &self.schema, &query),
            None => Err(CoreError::invalid_prior_state("transaction has no connection")),
        };
        let rows = self.guard(executed)?;

        let mut hits: Vec<Hit> = rows
            .into_iter()
            .filter(|row| self.writes.get(row.id).is_none())
            .map(Hit::Row)
            .collect();
        hits.extend(
            self.writes
                .live_records()
                .filter(|record| overlay.evaluate(record))
                .cloned()
                .map(Hit::Staged),
        );

        if let Some(field) = self.schema.sort_field() {
            hits.sort_by(|a, b| {
                let by_field = match (a.core().get(field), b.core().get(field)) {
                    (Some(av), Some(bv)) => av.sort_cmp(bv),
                    (left, right) => left.is_some().cmp(&right.is_some()),
                };
                by_field.then_with(|| a.id().cmp(&b.id()))
            });
        }

        tracing::debug!(txid = %self.id, kind = self.kind(), %criteria, hits = hits.len(), "query");
        Ok(QueryResults {
            hits: hits.into_iter(),
            owner: self.id,
            schema: Arc::clone(&self.schema),
            source: self.source(),
        })
    }

    /// Stages the current contents of `delegate` as an update.
    ///
    /// The delegate is fully materialized first. The version it was read at
    /// is checked again at commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the delegate belongs to
    /// another transaction or kind, if its entity was removed, or if the
    /// transaction is not active.
    pub fn update(&mut self, delegate: &mut Delegate) -> CoreResult<()> {
        self.state.ensure_active()?;
        if delegate.owner() != self.id || delegate.kind() != self.kind() {
            return Err(CoreError::invalid_prior_state(format!(
                "delegate {} of {} is not bound to {}",
                delegate.id(),
                delegate.owner(),
                self.id
            )));
        }
        let materialized = delegate.to_record();
        let record = self.guard(materialized)?;
        let expected = record.version;
        let id = record.id;
        self.writes.update(record, expected)?;
        delegate.mark_clean();
        tracing::trace!(txid = %self.id, kind = self.kind(), %id, %expected, "staged update");
        Ok(())
    }

    /// Stages removal of `id`. Later reads of `id` in this transaction
    /// return nothing.
    ///
    /// Returns false if the entity does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the transaction is not
    /// active, or a backend error.
    pub fn remove(&mut self, id: EntityId) -> CoreResult<bool> {
        self.state.ensure_active()?;
        let expected = match self.writes.get(id) {
            Some(Staged::Remove { .. }) => return Ok(false),
            Some(Staged::Insert(_)) => Version::UNCOMMITTED,
            Some(Staged::Update { expected, .. }) => *expected,
            None => {
                let fetched = self.engine.fetch_core(&self.schema, id);
                match self.guard(fetched)? {
                    Some(row) => row.version,
                    None => return Ok(false),
                }
            }
        };
        tracing::trace!(txid = %self.id, kind = self.kind(), %id, %expected, "staged remove");
        Ok(self.writes.remove(id, expected))
    }

    /// Locks `id` against other transactions' commits until this
    /// transaction ends, if the engine supports row locks.
    ///
    /// Returns the policy in force: `Pessimistic` if the lock was taken,
    /// `Optimistic` if the engine only detects conflicts at commit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] if another transaction holds the
    /// lock too long.
    pub fn lock_for_update(&mut self, id: EntityId) -> CoreResult<LockingPolicy> {
        self.state.ensure_active()?;
        match self.engine.locking_policy() {
            LockingPolicy::Pessimistic => {
                let locked = self.engine.lock_row(self.id, &self.schema, id);
                self.guard(locked)?;
                Ok(LockingPolicy::Pessimistic)
            }
            LockingPolicy::Optimistic => Ok(LockingPolicy::Optimistic),
        }
    }

    /// Stages a join record in `relation`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the transaction is not
    /// active.
    pub fn add_relation(&mut self, relation: &str, key: CompositeKey) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.writes.stage_relation(relation, RelationChange::Add(key));
        Ok(())
    }

    /// Stages removal of a join record from `relation`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPriorState`] if the transaction is not
    /// active.
    pub fn remove_relation(&mut self, relation: &str, key: CompositeKey) -> CoreResult<()> {
        self.state.ensure_active()?;
        self.writes
            .stage_relation(relation, RelationChange::Remove(key));
        Ok(())
    }

    /// Looks up the join record equal to `key`, including staged changes.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn find_relation(&mut self, relation: &str, key: CompositeKey) -> CoreResult<Option<CompositeKey>> {
        self.state.ensure_active()?;
        match self.writes.relation_change(relation, key) {
            Some(RelationChange::Add(k)) => Ok(Some(k)),
            Some(RelationChange::Remove(_)) => Ok(None),
            None => {
                let found = self.engine.find_relation(relation, key);
                self.guard(found)
            }
        }
    }

    /// Children of `parent` in `relation`, including staged changes,
    /// ordered by child id.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub fn children_of(&mut self, relation: &str, parent: EntityId) -> CoreResult<Vec<EntityId>> {
        self.state.ensure_active()?;
        let fetched = self.engine.children_of(relation, parent);
        let mut children: std::collections::BTreeSet<EntityId> =
            self.guard(fetched)?.into_iter().collect();
        for change in self.writes.relation_changes(relation) {
            match change {
                RelationChange::Add(k) if k.parent() == parent => {
                    children.insert(k.child());
                }
                RelationChange::Remove(k) if k.parent() == parent => {
                    children.remove(&k.child());
                }
                _ => {}
            }
        }
        Ok(children.into_iter().collect())
    }

    /// Marks the transaction so that it can only roll back.
    pub fn set_rollback_only(&mut self) {
        if !self.rollback_only {
            tracing::debug!(txid = %self.id, kind = self.kind(), "marked rollback-only");
        }
        self.rollback_only = true;
    }

    /// Returns true if [`set_rollback_only`](Self::set_rollback_only) was
    /// called.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Applies every staged write atomically.
    ///
    /// On success every written entity's version advances by exactly one.
    /// On any failure nothing is written and the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// - [`CoreError::OptimisticLockConflict`] listing every entity whose
    ///   version moved since it was read.
    /// - [`CoreError::InvalidPriorState`] if the transaction is not active
    ///   or is marked rollback-only.
    /// - [`CoreError::LockTimeout`] or [`CoreError::BackendUnavailable`].
    pub fn commit(&mut self) -> CoreResult<()> {
        self.state.ensure_active()?;
        if self.rollback_only {
            self.finish(TransactionState::RolledBack);
            return Err(CoreError::invalid_prior_state(
                "transaction is marked rollback-only",
            ));
        }

        let batch = self.writes.to_batch();
        if batch.is_empty() {
            self.finish(TransactionState::Committed);
            tracing::debug!(txid = %self.id, kind = self.kind(), "transaction commit (no writes)");
            return Ok(());
        }

        let applied = match self.connection.as_ref() {
            Some(conn) => self.engine.apply(conn, self.id, &self.schema, &batch),
            None => Err(CoreError::invalid_prior_state("transaction has no connection")),
        };
        match applied {
            Ok(written) => {
                self.finish(TransactionState::Committed);
                tracing::debug!(
                    txid = %self.id,
                    kind = self.kind(),
                    entities = written.len(),
                    relations = batch.relations.len(),
                    "transaction commit"
                );
                Ok(())
            }
            Err(err) => {
                match &err {
                    CoreError::OptimisticLockConflict { ids, .. } => {
                        tracing::debug!(txid = %self.id, kind = self.kind(), ?ids, "commit conflict");
                    }
                    other => {
                        tracing::warn!(txid = %self.id, kind = self.kind(), error = %other, "commit failed");
                    }
                }
                self.finish(TransactionState::RolledBack);
                Err(err)
            }
        }
    }

    /// Discards staged writes and ends the transaction.
    ///
    /// Always safe: after a commit or an earlier rollback it does nothing.
    ///
    /// # Errors
    ///
    /// Never fails today; the result leaves room for backends whose
    /// rollback can.
    pub fn rollback(&mut self) -> CoreResult<()> {
        match self.state {
            TransactionState::Committed => {
                tracing::debug!(txid = %self.id, kind = self.kind(), "rollback after commit ignored");
                Ok(())
            }
            TransactionState::RolledBack => Ok(()),
            TransactionState::NotStarted | TransactionState::Active => {
                self.finish(TransactionState::RolledBack);
                tracing::debug!(txid = %self.id, kind = self.kind(), "transaction rollback");
                Ok(())
            }
        }
    }

    /// Ends the transaction in `state`, releasing the connection and row
    /// locks.
    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.writes.clear();
        self.engine.release_locks(self.id);
        self.connection = None;
    }

    /// Rolls back on transaction-fatal errors.
    fn guard<T>(&mut self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(err) = &result {
            if err.is_transaction_fatal() && self.is_active() {
                tracing::warn!(txid = %self.id, kind = self.kind(), error = %err, "backend failure, rolling back");
                self.finish(TransactionState::RolledBack);
            }
        }
        result
    }

    fn source(&self) -> Arc<dyn FieldSource> {
        let engine: Arc<E> = Arc::clone(&self.engine);
        engine
    }

    fn staged_delegate(&self, record: EntityRecord) -> Delegate {
        Delegate::from_record(record, self.id, Arc::clone(&self.schema), self.source())
    }

    fn row_delegate(&self, row: CoreRow) -> CoreResult<Delegate> {
        Delegate::from_core(row, self.id, Arc::clone(&self.schema), self.source())
    }
}

impl<E: StorageEngine> Drop for StorageTransaction<E> {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::warn!(
                txid = %self.id,
                kind = self.kind(),
                pending = self.writes.len(),
                "active transaction dropped, rolling back"
            );
            self.finish(TransactionState::RolledBack);
        }
    }
}

impl<E: StorageEngine> fmt::Debug for StorageTransaction<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageTransaction")
            .field("id", &self.id)
            .field("kind", &self.schema.name())
            .field("engine", &self.engine.name())
            .field("state", &self.state)
            .field("rollback_only", &self.rollback_only)
            .field("pending", &self.writes.len())
            .finish_non_exhaustive()
    }
}

enum Hit {
    Row(CoreRow),
    Staged(EntityRecord),
}

impl Hit {
    fn id(&self) -> EntityId {
        match self {
            Hit::Row(row) => row.id,
            Hit::Staged(record) => record.id,
        }
    }

    fn core(&self) -> &Document {
        match self {
            Hit::Row(row) => &row.core,
            Hit::Staged(record) => &record.core,
        }
    }
}

/// Lazy sequence of query results.
///
/// Each item becomes a [`Delegate`] only when the iterator reaches it;
/// stored records older than the current layout are migrated at that point.
pub struct QueryResults {
    hits: std::vec::IntoIter<Hit>,
    owner: TransactionId,
    schema: Arc<KindSchema>,
    source: Arc<dyn FieldSource>,
}

impl QueryResults {
    /// Collects every remaining delegate.
    ///
    /// # Errors
    ///
    /// Returns the first error produced while building delegates.
    pub fn collect_all(self) -> CoreResult<Vec<Delegate>> {
        self.collect()
    }

    /// Collects the ids of every remaining result without building
    /// delegates.
    #[must_use]
    pub fn ids(self) -> Vec<EntityId> {
        self.hits.map(|h| h.id()).collect()
    }
}

impl Iterator for QueryResults {
    type Item = CoreResult<Delegate>;

    fn next(&mut self) -> Option<Self::Item> {
        let hit = self.hits.next()?;
        let schema = Arc::clone(&self.schema);
        let source = Arc::clone(&self.source);
        Some(match hit {
            Hit::Row(row) => Delegate::from_core(row, self.owner, schema, source),
            Hit::Staged(record) => Ok(Delegate::from_record(record, self.owner, schema, source)),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.hits.size_hint()
    }
}

impl ExactSizeIterator for QueryResults {}

impl fmt::Debug for QueryResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResults")
            .field("remaining", &self.hits.len())
            .field("kind", &self.schema.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{Operator, SearchableField};
    use crate::engine::{ConcurrentMapEngine, RelationalEngine};
    use crate::schema::FieldMapping;
    use realmstore_codec::Value;

    const ID: SearchableField = SearchableField::string("id");
    const USER_ID: SearchableField = SearchableField::string("user_id");
    const RANK: SearchableField = SearchableField::number("rank").ordinal();

    fn schema() -> Arc<KindSchema> {
        Arc::new(
            KindSchema::new("sample")
                .searchable(ID, FieldMapping::Identifier { column: "id" })
                .searchable(USER_ID, FieldMapping::Column { column: "user_id" })
                .searchable(RANK, FieldMapping::Column { column: "rank" })
                .group("notes")
                .sort_by("rank"),
        )
    }

    fn fields(user: &str, rank: i64) -> Document {
        let mut doc = Document::new();
        doc.insert("user_id", user);
        doc.insert("rank", rank);
        doc
    }

    fn txn<E: StorageEngine>(engine: &Arc<E>, id: u64) -> StorageTransaction<E> {
        let mut t = StorageTransaction::new(TransactionId(id), Arc::clone(engine), schema());
        t.begin().unwrap();
        t
    }

    #[test]
    fn begin_twice_is_already_active() {
        let engine = Arc::new(RelationalEngine::default());
        let mut t = txn(&engine, 1);
        assert!(matches!(t.begin(), Err(CoreError::AlreadyActive)));
        t.commit().unwrap();
        assert!(t.begin().is_err());
        assert!(t.create(Document::new()).is_err());
    }

    #[test]
    fn create_is_visible_to_own_reads_only() {
        let engine = Arc::new(RelationalEngine::default());
        let mut t1 = txn(&engine, 1);
        let created = t1.create(fields("u1", 1)).unwrap();
        let id = created.id();

        let mut read = t1.read(id).unwrap().unwrap();
        assert_eq!(read.get("user_id").unwrap(), Some(&Value::from("u1")));

        let mut t2 = txn(&engine, 2);
        assert!(t2.read(id).unwrap().is_none());

        t1.commit().unwrap();
        let mut seen = t2.read(id).unwrap().unwrap();
        assert_eq!(seen.version(), Version::new(1));
        assert_eq!(seen.get_integer("rank").unwrap(), Some(1));
    }

    #[test]
    fn removed_entity_reads_empty() {
        let engine = Arc::new(ConcurrentMapEngine::default());
        let mut t1 = txn(&engine, 1);
        let id = t1.create(fields("u1", 1)).unwrap().id();
        t1.commit().unwrap();

        let mut t2 = txn(&engine, 2);
        assert!(t2.remove(id).unwrap());
        assert!(t2.read(id).unwrap().is_none());
        assert!(!t2.remove(id).unwrap());
        t2.commit().unwrap();

        let mut t3 = txn(&engine, 3);
        assert!(t3.read(id).unwrap().is_none());
        assert!(!t3.remove(EntityId::new()).unwrap());
    }

    #[test]
    fn query_overlays_staged_writes_in_sort_order() {
        let engine = Arc::new(RelationalEngine::default());
        let mut t1 = txn(&engine, 1);
        let a = t1.create(fields("u1", 30)).unwrap().id();
        let b = t1.create(fields("u1", 10)).unwrap().id();
        let c = t1.create(fields("u2", 20)).unwrap().id();
        t1.commit().unwrap();

        let mut t2 = txn(&engine, 2);
        let d = t2.create(fields("u1", 20)).unwrap().id();
        let mut moved = t2.read(c).unwrap().unwrap();
        moved.set("user_id", "u1").unwrap();
        t2.update(&mut moved).unwrap();
        t2.remove(a).unwrap();

        let by_user = Criteria::compare(USER_ID, Operator::Eq, ["u1"]).unwrap();
        let ids = t2.query(&by_user).unwrap().ids();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], b);
        assert!(ids[1..].contains(&c) && ids[1..].contains(&d));
    }

    #[test]
    fn invalid_identifier_query_is_empty() {
        let engine = Arc::new(RelationalEngine::default());
        let mut t = txn(&engine, 1);
        t.create(fields("u1", 1)).unwrap();
        let criteria = Criteria::compare(ID, Operator::Eq, ["%"]).unwrap();
        assert_eq!(t.query(&criteria).unwrap().count(), 0);
    }

    #[test]
    fn conflicting_commits() {
        let engine = Arc::new(RelationalEngine::default());
        let mut setup = txn(&engine, 1);
        let id = setup.create(fields("u1", 1)).unwrap().id();
        setup.commit().unwrap();

        let mut t1 = txn(&engine, 2);
        let mut t2 = txn(&engine, 3);
        let mut d1 = t1.read(id).unwrap().unwrap();
        let mut d2 = t2.read(id).unwrap().unwrap();
        d1.set("rank", 2).unwrap();
        d2.set("rank", 3).unwrap();
        t1.update(&mut d1).unwrap();
        t2.update(&mut d2).unwrap();

        t1.commit().unwrap();
        match t2.commit().unwrap_err() {
            CoreError::OptimisticLockConflict { ids, .. } => assert_eq!(ids, vec![id]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(t2.state(), TransactionState::RolledBack);
        t2.rollback().unwrap();
        t2.rollback().unwrap();

        let mut retry = txn(&engine, 4);
        let mut d3 = retry.read(id).unwrap().unwrap();
        assert_eq!(d3.version(), Version::new(2));
        d3.set("rank", 3).unwrap();
        retry.update(&mut d3).unwrap();
        retry.commit().unwrap();

        let mut check = txn(&engine, 5);
        assert_eq!(check.read(id).unwrap().unwrap().version(), Version::new(3));
    }

    #[test]
    fn rollback_only_commit_rolls_back() {
        let engine = Arc::new(RelationalEngine::default());
        let mut t = txn(&engine, 1);
        let id = t.create(fields("u1", 1)).unwrap().id();
        t.set_rollback_only();
        assert!(t.is_rollback_only());
        assert!(matches!(
            t.commit(),
            Err(CoreError::InvalidPriorState { .. })
        ));
        assert_eq!(t.state(), TransactionState::RolledBack);

        let mut check = txn(&engine, 2);
        assert!(check.read(id).unwrap().is_none());
    }

    #[test]
    fn rollback_after_commit_keeps_writes() {
        let engine = Arc::new(RelationalEngine::default());
        let mut t = txn(&engine, 1);
        let id = t.create(fields("u1", 1)).unwrap().id();
        t.commit().unwrap();
        t.rollback().unwrap();
        assert_eq!(t.state(), TransactionState::Committed);

        let mut check = txn(&engine, 2);
        assert!(check.read(id).unwrap().is_some());
    }

    #[test]
    fn connection_released_on_every_exit() {
        let engine = Arc::new(RelationalEngine::default());
        {
            let mut t = txn(&engine, 1);
            t.create(fields("u1", 1)).unwrap();
            assert_eq!(engine.pool().in_use(), 1);
        }
        assert_eq!(engine.pool().in_use(), 0);

        let mut t = txn(&engine, 2);
        t.rollback().unwrap();
        assert_eq!(engine.pool().in_use(), 0);
    }

    #[test]
    fn outage_rolls_back() {
        let engine = Arc::new(RelationalEngine::default());
        let mut t = txn(&engine, 1);
        engine.pool().set_available(false);
        let err = t.query(&Criteria::all()).unwrap_err();
        assert!(err.is_transaction_fatal());
        assert_eq!(t.state(), TransactionState::RolledBack);
        assert_eq!(engine.pool().in_use(), 0);
    }

    #[test]
    fn lock_policy_per_engine() {
        let relational = Arc::new(RelationalEngine::default());
        let mut t = txn(&relational, 1);
        let id = EntityId::new();
        assert_eq!(t.lock_for_update(id).unwrap(), LockingPolicy::Pessimistic);
        assert_eq!(relational.lock_holder(&schema(), id), Some(TransactionId(1)));
        t.rollback().unwrap();
        assert_eq!(relational.lock_holder(&schema(), id), None);

        let map = Arc::new(ConcurrentMapEngine::default());
        let mut t = txn(&map, 2);
        assert_eq!(t.lock_for_update(id).unwrap(), LockingPolicy::Optimistic);
    }

    #[test]
    fn foreign_delegate_is_rejected() {
        let engine = Arc::new(RelationalEngine::default());
        let mut t1 = txn(&engine, 1);
        let mut t2 = txn(&engine, 2);
        let mut d = t1.create(fields("u1", 1)).unwrap();
        assert!(matches!(
            t2.update(&mut d),
            Err(CoreError::InvalidPriorState { .. })
        ));
    }

    #[test]
    fn staged_relations() {
        let engine = Arc::new(RelationalEngine::default());
        let (p, c1, c2) = (EntityId::new(), EntityId::new(), EntityId::new());
        let mut t = txn(&engine, 1);
        t.add_relation("composite-role", CompositeKey::new(p, c1)).unwrap();
        t.add_relation("composite-role", CompositeKey::new(p, c1)).unwrap();
        t.add_relation("composite-role", CompositeKey::new(p, c2)).unwrap();
        let mut expected = vec![c1, c2];
        expected.sort();
        assert_eq!(t.children_of("composite-role", p).unwrap(), expected);
        t.commit().unwrap();

        let mut t = txn(&engine, 2);
        t.remove_relation("composite-role", CompositeKey::new(p, c1)).unwrap();
        assert_eq!(
            t.find_relation("composite-role", CompositeKey::new(p, c1)).unwrap(),
            None
        );
        assert_eq!(t.children_of("composite-role", p).unwrap(), vec![c2]);
    }
}
