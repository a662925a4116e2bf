//! Relational engine.
//!
//! Layout per kind:
//!
//! - one main table keyed by entity id, with the promoted columns, the
//!   side-document of every other core field (CBOR bytes), the version and
//!   the schema version,
//! - one child table per deferred group, keyed by `(parent id, entry name)`.
//!
//! Queries run as [`SqlPredicate`]s: side-document keys are extracted from
//! the encoded bytes and group-backed fields become existence checks over
//! the child table. A single deferred group can be fetched on its own.

use super::locks::RowLocks;
use super::{
    stale_ids, Capabilities, Capability, Connection, ConnectionPool, FieldSource, RelationChange,
    StorageEngine, WriteBatch, WriteOp,
};
use crate::compiler::{
    compare_values, ids_match, CriteriaCompiler, JoinCondition, Operand, RelationalCompiler,
    SqlPredicate,
};
use crate::config::StoreConfig;
use crate::criteria::{Criteria, Operator};
use crate::entity::{CompositeKey, CoreRow, EntityId, EntityRecord, RelationTable};
use crate::error::{CoreError, CoreResult};
use crate::schema::{KindSchema, ID_COLUMN};
use crate::stats::EngineStats;
use crate::types::{SchemaVersion, TransactionId, Version};
use parking_lot::RwLock;
use realmstore_codec::{Document, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

const NAME: &str = "relational";

#[derive(Debug, Clone)]
struct Row {
    version: Version,
    schema_version: SchemaVersion,
    columns: Document,
    metadata: Vec<u8>,
}

type ChildTable = BTreeMap<(EntityId, String), Value>;

#[derive(Debug, Default)]
struct KindTables {
    rows: BTreeMap<EntityId, Row>,
    children: HashMap<String, ChildTable>,
}

impl KindTables {
    fn children(&self, group: &str, parent: EntityId) -> Document {
        let Some(table) = self.children.get(group) else {
            return Document::new();
        };
        table
            .range((parent, String::new())..)
            .take_while(|((p, _), _)| *p == parent)
            .map(|((_, name), value)| (name.clone(), value.clone()))
            .collect()
    }

    fn delete_children(&mut self, parent: EntityId) {
        for table in self.children.values_mut() {
            table.retain(|(p, _), _| *p != parent);
        }
    }

    fn write_children(&mut self, parent: EntityId, groups: &BTreeMap<String, Document>) {
        for (group, doc) in groups {
            let table = self.children.entry(group.clone()).or_default();
            for (name, value) in doc {
                table.insert((parent, name.clone()), value.clone());
            }
        }
    }

    fn core(row: &Row) -> CoreResult<Document> {
        let mut core = Document::from_cbor(&row.metadata)?;
        core.merge(row.columns.clone());
        Ok(core)
    }
}

#[derive(Debug, Default)]
struct Tables {
    kinds: HashMap<String, KindTables>,
    relations: HashMap<String, RelationTable>,
}

/// Relational storage engine.
///
/// Capabilities: CRUD, criteria queries, authoritative credential storage,
/// pessimistic row locks and partial fetches.
pub struct RelationalEngine {
    config: StoreConfig,
    pool: ConnectionPool,
    locks: RowLocks,
    tables: RwLock<Tables>,
    stats: EngineStats,
}

impl RelationalEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let pool = ConnectionPool::new(NAME, config.max_connections, config.acquire_timeout);
        let locks = RowLocks::new(config.lock_timeout);
        Self {
            config,
            pool,
            locks,
            tables: RwLock::new(Tables::default()),
            stats: EngineStats::new(),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Transaction currently holding the row lock on `id`, if any.
    #[must_use]
    pub fn lock_holder(&self, schema: &KindSchema, id: EntityId) -> Option<TransactionId> {
        self.locks.holder(schema.name(), id)
    }

    /// Stores `record` exactly as given, replacing any existing row.
    ///
    /// Version and schema version are kept as they are, which makes this the
    /// way to seed rows written by older layouts.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the side-document cannot be encoded.
    pub fn load_record(&self, schema: &KindSchema, record: EntityRecord) -> CoreResult<()> {
        let row = encode_row(schema, &record, record.version, record.schema_version)?;
        let mut tables = self.tables.write();
        let kind = tables.kinds.entry(schema.name().to_string()).or_default();
        kind.delete_children(record.id);
        kind.write_children(record.id, &record.groups);
        kind.rows.insert(record.id, row);
        Ok(())
    }

    /// Encoded side-document of `id`, as stored.
    #[must_use]
    pub fn raw_metadata(&self, schema: &KindSchema, id: EntityId) -> Option<Vec<u8>> {
        let tables = self.tables.read();
        tables
            .kinds
            .get(schema.name())
            .and_then(|k| k.rows.get(&id))
            .map(|row| row.metadata.clone())
    }

    fn matches(
        kind: &KindTables,
        id: EntityId,
        row: &Row,
        predicate: &SqlPredicate,
    ) -> CoreResult<bool> {
        Ok(match predicate {
            SqlPredicate::Const(b) => *b,
            SqlPredicate::IdMatch {
                column,
                ids,
                negated,
            } => {
                let actual = if column == ID_COLUMN {
                    Some(id)
                } else {
                    row.columns
                        .get(column)
                        .and_then(Value::as_text)
                        .and_then(EntityId::parse_safe)
                };
                ids_match(actual, ids, *negated)
            }
            SqlPredicate::Compare {
                operand: Operand::Column(column),
                operator,
                values,
            } => compare_values(row.columns.get(column), *operator, values),
            SqlPredicate::Compare {
                operand: Operand::Document(key),
                operator,
                values,
            } => {
                let extracted = Document::extract(&row.metadata, key)?;
                compare_values(extracted.as_ref(), *operator, values)
            }
            SqlPredicate::Exists { group, on } => {
                let children = kind.children(group, id);
                match on {
                    JoinCondition::Key(values) => values
                        .iter()
                        .filter_map(Value::as_text)
                        .any(|name| children.contains_key(name)),
                    JoinCondition::Entry { name, values } => {
                        compare_values(children.get(name), Operator::In, values)
                    }
                }
            }
            SqlPredicate::And(children) => {
                for child in children {
                    if !Self::matches(kind, id, row, child)? {
                        return Ok(false);
                    }
                }
                true
            }
            SqlPredicate::Or(children) => {
                for child in children {
                    if Self::matches(kind, id, row, child)? {
                        return Ok(true);
                    }
                }
                false
            }
            SqlPredicate::Not(child) => !Self::matches(kind, id, row, child)?,
        })
    }
}

fn encode_row(
    schema: &KindSchema,
    record: &EntityRecord,
    version: Version,
    schema_version: SchemaVersion,
) -> CoreResult<Row> {
    let (columns, metadata) = schema.split_core(&record.core);
    Ok(Row {
        version,
        schema_version,
        columns,
        metadata: metadata.to_cbor()?,
    })
}

fn missing(schema: &KindSchema, id: EntityId) -> CoreError {
    CoreError::invalid_prior_state(format!("{} {id} does not exist", schema.name()))
}

impl FieldSource for RelationalEngine {
    fn fetch_core(&self, schema: &KindSchema, id: EntityId) -> CoreResult<Option<CoreRow>> {
        self.pool.ensure_available()?;
        self.stats.record_core_fetch();
        let tables = self.tables.read();
        let Some(row) = tables.kinds.get(schema.name()).and_then(|k| k.rows.get(&id)) else {
            return Ok(None);
        };
        Ok(Some(CoreRow {
            id,
            version: row.version,
            schema_version: row.schema_version,
            core: KindTables::core(row)?,
        }))
    }

    fn fetch_group(&self, schema: &KindSchema, id: EntityId, group: &str) -> CoreResult<Document> {
        schema.check_group(group)?;
        self.pool.ensure_available()?;
        self.stats.record_group_fetch();
        let tables = self.tables.read();
        let kind = tables
            .kinds
            .get(schema.name())
            .filter(|k| k.rows.contains_key(&id))
            .ok_or_else(|| missing(schema, id))?;
        Ok(kind.children(group, id))
    }

    fn fetch_groups(
        &self,
        schema: &KindSchema,
        id: EntityId,
    ) -> CoreResult<BTreeMap<String, Document>> {
        self.pool.ensure_available()?;
        self.stats.record_full_fetch();
        let tables = self.tables.read();
        let kind = tables
            .kinds
            .get(schema.name())
            .filter(|k| k.rows.contains_key(&id))
            .ok_or_else(|| missing(schema, id))?;
        Ok(schema
            .groups()
            .map(|g| (g.to_string(), kind.children(g, id)))
            .collect())
    }

    fn supports_partial_fetch(&self) -> bool {
        true
    }
}

impl StorageEngine for RelationalEngine {
    type Query = SqlPredicate;

    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
            .with(Capability::Crud)
            .with(Capability::CriteriaQuery)
            .with(Capability::CredentialAuth)
            .with(Capability::RowLocking)
            .with(Capability::PartialFetch)
    }

    fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn compile(&self, schema: &KindSchema, criteria: &Criteria) -> CoreResult<SqlPredicate> {
        RelationalCompiler.compile(schema, criteria)
    }

    fn execute(
        &self,
        conn: &Connection,
        schema: &KindSchema,
        query: &SqlPredicate,
    ) -> CoreResult<Vec<CoreRow>> {
        conn.check()?;
        self.stats.record_scan();
        let tables = self.tables.read();
        let Some(kind) = tables.kinds.get(schema.name()) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for (id, row) in &kind.rows {
            if Self::matches(kind, *id, row, query)? {
                out.push(CoreRow {
                    id: *id,
                    version: row.version,
                    schema_version: row.schema_version,
                    core: KindTables::core(row)?,
                });
            }
        }
        tracing::trace!(kind = schema.name(), sql = %query, rows = out.len(), "executed query");
        Ok(out)
    }

    fn lock_row(&self, owner: TransactionId, schema: &KindSchema, id: EntityId) -> CoreResult<()> {
        self.pool.ensure_available()?;
        self.locks.lock(owner, schema.name(), id)
    }

    fn release_locks(&self, owner: TransactionId) {
        self.locks.release_all(owner);
    }

    fn apply(
        &self,
        conn: &Connection,
        owner: TransactionId,
        schema: &KindSchema,
        batch: &WriteBatch,
    ) -> CoreResult<Vec<(EntityId, Version)>> {
        conn.check()?;
        let _locks = self.locks.wait_unlocked(owner, schema.name(), &batch.ids())?;
        let mut tables = self.tables.write();

        let stale = {
            let kind = tables.kinds.get(schema.name());
            stale_ids(batch, |id| kind.and_then(|k| k.rows.get(&id)).map(|r| r.version))
        };
        if !stale.is_empty() {
            self.stats.record_conflict();
            return Err(CoreError::OptimisticLockConflict {
                kind: schema.name().to_string(),
                ids: stale,
            });
        }

        // Encode everything before touching the tables so a codec failure
        // leaves them unchanged.
        let mut encoded = Vec::with_capacity(batch.ops.len());
        for op in &batch.ops {
            encoded.push(match op {
                WriteOp::Insert(record) => Some(encode_row(
                    schema,
                    record,
                    Version::UNCOMMITTED.next(),
                    schema.schema_version(),
                )?),
                WriteOp::Update { record, expected } => Some(encode_row(
                    schema,
                    record,
                    expected.next(),
                    schema.schema_version(),
                )?),
                WriteOp::Remove { .. } => None,
            });
        }

        let mut written = Vec::with_capacity(batch.ops.len());
        let Tables { kinds, relations } = &mut *tables;
        let kind = kinds.entry(schema.name().to_string()).or_default();
        for (op, row) in batch.ops.iter().zip(encoded) {
            match (op, row) {
                (WriteOp::Insert(record) | WriteOp::Update { record, .. }, Some(row)) => {
                    written.push((record.id, row.version));
                    kind.delete_children(record.id);
                    kind.write_children(record.id, &record.groups);
                    kind.rows.insert(record.id, row);
                }
                (WriteOp::Remove { id, .. }, _) => {
                    kind.rows.remove(id);
                    kind.delete_children(*id);
                    for table in relations.values_mut() {
                        table.remove_entity(*id);
                    }
                }
                (_, None) => {}
            }
        }

        for (name, change) in &batch.relations {
            let table = relations.entry(name.clone()).or_default();
            match change {
                RelationChange::Add(key) => {
                    table.insert(*key);
                }
                RelationChange::Remove(key) => {
                    table.remove(key);
                }
            }
        }

        let rows = (batch.ops.len() + batch.relations.len()) as u64;
        self.stats.record_commit(rows);
        Ok(written)
    }

    fn find_relation(&self, relation: &str, key: CompositeKey) -> CoreResult<Option<CompositeKey>> {
        self.pool.ensure_available()?;
        Ok(self
            .tables
            .read()
            .relations
            .get(relation)
            .and_then(|t| t.find(&key)))
    }

    fn children_of(&self, relation: &str, parent: EntityId) -> CoreResult<Vec<EntityId>> {
        self.pool.ensure_available()?;
        Ok(self
            .tables
            .read()
            .relations
            .get(relation)
            .map(|t| t.children_of(parent).collect())
            .unwrap_or_default())
    }

    fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

impl Default for RelationalEngine {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl fmt::Debug for RelationalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalEngine")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::SearchableField;
    use crate::schema::FieldMapping;

    const USER_ID: SearchableField = SearchableField::string("user_id");
    const CLIENT_ID: SearchableField = SearchableField::string("client_id");
    const NOTE: SearchableField = SearchableField::string("note");

    fn schema() -> KindSchema {
        KindSchema::new("sample")
            .searchable(USER_ID, FieldMapping::Column { column: "user_id" })
            .searchable(CLIENT_ID, FieldMapping::Document { key: "client_id" })
            .searchable(
                NOTE,
                FieldMapping::GroupEntry {
                    group: "notes",
                    entry: "k",
                },
            )
            .group("extra")
    }

    fn record(user: &str, client: &str, note: &str) -> EntityRecord {
        let mut core = Document::new();
        core.insert("user_id", user);
        core.insert("client_id", client);
        let mut notes = Document::new();
        notes.insert("k", note);
        let mut groups = BTreeMap::new();
        groups.insert("notes".to_string(), notes);
        EntityRecord::new(
            EntityId::new(),
            Version::UNCOMMITTED,
            SchemaVersion::new(1),
            core,
            groups,
        )
    }

    fn insert(engine: &RelationalEngine, schema: &KindSchema, records: &[EntityRecord]) {
        let conn = engine.pool().acquire().unwrap();
        let batch = WriteBatch {
            ops: records.iter().cloned().map(WriteOp::Insert).collect(),
            relations: Vec::new(),
        };
        engine.apply(&conn, TransactionId(1), schema, &batch).unwrap();
    }

    #[test]
    fn insert_stores_version_one_and_splits_columns() {
        let engine = RelationalEngine::default();
        let schema = schema();
        let r = record("u1", "c1", "n1");
        insert(&engine, &schema, &[r.clone()]);

        let row = engine.fetch_core(&schema, r.id).unwrap().unwrap();
        assert_eq!(row.version, Version::new(1));
        assert_eq!(row.core, r.core);

        let metadata = engine.raw_metadata(&schema, r.id).unwrap();
        let doc = Document::from_cbor(&metadata).unwrap();
        assert!(doc.contains_key("client_id"));
        assert!(!doc.contains_key("user_id"));
    }

    #[test]
    fn partial_fetch_reads_one_group() {
        let engine = RelationalEngine::default();
        let schema = schema();
        let r = record("u1", "c1", "n1");
        insert(&engine, &schema, &[r.clone()]);

        let notes = engine.fetch_group(&schema, r.id, "notes").unwrap();
        assert_eq!(notes.get("k"), Some(&Value::from("n1")));
        assert!(engine.fetch_group(&schema, r.id, "extra").unwrap().is_empty());
        assert!(engine.fetch_group(&schema, r.id, "unknown").is_err());

        let all = engine.fetch_groups(&schema, r.id).unwrap();
        assert_eq!(all.len(), 2);

        let stats = engine.stats().snapshot();
        assert_eq!(stats.group_fetches, 2);
        assert_eq!(stats.full_fetches, 1);
    }

    #[test]
    fn execute_filters_columns_documents_and_joins() {
        let engine = RelationalEngine::default();
        let schema = schema();
        let a = record("u1", "c1", "x");
        let b = record("u1", "c2", "y");
        let c = record("u2", "c1", "x");
        insert(&engine, &schema, &[a.clone(), b.clone(), c.clone()]);

        let conn = engine.pool().acquire().unwrap();
        let run = |criteria: Criteria| -> Vec<EntityId> {
            let q = engine.compile(&schema, &criteria).unwrap();
            let mut ids: Vec<_> = engine
                .execute(&conn, &schema, &q)
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect();
            ids.sort();
            ids
        };
        let sorted = |mut v: Vec<EntityId>| {
            v.sort();
            v
        };

        let by_user = Criteria::compare(USER_ID, Operator::Eq, ["u1"]).unwrap();
        let by_client = Criteria::compare(CLIENT_ID, Operator::Eq, ["c1"]).unwrap();
        let by_note = Criteria::compare(NOTE, Operator::Eq, ["x"]).unwrap();

        assert_eq!(run(by_user.clone()), sorted(vec![a.id, b.id]));
        assert_eq!(run(by_client.clone()), sorted(vec![a.id, c.id]));
        assert_eq!(run(by_note), sorted(vec![a.id, c.id]));
        assert_eq!(run(Criteria::and([by_user, by_client])), vec![a.id]);
    }

    #[test]
    fn stale_update_applies_nothing() {
        let engine = RelationalEngine::default();
        let schema = schema();
        let a = record("u1", "c1", "x");
        let b = record("u2", "c2", "y");
        insert(&engine, &schema, &[a.clone(), b.clone()]);

        let conn = engine.pool().acquire().unwrap();
        let mut a2 = a.clone();
        a2.core.insert("user_id", "changed");
        let batch = WriteBatch {
            ops: vec![
                WriteOp::Update {
                    record: a2,
                    expected: Version::new(1),
                },
                WriteOp::Remove {
                    id: b.id,
                    expected: Version::new(7),
                },
            ],
            relations: Vec::new(),
        };
        let err = engine.apply(&conn, TransactionId(2), &schema, &batch).unwrap_err();
        match err {
            CoreError::OptimisticLockConflict { ids, .. } => assert_eq!(ids, vec![b.id]),
            other => panic!("unexpected error: {other}"),
        }
        let row = engine.fetch_core(&schema, a.id).unwrap().unwrap();
        assert_eq!(row.core.get("user_id"), Some(&Value::from("u1")));
        assert_eq!(engine.stats().snapshot().conflicts, 1);
    }

    #[test]
    fn relations_are_stored_once() {
        let engine = RelationalEngine::default();
        let schema = schema();
        let (p, c) = (EntityId::new(), EntityId::new());
        let key = CompositeKey::new(p, c);
        let conn = engine.pool().acquire().unwrap();
        let batch = WriteBatch {
            ops: Vec::new(),
            relations: vec![
                ("composite-role".into(), RelationChange::Add(key)),
                ("composite-role".into(), RelationChange::Add(key)),
            ],
        };
        engine.apply(&conn, TransactionId(1), &schema, &batch).unwrap();
        assert_eq!(engine.find_relation("composite-role", key).unwrap(), Some(key));
        assert_eq!(engine.children_of("composite-role", p).unwrap(), vec![c]);
    }

    #[test]
    fn outage_fails_operations() {
        let engine = RelationalEngine::default();
        let schema = schema();
        let conn = engine.pool().acquire().unwrap();
        engine.pool().set_available(false);
        let q = engine.compile(&schema, &Criteria::all()).unwrap();
        assert!(engine.execute(&conn, &schema, &q).unwrap_err().is_transaction_fatal());
        assert!(engine.fetch_core(&schema, EntityId::new()).is_err());
    }
}
