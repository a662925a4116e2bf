//! Concurrent map engine.
//!
//! Keeps whole records in memory, the way a clustered cache would. There
//! are no row locks, so `lock_for_update` reports the optimistic policy and
//! conflicts surface at commit. Deferred groups cannot be fetched one at a
//! time: the first group access loads all of them.

use super::{
    stale_ids, Capabilities, Capability, Connection, ConnectionPool, FieldSource, RelationChange,
    StorageEngine, WriteBatch, WriteOp,
};
use crate::compiler::{CriteriaCompiler, MapCompiler, MapPredicate};
use crate::config::StoreConfig;
use crate::criteria::Criteria;
use crate::entity::{CompositeKey, CoreRow, EntityId, EntityRecord, RelationTable};
use crate::error::{CoreError, CoreResult};
use crate::schema::KindSchema;
use crate::stats::EngineStats;
use crate::types::{TransactionId, Version};
use parking_lot::RwLock;
use realmstore_codec::Document;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

const NAME: &str = "concurrent-map";

type KindRecords = HashMap<EntityId, EntityRecord>;

/// In-memory map engine.
///
/// Capabilities: CRUD and criteria queries.
pub struct ConcurrentMapEngine {
    pool: ConnectionPool,
    records: RwLock<HashMap<String, KindRecords>>,
    relations: RwLock<HashMap<String, RelationTable>>,
    stats: EngineStats,
}

impl ConcurrentMapEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            pool: ConnectionPool::new(NAME, config.max_connections, config.acquire_timeout),
            records: RwLock::new(HashMap::new()),
            relations: RwLock::new(HashMap::new()),
            stats: EngineStats::new(),
        }
    }

    /// Stores `record` exactly as given, replacing any existing entry.
    pub fn load_record(&self, schema: &KindSchema, record: EntityRecord) {
        self.records
            .write()
            .entry(schema.name().to_string())
            .or_default()
            .insert(record.id, record);
    }

    fn with_record<T>(
        &self,
        schema: &KindSchema,
        id: EntityId,
        f: impl FnOnce(&EntityRecord) -> T,
    ) -> Option<T> {
        self.records
            .read()
            .get(schema.name())
            .and_then(|k| k.get(&id))
            .map(f)
    }
}

impl FieldSource for ConcurrentMapEngine {
    fn fetch_core(&self, schema: &KindSchema, id: EntityId) -> CoreResult<Option<CoreRow>> {
        self.pool.ensure_available()?;
        self.stats.record_core_fetch();
        Ok(self.with_record(schema, id, |r| CoreRow {
            id,
            version: r.version,
            schema_version: r.schema_version,
            core: r.core.clone(),
        }))
    }

    fn fetch_group(&self, schema: &KindSchema, id: EntityId, group: &str) -> CoreResult<Document> {
        schema.check_group(group)?;
        self.pool.ensure_available()?;
        self.stats.record_group_fetch();
        self.with_record(schema, id, |r| r.group(group).cloned().unwrap_or_default())
            .ok_or_else(|| {
                CoreError::invalid_prior_state(format!("{} {id} does not exist", schema.name()))
            })
    }

    fn fetch_groups(
        &self,
        schema: &KindSchema,
        id: EntityId,
    ) -> CoreResult<BTreeMap<String, Document>> {
        self.pool.ensure_available()?;
        self.stats.record_full_fetch();
        self.with_record(schema, id, |r| {
            schema
                .groups()
                .map(|g| (g.to_string(), r.group(g).cloned().unwrap_or_default()))
                .collect()
        })
        .ok_or_else(|| {
            CoreError::invalid_prior_state(format!("{} {id} does not exist", schema.name()))
        })
    }

    fn supports_partial_fetch(&self) -> bool {
        false
    }
}

impl StorageEngine for ConcurrentMapEngine {
    type Query = MapPredicate;

    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
            .with(Capability::Crud)
            .with(Capability::CriteriaQuery)
    }

    fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn compile(&self, schema: &KindSchema, criteria: &Criteria) -> CoreResult<MapPredicate> {
        MapCompiler.compile(schema, criteria)
    }

    fn execute(
        &self,
        conn: &Connection,
        schema: &KindSchema,
        query: &MapPredicate,
    ) -> CoreResult<Vec<CoreRow>> {
        conn.check()?;
        self.stats.record_scan();
        let records = self.records.read();
        Ok(records
            .get(schema.name())
            .map(|kind| {
                kind.values()
                    .filter(|r| query.evaluate(r))
                    .map(|r| CoreRow {
                        id: r.id,
                        version: r.version,
                        schema_version: r.schema_version,
                        core: r.core.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn apply(
        &self,
        conn: &Connection,
        owner: TransactionId,
        schema: &KindSchema,
        batch: &WriteBatch,
    ) -> CoreResult<Vec<(EntityId, Version)>> {
        conn.check()?;
        let mut records = self.records.write();
        let mut relations = self.relations.write();
        let kind = records.entry(schema.name().to_string()).or_default();

        let stale = stale_ids(batch, |id| kind.get(&id).map(|r| r.version));
        if !stale.is_empty() {
            self.stats.record_conflict();
            tracing::debug!(txid = %owner, kind = schema.name(), ?stale, "stale versions at commit");
            return Err(CoreError::OptimisticLockConflict {
                kind: schema.name().to_string(),
                ids: stale,
            });
        }

        let mut written = Vec::with_capacity(batch.ops.len());
        for op in &batch.ops {
            let (record, version) = match op {
                WriteOp::Insert(record) => (record, Version::UNCOMMITTED.next()),
                WriteOp::Update { record, expected } => (record, expected.next()),
                WriteOp::Remove { id, .. } => {
                    kind.remove(id);
                    for table in relations.values_mut() {
                        table.remove_entity(*id);
                    }
                    continue;
                }
            };
            let mut stored = record.clone();
            stored.version = version;
            stored.schema_version = schema.schema_version();
            written.push((stored.id, version));
            kind.insert(stored.id, stored);
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

        self.stats
            .record_commit((batch.ops.len() + batch.relations.len()) as u64);
        Ok(written)
    }

    fn find_relation(&self, relation: &str, key: CompositeKey) -> CoreResult<Option<CompositeKey>> {
        self.pool.ensure_available()?;
        Ok(self.relations.read().get(relation).and_then(|t| t.find(&key)))
    }

    fn children_of(&self, relation: &str, parent: EntityId) -> CoreResult<Vec<EntityId>> {
        self.pool.ensure_available()?;
        Ok(self
            .relations
            .read()
            .get(relation)
            .map(|t| t.children_of(parent).collect())
            .unwrap_or_default())
    }

    fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

impl Default for ConcurrentMapEngine {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl fmt::Debug for ConcurrentMapEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentMapEngine")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LockingPolicy;
    use crate::types::SchemaVersion;

    fn schema() -> KindSchema {
        KindSchema::new("sample").group("notes").group("extra")
    }

    fn record() -> EntityRecord {
        let mut core = Document::new();
        core.insert("user_id", "u1");
        let mut notes = Document::new();
        notes.insert("k", "v");
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

    #[test]
    fn optimistic_only() {
        let engine = ConcurrentMapEngine::default();
        assert_eq!(engine.locking_policy(), LockingPolicy::Optimistic);
        assert!(!engine.supports_partial_fetch());
        assert!(engine
            .lock_row(TransactionId(1), &schema(), EntityId::new())
            .is_err());
    }

    #[test]
    fn insert_update_remove() {
        let engine = ConcurrentMapEngine::default();
        let schema = schema();
        let r = record();
        let conn = engine.pool().acquire().unwrap();

        let insert = WriteBatch {
            ops: vec![WriteOp::Insert(r.clone())],
            relations: Vec::new(),
        };
        let written = engine.apply(&conn, TransactionId(1), &schema, &insert).unwrap();
        assert_eq!(written, vec![(r.id, Version::new(1))]);

        let update = WriteBatch {
            ops: vec![WriteOp::Update {
                record: r.clone(),
                expected: Version::new(1),
            }],
            relations: Vec::new(),
        };
        engine.apply(&conn, TransactionId(2), &schema, &update).unwrap();
        assert!(engine.apply(&conn, TransactionId(3), &schema, &update).is_err());
        assert_eq!(
            engine.fetch_core(&schema, r.id).unwrap().unwrap().version,
            Version::new(2)
        );

        let groups = engine.fetch_groups(&schema, r.id).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups["extra"].is_empty());

        let remove = WriteBatch {
            ops: vec![WriteOp::Remove {
                id: r.id,
                expected: Version::new(2),
            }],
            relations: Vec::new(),
        };
        engine.apply(&conn, TransactionId(4), &schema, &remove).unwrap();
        assert!(engine.fetch_core(&schema, r.id).unwrap().is_none());
        assert!(engine.fetch_groups(&schema, r.id).is_err());
    }
}
