//! # RealmStore Core
//!
//! Backend-agnostic storage layer for identity data.
//!
//! This crate provides:
//! - Criteria: a typed predicate tree over searchable fields
//! - Criteria compilers producing relational and in-memory predicates
//! - Versioned entities, kind schemas and forward-only migrations
//! - Lazy delegates that fetch deferred field groups on first access
//! - Storage transactions with optimistic version checks and row locks
//! - A relational engine and a concurrent map engine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realmstore_core::kinds::user_session;
//! use realmstore_core::{Criteria, Operator, RelationalEngine, Store};
//!
//! let store = Store::with_builtin_kinds(RelationalEngine::default());
//! let by_user = Criteria::compare(user_session::USER_ID, Operator::Eq, ["u1"])?;
//! let sessions = store.transaction(user_session::KIND, |txn| {
//!     txn.query(&by_user)?.collect_all()
//! })?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod compiler;
mod config;
pub mod criteria;
mod delegate;
pub mod engine;
mod entity;
mod error;
pub mod kinds;
pub mod schema;
mod stats;
mod store;
pub mod transaction;
mod types;

pub use compiler::{CriteriaCompiler, MapCompiler, MapPredicate, RelationalCompiler, SqlPredicate};
pub use config::StoreConfig;
pub use criteria::{Criteria, FieldType, Operator, SearchableField};
pub use delegate::{Delegate, LoadState};
pub use engine::{
    Capabilities, Capability, ConcurrentMapEngine, FieldSource, LockingPolicy, RelationalEngine,
    StorageEngine,
};
pub use entity::{CompositeKey, CoreRow, EntityId, EntityRecord, RelationTable};
pub use error::{CoreError, CoreResult};
pub use schema::{FieldMapping, KindSchema, SchemaMigration};
pub use stats::{EngineStats, StatsSnapshot};
pub use store::Store;
pub use transaction::{QueryResults, StorageTransaction, TransactionScope, TransactionState};
pub use types::{SchemaVersion, TransactionId, Version};

pub use realmstore_codec::{Document, Value};
