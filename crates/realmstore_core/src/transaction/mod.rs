//! Storage transactions.
//!
//! A transaction is bound to one entity kind and one engine connection:
//! - **Staged writes**: creates, updates and removes stay in memory until commit
//! - **Read-your-writes**: reads and queries see the transaction's own staged writes
//! - **Optimistic concurrency**: commit re-validates every version a write was based on
//! - **Scoped lifetime**: [`TransactionScope`] commits or rolls back at the end of a unit of work

mod scope;
mod state;
mod storage;

pub use scope::TransactionScope;
pub use state::TransactionState;
pub use storage::{QueryResults, StorageTransaction};
