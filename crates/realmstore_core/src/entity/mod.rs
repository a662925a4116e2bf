//! Entity identifiers, versioned records and join records.

mod composite;
mod id;
mod record;

pub use composite::{CompositeKey, RelationTable};
pub use id::EntityId;
pub use record::{CoreRow, EntityRecord};
