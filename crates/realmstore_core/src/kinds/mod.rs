//! Built-in entity kinds.
//!
//! Each kind module declares its searchable fields as constants and a
//! `schema()` describing its persisted layout.

pub mod client_session;
pub mod user_session;

use crate::schema::KindSchema;

/// Join relation between a composite role and the roles it contains.
pub const COMPOSITE_ROLE: &str = "composite-role";

/// Schemas of every built-in kind.
#[must_use]
pub fn builtin_schemas() -> Vec<KindSchema> {
    vec![user_session::schema(), client_session::schema()]
}
