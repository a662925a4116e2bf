//! # RealmStore Testkit
//!
//! Test utilities for RealmStore.
//!
//! This crate provides:
//! - Seeded stores over the relational and map engines
//! - A ready-made password credential chain
//! - Property-based generators for sessions and criteria
//!
//! The cross-crate integration and property suites live in `tests/`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realmstore_testkit::prelude::*;
//!
//! #[test]
//! fn finds_sessions_by_realm() {
//!     let store = relational_store();
//!     let ids = seed_sessions(&store, &[SessionSeed::new("r1", "u1", 10)]);
//!     let by_realm = Criteria::compare(user_session::REALM_ID, Operator::Eq, ["r1"])?;
//!     assert_eq!(matching_sessions(&store, &by_realm).len(), ids.len());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
