//! # RealmStore Codec
//!
//! Field values and side-document encoding for RealmStore.
//!
//! This crate provides:
//! - [`Value`], the dynamic value carried by entity fields and criteria
//!   literals
//! - [`Document`], a text-keyed attribute map stored as CBOR, used for
//!   side-documents and deferred field groups
//!
//! ## Usage
//!
//! ```
//! use realmstore_codec::{Document, Value};
//!
//! let mut doc = Document::new();
//! doc.insert("client_id", "account-console");
//!
//! let bytes = doc.to_cbor().unwrap();
//! let client = Document::extract(&bytes, "client_id").unwrap();
//! assert_eq!(client, Some(Value::from("account-console")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod value;

pub use document::Document;
pub use error::{CodecError, CodecResult};
pub use value::{Value, ValueType};
