//! Side-documents: text-keyed attribute maps stored as CBOR.
//!
//! Entity attributes that are not promoted to dedicated columns live in a
//! side-document. Deferred field groups (notes, child collections) are
//! stored the same way. Query compilers extract single keys from the
//! encoded bytes without knowing the rest of the document's layout.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// A text-keyed map of field values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Returns true if the document holds `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the document has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Iterates keys in order.
    pub fn keys(&self) -> btree_map::Keys<'_, String, Value> {
        self.0.keys()
    }

    /// Copies every entry of `other` into this document.
    pub fn merge(&mut self, other: Document) {
        self.0.extend(other.0);
    }

    /// Encodes the document as CBOR.
    pub fn to_cbor(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a document from CBOR.
    ///
    /// Empty input decodes to an empty document, matching a freshly
    /// created row whose side-document was never written.
    pub fn from_cbor(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
        match value {
            Value::Map(map) => Ok(Self(map)),
            other => Err(CodecError::invalid_structure(format!(
                "side-document must be a map, found {}",
                other.value_type()
            ))),
        }
    }

    /// Extracts a single key from an encoded document.
    ///
    /// This is the structured-extraction primitive (`doc->'key'`) used by
    /// query execution over side-documents.
    pub fn extract(bytes: &[u8], key: &str) -> CodecResult<Option<Value>> {
        Ok(Self::from_cbor(bytes)?.remove(key))
    }

    /// Consumes the document and returns the inner map.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<BTreeMap<String, Value>> for Document {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Map(doc.0)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        [
            ("client_id", Value::from("account-console")),
            ("realm_id", Value::from("master")),
            ("started", Value::from(1_700_000_000i64)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn cbor_roundtrip_nested() {
        let mut doc = sample();
        doc.insert("flags", Value::Array(vec![true.into(), Value::Null]));
        doc.insert("raw", Value::Bytes(vec![0, 1, 2]));

        let bytes = doc.to_cbor().unwrap();
        assert_eq!(Document::from_cbor(&bytes).unwrap(), doc);
    }

    #[test]
    fn extract_single_key() {
        let bytes = sample().to_cbor().unwrap();
        assert_eq!(
            Document::extract(&bytes, "client_id").unwrap(),
            Some(Value::from("account-console"))
        );
        assert_eq!(Document::extract(&bytes, "missing").unwrap(), None);
    }

    #[test]
    fn empty_bytes_are_empty_document() {
        assert!(Document::from_cbor(&[]).unwrap().is_empty());
    }

    #[test]
    fn non_map_root_is_rejected() {
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Integer(3), &mut buf).unwrap();
        assert!(matches!(
            Document::from_cbor(&buf),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            Document::from_cbor(&[0xff, 0x00, 0x13]),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn float_is_rejected() {
        let mut buf = Vec::new();
        let mut map = BTreeMap::new();
        map.insert("f".to_string(), 1.5f64);
        ciborium::into_writer(&map, &mut buf).unwrap();
        assert!(Document::from_cbor(&buf).is_err());
    }

    #[test]
    fn merge_overwrites() {
        let mut a = sample();
        let b: Document = [("realm_id", Value::from("other"))].into_iter().collect();
        a.merge(b);
        assert_eq!(a.get("realm_id"), Some(&Value::from("other")));
        assert_eq!(a.len(), 3);
    }
}
