//! Entity identifier.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an entity.
///
/// Entity IDs are 128-bit UUIDs that are:
/// - Allocated by the storage transaction on `create`
/// - Immutable once assigned
/// - The native key type of every engine
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId([u8; 16]);

impl EntityId {
    /// Creates an entity ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Creates an entity ID from a UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.into_bytes())
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Converts to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }

    /// Parses the textual form of an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedIdentifier`] if `s` is not a UUID.
    pub fn parse(s: &str) -> CoreResult<Self> {
        Self::parse_safe(s).ok_or_else(|| CoreError::MalformedIdentifier {
            value: s.to_string(),
        })
    }

    /// Parses the textual form of an identifier, returning `None` for
    /// anything that is not a valid UUID.
    ///
    /// Lookups use this so that arbitrary input (including wildcards) never
    /// matches and never raises.
    #[must_use]
    pub fn parse_safe(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self::from_uuid)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.to_uuid())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

impl FromStr for EntityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl From<EntityId> for Uuid {
    fn from(id: EntityId) -> Self {
        id.to_uuid()
    }
}

impl From<EntityId> for realmstore_codec::Value {
    fn from(id: EntityId) -> Self {
        realmstore_codec::Value::Text(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_unique() {
        let id1 = EntityId::new();
        let id2 = EntityId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn text_roundtrip() {
        let id = EntityId::new();
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_input_is_rejected() {
        for input in ["", "%", "*", "not-a-uuid", "123e4567-e89b-12d3-a456"] {
            assert!(EntityId::parse_safe(input).is_none(), "{input}");
            assert!(matches!(
                EntityId::parse(input),
                Err(CoreError::MalformedIdentifier { .. })
            ));
        }
    }

    #[test]
    fn ordering() {
        let id1 = EntityId::from_bytes([0; 16]);
        let id2 = EntityId::from_bytes([1; 16]);
        assert!(id1 < id2);
    }
}
