//! Entity identifiers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Stable identifier of a remote entity, page, block, file or user.
///
/// Identifiers are normalized on construction: ASCII letters are
/// lowercased and every `-` separator is removed, so the dashed and the
/// compact spelling of the same remote id compare equal.
///
/// # Example
///
/// ```rust
/// use docsync_core::EntityId;
///
/// let dashed = EntityId::new("1A2B3C4D-0000-1111-2222-333344445555");
/// let compact = EntityId::new("1a2b3c4d000011112222333344445555");
/// assert_eq!(dashed, compact);
/// assert_eq!(dashed.as_str(), "1a2b3c4d000011112222333344445555");
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityId(String);

impl EntityId {
    /// Creates a normalized identifier.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    /// Returns the normalized identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Normalizes a raw identifier (lowercase, no `-`).
#[must_use]
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for EntityId {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(&raw))
    }
}

/// Serde adapter persisting `Option<EntityId>` as a string, empty for `None`.
pub mod optional {
    use super::EntityId;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes `None` as `""`.
    pub fn serialize<S: Serializer>(id: &Option<EntityId>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(id.as_ref().map_or("", EntityId::as_str))
    }

    /// Deserializes `""` and `null` as `None`.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<EntityId>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw
            .map(|r| EntityId::new(&r))
            .filter(|id| !id.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[test]
    fn normalizes_case_and_dashes() {
        assert_eq!(EntityId::new(" AB-cd-EF ").as_str(), "abcdef");
        assert_eq!(normalize("----"), "");
    }

    #[test]
    fn deserialization_normalizes() {
        let id: EntityId = serde_json::from_str("\"AA-BB\"").unwrap();
        assert_eq!(id.as_str(), "aabb");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"aabb\"");
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(default, with = "optional")]
        parent_id: Option<EntityId>,
    }

    #[test]
    fn optional_uses_empty_string() {
        let none = Holder { parent_id: None };
        assert_eq!(serde_json::to_string(&none).unwrap(), r#"{"parent_id":""}"#);

        let parsed: Holder = serde_json::from_str(r#"{"parent_id":""}"#).unwrap();
        assert_eq!(parsed, none);
        let parsed: Holder = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(parsed, none);
        let parsed: Holder = serde_json::from_str(r#"{"parent_id":"A-1"}"#).unwrap();
        assert_eq!(parsed.parent_id, Some(EntityId::new("a1")));
    }
}
