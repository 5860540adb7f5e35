//! Author-chosen node identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Maximum accepted length of a node id in bytes.
const MAX_NODE_ID_LEN: usize = 128;

/// A node identifier, chosen by the workflow author.
///
/// Node ids are opaque strings, unique within a single workflow document
/// (`"ping-1"`, `"check_reachable"`, …). They must be non-empty, contain no
/// whitespace, and be at most 128 bytes. No normalization is applied; the
/// id round-trips exactly as the author wrote it.
///
/// Cheap to clone: backed by `Arc<str>`.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

/// Errors from parsing a [`NodeId`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NodeIdError {
    /// The id was empty.
    #[error("node id cannot be empty")]
    Empty,

    /// The id contained whitespace.
    #[error("node id cannot contain whitespace")]
    ContainsWhitespace,

    /// The id exceeded the length limit.
    #[error("node id is too long (max {MAX_NODE_ID_LEN} bytes)")]
    TooLong,
}

impl NodeId {
    /// Parse a node id, validating the format rules.
    pub fn new(s: impl AsRef<str>) -> Result<Self, NodeIdError> {
        let s = s.as_ref();
        if s.is_empty() {
            return Err(NodeIdError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(NodeIdError::ContainsWhitespace);
        }
        if s.len() > MAX_NODE_ID_LEN {
            return Err(NodeIdError::TooLong);
        }
        Ok(Self(Arc::from(s)))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for NodeId {
    type Error = NodeIdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl PartialEq<String> for NodeId {
    fn eq(&self, other: &String) -> bool {
        self.as_str() == other.as_str()
    }
}

impl PartialEq<NodeId> for str {
    fn eq(&self, other: &NodeId) -> bool {
        self == other.as_str()
    }
}

impl PartialEq<NodeId> for &str {
    fn eq(&self, other: &NodeId) -> bool {
        *self == other.as_str()
    }
}

impl PartialEq<NodeId> for String {
    fn eq(&self, other: &NodeId) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

struct NodeIdVisitor;

impl Visitor<'_> for NodeIdVisitor {
    type Value = NodeId;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a non-empty node id string without whitespace")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        NodeId::new(value).map_err(|e| E::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(NodeIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn valid_ids_roundtrip_verbatim() {
        let id = NodeId::new("ping-1").unwrap();
        assert_eq!(id.as_str(), "ping-1");
        assert_eq!(id.to_string(), "ping-1");

        // No normalization: case and punctuation preserved.
        let id = NodeId::new("Check_Reachable.2").unwrap();
        assert_eq!(id, "Check_Reachable.2");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(NodeId::new("").unwrap_err(), NodeIdError::Empty);
    }

    #[test]
    fn rejects_whitespace() {
        assert_eq!(
            NodeId::new("two words").unwrap_err(),
            NodeIdError::ContainsWhitespace
        );
        assert_eq!(
            NodeId::new("tab\there").unwrap_err(),
            NodeIdError::ContainsWhitespace
        );
    }

    #[test]
    fn rejects_too_long() {
        let long = "a".repeat(MAX_NODE_ID_LEN + 1);
        assert_eq!(NodeId::new(long).unwrap_err(), NodeIdError::TooLong);
        assert!(NodeId::new("a".repeat(MAX_NODE_ID_LEN)).is_ok());
    }

    #[test]
    fn equality_with_string_types() {
        let id = NodeId::new("n1").unwrap();
        assert_eq!(id, "n1");
        assert_eq!("n1", id);
        assert_eq!(String::from("n1"), id);

        let id2 = NodeId::new("n1").unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn serde_roundtrip() {
        let id = NodeId::new("scan-hosts").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"scan-hosts\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn serde_rejects_invalid() {
        assert!(serde_json::from_str::<NodeId>("\"\"").is_err());
        assert!(serde_json::from_str::<NodeId>("\"has space\"").is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = NodeId::new("a").unwrap();
        let b = NodeId::new("b").unwrap();
        assert!(a < b);
    }
}
