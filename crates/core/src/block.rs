//! Block type identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The category of every control-flow block.
pub const CONTROL_CATEGORY: &str = "control";

/// A block type string of the form `<category>.<name>`.
///
/// Examples: `traffic.ping`, `remote.ssh_exec`, `control.condition`. Both
/// parts must be non-empty ASCII lowercase identifiers (letters, digits,
/// underscores, starting with a letter), joined by a single dot. Block
/// dispatch is keyed on the full string; adding a block is a registration,
/// not a subclass.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockType {
    full: Arc<str>,
    dot: usize,
}

/// Errors from parsing a [`BlockType`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum BlockTypeError {
    /// The string did not contain exactly one dot separator.
    #[error("block type must be of the form <category>.<name>")]
    MissingSeparator,

    /// The category or name part was not a valid identifier.
    #[error("block type contains an invalid identifier: {0}")]
    InvalidIdentifier(String),
}

fn is_valid_part(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl BlockType {
    /// Parse a block type, validating the `<category>.<name>` form.
    pub fn new(s: impl AsRef<str>) -> Result<Self, BlockTypeError> {
        let s = s.as_ref();
        let mut parts = s.splitn(3, '.');
        let (category, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(c), Some(n), None) => (c, n),
            _ => return Err(BlockTypeError::MissingSeparator),
        };
        if !is_valid_part(category) {
            return Err(BlockTypeError::InvalidIdentifier(category.to_string()));
        }
        if !is_valid_part(name) {
            return Err(BlockTypeError::InvalidIdentifier(name.to_string()));
        }
        Ok(Self {
            full: Arc::from(s),
            dot: category.len(),
        })
    }

    /// The full `<category>.<name>` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// The category part (before the dot).
    #[must_use]
    pub fn category(&self) -> &str {
        &self.full[..self.dot]
    }

    /// The name part (after the dot).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    /// Returns `true` if this is a `control.*` block.
    ///
    /// Control blocks are interpreted by the scheduler itself; they never go
    /// through the handler registry and are never retried.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.category() == CONTROL_CATEGORY
    }
}

impl FromStr for BlockType {
    type Err = BlockTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for BlockType {
    type Error = BlockTypeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl AsRef<str> for BlockType {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full)
    }
}

impl fmt::Debug for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockType({})", self.full)
    }
}

impl PartialEq<str> for BlockType {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for BlockType {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl PartialEq<String> for BlockType {
    fn eq(&self, other: &String) -> bool {
        self.as_str() == other.as_str()
    }
}

impl PartialEq<BlockType> for str {
    fn eq(&self, other: &BlockType) -> bool {
        self == other.as_str()
    }
}

impl PartialEq<BlockType> for &str {
    fn eq(&self, other: &BlockType) -> bool {
        *self == other.as_str()
    }
}

impl Serialize for BlockType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full)
    }
}

struct BlockTypeVisitor;

impl Visitor<'_> for BlockTypeVisitor {
    type Value = BlockType;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a block type string of the form <category>.<name>")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        BlockType::new(value).map_err(|e| E::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for BlockType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(BlockTypeVisitor)
    }
}
