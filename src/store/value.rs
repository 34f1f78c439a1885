//! Value types for the key space

use super::stream::Stream;
use super::zset::ZSet;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// The six collection kinds a key can hold
#[derive(Debug, Clone)]
pub enum Value {
    /// String value (binary-safe, also used for counters and bitmaps)
    String(Bytes),

    /// List of values (ordered, pushable at both ends)
    List(VecDeque<Bytes>),

    /// Set of unique values (unordered)
    Set(HashSet<Bytes>),

    /// Hash map (field -> value)
    Hash(HashMap<Bytes, Bytes>),

    /// Sorted set (member -> score)
    ZSet(ZSet),

    /// Append-only stream of id-ordered entries
    Stream(Stream),
}

/// Discriminant of a [`Value`], as reported by TYPE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    List,
    Set,
    Hash,
    ZSet,
    Stream,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Set => "set",
            ValueKind::Hash => "hash",
            ValueKind::ZSet => "zset",
            ValueKind::Stream => "stream",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    /// Create a string value
    pub fn string(bytes: impl Into<Bytes>) -> Self {
        Value::String(bytes.into())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Hash(_) => ValueKind::Hash,
            Value::ZSet(_) => ValueKind::ZSet,
            Value::Stream(_) => ValueKind::Stream,
        }
    }

    /// True for a collection with no elements left.
    ///
    /// Strings and streams never count as empty: an empty string is a
    /// valid value and a stream keeps its last id after its entries go.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::List(list) => list.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::Hash(hash) => hash.is_empty(),
            Value::ZSet(zset) => zset.is_empty(),
            Value::String(_) | Value::Stream(_) => false,
        }
    }
}
