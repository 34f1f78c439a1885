//! In-memory storage module
//!
//! Provides the typed key space and the collection payloads stored in it.
//! This module is independent of the protocol and of command handling.

mod database;
mod entry;
mod sequenced_map;
mod stream;
mod value;
pub mod zset;

pub use database::{Database, Ttl};
pub use entry::Entry;
pub use sequenced_map::{Cursor, DuplicateKeyError, Iter, SequencedMap};
pub use stream::{Stream, StreamError, StreamFields, StreamId};
pub use value::{Value, ValueKind};
pub use zset::{Aggregate, ScoreBound, ZSet};
