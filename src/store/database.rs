//! One logical database: a key space with lazy expiry and typed accessors

use super::entry::Entry;
use super::stream::Stream;
use super::value::{Value, ValueKind};
use super::zset::ZSet;
use crate::error::{CommandError, CommandResult};
use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::BuildHasherDefault;
use std::time::{Duration, Instant};

/// Type alias for our hash map with SipHasher
type KeyMap = HashMap<Bytes, Entry, BuildHasherDefault<SipHasher13>>;

/// Remaining lifetime of a key, as TTL/PTTL report it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Missing,
    Persistent,
    Expires(Duration),
}

/// Generates the read, write and create-on-demand accessors of one collection kind.
macro_rules! typed_accessors {
    ($variant:ident, $ty:ty, $get:ident, $get_mut:ident, $or_insert:ident) => {
        pub fn $get(&mut self, key: &[u8]) -> CommandResult<Option<&$ty>> {
            match self.get(key) {
                None => Ok(None),
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(_) => Err(CommandError::WrongType),
            }
        }

        pub fn $get_mut(&mut self, key: &[u8]) -> CommandResult<Option<&mut $ty>> {
            match self.get_mut(key) {
                None => Ok(None),
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(_) => Err(CommandError::WrongType),
            }
        }

        /// Existing value of this kind, or a fresh empty one stored under `key`.
        /// Call only once the command is committed to mutating, and pair with
        /// [`Database::remove_if_empty`].
        pub fn $or_insert(&mut self, key: &Bytes) -> CommandResult<&mut $ty> {
            self.purge_if_expired(key);
            let entry = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::$variant(Default::default())));
            match &mut entry.value {
                Value::$variant(inner) => Ok(inner),
                _ => Err(CommandError::WrongType),
            }
        }
    };
}

/// Key space of one database index
#[derive(Debug, Default)]
pub struct Database {
    entries: KeyMap,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `key` if its expiry has passed. Returns true if it was dropped.
    fn purge_if_expired(&mut self, key: &[u8]) -> bool {
        if self.entries.get(key).is_some_and(Entry::is_expired) {
            self.entries.remove(key);
            return true;
        }
        false
    }

    pub fn entry(&mut self, key: &[u8]) -> Option<&Entry> {
        self.purge_if_expired(key);
        self.entries.get(key)
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&Value> {
        self.entry(key).map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.purge_if_expired(key);
        self.entries.get_mut(key).map(|entry| &mut entry.value)
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.entry(key).is_some()
    }

    pub fn kind(&mut self, key: &[u8]) -> Option<ValueKind> {
        self.get(key).map(Value::kind)
    }

    /// Delete a key, returning its live value
    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        if self.purge_if_expired(key) {
            return None;
        }
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Store `value`, dropping any expiry the key had
    pub fn put_value(&mut self, key: Bytes, value: Value) {
        self.entries.insert(key, Entry::new(value));
    }

    /// Store `value`, keeping the key's current expiry if it is still live
    pub fn put_value_keep_ttl(&mut self, key: Bytes, value: Value) {
        self.purge_if_expired(&key);
        match self.entries.get_mut(&key) {
            Some(entry) => entry.value = value,
            None => {
                self.entries.insert(key, Entry::new(value));
            }
        }
    }

    /// Remove `key` if it holds a collection that has become empty
    pub fn remove_if_empty(&mut self, key: &[u8]) {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.value.is_empty_collection())
        {
            self.entries.remove(key);
        }
    }

    /// Set an absolute expiry. A deadline already in the past deletes the key.
    /// Returns false if the key does not exist.
    pub fn set_expiry(&mut self, key: &[u8], at: Instant) -> bool {
        self.purge_if_expired(key);
        if !self.entries.contains_key(key) {
            return false;
        }
        if at <= Instant::now() {
            self.entries.remove(key);
        } else if let Some(entry) = self.entries.get_mut(key) {
            entry.expire_at = Some(at);
        }
        true
    }

    /// Drop the expiry of `key`. Returns true if there was one.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.purge_if_expired(key);
        match self.entries.get_mut(key) {
            Some(entry) => entry.expire_at.take().is_some(),
            None => false,
        }
    }

    pub fn ttl(&mut self, key: &[u8]) -> Ttl {
        match self.entry(key) {
            None => Ttl::Missing,
            Some(entry) => match entry.time_to_live() {
                None => Ttl::Persistent,
                Some(left) => Ttl::Expires(left),
            },
        }
    }

    /// Live keys, in no particular order
    pub fn keys(&self) -> Vec<Bytes> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all keys
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn string(&mut self, key: &[u8]) -> CommandResult<Option<&Bytes>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    typed_accessors!(List, VecDeque<Bytes>, list, list_mut, list_or_insert);
    typed_accessors!(Set, HashSet<Bytes>, set, set_mut, set_or_insert);
    typed_accessors!(Hash, HashMap<Bytes, Bytes>, hash, hash_mut, hash_or_insert);
    typed_accessors!(ZSet, ZSet, zset, zset_mut, zset_or_insert);
    typed_accessors!(Stream, Stream, stream, stream_mut, stream_or_insert);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_put_and_get() {
        let mut db = Database::new();
        db.put_value(key("k"), Value::string("v"));
        assert_eq!(db.string(b"k").unwrap(), Some(&Bytes::from("v")));
        assert!(db.exists(b"k"));
        assert_eq!(db.kind(b"k"), Some(ValueKind::String));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_wrong_type_read() {
        let mut db = Database::new();
        db.put_value(key("k"), Value::string("v"));
        assert_eq!(db.list(b"k").unwrap_err(), CommandError::WrongType);
        assert_eq!(db.list_or_insert(&key("k")).unwrap_err(), CommandError::WrongType);
        // Failed access leaves the value alone
        assert_eq!(db.kind(b"k"), Some(ValueKind::String));
    }

    #[test]
    fn test_past_expiry_removes_key() {
        let mut db = Database::new();
        db.put_value(key("k"), Value::string("v"));
        assert!(db.set_expiry(b"k", Instant::now() - Duration::from_millis(1)));
        assert!(db.get(b"k").is_none());
        assert!(!db.exists(b"k"));
        assert_eq!(db.ttl(b"k"), Ttl::Missing);
        assert!(db.keys().is_empty());
    }

    #[test]
    fn test_lazy_expiry_on_read() {
        let mut db = Database::new();
        db.put_value(key("k"), Value::string("v"));
        db.set_expiry(b"k", Instant::now() + Duration::from_millis(20));
        assert!(db.exists(b"k"));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(db.len(), 0);
        assert!(db.string(b"k").unwrap().is_none());
        assert!(db.remove(b"k").is_none());
    }

    #[test]
    fn test_put_value_clears_ttl() {
        let mut db = Database::new();
        db.put_value(key("k"), Value::string("v"));
        db.set_expiry(b"k", Instant::now() + Duration::from_secs(100));
        assert!(matches!(db.ttl(b"k"), Ttl::Expires(_)));

        db.put_value_keep_ttl(key("k"), Value::string("w"));
        assert!(matches!(db.ttl(b"k"), Ttl::Expires(_)));

        db.put_value(key("k"), Value::string("x"));
        assert_eq!(db.ttl(b"k"), Ttl::Persistent);
    }

    #[test]
    fn test_persist() {
        let mut db = Database::new();
        db.put_value(key("k"), Value::string("v"));
        assert!(!db.persist(b"k"));
        db.set_expiry(b"k", Instant::now() + Duration::from_secs(100));
        assert!(db.persist(b"k"));
        assert_eq!(db.ttl(b"k"), Ttl::Persistent);
    }

    #[test]
    fn test_or_insert_and_remove_if_empty() {
        let mut db = Database::new();
        assert!(db.list(b"l").unwrap().is_none());

        db.list_or_insert(&key("l")).unwrap().push_back(key("a"));
        assert_eq!(db.list(b"l").unwrap().map(VecDeque::len), Some(1));

        db.list_mut(b"l").unwrap().unwrap().pop_front();
        db.remove_if_empty(b"l");
        assert!(!db.exists(b"l"));
    }

    #[test]
    fn test_empty_stream_is_kept() {
        let mut db = Database::new();
        db.stream_or_insert(&key("s")).unwrap();
        db.remove_if_empty(b"s");
        assert_eq!(db.kind(b"s"), Some(ValueKind::Stream));
    }
}
