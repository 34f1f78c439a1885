//! Insertion-ordered map with O(1) neighbour queries
//!
//! Entries are linked by *key* rather than by pointer: every node records the
//! key of its predecessor and successor, and the map keeps the head and tail
//! keys. Lookup, append, removal and neighbour queries are all a single hash
//! lookup away.
//!
//! Order is the order of `append` calls, not key order. Streams append ids in
//! increasing order, which is what makes the key-ordered search in
//! [`Cursor::find_first_suitable`] meaningful.

use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Returned by [`SequencedMap::append`] when the key is already present
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("key is already present in the map")]
pub struct DuplicateKeyError;

#[derive(Debug, Clone)]
struct Node<K, V> {
    value: V,
    prev: Option<K>,
    next: Option<K>,
}

/// Ordered map keyed by `K`, iterated in insertion order
#[derive(Debug, Clone)]
pub struct SequencedMap<K, V> {
    nodes: HashMap<K, Node<K, V>>,
    head: Option<K>,
    tail: Option<K>,
}

impl<K, V> Default for SequencedMap<K, V> {
    fn default() -> Self {
        SequencedMap {
            nodes: HashMap::new(),
            head: None,
            tail: None,
        }
    }
}

impl<K: Clone + Eq + Hash, V> SequencedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add `key` after the current tail.
    pub fn append(&mut self, key: K, value: V) -> Result<(), DuplicateKeyError> {
        if self.nodes.contains_key(&key) {
            return Err(DuplicateKeyError);
        }

        let prev = self.tail.replace(key.clone());
        match &prev {
            Some(prev_key) => self.node_mut(prev_key).next = Some(key.clone()),
            None => self.head = Some(key.clone()),
        }

        self.nodes.insert(
            key,
            Node {
                value,
                prev,
                next: None,
            },
        );
        Ok(())
    }

    /// Replace the value of an existing key in place, or append a new one.
    /// Returns the previous value if there was one.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(node) = self.nodes.get_mut(&key) {
            return Some(std::mem::replace(&mut node.value, value));
        }
        // Cannot fail: the key was just checked to be absent
        let _ = self.append(key, value);
        None
    }

    /// Unlink `key`, joining its neighbours. No-op if absent.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let node = self.nodes.remove(key)?;

        match &node.prev {
            Some(prev_key) => self.node_mut(prev_key).next = node.next.clone(),
            None => self.head = node.next.clone(),
        }
        match &node.next {
            Some(next_key) => self.node_mut(next_key).prev = node.prev.clone(),
            None => self.tail = node.prev.clone(),
        }

        Some(node.value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.nodes.get(key).map(|node| &node.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.nodes.get_mut(key).map(|node| &mut node.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// First key in insertion order
    pub fn head(&self) -> Option<&K> {
        self.head.as_ref()
    }

    /// Last key in insertion order
    pub fn tail(&self) -> Option<&K> {
        self.tail.as_ref()
    }

    /// Key appended just before `key`; `None` at the head or if `key` is absent
    pub fn previous_key(&self, key: &K) -> Option<&K> {
        self.nodes.get(key)?.prev.as_ref()
    }

    /// Key appended just after `key`; `None` at the tail or if `key` is absent
    pub fn next_key(&self, key: &K) -> Option<&K> {
        self.nodes.get(key)?.next.as_ref()
    }

    /// Remove and return the head entry
    pub fn pop_front(&mut self) -> Option<(K, V)> {
        let key = self.head.clone()?;
        let value = self.remove(&key)?;
        Some((key, value))
    }

    /// Entries in insertion order; `.rev()` walks from the tail.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            front: self.head.as_ref(),
            back: self.tail.as_ref(),
            remaining: self.nodes.len(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Forward cursor positioned before the head
    pub fn cursor(&self) -> Cursor<K> {
        Cursor::new(Direction::Forward, None)
    }

    /// Reverse cursor positioned after the tail
    pub fn reverse_cursor(&self) -> Cursor<K> {
        Cursor::new(Direction::Reverse, None)
    }

    /// Forward cursor whose first `next` yields `key` (or the head if `key` is absent)
    pub fn cursor_before(&self, key: &K) -> Cursor<K> {
        Cursor::new(Direction::Forward, self.previous_key(key).cloned())
    }

    /// Reverse cursor whose first `next` yields `key` (or the tail if `key` is absent)
    pub fn cursor_after(&self, key: &K) -> Cursor<K> {
        Cursor::new(Direction::Reverse, self.next_key(key).cloned())
    }

    fn entry(&self, key: &K) -> Option<(&K, &V)> {
        self.nodes.get_key_value(key).map(|(k, node)| (k, &node.value))
    }

    fn node_mut(&mut self, key: &K) -> &mut Node<K, V> {
        self.nodes
            .get_mut(key)
            .expect("sequenced map link points at a missing key")
    }
}

/// Borrowing iterator over a [`SequencedMap`]
pub struct Iter<'a, K, V> {
    map: &'a SequencedMap<K, V>,
    front: Option<&'a K>,
    back: Option<&'a K>,
    remaining: usize,
}

impl<'a, K: Clone + Eq + Hash, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let (key, node) = self.map.nodes.get_key_value(self.front?)?;
        self.front = node.next.as_ref();
        self.remaining -= 1;
        Some((key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K: Clone + Eq + Hash, V> DoubleEndedIterator for Iter<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let (key, node) = self.map.nodes.get_key_value(self.back?)?;
        self.back = node.prev.as_ref();
        self.remaining -= 1;
        Some((key, &node.value))
    }
}

impl<'a, K: Clone + Eq + Hash, V> ExactSizeIterator for Iter<'a, K, V> {}

impl<'a, K: Clone + Eq + Hash, V> IntoIterator for &'a SequencedMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// A position *between* two entries of a [`SequencedMap`].
///
/// The cursor does not borrow the map; every call takes the map explicitly,
/// so an owner can interleave reads and removals while walking it. A forward
/// cursor remembers the key just before it, a reverse cursor the key just
/// after it (`None` meaning "before the head" / "after the tail").
#[derive(Debug, Clone)]
pub struct Cursor<K> {
    direction: Direction,
    last: Option<K>,
    removable: bool,
}

impl<K: Clone + Eq + Hash> Cursor<K> {
    fn new(direction: Direction, last: Option<K>) -> Self {
        Cursor {
            direction,
            last,
            removable: false,
        }
    }

    fn upcoming<'m, V>(&self, map: &'m SequencedMap<K, V>) -> Option<&'m K> {
        match (self.direction, &self.last) {
            (Direction::Forward, None) => map.head(),
            (Direction::Forward, Some(key)) => map.next_key(key),
            (Direction::Reverse, None) => map.tail(),
            (Direction::Reverse, Some(key)) => map.previous_key(key),
        }
    }

    fn behind<'m, V>(&self, map: &'m SequencedMap<K, V>, key: &K) -> Option<&'m K> {
        match self.direction {
            Direction::Forward => map.previous_key(key),
            Direction::Reverse => map.next_key(key),
        }
    }

    pub fn has_next<V>(&self, map: &SequencedMap<K, V>) -> bool {
        self.upcoming(map).is_some()
    }

    /// Step over the next entry and return it.
    pub fn next<'m, V>(&mut self, map: &'m SequencedMap<K, V>) -> Option<(&'m K, &'m V)> {
        let key = self.upcoming(map)?;
        let (key, value) = map.entry(key)?;
        self.last = Some(key.clone());
        self.removable = true;
        Some((key, value))
    }

    /// Remove the entry most recently returned by [`Cursor::next`].
    ///
    /// The cursor stays valid and the following `next` yields what would have
    /// come after the removed entry. Returns `None` if nothing is removable
    /// (no `next` yet, or already removed).
    pub fn remove<V>(&mut self, map: &mut SequencedMap<K, V>) -> Option<V> {
        if !self.removable {
            return None;
        }
        let current = self.last.take()?;
        self.last = self.behind(map, &current).cloned();
        self.removable = false;
        map.remove(&current)
    }
}

impl<K: Clone + Eq + Hash + Ord> Cursor<K> {
    /// Reposition so that `next` yields the first entry at or past `border`:
    /// key `>= border` for a forward cursor, `<= border` for a reverse one.
    ///
    /// Scans from the current position when the border lies ahead of it, and
    /// restarts from the end of the map only when the cursor is already past
    /// the border. If no entry qualifies the cursor ends up exhausted.
    pub fn find_first_suitable<V>(&mut self, map: &SequencedMap<K, V>, border: &K) {
        self.removable = false;

        if map.contains(border) {
            self.last = self.behind(map, border).cloned();
            return;
        }

        let past_border = |key: &K| match self.direction {
            Direction::Forward => key >= border,
            Direction::Reverse => key <= border,
        };

        if self.last.as_ref().is_some_and(|key| past_border(key)) {
            self.last = None;
        }

        while let Some(candidate) = self.upcoming(map) {
            if past_border(candidate) {
                break;
            }
            self.last = Some(candidate.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(keys: &[u32]) -> SequencedMap<u32, String> {
        let mut map = SequencedMap::new();
        for k in keys {
            map.append(*k, format!("v{}", k)).unwrap();
        }
        map
    }

    fn drain<V>(map: &SequencedMap<u32, V>, cursor: &mut Cursor<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some((k, _)) = cursor.next(map) {
            out.push(*k);
        }
        out
    }

    #[test]
    fn test_append_order_is_kept() {
        let map = map_of(&[5, 1, 9, 3]);
        assert_eq!(map.head(), Some(&5));
        assert_eq!(map.tail(), Some(&3));
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![5, 1, 9, 3]);
        assert_eq!(
            map.iter().rev().map(|(k, _)| *k).collect::<Vec<_>>(),
            vec![3, 9, 1, 5]
        );
    }

    #[test]
    fn test_duplicate_append_is_rejected() {
        let mut map = map_of(&[1, 2]);
        assert_eq!(map.append(1, "again".to_string()), Err(DuplicateKeyError));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1).map(String::as_str), Some("v1"));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut map = map_of(&[1, 2, 3]);
        assert_eq!(map.insert(2, "two".to_string()), Some("v2".to_string()));
        assert_eq!(map.insert(4, "four".to_string()), None);
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_relinks_neighbours() {
        let mut map = map_of(&[1, 2, 3, 4]);

        assert_eq!(map.remove(&2), Some("v2".to_string()));
        assert_eq!(map.next_key(&1), Some(&3));
        assert_eq!(map.previous_key(&3), Some(&1));

        map.remove(&1);
        assert_eq!(map.head(), Some(&3));
        assert_eq!(map.previous_key(&3), None);

        map.remove(&4);
        assert_eq!(map.tail(), Some(&3));
        assert_eq!(map.next_key(&3), None);
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove(&42), None);
    }

    #[test]
    fn test_empty_map_boundaries() {
        let mut map: SequencedMap<u32, ()> = SequencedMap::new();
        assert!(map.head().is_none());
        assert!(map.tail().is_none());
        assert!(!map.cursor().has_next(&map));
        assert!(map.pop_front().is_none());
    }

    #[test]
    fn test_forward_cursor_remove() {
        let mut map = map_of(&[1, 2, 3, 4]);
        let mut cursor = map.cursor();

        assert!(cursor.remove(&mut map).is_none());

        while let Some((k, _)) = cursor.next(&map) {
            let k = *k;
            if k % 2 == 0 {
                assert!(cursor.remove(&mut map).is_some());
                assert!(cursor.remove(&mut map).is_none());
            }
        }
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_reverse_cursor_remove_head() {
        let mut map = map_of(&[1, 2, 3]);
        let mut cursor = map.reverse_cursor();
        assert_eq!(drain(&map, &mut cursor.clone()), vec![3, 2, 1]);

        cursor.next(&map);
        cursor.next(&map);
        cursor.next(&map);
        assert_eq!(cursor.remove(&mut map), Some("v1".to_string()));
        assert!(!cursor.has_next(&map));
        assert_eq!(map.head(), Some(&2));
    }

    #[test]
    fn test_find_first_suitable_forward() {
        let map = map_of(&[1, 3, 5]);

        let mut cursor = map.cursor();
        cursor.find_first_suitable(&map, &3);
        assert_eq!(cursor.next(&map).map(|(k, _)| *k), Some(3));

        let mut cursor = map.cursor();
        cursor.find_first_suitable(&map, &4);
        assert_eq!(cursor.next(&map).map(|(k, _)| *k), Some(5));

        let mut cursor = map.cursor();
        cursor.find_first_suitable(&map, &6);
        assert!(cursor.next(&map).is_none());

        let mut cursor = map.cursor();
        cursor.find_first_suitable(&map, &0);
        assert_eq!(drain(&map, &mut cursor), vec![1, 3, 5]);
    }

    #[test]
    fn test_find_first_suitable_restarts_when_past_border() {
        let map = map_of(&[1, 3, 5, 7]);
        let mut cursor = map.cursor();
        assert_eq!(drain(&map, &mut cursor), vec![1, 3, 5, 7]);

        cursor.find_first_suitable(&map, &2);
        assert_eq!(drain(&map, &mut cursor), vec![3, 5, 7]);
    }

    #[test]
    fn test_find_first_suitable_reverse() {
        let map = map_of(&[1, 3, 5]);

        let mut cursor = map.reverse_cursor();
        cursor.find_first_suitable(&map, &3);
        assert_eq!(drain(&map, &mut cursor), vec![3, 1]);

        let mut cursor = map.reverse_cursor();
        cursor.find_first_suitable(&map, &4);
        assert_eq!(drain(&map, &mut cursor), vec![3, 1]);

        let mut cursor = map.reverse_cursor();
        cursor.find_first_suitable(&map, &0);
        assert!(cursor.next(&map).is_none());

        let mut cursor = map.reverse_cursor();
        cursor.find_first_suitable(&map, &9);
        assert_eq!(drain(&map, &mut cursor), vec![5, 3, 1]);
    }

    #[test]
    fn test_positioned_cursors() {
        let map = map_of(&[10, 20, 30]);
        assert_eq!(drain(&map, &mut map.cursor_before(&20)), vec![20, 30]);
        assert_eq!(drain(&map, &mut map.cursor_after(&20)), vec![20, 10]);
        assert_eq!(drain(&map, &mut map.cursor_before(&10)), vec![10, 20, 30]);
    }
}
