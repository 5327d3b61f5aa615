//! In-memory key index.
//!
//! The server's DRAM dictionary is an external collaborator; the tier only
//! needs the [`KeyIndex`] surface. [`MemoryIndex`] is the default
//! `HashMap`-backed implementation.

use crate::core::Handle;
use std::collections::HashMap;

/// What the index keeps per key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub value: Vec<u8>,
    /// Non-owning back-reference to the key's persistent node, if the key
    /// is resident in the persistent tier.
    pub node: Option<Handle>,
}

pub trait KeyIndex {
    fn reserve(&mut self, additional: usize);

    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>, node: Option<Handle>);

    fn remove(&mut self, key: &[u8]) -> Option<IndexEntry>;

    fn get(&self, key: &[u8]) -> Option<&IndexEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    map: HashMap<Vec<u8>, IndexEntry>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &IndexEntry)> {
        self.map.iter().map(|(key, entry)| (key.as_slice(), entry))
    }

    /// Drop the back-reference of `key` if it still points at `node`
    pub fn clear_node(&mut self, key: &[u8], node: Handle) {
        if let Some(entry) = self.map.get_mut(key) {
            if entry.node == Some(node) {
                entry.node = None;
            }
        }
    }
}

impl KeyIndex for MemoryIndex {
    fn reserve(&mut self, additional: usize) {
        self.map.reserve(additional);
    }

    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>, node: Option<Handle>) {
        self.map.insert(key, IndexEntry { value, node });
    }

    fn remove(&mut self, key: &[u8]) -> Option<IndexEntry> {
        self.map.remove(key)
    }

    fn get(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.map.get(key)
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_presizes() {
        let mut index = MemoryIndex::new();
        index.reserve(128);
        assert!(index.capacity() >= 128);
        assert!(index.is_empty());
    }

    #[test]
    fn test_clear_node_only_on_match() {
        let mut index = MemoryIndex::new();
        let node = Handle::new(1, 1);
        let other = Handle::new(1, 2);
        index.insert(b"k".to_vec(), b"v".to_vec(), Some(node));

        index.clear_node(b"k", other);
        assert_eq!(index.get(b"k").unwrap().node, Some(node));

        index.clear_node(b"k", node);
        assert_eq!(index.get(b"k").unwrap().node, None);
        assert_eq!(index.get(b"k").unwrap().value, b"v");
    }
}
