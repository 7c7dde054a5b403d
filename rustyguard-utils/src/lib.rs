//! Small allocation-light helpers shared by `rustyguard-enclave`: a
//! dense-index arena for the interface/peer registry, and an `ahash`-keyed
//! secondary index for looking peers up by static key or session id.

use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hash};

pub use ahash::AHasher;

/// `HashMap` keyed with `ahash` instead of the default SipHash: the
/// registry's lookup keys (public keys, session ids) are attacker-supplied
/// but never used as a DoS lever once `mac1` has been verified, so the
/// faster non-cryptographic hasher is the right trade here.
pub type FastMap<K, V> = HashMap<K, V, BuildHasherDefault<AHasher>>;

/// A push-only, dense-index collection: interfaces and peers are assigned
/// ids equal to their insertion order and are never removed, matching the
/// "flat vector indexed by id" replacement for the source's pointer-linked
/// tables (see the workspace's design notes on cyclic references).
#[derive(Debug, Default)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            items: Vec::with_capacity(cap),
        }
    }

    /// Inserts `item` and returns its dense id.
    pub fn push(&mut self, item: T) -> u32 {
        let id = self.items.len() as u32;
        self.items.push(item);
        id
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.items.get(id as usize)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.items.get_mut(id as usize)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.items.iter().enumerate().map(|(i, v)| (i as u32, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, v)| (i as u32, v))
    }
}

impl<T> core::ops::Index<u32> for Arena<T> {
    type Output = T;

    fn index(&self, id: u32) -> &T {
        &self.items[id as usize]
    }
}

impl<T> core::ops::IndexMut<u32> for Arena<T> {
    fn index_mut(&mut self, id: u32) -> &mut T {
        &mut self.items[id as usize]
    }
}

/// A secondary index from an arbitrary hashable key to a dense arena id.
/// Used by the registry to resolve a peer by static public key or by
/// active session id without a linear scan.
#[derive(Debug, Default)]
pub struct Index<K> {
    map: FastMap<K, u32>,
}

impl<K: Eq + Hash> Index<K> {
    pub fn new() -> Self {
        Self {
            map: FastMap::default(),
        }
    }

    pub fn insert(&mut self, key: K, id: u32) {
        self.map.insert(key, id);
    }

    pub fn remove(&mut self, key: &K) {
        self.map.remove(key);
    }

    pub fn get(&self, key: &K) -> Option<u32> {
        self.map.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_ids_are_dense_and_in_insertion_order() {
        let mut arena = Arena::new();
        assert_eq!(arena.push("a"), 0);
        assert_eq!(arena.push("b"), 1);
        assert_eq!(arena.push("c"), 2);
        assert_eq!(arena[1], "b");
    }

    #[test]
    fn index_resolves_and_forgets_keys() {
        let mut idx = Index::new();
        idx.insert([1u8; 4], 7);
        assert_eq!(idx.get(&[1u8; 4]), Some(7));
        idx.remove(&[1u8; 4]);
        assert_eq!(idx.get(&[1u8; 4]), None);
    }
}
