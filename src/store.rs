use std::collections::HashMap;
use std::collections::VecDeque;

use crate::ring::{Id, IdSpace};

/// Bounded, insertion-ordered key-value cache. When a `put` lands on a full
/// store the least-recently-inserted entry is dropped first; updating an
/// existing key keeps its position in the order.
#[derive(Debug)]
pub struct KeyStore {
    map: HashMap<String, String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl KeyStore {
    pub fn new(capacity: usize) -> KeyStore {
        KeyStore {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn put(&mut self, key: String, value: String) {
        // A full store always drops the oldest entry before the write, even
        // when the incoming key is already present.
        if self.map.len() == self.capacity {
            self.evict_oldest();
        }
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.map.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    /// Apply `put` for each pair, in the order given, subject to eviction.
    pub fn merge<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    /// Remove and return every pair whose hashed key lies on the clockwise
    /// arc (lo, hi], in insertion order. This is the transfer unit when
    /// predecessor/successor links change hands.
    pub fn extract_range(&mut self, space: &IdSpace, lo: Id, hi: Id) -> Vec<(String, String)> {
        let keys: Vec<String> = self
            .order
            .iter()
            .filter(|k| {
                let h = space.hash_key(k);
                space.in_between(h, space.add(lo, 1), space.add(hi, 1), true)
            })
            .cloned()
            .collect();

        keys.into_iter()
            .map(|k| {
                let v = self.map.remove(&k).unwrap();
                self.order.retain(|o| o != &k);
                (k, v)
            })
            .collect()
    }

    /// Empty the store, returning everything in insertion order. Used for the
    /// full hand-off on graceful departure.
    pub fn drain_all(&mut self) -> Vec<(String, String)> {
        let keys: Vec<String> = self.order.drain(..).collect();
        keys.into_iter()
            .map(|k| {
                let v = self.map.remove(&k).unwrap();
                (k, v)
            })
            .collect()
    }

    /// Keys in insertion order, for the diagnostic dump.
    pub fn keys(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.order.pop_front() {
            self.map.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(capacity: usize, pairs: &[(&str, &str)]) -> KeyStore {
        let mut store = KeyStore::new(capacity);
        for (k, v) in pairs {
            store.put(k.to_string(), v.to_string());
        }
        store
    }

    #[test]
    fn test_put_get() {
        let store = store_with(4, &[("a", "1"), ("b", "2")]);
        assert_eq!(store.get("a"), Some("1".to_string()));
        assert_eq!(store.get("b"), Some("2".to_string()));
        assert_eq!(store.get("c"), None);
        assert!(store.contains("a"));
        assert!(!store.contains("c"));
    }

    #[test]
    fn test_eviction_is_oldest_first() {
        let mut store = store_with(3, &[("a", "1"), ("b", "2"), ("c", "3")]);
        store.put("d".to_string(), "4".to_string());
        assert!(!store.contains("a"));
        assert_eq!(store.keys(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_update_keeps_position() {
        let mut store = store_with(3, &[("a", "1"), ("b", "2")]);
        store.put("a".to_string(), "9".to_string());
        assert_eq!(store.get("a"), Some("9".to_string()));
        assert_eq!(store.keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_merge_respects_capacity() {
        let mut store = store_with(2, &[("a", "1")]);
        store.merge(vec![
            ("b".to_string(), "2".to_string()),
            ("c".to_string(), "3".to_string()),
        ]);
        assert_eq!(store.len(), 2);
        assert!(!store.contains("a"));
        assert_eq!(store.keys(), vec!["b", "c"]);
    }

    #[test]
    fn test_remove() {
        let mut store = store_with(3, &[("a", "1"), ("b", "2")]);
        assert_eq!(store.remove("a"), Some("1".to_string()));
        assert_eq!(store.remove("a"), None);
        assert_eq!(store.keys(), vec!["b"]);
    }

    #[test]
    fn test_extract_range_takes_the_owned_arc() {
        let space = IdSpace::new(3);
        let mut store = KeyStore::new(16);
        // Pick keys with known ring positions.
        let keys = ["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7"];
        for k in keys {
            store.put(k.to_string(), format!("v-{k}"));
        }
        let lo = 2;
        let hi = 5;
        let moved = store.extract_range(&space, lo, hi);
        for (k, _) in &moved {
            let h = space.hash_key(k);
            assert!(space.in_between(h, space.add(lo, 1), space.add(hi, 1), true));
            assert!(!store.contains(k));
        }
        for k in store.keys() {
            let h = space.hash_key(&k);
            assert!(!space.in_between(h, space.add(lo, 1), space.add(hi, 1), true));
        }
        assert_eq!(moved.len() + store.len(), keys.len());
    }

    #[test]
    fn test_extract_range_wrapping_arc() {
        let space = IdSpace::new(3);
        let mut store = KeyStore::new(32);
        for i in 0..16 {
            store.put(format!("key-{i}"), i.to_string());
        }
        // (6, 1] wraps past zero; together with (1, 6] it covers the ring.
        let first = store.extract_range(&space, 6, 1);
        let second = store.extract_range(&space, 1, 6);
        assert_eq!(first.len() + second.len(), 16);
        assert!(store.is_empty());
        for (k, _) in first {
            let h = space.hash_key(&k);
            assert!(h == 7 || h == 0 || h == 1);
        }
    }

    #[test]
    fn test_drain_all_preserves_order() {
        let mut store = store_with(4, &[("a", "1"), ("b", "2"), ("c", "3")]);
        let all = store.drain_all();
        assert_eq!(
            all,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("c".to_string(), "3".to_string()),
            ]
        );
        assert!(store.is_empty());
    }
}
