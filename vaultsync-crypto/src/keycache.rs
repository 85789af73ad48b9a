//! Bounded LRU cache for derived keys.
//!
//! Argon2 derivation is deliberately slow, so repeated encrypt/decrypt
//! calls against the same `(passphrase, salt)` pair reuse the derived key.
//! The cache is an injected component with explicit capacity and eviction,
//! not a process-wide singleton, and correctness never depends on a hit.

use crate::key::{DerivedKey, Salt, SALT_SIZE};
use std::collections::HashMap;
use std::collections::VecDeque;

type CacheKey = (String, [u8; SALT_SIZE]);

/// A least-recently-used cache of derived keys.
#[derive(Debug, Default)]
pub struct KeyCache {
    capacity: usize,
    entries: HashMap<CacheKey, DerivedKey>,
    order: VecDeque<CacheKey>,
}

impl KeyCache {
    /// Creates a cache holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Looks up a key, marking it most recently used.
    pub fn get(&mut self, passphrase: &str, salt: &Salt) -> Option<DerivedKey> {
        let key = (passphrase.to_string(), *salt.as_bytes());
        let found = self.entries.get(&key).cloned();
        if found.is_some() {
            self.touch(&key);
        }
        found
    }

    /// Inserts a derived key, evicting the least recently used entry when
    /// over capacity.
    pub fn put(&mut self, passphrase: &str, salt: &Salt, derived: DerivedKey) {
        let key = (passphrase.to_string(), *salt.as_bytes());
        if self.entries.insert(key.clone(), derived).is_none() {
            self.order.push_back(key);
        } else {
            self.touch(&key);
        }
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all cached keys (e.g. when the passphrase changes).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
            self.order.push_back(key.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KEY_SIZE;

    fn key(byte: u8) -> DerivedKey {
        DerivedKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = KeyCache::new(2);
        let s1 = Salt::from_bytes([1; SALT_SIZE]);
        let s2 = Salt::from_bytes([2; SALT_SIZE]);
        let s3 = Salt::from_bytes([3; SALT_SIZE]);

        cache.put("p", &s1, key(1));
        cache.put("p", &s2, key(2));
        // Touch s1 so s2 becomes the eviction candidate.
        assert!(cache.get("p", &s1).is_some());
        cache.put("p", &s3, key(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("p", &s1).is_some());
        assert!(cache.get("p", &s2).is_none());
        assert!(cache.get("p", &s3).is_some());
    }

    #[test]
    fn distinct_passphrases_do_not_collide() {
        let mut cache = KeyCache::new(4);
        let salt = Salt::from_bytes([9; SALT_SIZE]);
        cache.put("a", &salt, key(1));
        cache.put("b", &salt, key(2));
        assert_eq!(cache.get("a", &salt).unwrap().as_bytes(), &[1; KEY_SIZE]);
        assert_eq!(cache.get("b", &salt).unwrap().as_bytes(), &[2; KEY_SIZE]);
    }
}
