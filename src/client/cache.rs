//! Time-bounded cache for progress reads.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

struct Entry<V> {
  value: V,
  stored_at: DateTime<Utc>,
}

/// Values are served while younger than `ttl`; stale entries are evicted on read.
pub struct ProgressCache<K, V> {
  entries: HashMap<K, Entry<V>>,
  ttl: Duration,
  clock: Clock,
}

impl<K: Eq + Hash, V: Clone> ProgressCache<K, V> {
  pub fn new(ttl: Duration, clock: Clock) -> Self {
    Self { entries: HashMap::new(), ttl, clock }
  }

  pub fn get(&mut self, key: &K) -> Option<V> {
    let now = self.clock.now();
    let fresh = self.entries.get(key).map(|e| now - e.stored_at < self.ttl)?;
    if fresh {
      self.entries.get(key).map(|e| e.value.clone())
    } else {
      self.entries.remove(key);
      None
    }
  }

  pub fn store(&mut self, key: K, value: V) {
    let stored_at = self.clock.now();
    self.entries.insert(key, Entry { value, stored_at });
  }

  pub fn invalidate(&mut self, key: &K) {
    self.entries.remove(key);
  }

  pub fn invalidate_all(&mut self) {
    self.entries.clear();
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn entries_expire_after_ttl() {
    let clock = Clock::manual(Utc::now());
    let mut cache = ProgressCache::new(Duration::seconds(30), clock.clone());
    cache.store("e1", 40u8);

    clock.advance(Duration::seconds(29));
    assert_eq!(cache.get(&"e1"), Some(40));

    clock.advance(Duration::seconds(1));
    assert_eq!(cache.get(&"e1"), None);
    assert!(cache.is_empty());
  }

  #[test]
  fn store_overwrites_and_restamps() {
    let clock = Clock::manual(Utc::now());
    let mut cache = ProgressCache::new(Duration::seconds(10), clock.clone());
    cache.store("e1", 1u8);
    clock.advance(Duration::seconds(8));
    cache.store("e1", 2u8);
    clock.advance(Duration::seconds(8));
    assert_eq!(cache.get(&"e1"), Some(2));
  }

  #[test]
  fn invalidation() {
    let mut cache = ProgressCache::new(Duration::seconds(10), Clock::system());
    cache.store("a", 1u8);
    cache.store("b", 2u8);
    cache.invalidate(&"a");
    assert_eq!(cache.get(&"a"), None);
    assert_eq!(cache.len(), 1);
    cache.invalidate_all();
    assert_eq!(cache.get(&"b"), None);
  }
}
