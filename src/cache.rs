// Copyright (c) 2024-present, meta-catalog contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bounded, random-eviction, load-through node cache.
//!
//! Deliberately not an LRU: callers must not assume recency-based eviction.
//! Picking a uniformly random resident key keeps the implementation trivial
//! and avoids the bookkeeping (and lock contention) an LRU list would need.

use std::sync::Mutex;

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::error::CacheMiss;
use crate::tree::Node;

#[derive(Default)]
struct Inner {
    map: FxHashMap<String, Node>,
}

/// Maps device path to [`Node`], backed by a loader that resolves misses
/// through the tree.
pub struct NodeCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl NodeCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns the cached node for `path`, or calls `loader` on a miss and
    /// caches the result. `loader` is expected to resolve `path` against the
    /// tree under a read lock; it may run concurrently for the same key from
    /// different threads; both will simply populate the same cache entry.
    pub fn get_or_load<F>(&self, path: &str, loader: F) -> Result<Node, CacheMiss>
    where
        F: FnOnce() -> Result<Node, CacheMiss>,
    {
        if let Some(node) = self.inner.lock().expect("cache lock poisoned").map.get(path) {
            log::trace!("cache hit for {path}");
            return Ok(node.clone());
        }

        log::debug!("cache miss for {path}, loading through");
        let node = loader()?;
        self.insert(path.to_string(), node.clone());
        Ok(node)
    }

    fn insert(&self, path: String, node: Node) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock().expect("cache lock poisoned");

        if !inner.map.contains_key(&path) && inner.map.len() >= self.capacity {
            let keys: Vec<String> = inner.map.keys().cloned().collect();
            let victim = keys[rand::rng().random_range(0..keys.len())].clone();
            log::debug!("cache full at capacity {}, evicting {victim}", self.capacity);
            inner.map.remove(&victim);
        }

        inner.map.insert(path, node);
    }

    /// Flushes every cached entry. Every writer must call this: any
    /// mutation can invalidate a device path.
    pub fn clear(&self) {
        self.inner.lock().expect("cache lock poisoned").map.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;

    fn dummy_node(name: &str) -> Node {
        Node {
            name: name.to_string(),
            parent: None,
            children: Default::default(),
            kind: NodeKind::Internal,
        }
    }

    #[test]
    fn loads_through_on_miss_and_caches() {
        let cache = NodeCache::new(4);
        let mut loads = 0;

        let load = |n: &mut i32| {
            *n += 1;
            Ok::<_, CacheMiss>(dummy_node("d1"))
        };

        cache.get_or_load("root.sg1.d1", || load(&mut loads)).unwrap();
        cache.get_or_load("root.sg1.d1", || load(&mut loads)).unwrap();

        assert_eq!(loads, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_down_to_capacity() {
        let cache = NodeCache::new(2);

        for name in ["d1", "d2", "d3"] {
            cache
                .get_or_load(name, || Ok::<_, CacheMiss>(dummy_node(name)))
                .unwrap();
        }

        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = NodeCache::new(4);
        cache.get_or_load("d1", || Ok::<_, CacheMiss>(dummy_node("d1"))).unwrap();
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_never_caches() {
        let cache = NodeCache::new(0);
        cache.get_or_load("d1", || Ok::<_, CacheMiss>(dummy_node("d1"))).unwrap();
        assert!(cache.is_empty());
    }
}
