//! Secondary indices over cache keys
//!
//! Buckets hold keys only. The store owns every entry and callers must
//! re-validate an index hit against it; a bucket may briefly name a key that
//! is already gone.

use std::collections::HashMap;

use ahash::RandomState;
use parking_lot::RwLock;

use crate::key::CacheKey;

type Buckets = HashMap<String, Vec<CacheKey>, RandomState>;

#[derive(Default)]
struct Indices {
    by_owner: Buckets,
    by_type: Buckets,
    by_tag: Buckets,
}

fn push(buckets: &mut Buckets, bucket: &str, key: &CacheKey) {
    buckets.entry(bucket.to_string()).or_default().push(key.clone());
}

fn splice(buckets: &mut Buckets, key: &CacheKey) {
    buckets.retain(|_, keys| {
        keys.retain(|k| k != key);
        !keys.is_empty()
    });
}

/// Owner, type and tag multimaps
pub struct Indexer {
    inner: RwLock<Indices>,
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer {
    /// Create an empty indexer
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indices::default()),
        }
    }

    /// Add `key` to the bucket of `owner`
    pub fn index_by_owner(&self, owner: &str, key: &CacheKey) {
        push(&mut self.inner.write().by_owner, owner, key);
    }

    /// Add `key` to the bucket of its entry type
    pub fn index_by_type(&self, key: &CacheKey) {
        push(&mut self.inner.write().by_type, key.entry_type.as_str(), key);
    }

    /// Add `key` to the bucket of `tag`
    pub fn index_by_tag(&self, tag: &str, key: &CacheKey) {
        push(&mut self.inner.write().by_tag, tag, key);
    }

    /// Keys indexed under `owner`
    pub fn owner_keys(&self, owner: &str) -> Vec<CacheKey> {
        self.inner.read().by_owner.get(owner).cloned().unwrap_or_default()
    }

    /// Keys indexed under entry type `entry_type`
    pub fn type_keys(&self, entry_type: &str) -> Vec<CacheKey> {
        self.inner.read().by_type.get(entry_type).cloned().unwrap_or_default()
    }

    /// Keys indexed under `tag`
    pub fn tag_keys(&self, tag: &str) -> Vec<CacheKey> {
        self.inner.read().by_tag.get(tag).cloned().unwrap_or_default()
    }

    /// Remove `key` from every bucket that may reference it
    pub fn remove_from_index(&self, key: &CacheKey) {
        let mut inner = self.inner.write();
        splice(&mut inner.by_owner, key);
        splice(&mut inner.by_type, key);
        splice(&mut inner.by_tag, key);
    }

    /// Drop the whole bucket of `tag`
    pub fn remove_tag(&self, tag: &str) {
        self.inner.write().by_tag.remove(tag);
    }

    /// Reset all three indices
    pub fn clear_index(&self) {
        *self.inner.write() = Indices::default();
    }

    /// Number of distinct tags
    pub fn tag_count(&self) -> usize {
        self.inner.read().by_tag.len()
    }

    /// Whether every bucket is empty
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read();
        inner.by_owner.is_empty() && inner.by_type.is_empty() && inner.by_tag.is_empty()
    }
}
