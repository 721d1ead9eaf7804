// src/core/hash/classic.rs

//! A fixed set of independently-locked shards, each a plain `HashMap`. An
//! alternative to `simple` for operators who want explicit control over
//! the shard count rather than `dashmap`'s internal sharding.

use super::ObjectIndex;
use crate::core::digest::Digest;
use crate::core::object::Objhead;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ClassicIndex {
    shards: Vec<Mutex<HashMap<Digest, Arc<Objhead>>>>,
}

impl ClassicIndex {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, digest: &Digest) -> &Mutex<HashMap<Digest, Arc<Objhead>>> {
        // The digest is already a uniformly-distributed SHA-256 output, so
        // its leading bytes make a perfectly good shard selector without a
        // second hash pass.
        let idx = u32::from_be_bytes(digest.as_bytes()[0..4].try_into().unwrap()) as usize;
        &self.shards[idx % self.shards.len()]
    }
}

impl ObjectIndex for ClassicIndex {
    fn lookup(&self, digest: &Digest) -> Option<Arc<Objhead>> {
        self.shard_for(digest).lock().get(digest).cloned()
    }

    fn find_or_insert(&self, digest: Digest) -> Arc<Objhead> {
        self.shard_for(&digest)
            .lock()
            .entry(digest)
            .or_insert_with(|| Objhead::new(digest))
            .clone()
    }

    fn remove_if_empty(&self, digest: &Digest) {
        let mut shard = self.shard_for(digest).lock();
        if let Some(head) = shard.get(digest) {
            if head.is_empty() {
                shard.remove(digest);
            }
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_or_insert_is_idempotent_across_shards() {
        let idx = ClassicIndex::new(8);
        let d = Digest::default();
        let a = idx.find_or_insert(d);
        let b = idx.find_or_insert(d);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn distinct_digests_land_in_possibly_different_shards_but_are_both_found() {
        let idx = ClassicIndex::new(4);
        let d1 = Digest([1u8; 32]);
        let d2 = Digest([2u8; 32]);
        idx.find_or_insert(d1);
        idx.find_or_insert(d2);
        assert!(idx.lookup(&d1).is_some());
        assert!(idx.lookup(&d2).is_some());
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn remove_if_empty_drops_only_empty_heads() {
        let idx = ClassicIndex::new(2);
        let d = Digest::default();
        idx.find_or_insert(d);
        idx.remove_if_empty(&d);
        assert!(idx.lookup(&d).is_none());
    }
}
