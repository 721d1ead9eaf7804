// src/core/hash/simple.rs

//! The default object index: one `DashMap` keyed by digest.

use super::ObjectIndex;
use crate::core::digest::Digest;
use crate::core::object::Objhead;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct SimpleIndex {
    map: DashMap<Digest, Arc<Objhead>>,
}

impl SimpleIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectIndex for SimpleIndex {
    fn lookup(&self, digest: &Digest) -> Option<Arc<Objhead>> {
        self.map.get(digest).map(|e| e.clone())
    }

    fn find_or_insert(&self, digest: Digest) -> Arc<Objhead> {
        self.map
            .entry(digest)
            .or_insert_with(|| Objhead::new(digest))
            .clone()
    }

    fn remove_if_empty(&self, digest: &Digest) {
        self.map.remove_if(digest, |_, head| head.is_empty());
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_or_insert_is_idempotent_for_the_same_digest() {
        let idx = SimpleIndex::new();
        let d = Digest::default();
        let a = idx.find_or_insert(d);
        let b = idx.find_or_insert(d);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn remove_if_empty_only_drops_empty_heads() {
        let idx = SimpleIndex::new();
        let d = Digest::default();
        let head = idx.find_or_insert(d);
        let oc = crate::core::object::Objcore::new(
            Arc::new(crate::core::stevedore::memory::MemoryStevedore::new("a")),
            crate::core::storage::body::ChunkPolicy::default(),
            0.0,
            1.0,
            0.0,
            0.0,
            false,
        );
        head.insert(oc);
        idx.remove_if_empty(&d);
        assert_eq!(idx.len(), 1, "non-empty head must survive");
    }
}
