// src/core/stevedore/transient.rs

//! The always-present fallback stevedore for uncacheable or short-lived
//! bodies (spec §3.6, §4.1 `TRANSIENT_STORAGE`). Never participates in LRU:
//! objects stored here are expected to be freed by refcount, not eviction.

use super::{ChunkBuf, RawChunk, Stevedore, TRANSIENT_STORAGE};

#[derive(Debug, Default)]
pub struct TransientStevedore;

impl TransientStevedore {
    pub fn new() -> Self {
        Self
    }
}

impl Stevedore for TransientStevedore {
    fn name(&self) -> &str {
        TRANSIENT_STORAGE
    }

    fn ident(&self) -> &str {
        TRANSIENT_STORAGE
    }

    fn sml_alloc(&self, size: usize) -> Option<RawChunk> {
        Some(RawChunk {
            buf: ChunkBuf::Heap(vec![0u8; size].into_boxed_slice()),
            space: size,
        })
    }

    fn sml_free(&self, _chunk: RawChunk) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_allocates_regardless_of_size() {
        let stv = TransientStevedore::new();
        assert!(stv.sml_alloc(0).is_some());
        assert!(stv.sml_alloc(1 << 20).is_some());
    }

    #[test]
    fn never_participates_in_lru() {
        let stv = TransientStevedore::new();
        assert!(stv.lru().is_none());
    }

    #[test]
    fn ident_matches_reserved_constant() {
        let stv = TransientStevedore::new();
        assert_eq!(stv.ident(), TRANSIENT_STORAGE);
    }
}
