// src/core/stevedore/memory.rs

//! The default in-heap stevedore (spec §3.6 "in-heap"). Backs chunks with
//! plain boxed slices and participates in LRU eviction.

use super::{ChunkBuf, RawChunk, Stevedore};
use crate::core::storage::lru::Lru;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct MemoryStevedore {
    name: String,
    lru: Lru,
    /// Bytes currently on loan to live chunks. `None` means unlimited.
    max_resident_bytes: Option<usize>,
    resident_bytes: AtomicUsize,
}

impl MemoryStevedore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lru: Lru::new(),
            max_resident_bytes: None,
            resident_bytes: AtomicUsize::new(0),
        }
    }

    /// Caps total resident bytes, so allocation attempts above the cap fail
    /// and exercise the shrink-then-nuke retry loop in `storage::body::alloc`.
    pub fn new_limited(name: impl Into<String>, max_resident_bytes: usize) -> Self {
        Self {
            name: name.into(),
            lru: Lru::new(),
            max_resident_bytes: Some(max_resident_bytes),
            resident_bytes: AtomicUsize::new(0),
        }
    }
}

impl Stevedore for MemoryStevedore {
    fn name(&self) -> &str {
        &self.name
    }

    fn ident(&self) -> &str {
        &self.name
    }

    fn sml_alloc(&self, size: usize) -> Option<RawChunk> {
        if let Some(max) = self.max_resident_bytes {
            let mut current = self.resident_bytes.load(Ordering::Relaxed);
            loop {
                if current.saturating_add(size) > max {
                    return None;
                }
                match self.resident_bytes.compare_exchange_weak(
                    current,
                    current + size,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        }
        Some(RawChunk {
            buf: ChunkBuf::Heap(vec![0u8; size].into_boxed_slice()),
            space: size,
        })
    }

    fn sml_free(&self, chunk: RawChunk) {
        if self.max_resident_bytes.is_some() {
            self.resident_bytes.fetch_sub(chunk.space, Ordering::Relaxed);
        }
    }

    fn lru(&self) -> Option<&Lru> {
        Some(&self.lru)
    }
}
