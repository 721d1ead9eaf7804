// src/core/storage/body.rs

//! Allocation, extension and iteration over a chunk chain (spec §4.2
//! `sml_getspace`/`sml_extend`/`sml_trimstore`/`sml_iterator`).
//!
//! The BOC-aware part of iteration — blocking a consumer until a producer
//! either extends the chain further or finishes — lives in
//! `core::object::boc`, which calls into `Body::chunk_at`/`chunk_count`
//! rather than this module knowing anything about BOC state. That keeps the
//! chunk chain itself free of any dependency on the object layer, matching
//! the capability-interface split used for LRU (`storage::lru::Evictable`).

use crate::core::errors::CoreError;
use crate::core::metrics;
use crate::core::stevedore::{self, Stevedore};
use crate::core::storage::chunk::Chunk;
use parking_lot::Mutex;
use std::sync::Arc;

/// Leftover space below which trimming the last chunk isn't worth the
/// backend round-trip (spec §4.2, ported from `storage_simple.c`'s 512-byte
/// threshold).
const TRIM_WORTHWHILE_BYTES: usize = 512;

/// Tunables that bound how `alloc_chunk` sizes and retries allocations.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPolicy {
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    pub less_ok: bool,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_chunk_size: 128 * 1024,
            min_chunk_size: 4 * 1024,
            less_ok: true,
        }
    }
}

/// A body's chunk chain plus the stevedore it was allocated from.
pub struct Body {
    stevedore: Arc<dyn Stevedore>,
    policy: ChunkPolicy,
    chunks: Mutex<Vec<Chunk>>,
}

impl Body {
    pub fn new(stevedore: Arc<dyn Stevedore>, policy: ChunkPolicy) -> Self {
        Self {
            stevedore,
            policy,
            chunks: Mutex::new(Vec::new()),
        }
    }

    pub fn stevedore(&self) -> &Arc<dyn Stevedore> {
        &self.stevedore
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Total bytes filled across every chunk.
    pub fn total_len(&self) -> usize {
        self.chunks.lock().iter().map(|c| c.len()).sum()
    }

    /// Run `f` over the filled bytes of chunk `idx`, if it exists.
    pub fn with_chunk<R>(&self, idx: usize, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let chunks = self.chunks.lock();
        chunks.get(idx).map(|c| f(c.filled()))
    }

    /// Allocate a raw chunk through the body's stevedore, with the
    /// shrink-then-nuke retry loop from spec §4.2: try `stv_alloc` as-is;
    /// on failure, nuke the stevedore's least-recently-used evictable
    /// object and retry, up to once per entry currently in its LRU list.
    fn alloc_chunk(&self, size: usize) -> Result<Chunk, CoreError> {
        loop {
            if let Some(raw) = stevedore::stv_alloc(
                self.stevedore.as_ref(),
                size,
                self.policy.less_ok,
                self.policy.max_chunk_size,
                self.policy.min_chunk_size,
            ) {
                metrics::STEVEDORE_BYTES_RESIDENT
                    .with_label_values(&[self.stevedore.name()])
                    .inc_by(raw.space as f64);
                return Ok(Chunk::new(raw));
            }
            let Some(lru) = self.stevedore.lru() else {
                metrics::ALLOC_FAILED_TOTAL.inc();
                return Err(CoreError::OutOfStorage {
                    stevedore: self.stevedore.name().to_string(),
                    requested: size,
                });
            };
            if !lru.lru_nuke_one() {
                metrics::ALLOC_FAILED_TOTAL.inc();
                return Err(CoreError::OutOfStorage {
                    stevedore: self.stevedore.name().to_string(),
                    requested: size,
                });
            }
            metrics::LRU_NUKE_TOTAL.inc();
        }
    }

    /// Ensure the chain's last chunk has at least `min_size` bytes of free
    /// capacity, allocating a new chunk sized to `max_chunk_size` if not
    /// (spec §4.2 `sml_getspace`). Returns the free capacity actually
    /// available, which may exceed `min_size`.
    pub fn get_space(&self, min_size: usize) -> Result<usize, CoreError> {
        let needs_new = {
            let chunks = self.chunks.lock();
            match chunks.last() {
                Some(c) => c.free_capacity() < min_size,
                None => true,
            }
        };
        if needs_new {
            let size = min_size.max(self.policy.min_chunk_size);
            let chunk = self.alloc_chunk(size)?;
            self.chunks.lock().push(chunk);
        }
        Ok(self.chunks.lock().last().unwrap().free_capacity())
    }

    /// Append `data`, splitting it across newly allocated chunks as needed
    /// (spec §4.2 `sml_extend`).
    pub fn extend(&self, mut data: &[u8]) -> Result<(), CoreError> {
        while !data.is_empty() {
            let avail = self.get_space(1)?;
            let take = avail.min(data.len());
            {
                let mut chunks = self.chunks.lock();
                chunks.last_mut().unwrap().append(&data[..take]);
            }
            data = &data[take..];
        }
        Ok(())
    }

    /// Shrink the last chunk's reported space down to its filled length, if
    /// the leftover clears the trim-worthwhile threshold (spec §4.2
    /// `sml_trimstore`). Called once a BOC reaches its final state.
    pub fn trim(&self) {
        let mut chunks = self.chunks.lock();
        if let Some(last) = chunks.last_mut() {
            if last.free_capacity() >= TRIM_WORTHWHILE_BYTES {
                last.trim_to_len();
            }
        }
    }

    /// Release every chunk back to the stevedore (spec §4.2 `sml_objfree`).
    pub fn free(&self) {
        let mut chunks = self.chunks.lock();
        for chunk in chunks.drain(..) {
            let space = chunk.space();
            self.stevedore.sml_free(chunk.into_raw());
            let _ = space;
        }
    }
}

/// One step of a body walk (spec §4.2 `sml_iterator`): the bytes of a
/// single chunk, whether the consumer should flush downstream now (true
/// for every step except possibly the very first, mirroring the original's
/// "flush unless this is the sole chunk and the caller doesn't need it
/// yet"), and whether this is the chain's final chunk.
pub struct IterStep<'a> {
    pub data: &'a [u8],
    pub flush: bool,
    pub last: bool,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum BodyIterError {
    #[error("body iteration reached an empty chunk chain")]
    Empty,
}

impl Body {
    /// Walk every currently-present, fully-filled chunk and call `visit`
    /// with an `IterStep` for each, ending at `chunk_count() - 1`. Does not
    /// know whether the chain will grow further — that decision belongs to
    /// whatever holds the BOC (`core::object::boc`), which loops calling
    /// this once per extension and passes `last` in from BOC state once the
    /// final chunk has stopped growing.
    pub fn iterate(&self, mut visit: impl FnMut(IterStep)) -> Result<(), BodyIterError> {
        let len = self.chunk_count();
        if len == 0 {
            return Err(BodyIterError::Empty);
        }
        for idx in 0..len {
            self.with_chunk(idx, |data| {
                visit(IterStep {
                    data,
                    flush: true,
                    last: idx == len - 1,
                });
            });
        }
        Ok(())
    }
}
