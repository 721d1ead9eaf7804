// src/core/storage/chunk.rs

//! A single link in a body's chunk chain.

use crate::core::stevedore::RawChunk;

/// One raw allocation plus how much of it is actually filled. `len` can be
/// less than `raw.space` for the chain's last chunk while a BOC is still
/// extending it; every earlier chunk always has `len == raw.space`
/// (spec §4.2 "every chunk but the last is full").
pub struct Chunk {
    raw: RawChunk,
    len: usize,
}

impl Chunk {
    pub fn new(raw: RawChunk) -> Self {
        Self { raw, len: 0 }
    }

    pub fn space(&self) -> usize {
        self.raw.space
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_full(&self) -> bool {
        self.len == self.raw.space
    }

    pub fn free_capacity(&self) -> usize {
        self.raw.space - self.len
    }

    pub fn filled(&self) -> &[u8] {
        &self.raw.buf[..self.len]
    }

    /// Append `data` into this chunk's free capacity. Panics if `data` would
    /// overflow it; callers (`body::extend`) must size writes against
    /// `free_capacity` first.
    pub fn append(&mut self, data: &[u8]) {
        assert!(
            data.len() <= self.free_capacity(),
            "chunk append would overflow allocated space"
        );
        let start = self.len;
        self.raw.buf[start..start + data.len()].copy_from_slice(data);
        self.len += data.len();
    }

    /// Shrink `raw.space` down to `len` when the backend supports trimming
    /// leftover space back (spec §4.2 `sml_trimstore`). Mutates `raw.space`
    /// in place; the underlying buffer keeps its original allocation size,
    /// callers just stop addressing the tail of it.
    pub fn trim_to_len(&mut self) {
        self.raw.space = self.len;
    }

    pub fn into_raw(self) -> RawChunk {
        self.raw
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("space", &self.raw.space)
            .field("len", &self.len)
            .finish()
    }
}
