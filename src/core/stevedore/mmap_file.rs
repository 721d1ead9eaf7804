// src/core/stevedore/mmap_file.rs

//! A stevedore backed by memory-mapped scratch files, for bodies the
//! operator would rather not keep resident on the heap. Each chunk gets its
//! own backing file under `scratch_dir`; the file is unlinked as soon as
//! it's mapped so the space is reclaimed automatically if the process dies
//! mid-fetch, and removed from disk on `sml_free`.

use super::{RawChunk, Stevedore};
use crate::core::storage::lru::Lru;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// An individual chunk's backing region: an owned, exclusively-mapped file.
pub struct MmapRegion {
    mmap: MmapMut,
}

impl MmapRegion {
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }
}

#[derive(Debug)]
pub struct MmapStevedore {
    name: String,
    scratch_dir: PathBuf,
    lru: Lru,
    file_counter: AtomicU64,
}

impl MmapStevedore {
    pub fn new(name: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            scratch_dir: scratch_dir.into(),
            lru: Lru::new(),
            file_counter: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapRegion").field("len", &self.mmap.len()).finish()
    }
}

impl Stevedore for MmapStevedore {
    fn name(&self) -> &str {
        &self.name
    }

    fn ident(&self) -> &str {
        &self.name
    }

    fn open(&self) {
        let _ = std::fs::create_dir_all(&self.scratch_dir);
    }

    fn sml_alloc(&self, size: usize) -> Option<RawChunk> {
        if size == 0 {
            return None;
        }
        let id = self.file_counter.fetch_add(1, Ordering::Relaxed);
        let path = self.scratch_dir.join(format!("chunk-{id}.bin"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .ok()?;
        file.set_len(size as u64).ok()?;
        let mmap = unsafe { MmapMut::map_mut(&file).ok()? };
        // The file's directory entry is only a handle used to create the
        // mapping; once mapped, the bytes live in the mapping (and the
        // kernel's page cache) so the entry can be unlinked immediately.
        let _ = std::fs::remove_file(&path);
        Some(RawChunk {
            buf: super::ChunkBuf::Mmap(MmapRegion { mmap }),
            space: size,
        })
    }

    fn sml_free(&self, _chunk: RawChunk) {
        // Dropping the RawChunk unmaps the region; the backing file was
        // already unlinked at allocation time.
    }

    fn lru(&self) -> Option<&Lru> {
        Some(&self.lru)
    }
}
