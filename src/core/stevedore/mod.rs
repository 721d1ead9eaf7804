// src/core/stevedore/mod.rs

//! C1: the stevedore registry. A stevedore is a pluggable storage backend;
//! the registry holds the configured set, round-robins between them, fans
//! bans out to whichever backends care to persist them, and resolves names.

pub mod memory;
pub mod mmap_file;
pub mod transient;

use crate::core::errors::CoreError;
use crate::core::storage::lru::Lru;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The reserved identifier for the transient (uncacheable / short-lived)
/// stevedore, always present even with no backends configured.
pub const TRANSIENT_STORAGE: &str = "transient";

/// A raw allocation handed back by a stevedore: owned bytes plus the usable
/// capacity. `space` is always `buf.len()`; kept as a separate field because
/// callers (`storage::body`) only ever read `space`, matching the C
/// `struct storage { space, ptr }` split without forcing Rust to also carry
/// a pointer.
pub struct RawChunk {
    pub buf: ChunkBuf,
    pub space: usize,
}

/// A chunk's backing bytes, which may live on the heap or in a memory-mapped
/// scratch file. Both variants deref to `[u8]` so `storage::body` never has
/// to know which backend produced a chunk.
pub enum ChunkBuf {
    Heap(Box<[u8]>),
    Mmap(mmap_file::MmapRegion),
}

impl std::ops::Deref for ChunkBuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            ChunkBuf::Heap(b) => b,
            ChunkBuf::Mmap(m) => m.as_slice(),
        }
    }
}

impl std::ops::DerefMut for ChunkBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            ChunkBuf::Heap(b) => b,
            ChunkBuf::Mmap(m) => m.as_mut_slice(),
        }
    }
}

/// Which phase of a ban-propagation event a stevedore is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanInfoEvent {
    New,
    Drop,
}

/// A pluggable storage backend (spec §3.6). Implementations must be
/// `Send + Sync`: the lookup/fetch engine calls into them from whichever
/// worker thread happens to be handling a request.
pub trait Stevedore: Send + Sync + fmt::Debug {
    /// The registered name, e.g. "malloc1".
    fn name(&self) -> &str;

    /// The identifier `find()` matches against, e.g. "malloc1" or the
    /// reserved `TRANSIENT_STORAGE`.
    fn ident(&self) -> &str;

    /// Called once by `open_all`, before any allocation is attempted.
    fn open(&self) {}

    /// Called twice by `close_all`: once with `final_pass = false` (a
    /// warning pass) and once with `final_pass = true`.
    fn close(&self, _final_pass: bool) {}

    /// Allocate `size` raw bytes. Returns `None` if the backend cannot
    /// satisfy the request right now (the caller, `storage::body::alloc`,
    /// handles shrinking and LRU-nuking — this method never shrinks or
    /// nukes on its own).
    fn sml_alloc(&self, size: usize) -> Option<RawChunk>;

    /// Release a raw allocation back to the backend. Infallible: backends
    /// that need async cleanup must do it out of band.
    fn sml_free(&self, chunk: RawChunk);

    /// The backend's LRU list of finished objcores, if it participates in
    /// LRU eviction at all (the transient stevedore does not).
    fn lru(&self) -> Option<&Lru> {
        None
    }

    /// Notify the backend of a ban create/drop event so it can persist its
    /// own ban log. Returns non-zero if the backend could not persist the
    /// event (spec §4.1); the default no-op backend always succeeds.
    fn baninfo(&self, _event: BanInfoEvent, _ban: &[u8]) -> i32 {
        0
    }

    /// Replace the backend's persisted ban list wholesale.
    fn banexport(&self, _bans: &[u8]) {}
}

/// C1: holds the set of configured stevedores, round-robins `next()`, and
/// fans ban events out to every backend that wants them.
pub struct StevedoreRegistry {
    stevedores: Vec<Arc<dyn Stevedore>>,
    transient: Arc<dyn Stevedore>,
    /// Round-robin cursor. An `AtomicUsize` rather than the raw shared
    /// pointer the original implementation used — spec §9 flags that
    /// pointer's un-synchronized write as a portability wart to resolve,
    /// not to reproduce; see DESIGN.md.
    next_index: AtomicUsize,
}

impl StevedoreRegistry {
    pub fn new(transient: Arc<dyn Stevedore>) -> Self {
        Self {
            stevedores: Vec::new(),
            transient,
            next_index: AtomicUsize::new(0),
        }
    }

    /// Append a backend to the registry. Must happen before `open_all()`.
    pub fn register(&mut self, stv: Arc<dyn Stevedore>) {
        self.stevedores.push(stv);
    }

    pub fn open_all(&self) {
        for stv in &self.stevedores {
            stv.open();
        }
        self.transient.open();
    }

    /// First sends a "warning" close pass to every backend, then a "final"
    /// pass, matching the two-phase shutdown in spec §4.1.
    pub fn close_all(&self) {
        for final_pass in [false, true] {
            for stv in &self.stevedores {
                stv.close(final_pass);
            }
            self.transient.close(final_pass);
        }
    }

    /// Round-robin pick among registered stevedores; the transient
    /// stevedore if none are registered.
    pub fn next(&self) -> Arc<dyn Stevedore> {
        if self.stevedores.is_empty() {
            return self.transient.clone();
        }
        let i = self.next_index.fetch_add(1, Ordering::Relaxed) % self.stevedores.len();
        self.stevedores[i].clone()
    }

    /// Linear scan by identifier; the transient stevedore if `name` matches
    /// its reserved identifier.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Stevedore>> {
        if name == TRANSIENT_STORAGE {
            return Some(self.transient.clone());
        }
        self.stevedores.iter().find(|s| s.ident() == name).cloned()
    }

    /// Fan a ban-create event out to every backend that implements
    /// `baninfo`. Returns the bitwise-OR of backend return codes.
    pub fn ban_info_new(&self, ban: &[u8]) -> i32 {
        self.stevedores
            .iter()
            .fold(0, |acc, stv| acc | stv.baninfo(BanInfoEvent::New, ban))
    }

    /// Fan a ban-drop event out to every backend that implements `baninfo`.
    pub fn ban_info_drop(&self, ban: &[u8]) -> i32 {
        self.stevedores
            .iter()
            .fold(0, |acc, stv| acc | stv.baninfo(BanInfoEvent::Drop, ban))
    }

    /// Export a complete ban list to every backend capable of persistence.
    pub fn ban_export(&self, bans: &[u8]) {
        for stv in &self.stevedores {
            stv.banexport(bans);
        }
    }
}

/// Allocate `size` bytes from `stv`, honoring the `less_ok` shrink policy
/// from spec §4.2: if `size` exceeds `max_chunk_size` and `less_ok` is not
/// set, fail outright; otherwise clamp to `max_chunk_size` and, on
/// allocation failure, halve repeatedly down to `min_chunk_size` before
/// giving up. Does not LRU-nuke — that retry loop lives in
/// `storage::body::alloc`, which is the only caller that knows about a
/// stevedore's LRU.
pub fn stv_alloc(
    stv: &dyn Stevedore,
    mut size: usize,
    less_ok: bool,
    max_chunk_size: usize,
    min_chunk_size: usize,
) -> Option<RawChunk> {
    if !less_ok {
        if size > max_chunk_size {
            return None;
        }
        return stv.sml_alloc(size);
    }

    if size > max_chunk_size {
        size = max_chunk_size;
    }
    loop {
        assert!(size > 0, "allocation size must stay positive");
        if let Some(raw) = stv.sml_alloc(size) {
            return Some(raw);
        }
        if size <= min_chunk_size {
            return None;
        }
        size /= 2;
        if size < min_chunk_size {
            size = min_chunk_size;
        }
    }
}
