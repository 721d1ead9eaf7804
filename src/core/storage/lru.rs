// src/core/storage/lru.rs

//! Per-stevedore LRU list of finished objcores (spec §4.2 "LRU").
//!
//! The LRU only ever touches objcores through the `Evictable` capability
//! interface (spec §9 "method tables for pluggable storage... represented
//! as capability interfaces") so this module has no dependency on the
//! concrete `Objcore` type in `core::object` — it is the other way around.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// How long must pass between two `lru_touch` calls on the same entry
/// before the touch actually moves it in the list. Without this hysteresis,
/// a hot object under heavy concurrent read load would cause constant lock
/// contention on the LRU list for no ordering benefit.
const TOUCH_HYSTERESIS_SECS: f64 = 1.0;

/// Anything the LRU can evict. Implemented by `core::object::Objcore`.
pub trait Evictable: Send + Sync + fmt::Debug {
    /// Not `PRIVATE`, not under construction (no live BOC), and referenced
    /// by nobody but the LRU itself.
    fn is_evictable(&self) -> bool;
    /// Flip the objcore to `DYING` unconditionally.
    fn mark_dying(&self);
    /// Detach the (now `DYING`) objcore from its objhead's list, triggering
    /// real teardown once its refcount reaches zero.
    fn detach_from_index(&self);
}

struct Entry {
    last_touch: f64,
    item: Arc<dyn Evictable>,
}

/// A stevedore's LRU list: append at the tail, evict from the head.
pub struct Lru {
    entries: Mutex<VecDeque<Entry>>,
}

impl Default for Lru {
    fn default() -> Self {
        Self::new()
    }
}

impl Lru {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a newly finished objcore to the tail of the list.
    pub fn lru_add(&self, item: Arc<dyn Evictable>, ts: f64) {
        self.entries.lock().push_back(Entry {
            last_touch: ts,
            item,
        });
    }

    /// Move an entry to the tail if enough time passed since its last
    /// touch. Matched by pointer identity (`Arc::ptr_eq`).
    pub fn lru_touch(&self, item: &Arc<dyn Evictable>, ts: f64) {
        let mut entries = self.entries.lock();
        let Some(pos) = entries
            .iter()
            .position(|e| Arc::ptr_eq(&e.item, item))
        else {
            return;
        };
        if ts - entries[pos].last_touch < TOUCH_HYSTERESIS_SECS {
            return;
        }
        let mut entry = entries.remove(pos).unwrap();
        entry.last_touch = ts;
        entries.push_back(entry);
    }

    /// Detach an entry from the list without evicting it (used when an
    /// object is freed through the normal refcount path rather than LRU
    /// pressure).
    pub fn lru_remove(&self, item: &Arc<dyn Evictable>) {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|e| Arc::ptr_eq(&e.item, item)) {
            entries.remove(pos);
        }
    }

    /// Evict the least-recently-used evictable entry: mark it `DYING`, drop
    /// it from the index, and remove it from this list. Returns `true` if
    /// something was evicted, `false` if nothing in the list is currently
    /// evictable.
    pub fn lru_nuke_one(&self) -> bool {
        let victim = {
            let mut entries = self.entries.lock();
            match entries.iter().position(|e| e.item.is_evictable()) {
                Some(pos) => entries.remove(pos),
                None => None,
            }
        };
        let Some(victim) = victim else {
            return false;
        };
        victim.item.mark_dying();
        victim.item.detach_from_index();
        true
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
