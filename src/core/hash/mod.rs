// src/core/hash/mod.rs

//! C4: the object index mapping a digest to its objhead (spec §4.4). Two
//! strategies are implemented, both behind the same `ObjectIndex` trait so
//! the lookup engine in `core::lookup` never has to know which is active:
//!
//! - `simple`, a single concurrent map (`dashmap`), the right default for
//!   most workloads since it needs no tuning.
//! - `classic`, a fixed set of sharded, separately-locked maps, useful when
//!   a workload's digest distribution makes a single concurrent map's
//!   internal sharding a poor fit and an operator wants to pick the shard
//!   count explicitly.
//!
//! A third strategy the underlying system offers, critbit (a crit-bit
//! trie keyed on the raw digest bytes), is intentionally not implemented:
//! its advantages there are prefix-ordered iteration and a small memory
//! footprint suited to embedded deployments, neither of which this system
//! benefits from, and a trie adds real complexity for no behavioral gain
//! here. See DESIGN.md.

pub mod classic;
pub mod simple;

use crate::core::digest::Digest;
use crate::core::object::Objhead;
use std::sync::Arc;

/// The object index: digest -> objhead. Implementations must be safe to
/// call from any worker thread concurrently.
pub trait ObjectIndex: Send + Sync {
    /// Look up an existing objhead for `digest` without creating one.
    fn lookup(&self, digest: &Digest) -> Option<Arc<Objhead>>;

    /// Look up the objhead for `digest`, creating and inserting an empty
    /// one if none exists yet. This is the only way a new digest enters
    /// the index (spec §4.4 "insert-if-absent").
    fn find_or_insert(&self, digest: Digest) -> Arc<Objhead>;

    /// Remove the entry for `digest` if its objhead currently has no
    /// objcores, called after the last objcore under a digest is detached.
    /// A race against a concurrent `find_or_insert` recreating the entry is
    /// expected and harmless: the recreated objhead simply starts empty
    /// again.
    fn remove_if_empty(&self, digest: &Digest);

    fn len(&self) -> usize;
}
