// src/core/engine.rs

//! Wires the five components together into the cache's single entry point:
//! given a request's hash-key fields, classify it, and hand the caller
//! either a ready body to serve or the responsibility of filling one in.

use crate::config::{Config, HashStrategy, StevedoreKind};
use crate::core::bans::BanList;
use crate::core::digest::{Digest, digest_request};
use crate::core::hash::classic::ClassicIndex;
use crate::core::hash::simple::SimpleIndex;
use crate::core::hash::ObjectIndex;
use crate::core::lookup::{LookupEngine, Outcome};
use crate::core::metrics;
use crate::core::object::boc::Boc;
use crate::core::object::{Objcore, Objhead};
use crate::core::storage::body::ChunkPolicy;
use crate::core::storage::lru::Evictable;
use crate::core::stevedore::memory::MemoryStevedore;
use crate::core::stevedore::mmap_file::MmapStevedore;
use crate::core::stevedore::transient::TransientStevedore;
use crate::core::stevedore::StevedoreRegistry;
use crate::core::waitlist::ParkOutcome;
use std::sync::Arc;
use std::time::Duration;

/// What the caller should do after classifying a request.
pub enum Decision {
    /// Serve `oc` to the client now.
    Serve(Arc<Objcore>),
    /// Serve `oc` now, and the caller may additionally kick off a
    /// background refresh since none is in flight.
    ServeAndRefresh(Arc<Objcore>),
    /// The caller must fetch the origin itself; `begin_fetch` has already
    /// been called for them and `oc` is the new busy objcore to fill.
    Fetch(Arc<Objcore>),
    /// A fetch is already in flight and no stale fallback exists; the
    /// caller parked and should retry the whole classification.
    Retry,
    /// Parking timed out waiting for a busy fetch to resolve.
    TimedOut,
}

/// Bundles the stevedore registry, object index, ban list and lookup
/// engine into the cache's single entry point (spec §4's "C1-C5 working
/// together").
pub struct CacheEngine {
    registry: StevedoreRegistry,
    lookup: LookupEngine,
    chunk_policy: ChunkPolicy,
    default_ttl: f64,
    default_grace: f64,
    default_keep: f64,
    waitlist_timeout: Duration,
}

impl CacheEngine {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut registry = StevedoreRegistry::new(Arc::new(TransientStevedore::new()));
        for stv in &config.stevedores {
            match stv.kind {
                StevedoreKind::Memory => {
                    let backend = match stv.max_resident_bytes {
                        Some(cap) => MemoryStevedore::new_limited(stv.name.clone(), cap),
                        None => MemoryStevedore::new(stv.name.clone()),
                    };
                    registry.register(Arc::new(backend));
                }
                StevedoreKind::MmapFile => {
                    let dir = stv
                        .scratch_dir
                        .clone()
                        .ok_or_else(|| anyhow::anyhow!("mmap-file stevedore missing scratch_dir"))?;
                    registry.register(Arc::new(MmapStevedore::new(stv.name.clone(), dir)));
                }
            }
        }
        registry.open_all();

        let index: Arc<dyn ObjectIndex> = match config.hash.strategy {
            HashStrategy::Simple => Arc::new(SimpleIndex::new()),
            HashStrategy::Classic => Arc::new(ClassicIndex::new(config.hash.shards)),
        };
        let bans = Arc::new(BanList::new());

        Ok(Self {
            registry,
            lookup: LookupEngine::new(index, bans),
            chunk_policy: ChunkPolicy {
                max_chunk_size: config.chunk.max_chunk_size,
                min_chunk_size: config.chunk.min_chunk_size,
                less_ok: config.chunk.less_ok,
            },
            default_ttl: config.ttl.default_ttl_secs,
            default_grace: config.ttl.default_grace_secs,
            default_keep: config.ttl.default_keep_secs,
            waitlist_timeout: config.waitlist_timeout,
        })
    }

    /// The object index's lookup key: method + URL only. Header-dependent
    /// variance (`Vary`) is resolved separately, per candidate, by
    /// `Objcore::matches_vary` once inside the objhead the digest selects —
    /// folding header values into the digest itself would give each Vary
    /// value its own objhead and defeat "multiple variants may coexist"
    /// (spec §3.2).
    pub fn digest_for(&self, method: &str, url: &str) -> Digest {
        digest_request(method, url, &[])
    }

    /// Classify a request and, on MISS, immediately allocate and insert the
    /// busy objcore the caller must now fill (spec §4.5 classification
    /// plus §4.4 insert, run as one atomic step from the caller's
    /// perspective to avoid a second request racing in between).
    ///
    /// `always_insert` forces MISS regardless of any matching objcore (spec
    /// §4.5); used both for pass-mode fetches that must not be shared and
    /// to kick off the background refresh a `ServeAndRefresh` decision
    /// invites the caller to start.
    ///
    /// A `Serve`/`ServeAndRefresh` decision's objcore has had its refcount
    /// incremented exactly once before return (spec §8's HIT/EXP/EXPBUSY
    /// invariant); the caller must `ref_dec()` it once done serving.
    pub fn classify(
        &self,
        digest: Digest,
        url: &str,
        headers: &[(String, String)],
        now: f64,
        private: bool,
        always_insert: bool,
    ) -> Decision {
        let (head, outcome) = self.lookup.lookup(digest, url, headers, now, always_insert);
        match outcome {
            Outcome::Hit(oc) => {
                metrics::LOOKUP_HIT_TOTAL.inc();
                self.touch_lru(&oc, now);
                oc.ref_inc();
                Decision::Serve(oc)
            }
            Outcome::Exp(oc) => {
                metrics::LOOKUP_EXP_TOTAL.inc();
                oc.ref_inc();
                Decision::ServeAndRefresh(oc)
            }
            Outcome::ExpBusy(oc) => {
                metrics::LOOKUP_EXPBUSY_TOTAL.inc();
                oc.ref_inc();
                Decision::Serve(oc)
            }
            Outcome::Busy(_) => {
                metrics::LOOKUP_BUSY_TOTAL.inc();
                match self.lookup.wait(&head, self.waitlist_timeout) {
                    ParkOutcome::Rushed(_) => Decision::Retry,
                    ParkOutcome::TimedOut => Decision::TimedOut,
                }
            }
            Outcome::Miss => {
                metrics::LOOKUP_MISS_TOTAL.inc();
                self.new_fetch(&head, now, private)
            }
            Outcome::Pass => {
                metrics::LOOKUP_PASS_TOTAL.inc();
                // A live HFP sentinel forces an uncached pass-through
                // regardless of what the caller asked for (spec §4.5); the
                // sentinel itself stays in the index marking the window.
                self.new_fetch(&head, now, true)
            }
        }
    }

    /// Allocates the busy objcore a MISS or forced-PASS classification
    /// hands the caller to fill (spec §4.4 `HSH_Insert` plus §4.5's
    /// MISS/PASS arms, which share everything but whether the result is
    /// shared through the index).
    fn new_fetch(&self, head: &Arc<Objhead>, now: f64, private: bool) -> Decision {
        let oc = Objcore::new(
            self.registry.next(),
            self.chunk_policy,
            now,
            self.default_ttl,
            self.default_grace,
            self.default_keep,
            private,
        );
        oc.set_boc(Arc::new(Boc::new()));
        if !private {
            self.lookup.insert(head, oc.clone());
            if let Some(lru) = oc.body.stevedore().lru() {
                lru.lru_add(oc.clone() as Arc<dyn Evictable>, now);
            }
            metrics::OBJECTS_LIVE.inc();
        }
        // The caller that fetches and serves a MISS/PASS pins a reference
        // for the same reason a Serve/ServeAndRefresh decision does (spec
        // §8's refcount invariant): the object must not be nuked out from
        // under its own fetcher.
        oc.ref_inc();
        Decision::Fetch(oc)
    }

    /// Moves a hit object to the tail of its stevedore's LRU list, subject
    /// to the list's own touch hysteresis (spec §4.2, `storage::lru`).
    fn touch_lru(&self, oc: &Arc<Objcore>, now: f64) {
        if let Some(lru) = oc.body.stevedore().lru() {
            let item = oc.clone() as Arc<dyn Evictable>;
            lru.lru_touch(&item, now);
        }
    }

    pub fn complete_fetch(&self, digest: Digest, url: &str, headers: &[(String, String)], oc: &Arc<Objcore>) {
        let (head, _) = self.lookup.lookup(digest, url, headers, oc.created, false);
        self.lookup.unbusy(&head, oc);
    }

    pub fn fail_fetch(&self, digest: Digest, url: &str, headers: &[(String, String)], oc: &Arc<Objcore>) {
        let (head, _) = self.lookup.lookup(digest, url, headers, oc.created, false);
        self.lookup.fail(&head, oc);
        metrics::FETCH_FAILED_TOTAL.inc();
        metrics::OBJECTS_LIVE.dec();
    }

    pub fn purge(&self, digest: &Digest) -> usize {
        self.lookup.purge(digest)
    }
}
