// src/core/object/mod.rs

//! C3: objheads, objcores and their attributes (spec §4.3). An objhead is
//! the per-digest anchor the hash table indexes; it holds every objcore
//! (past and present) competing to answer requests for that digest, plus
//! the waiting list for requests that show up while the winner is still
//! BUSY. An objcore is one cached (or being-cached) response body.

pub mod boc;

use crate::core::digest::Digest;
use crate::core::storage::body::{Body, ChunkPolicy};
use crate::core::storage::lru::Evictable;
use crate::core::stevedore::Stevedore;
use crate::core::waitlist::WaitList;
use bitflags::bitflags;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

bitflags! {
    /// Objcore lifecycle flags (spec §4.3). `BUSY` and the BOC's own state
    /// overlap somewhat (a busy objcore always has a live, non-terminal
    /// BOC) but the flag exists independently because an objcore can be
    /// marked busy before a BOC has even been attached.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OcFlags: u8 {
        /// Never inserted into the objhead's index; used for bypass/private
        /// responses that must not be shared with other requests.
        const PRIVATE = 0b0001;
        /// A fetch is filling this objcore's body right now.
        const BUSY    = 0b0010;
        /// Withdrawn from service (purged, banned, or LRU-evicted); kept
        /// alive only until its last reference drops.
        const DYING   = 0b0100;
        /// Hit-for-miss: a completed fetch decided this digest must not be
        /// served as a cache hit; lookups within its TTL window force a
        /// fresh MISS instead (spec §3.2/§4.5).
        const HFM     = 0b1000;
        /// Hit-for-pass: a completed fetch decided this digest must never
        /// be cached at all; lookups within its TTL window force an
        /// uncached pass-through fetch (spec §3.2/§4.5).
        const HFP     = 0b10000;
    }
}

/// The object's fixed, variable and auxiliary attributes (spec §4.3,
/// mirroring `OBJ_FIXATTR`/`OBJ_VARATTR`/`OBJ_AUXATTR`). Fixed attributes
/// are plain typed fields here rather than packed bytes, since Rust gives
/// us no reason to hand-roll that layout; auxiliary attributes stay as
/// opaque byte blobs because their shape (e.g. the Vary axis) is decided
/// per-object at insert time.
#[derive(Debug, Clone, Default)]
pub struct Attrs {
    /// Fixed: HTTP status code.
    pub status: u16,
    /// Fixed: declared or observed body length, once known.
    pub content_length: Option<u64>,
    /// Variable: the response headers to replay to cache hits.
    pub headers: Vec<(String, String)>,
    /// Auxiliary `OA_VARY`: the request header names named by this
    /// response's `Vary` axis, paired with the values this particular
    /// variant was created under (spec §3.3 supplement). Empty means the
    /// object carries no Vary constraint and matches any request.
    pub vary: Vec<(String, String)>,
    /// Auxiliary: arbitrary named side-channel blobs for anything that
    /// doesn't warrant its own typed field.
    aux: HashMap<String, Vec<u8>>,
}

impl Attrs {
    pub fn set_aux(&mut self, name: impl Into<String>, value: Vec<u8>) {
        self.aux.insert(name.into(), value);
    }

    pub fn aux(&self, name: &str) -> Option<&[u8]> {
        self.aux.get(name).map(|v| v.as_slice())
    }
}

/// The per-digest anchor the hash table indexes (spec §4.3, §4.4).
pub struct Objhead {
    pub digest: Digest,
    objcs: Mutex<Vec<Arc<Objcore>>>,
    pub waitinglist: WaitList,
}

impl Objhead {
    pub fn new(digest: Digest) -> Arc<Self> {
        Arc::new(Self {
            digest,
            objcs: Mutex::new(Vec::new()),
            waitinglist: WaitList::new(),
        })
    }

    pub fn insert(&self, oc: Arc<Objcore>) {
        self.objcs.lock().push(oc);
    }

    pub fn remove(&self, oc: &Arc<Objcore>) -> bool {
        let mut objcs = self.objcs.lock();
        if let Some(pos) = objcs.iter().position(|e| Arc::ptr_eq(e, oc)) {
            objcs.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn objcores(&self) -> Vec<Arc<Objcore>> {
        self.objcs.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.objcs.lock().is_empty()
    }
}

/// One cached (or being-cached) response body plus its metadata.
pub struct Objcore {
    self_ref: Weak<Objcore>,
    objhead: Mutex<Option<Weak<Objhead>>>,
    flags: Mutex<OcFlags>,
    pub created: f64,
    pub ttl: f64,
    pub grace: f64,
    pub keep: f64,
    boc: Mutex<Option<Arc<boc::Boc>>>,
    pub body: Body,
    pub attrs: Mutex<Attrs>,
    external_refs: AtomicUsize,
}

impl std::fmt::Debug for Objcore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Objcore")
            .field("flags", &*self.flags.lock())
            .field("created", &self.created)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Objcore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stevedore: Arc<dyn Stevedore>,
        policy: ChunkPolicy,
        created: f64,
        ttl: f64,
        grace: f64,
        keep: f64,
        private: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            objhead: Mutex::new(None),
            flags: Mutex::new(if private { OcFlags::PRIVATE } else { OcFlags::empty() }),
            created,
            ttl,
            grace,
            keep,
            boc: Mutex::new(None),
            body: Body::new(stevedore, policy),
            attrs: Mutex::new(Attrs::default()),
            external_refs: AtomicUsize::new(0),
        })
    }

    pub fn attach_to(&self, objhead: &Arc<Objhead>) {
        *self.objhead.lock() = Some(Arc::downgrade(objhead));
    }

    pub fn flags(&self) -> OcFlags {
        *self.flags.lock()
    }

    pub fn set_flag(&self, flag: OcFlags) {
        self.flags.lock().insert(flag);
    }

    pub fn clear_flag(&self, flag: OcFlags) {
        self.flags.lock().remove(flag);
    }

    pub fn is_private(&self) -> bool {
        self.flags().contains(OcFlags::PRIVATE)
    }

    pub fn is_busy(&self) -> bool {
        self.flags().contains(OcFlags::BUSY)
    }

    pub fn is_dying(&self) -> bool {
        self.flags().contains(OcFlags::DYING)
    }

    /// Mark this objcore a hit-for-miss sentinel (spec §4.5): subsequent
    /// live lookups within its TTL window force a fresh MISS.
    pub fn mark_hfm(&self) {
        self.set_flag(OcFlags::HFM);
    }

    /// Mark this objcore a hit-for-pass sentinel (spec §4.5): subsequent
    /// live lookups within its TTL window force an uncached pass-through.
    pub fn mark_hfp(&self) {
        self.set_flag(OcFlags::HFP);
    }

    pub fn is_hfm(&self) -> bool {
        self.flags().contains(OcFlags::HFM)
    }

    pub fn is_hfp(&self) -> bool {
        self.flags().contains(OcFlags::HFP)
    }

    /// Is this objcore a live HFM/HFP sentinel still within the TTL window
    /// that forces MISS/PASS (spec §4.5's "forces MISS/PASS for a window
    /// equal to its TTL")?
    pub fn is_live_sentinel(&self, now: f64) -> bool {
        let flags = self.flags();
        flags.intersects(OcFlags::HFM | OcFlags::HFP) && !self.is_busy() && !self.is_expired(now)
    }

    pub fn ref_inc(&self) -> usize {
        self.external_refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn ref_dec(&self) -> usize {
        let prev = self.external_refs.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "ref_dec without a matching ref_inc");
        prev - 1
    }

    pub fn ref_count(&self) -> usize {
        self.external_refs.load(Ordering::SeqCst)
    }

    pub fn set_boc(&self, boc: Arc<boc::Boc>) {
        self.set_flag(OcFlags::BUSY);
        *self.boc.lock() = Some(boc);
    }

    pub fn boc(&self) -> Option<Arc<boc::Boc>> {
        self.boc.lock().clone()
    }

    /// Called once a fetch reaches a terminal BOC state: drop the BUSY flag
    /// and, once every consumer has caught up, the BOC reference itself
    /// (spec §4.3 `ObjBocDone`).
    pub fn boc_done(&self) {
        self.clear_flag(OcFlags::BUSY);
        self.body.trim();
        *self.boc.lock() = None;
    }

    /// Record the Vary axis this variant was created under (spec §3.3
    /// supplement). Called once, after a fetch resolves the origin's
    /// `Vary` response header.
    pub fn set_vary(&self, vary: Vec<(String, String)>) {
        self.attrs.lock().vary = vary;
    }

    /// Does this variant's recorded Vary axis match the header values on
    /// an incoming request? An object with no Vary axis matches any
    /// request (spec §4.5 "evaluate variant match (Vary)").
    pub fn matches_vary(&self, request_headers: &[(String, String)]) -> bool {
        self.attrs.lock().vary.iter().all(|(name, value)| {
            request_headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .is_some_and(|(_, v)| v == value)
        })
    }

    pub fn is_expired(&self, now: f64) -> bool {
        now >= self.created + self.ttl
    }

    pub fn is_in_grace(&self, now: f64) -> bool {
        self.is_expired(now) && now < self.created + self.ttl + self.grace
    }

    pub fn is_keepable(&self, now: f64) -> bool {
        now < self.created + self.ttl + self.grace + self.keep
    }

    fn self_arc(&self) -> Option<Arc<Objcore>> {
        self.self_ref.upgrade()
    }
}

impl Evictable for Objcore {
    fn is_evictable(&self) -> bool {
        let flags = self.flags();
        if flags.intersects(OcFlags::PRIVATE | OcFlags::BUSY | OcFlags::DYING) {
            return false;
        }
        self.ref_count() == 0
    }

    fn mark_dying(&self) {
        self.set_flag(OcFlags::DYING);
    }

    fn detach_from_index(&self) {
        let Some(me) = self.self_arc() else {
            return;
        };
        if let Some(lru) = self.body.stevedore().lru() {
            let item = me.clone() as Arc<dyn Evictable>;
            lru.lru_remove(&item);
        }
        if let Some(objhead) = self.objhead.lock().as_ref().and_then(Weak::upgrade) {
            objhead.remove(&me);
        }
        self.body.free();
    }
}
