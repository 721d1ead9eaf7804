// src/core/lookup.rs

//! C5: the lookup and coalescing engine (spec §4.4, §4.5). This is where
//! the classification table that decides HIT/MISS/BUSY/EXP/EXPBUSY lives,
//! and where requests either attach to an existing fetch or become the one
//! that starts a new one.

use crate::core::bans::BanList;
use crate::core::hash::ObjectIndex;
use crate::core::object::{Objcore, Objhead};
use crate::core::storage::lru::Evictable;
use crate::core::waitlist::{ParkOutcome, RushReason};
use std::sync::Arc;
use std::time::Duration;

/// What a lookup resolved to (spec §4.5's `enum lookup_e`).
pub enum Outcome {
    /// A fresh, unbanned object is ready to serve.
    Hit(Arc<Objcore>),
    /// Nothing usable exists; the caller must become the inserting request
    /// (allocate a busy objcore, attach a BOC, and start a fetch).
    Miss,
    /// A fetch is in progress and no gracious stale object exists to serve
    /// meanwhile; the caller should park on the objhead's waiting list.
    Busy(Arc<Objhead>),
    /// A stale-but-gracious object can be served, and no concurrent refresh
    /// is in flight — the caller should serve it and may itself start a
    /// background refresh.
    Exp(Arc<Objcore>),
    /// A stale-but-gracious object can be served while a refresh already
    /// started by someone else is in flight.
    ExpBusy(Arc<Objcore>),
    /// A live HFM/HFP sentinel forces an uncached pass-through fetch for
    /// the remainder of its TTL window (spec §3.2/§4.5).
    Pass,
}

pub struct LookupEngine {
    index: Arc<dyn ObjectIndex>,
    bans: Arc<BanList>,
}

impl LookupEngine {
    pub fn new(index: Arc<dyn ObjectIndex>, bans: Arc<BanList>) -> Self {
        Self { index, bans }
    }

    /// Is `oc` a usable candidate for this request: not withdrawn, not
    /// banned, and a Vary match (spec §4.5 "evaluate variant match (Vary)
    /// and ban freshness")?
    fn is_live(&self, oc: &Objcore, url: &str, headers: &[(String, String)]) -> bool {
        if oc.is_dying() {
            return false;
        }
        if !oc.matches_vary(headers) {
            return false;
        }
        !self.bans.is_obsolete(oc.created, url, headers)
    }

    /// Classify the current state for `digest` (spec §4.5). Always
    /// `find_or_insert`s the objhead, so a MISS result leaves the caller
    /// holding the objhead it must insert its new busy objcore into.
    ///
    /// `always_insert` forces a MISS regardless of any matching objcore
    /// (spec §4.5 "`always_insert` forces MISS even if a match exists;
    /// used by pass-mode fetches that must not be shared" and by a caller
    /// kicking off a background refresh of a gracious object).
    pub fn lookup(
        &self,
        digest: crate::core::digest::Digest,
        url: &str,
        headers: &[(String, String)],
        now: f64,
        always_insert: bool,
    ) -> (Arc<Objhead>, Outcome) {
        let head = self.index.find_or_insert(digest);
        if always_insert {
            return (head, Outcome::Miss);
        }
        let candidates = head.objcores();

        // A live HFM/HFP sentinel short-circuits the rest of the table: it
        // forces MISS/PASS for the remainder of its TTL window regardless
        // of what else is on the head (spec §4.5's HFM/HFP note).
        if let Some(sentinel) = candidates
            .iter()
            .find(|oc| self.is_live(oc, url, headers) && oc.is_live_sentinel(now))
        {
            return (
                head.clone(),
                if sentinel.is_hfp() { Outcome::Pass } else { Outcome::Miss },
            );
        }

        let fresh = candidates
            .iter()
            .find(|oc| self.is_live(oc, url, headers) && !oc.is_expired(now) && !oc.is_busy());
        if let Some(oc) = fresh {
            return (head.clone(), Outcome::Hit(oc.clone()));
        }

        let busy = candidates.iter().find(|oc| oc.is_busy());
        let grace = candidates
            .iter()
            .filter(|oc| self.is_live(oc, url, headers) && oc.is_in_grace(now))
            .max_by(|a, b| a.created.partial_cmp(&b.created).unwrap());

        match (grace, busy) {
            (Some(g), Some(_)) => (head.clone(), Outcome::ExpBusy(g.clone())),
            (Some(g), None) => (head.clone(), Outcome::Exp(g.clone())),
            (None, Some(_)) => (head.clone(), Outcome::Busy(head.clone())),
            (None, None) => (head.clone(), Outcome::Miss),
        }
    }

    /// Park on `head`'s waiting list after a `Busy`/`ExpBusy` outcome,
    /// returning once rushed or timed out.
    pub fn wait(&self, head: &Arc<Objhead>, timeout: Duration) -> ParkOutcome {
        head.waitinglist.park(Some(timeout))
    }

    /// Insert a newly-allocated busy objcore as the winning fetch for
    /// `digest` (spec §4.4 `HSH_Insert`).
    pub fn insert(&self, head: &Arc<Objhead>, oc: Arc<Objcore>) {
        oc.attach_to(head);
        head.insert(oc);
    }

    /// A fetch finished successfully: clear BUSY, and rush the waiting list
    /// so parked requests re-do their lookup (spec §4.4 `HSH_Unbusy`).
    pub fn unbusy(&self, head: &Arc<Objhead>, oc: &Arc<Objcore>) {
        oc.boc_done();
        head.waitinglist.rush(usize::MAX, RushReason::Unbusy);
    }

    /// A fetch failed: mark the objcore dying, detach it, and rush the
    /// waiting list with the failure reason (spec §4.4 `HSH_Fail`).
    pub fn fail(&self, head: &Arc<Objhead>, oc: &Arc<Objcore>) {
        oc.boc_done();
        Evictable::mark_dying(oc.as_ref());
        Evictable::detach_from_index(oc.as_ref());
        self.index.remove_if_empty(&head.digest);
        head.waitinglist.rush(usize::MAX, RushReason::Fail);
    }

    /// Remove every non-busy objcore at `digest` (spec §4.4 `HSH_Purge`).
    pub fn purge(&self, digest: &crate::core::digest::Digest) -> usize {
        let Some(head) = self.index.lookup(digest) else {
            return 0;
        };
        let mut n = 0;
        for oc in head.objcores() {
            if !oc.is_busy() {
                Evictable::mark_dying(oc.as_ref());
                Evictable::detach_from_index(oc.as_ref());
                n += 1;
            }
        }
        self.index.remove_if_empty(digest);
        n
    }

    /// Remove every objcore at `digest`, busy or not (spec §4.4 `HSH_Kill`;
    /// stronger than `purge`, used for hard cache-clear operations).
    pub fn kill(&self, digest: &crate::core::digest::Digest) -> usize {
        let Some(head) = self.index.lookup(digest) else {
            return 0;
        };
        let objcores = head.objcores();
        let n = objcores.len();
        for oc in objcores {
            Evictable::mark_dying(oc.as_ref());
            Evictable::detach_from_index(oc.as_ref());
        }
        head.waitinglist.rush(usize::MAX, RushReason::Fail);
        self.index.remove_if_empty(digest);
        n
    }

    /// Remove exactly one non-busy objcore, leaving its siblings under the
    /// same digest untouched (spec §4.4 `HSH_Snipe`; used to drop one stale
    /// variant without disturbing a concurrent fetch or other Vary
    /// variants).
    pub fn snipe(&self, head: &Arc<Objhead>, target: &Arc<Objcore>) -> bool {
        if target.is_busy() {
            return false;
        }
        Evictable::mark_dying(target.as_ref());
        Evictable::detach_from_index(target.as_ref());
        self.index.remove_if_empty(&head.digest);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::digest::Digest;
    use crate::core::hash::simple::SimpleIndex;
    use crate::core::object::boc::Boc;
    use crate::core::storage::body::ChunkPolicy;
    use crate::core::stevedore::memory::MemoryStevedore;

    fn engine() -> LookupEngine {
        LookupEngine::new(Arc::new(SimpleIndex::new()), Arc::new(BanList::new()))
    }

    fn fresh_oc(created: f64, ttl: f64) -> Arc<Objcore> {
        Objcore::new(
            Arc::new(MemoryStevedore::new("a")),
            ChunkPolicy::default(),
            created,
            ttl,
            0.0,
            0.0,
            false,
        )
    }

    #[test]
    fn first_lookup_on_unknown_digest_is_a_miss() {
        let eng = engine();
        let (_head, outcome) = eng.lookup(Digest::default(), "/x", &[], 0.0, false);
        assert!(matches!(outcome, Outcome::Miss));
    }

    #[test]
    fn fresh_object_is_a_hit() {
        let eng = engine();
        let d = Digest::default();
        let (head, _) = eng.lookup(d, "/x", &[], 0.0, false);
        let oc = fresh_oc(0.0, 100.0);
        eng.insert(&head, oc.clone());
        let (_, outcome) = eng.lookup(d, "/x", &[], 5.0, false);
        assert!(matches!(outcome, Outcome::Hit(_)));
    }

    #[test]
    fn busy_object_with_no_grace_candidate_is_busy() {
        let eng = engine();
        let d = Digest::default();
        let (head, _) = eng.lookup(d, "/x", &[], 0.0, false);
        let oc = fresh_oc(0.0, 100.0);
        oc.set_boc(Arc::new(Boc::new()));
        eng.insert(&head, oc);
        let (_, outcome) = eng.lookup(d, "/x", &[], 1.0, false);
        assert!(matches!(outcome, Outcome::Busy(_)));
    }

    #[test]
    fn expired_with_grace_and_concurrent_refresh_is_expbusy() {
        let eng = engine();
        let d = Digest::default();
        let (head, _) = eng.lookup(d, "/x", &[], 0.0, false);
        let stale = Objcore::new(
            Arc::new(MemoryStevedore::new("a")),
            ChunkPolicy::default(),
            0.0,
            1.0,
            10.0,
            0.0,
            false,
        );
        eng.insert(&head, stale.clone());
        let refresher = fresh_oc(2.0, 100.0);
        refresher.set_boc(Arc::new(Boc::new()));
        eng.insert(&head, refresher);
        let (_, outcome) = eng.lookup(d, "/x", &[], 3.0, false);
        assert!(matches!(outcome, Outcome::ExpBusy(_)));
    }

    #[test]
    fn fail_detaches_objcore_and_rushes_waiters() {
        let eng = engine();
        let d = Digest::default();
        let (head, _) = eng.lookup(d, "/x", &[], 0.0, false);
        let oc = fresh_oc(0.0, 100.0);
        oc.set_boc(Arc::new(Boc::new()));
        eng.insert(&head, oc.clone());
        eng.fail(&head, &oc);
        assert_eq!(head.objcores().len(), 0);
    }

    #[test]
    fn purge_removes_non_busy_but_leaves_busy_alone() {
        let eng = engine();
        let d = Digest::default();
        let (head, _) = eng.lookup(d, "/x", &[], 0.0, false);
        let idle = fresh_oc(0.0, 100.0);
        eng.insert(&head, idle);
        let busy = fresh_oc(0.0, 100.0);
        busy.set_boc(Arc::new(Boc::new()));
        eng.insert(&head, busy);
        let removed = eng.purge(&d);
        assert_eq!(removed, 1);
        assert_eq!(head.objcores().len(), 1);
    }

    #[test]
    fn always_insert_forces_miss_even_with_a_fresh_hit_available() {
        let eng = engine();
        let d = Digest::default();
        let (head, _) = eng.lookup(d, "/x", &[], 0.0, false);
        eng.insert(&head, fresh_oc(0.0, 100.0));
        let (_, outcome) = eng.lookup(d, "/x", &[], 5.0, true);
        assert!(matches!(outcome, Outcome::Miss));
    }

    #[test]
    fn live_hfm_sentinel_forces_miss_instead_of_a_hit() {
        let eng = engine();
        let d = Digest::default();
        let (head, _) = eng.lookup(d, "/x", &[], 0.0, false);
        let oc = fresh_oc(0.0, 100.0);
        oc.mark_hfm();
        eng.insert(&head, oc);
        let (_, outcome) = eng.lookup(d, "/x", &[], 5.0, false);
        assert!(matches!(outcome, Outcome::Miss));
    }

    #[test]
    fn live_hfp_sentinel_forces_pass() {
        let eng = engine();
        let d = Digest::default();
        let (head, _) = eng.lookup(d, "/x", &[], 0.0, false);
        let oc = fresh_oc(0.0, 100.0);
        oc.mark_hfp();
        eng.insert(&head, oc);
        let (_, outcome) = eng.lookup(d, "/x", &[], 5.0, false);
        assert!(matches!(outcome, Outcome::Pass));
    }

    #[test]
    fn sentinel_past_its_ttl_window_no_longer_forces_pass() {
        let eng = engine();
        let d = Digest::default();
        let (head, _) = eng.lookup(d, "/x", &[], 0.0, false);
        let oc = fresh_oc(0.0, 10.0);
        oc.mark_hfp();
        eng.insert(&head, oc);
        let (_, outcome) = eng.lookup(d, "/x", &[], 20.0, false);
        assert!(matches!(outcome, Outcome::Miss));
    }
}
