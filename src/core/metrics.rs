// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the cache core.
//!
//! Uses `lazy_static` to ensure metrics are registered exactly once for the
//! lifetime of the process, matching the registration pattern used
//! throughout this codebase's ambient stack.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    /// Lookups classified HIT (spec §4.5 classification table).
    pub static ref LOOKUP_HIT_TOTAL: Counter =
        register_counter!("quaywatch_lookup_hit_total", "Lookups classified as HIT.").unwrap();
    /// Lookups classified MISS.
    pub static ref LOOKUP_MISS_TOTAL: Counter =
        register_counter!("quaywatch_lookup_miss_total", "Lookups classified as MISS.").unwrap();
    /// Lookups classified BUSY (request parked on the waiting list).
    pub static ref LOOKUP_BUSY_TOTAL: Counter =
        register_counter!("quaywatch_lookup_busy_total", "Lookups classified as BUSY.").unwrap();
    /// Lookups classified EXP (grace, no concurrent refresh).
    pub static ref LOOKUP_EXP_TOTAL: Counter =
        register_counter!("quaywatch_lookup_exp_total", "Lookups classified as EXP.").unwrap();
    /// Lookups classified EXPBUSY (grace, concurrent refresh in flight).
    pub static ref LOOKUP_EXPBUSY_TOTAL: Counter = register_counter!(
        "quaywatch_lookup_expbusy_total",
        "Lookups classified as EXPBUSY."
    )
    .unwrap();
    /// Lookups forced PASS by a live HFP sentinel (spec §3.2/§4.5).
    pub static ref LOOKUP_PASS_TOTAL: Counter =
        register_counter!("quaywatch_lookup_pass_total", "Lookups classified as PASS.").unwrap();

    /// Requests rushed off an objhead waiting list, labeled by reason
    /// ("unbusy" or "fail").
    pub static ref WAITLIST_RUSHED_TOTAL: CounterVec = register_counter_vec!(
        "quaywatch_waitlist_rushed_total",
        "Requests rushed off a waiting list.",
        &["reason"]
    )
    .unwrap();
    /// Waiting-list parks that timed out before a rush reached them.
    pub static ref WAITLIST_TIMEOUT_TOTAL: Counter = register_counter!(
        "quaywatch_waitlist_timeout_total",
        "Waiting-list parks that timed out."
    )
    .unwrap();

    /// LRU evictions performed to satisfy an allocation under pressure.
    pub static ref LRU_NUKE_TOTAL: Counter =
        register_counter!("quaywatch_lru_nuke_total", "Objects evicted by LRU nuke.").unwrap();
    /// Allocations that failed even after the shrink-then-nuke retry loop.
    pub static ref ALLOC_FAILED_TOTAL: Counter = register_counter!(
        "quaywatch_alloc_failed_total",
        "Storage allocations that failed permanently."
    )
    .unwrap();

    /// Fetches that ended in BOC state FAILED.
    pub static ref FETCH_FAILED_TOTAL: Counter =
        register_counter!("quaywatch_fetch_failed_total", "Fetches that failed.").unwrap();

    /// Currently resident bytes across all chunks, labeled by stevedore name.
    pub static ref STEVEDORE_BYTES_RESIDENT: CounterVec = register_counter_vec!(
        "quaywatch_stevedore_bytes_allocated_total",
        "Cumulative bytes allocated from a stevedore.",
        &["stevedore"]
    )
    .unwrap();

    /// Objects currently live in the index.
    pub static ref OBJECTS_LIVE: Gauge = register_gauge!(
        "quaywatch_objects_live",
        "Number of objcores currently reachable from the index."
    )
    .unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text
/// exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
