// tests/integration/scenarios_test.rs

//! The six end-to-end scenarios.

use super::test_helpers::*;
use quaywatch::core::engine::Decision;
use quaywatch::core::object::boc::BocState;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn scenario_1_miss_then_fill_then_hit() {
    let engine = engine();
    let url = "/hello";
    let digest = engine.digest_for("GET", url);

    let decision = engine.classify(digest, url, &[], 0.0, false, false);
    let oc1 = match decision {
        Decision::Fetch(oc) => oc,
        _ => panic!("first classification on an unseen digest must be a Fetch"),
    };

    oc1.body.extend(b"hel").unwrap();
    oc1.boc().unwrap().extend_notify(3);
    oc1.body.extend(b"lo").unwrap();
    oc1.boc().unwrap().extend_notify(5);
    oc1.boc().unwrap().set_state(BocState::Finished);
    engine.complete_fetch(digest, url, &[], &oc1);
    oc1.ref_dec();

    let decision = engine.classify(digest, url, &[], 1.0, false, false);
    let oc2 = match decision {
        Decision::Serve(oc) => oc,
        _ => panic!("expected Serve on the second lookup, got a different decision"),
    };
    assert!(Arc::ptr_eq(&oc1, &oc2));
    assert_eq!(read_body(&oc2), b"hello");
}

#[test]
fn scenario_2_busy_coalescing_rushes_all_waiters_on_completion() {
    let engine = engine();
    let url = "/slow";
    let digest = engine.digest_for("GET", url);

    let oc1 = unwrap_oc(engine.classify(digest, url, &[], 0.0, false, false));

    let fetch_engine = engine.clone();
    let fetch_oc = oc1.clone();
    let fetcher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        fetch_oc.body.extend(b"payload").unwrap();
        fetch_oc.boc().unwrap().set_state(BocState::Finished);
        fetch_engine.complete_fetch(digest, url, &[], &fetch_oc);
        fetch_oc.ref_dec();
    });

    let waiter_results: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for _ in 0..9 {
        let engine = engine.clone();
        let results = waiter_results.clone();
        waiters.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            loop {
                match engine.classify(digest, url, &[], 0.01, false, false) {
                    Decision::Serve(_) => {
                        results.lock().unwrap().push(true);
                        break;
                    }
                    Decision::Retry => continue,
                    Decision::TimedOut => {
                        results.lock().unwrap().push(false);
                        break;
                    }
                    Decision::Fetch(_) | Decision::ServeAndRefresh(_) => {
                        panic!("a request parked behind a busy fetch should never become the fetcher")
                    }
                }
            }
        }));
    }

    fetcher.join().unwrap();
    for w in waiters {
        w.join().unwrap();
    }

    let results = waiter_results.lock().unwrap();
    assert_eq!(results.len(), 9);
    assert!(results.iter().all(|&hit| hit), "every waiter should observe a HIT, not a timeout");
}

#[test]
fn scenario_3_failed_fetch_rushes_waiters_and_next_lookup_is_a_fresh_miss() {
    let engine = engine();
    let url = "/broken";
    let digest = engine.digest_for("GET", url);

    let oc1 = unwrap_oc(engine.classify(digest, url, &[], 0.0, false, false));
    oc1.body.extend(b"ab").unwrap();

    let fail_engine = engine.clone();
    let fail_oc = oc1.clone();
    let failer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        fail(&fail_engine, digest, url, &[], &fail_oc);
    });

    let mut waiters = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        waiters.push(thread::spawn(move || loop {
            match engine.classify(digest, url, &[], 0.01, false, false) {
                Decision::Retry => continue,
                Decision::TimedOut => break,
                _ => break,
            }
        }));
    }

    failer.join().unwrap();
    for w in waiters {
        w.join().unwrap();
    }

    let decision = engine.classify(digest, url, &[], 1.0, false, false);
    assert!(
        matches!(decision, Decision::Fetch(_)),
        "after a failed fetch the digest must classify as a fresh MISS"
    );
}

#[test]
fn scenario_4_lru_eviction_nukes_the_earliest_object_under_pressure() {
    let mut config = quaywatch::config::Config::default();
    config.stevedores = vec![quaywatch::config::StevedoreConfig {
        name: "tight".to_string(),
        kind: quaywatch::config::StevedoreKind::Memory,
        max_resident_bytes: Some(3 * 16),
        scratch_dir: None,
    }];
    config.chunk.max_chunk_size = 16;
    config.chunk.min_chunk_size = 16;
    config.chunk.less_ok = false;
    let engine = quaywatch::core::engine::CacheEngine::from_config(&config).unwrap();

    let mut digests = Vec::new();
    for i in 0..4 {
        let url = format!("/item{i}");
        let digest = engine.digest_for("GET", &url);
        let oc = unwrap_oc(engine.classify(digest, &url, &[], i as f64, false, false));
        fill(&engine, digest, &url, &[], &oc, &vec![b'x'; 16]);
        digests.push((digest, url));
    }

    let (first_digest, first_url) = &digests[0];
    let decision = engine.classify(*first_digest, first_url, &[], 10.0, false, false);
    assert!(
        matches!(decision, Decision::Fetch(_)),
        "the earliest-inserted object should have been nuked to make room for the fourth"
    );
}

#[test]
fn scenario_5_grace_serving_with_concurrent_refresh_is_expbusy_and_serves_immediately() {
    let engine = engine_with_ttl(1.0, 10.0, 0.0);
    let url = "/grace";
    let digest = engine.digest_for("GET", url);

    let oc1 = unwrap_oc(engine.classify(digest, url, &[], 0.0, false, false));
    fill(&engine, digest, url, &[], &oc1, b"stale-but-useful");

    // At t=2 the object is stale; the caller that notices starts a
    // background refresh via `always_insert`.
    let refresh_decision = engine.classify(digest, url, &[], 2.0, false, true);
    let oc2 = match refresh_decision {
        Decision::Fetch(oc) => oc,
        _ => panic!("always_insert must force a fresh Fetch"),
    };

    // A second request at t=3 finds the stale object plus the in-flight
    // refresh and must be served immediately from the stale copy.
    let decision = engine.classify(digest, url, &[], 3.0, false, false);
    let served = match decision {
        Decision::Serve(oc) => oc,
        _ => panic!("expected an immediate Serve from the gracious object"),
    };
    assert!(Arc::ptr_eq(&served, &oc1));
    assert_eq!(read_body(&served), b"stale-but-useful");

    fill(&engine, digest, url, &[], &oc2, b"refreshed");
}

#[test]
fn scenario_6_purge_clears_every_variant_at_a_digest() {
    let engine = engine();
    let url = "/multi";
    let digest = engine.digest_for("GET", url);

    for variant in ["gzip", "br", "identity"] {
        let headers = vec![("Accept-Encoding".to_string(), variant.to_string())];
        let oc = unwrap_oc(engine.classify(digest, url, &headers, 0.0, false, false));
        oc.set_vary(vec![("Accept-Encoding".to_string(), variant.to_string())]);
        fill(&engine, digest, url, &headers, &oc, variant.as_bytes());
    }

    let removed = engine.purge(&digest);
    assert_eq!(removed, 3);

    for variant in ["gzip", "br", "identity"] {
        let headers = vec![("Accept-Encoding".to_string(), variant.to_string())];
        let decision = engine.classify(digest, url, &headers, 1.0, false, false);
        assert!(
            matches!(decision, Decision::Fetch(_)),
            "every variant must classify as a fresh MISS after purge"
        );
    }
}

#[test]
fn scenario_7_hit_for_pass_sentinel_forces_an_uncached_fetch_within_its_ttl_window() {
    let engine = engine_with_ttl(10.0, 0.0, 0.0);
    let url = "/uncacheable";
    let digest = engine.digest_for("GET", url);

    let oc1 = unwrap_oc(engine.classify(digest, url, &[], 0.0, false, false));
    oc1.mark_hfp();
    fill(&engine, digest, url, &[], &oc1, b"do-not-cache-me");

    // Still within the sentinel's TTL window: every lookup must come back
    // as its own private Fetch, never a Serve sharing the sentinel.
    let oc2 = match engine.classify(digest, url, &[], 1.0, false, false) {
        Decision::Fetch(oc) => oc,
        _ => panic!("a live HFP sentinel must force a fresh, uncached Fetch"),
    };
    assert!(!Arc::ptr_eq(&oc1, &oc2));
    fill(&engine, digest, url, &[], &oc2, b"still-uncached");

    // Past the window, the digest reverts to ordinary MISS/HIT handling.
    let decision = engine.classify(digest, url, &[], 20.0, false, false);
    assert!(matches!(decision, Decision::Fetch(_)));
}

#[test]
fn scenario_8_hit_for_miss_sentinel_forces_a_fresh_fetch_within_its_ttl_window() {
    let engine = engine_with_ttl(10.0, 0.0, 0.0);
    let url = "/flaky-origin";
    let digest = engine.digest_for("GET", url);

    let oc1 = unwrap_oc(engine.classify(digest, url, &[], 0.0, false, false));
    oc1.mark_hfm();
    fill(&engine, digest, url, &[], &oc1, b"");

    let decision = engine.classify(digest, url, &[], 1.0, false, false);
    assert!(
        matches!(decision, Decision::Fetch(_)),
        "a live HFM sentinel must force MISS instead of serving a hit"
    );
}
