// tests/integration/test_helpers.rs

//! Shared scaffolding for the end-to-end scenario tests: a small in-memory
//! engine plus helpers that play the role `server/proxy.rs` plays against
//! a real origin, without needing an actual HTTP server.

use quaywatch::config::Config;
use quaywatch::core::engine::{CacheEngine, Decision};
use quaywatch::core::object::boc::BocState;
use quaywatch::core::object::Objcore;
use std::sync::Arc;

pub fn engine_with_ttl(ttl: f64, grace: f64, keep: f64) -> Arc<CacheEngine> {
    let mut config = Config::default();
    config.ttl.default_ttl_secs = ttl;
    config.ttl.default_grace_secs = grace;
    config.ttl.default_keep_secs = keep;
    Arc::new(CacheEngine::from_config(&config).expect("default-derived config is valid"))
}

pub fn engine() -> Arc<CacheEngine> {
    engine_with_ttl(120.0, 10.0, 0.0)
}

/// Plays "the origin responded with `body`" against an objcore a `Fetch`
/// decision just handed back, exactly as `fetch_and_fill` in
/// `server/proxy.rs` would after a successful response.
pub fn fill(engine: &CacheEngine, digest: quaywatch::core::Digest, url: &str, headers: &[(String, String)], oc: &Arc<Objcore>, body: &[u8]) {
    oc.body.extend(body).unwrap();
    oc.boc().unwrap().set_state(BocState::Finished);
    engine.complete_fetch(digest, url, headers, oc);
    // A Fetch decision pins a reference for the fetcher (spec §8); release
    // it here the way build_response releases it once done serving.
    oc.ref_dec();
}

/// Plays "the origin fetch failed" against a busy objcore.
pub fn fail(engine: &CacheEngine, digest: quaywatch::core::Digest, url: &str, headers: &[(String, String)], oc: &Arc<Objcore>) {
    oc.boc().unwrap().set_state(BocState::Failed);
    engine.fail_fetch(digest, url, headers, oc);
    oc.ref_dec();
}

/// Drains an objcore's whole body into a `Vec<u8>`, the way
/// `server/proxy.rs`'s `build_response` does via `iter_body`.
pub fn read_body(oc: &Arc<Objcore>) -> Vec<u8> {
    let mut out = Vec::new();
    quaywatch::core::iter::iter_body(
        &oc.body,
        oc.boc().as_ref(),
        "test",
        std::time::Duration::from_secs(5),
        |step| out.extend_from_slice(step.data),
    )
    .unwrap();
    out
}

pub fn unwrap_oc(decision: Decision) -> Arc<Objcore> {
    match decision {
        Decision::Serve(oc) | Decision::ServeAndRefresh(oc) | Decision::Fetch(oc) => oc,
        Decision::Retry => panic!("expected a servable/fetchable decision, got Retry"),
        Decision::TimedOut => panic!("expected a servable/fetchable decision, got TimedOut"),
    }
}
