// src/server/proxy.rs

//! The HTTP handler that bridges axum's async transport into the cache
//! core's blocking synchronization. The core (`crate::core`) is built on
//! `parking_lot` mutexes and condvars and blocks the calling thread while
//! parked or while fetching; the bridge is `tokio::task::spawn_blocking`,
//! which moves each request onto the blocking thread pool for the
//! duration of its classify/fetch/serve cycle (spec §6 "external
//! interfaces", ambient transport supplement).

use crate::core::digest::Digest;
use crate::core::engine::{CacheEngine, Decision};
use crate::core::errors::CoreError;
use crate::core::iter::iter_body;
use crate::core::object::boc::BocState;
use crate::core::object::Objcore;
use bytes::Bytes;
use axum::body::Body as AxumBody;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How many times a request may be rushed off the waiting list and retry
/// its classification before giving up. Bounds pathological rush/retry
/// cycling; a well-behaved objhead resolves in one or two iterations.
const MAX_CLASSIFY_RETRIES: u32 = 64;

/// Shared state handed to every request handler.
pub struct ProxyState {
    pub engine: Arc<CacheEngine>,
    pub origin_base_url: String,
    pub http_client: reqwest::blocking::Client,
    pub waitlist_timeout: Duration,
}

pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(any(handle)).with_state(state)
}

async fn handle(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let headers = collect_headers(req.headers());

    let outcome =
        tokio::task::spawn_blocking(move || serve_blocking(&state, &method, &path_and_query, &headers))
            .await;

    match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => error_response(err),
        Err(join_err) => {
            warn!("proxy worker task panicked: {join_err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Runs entirely on a blocking-pool thread: classify against the core,
/// serve a cache hit directly, or perform the origin fetch that fills the
/// busy objcore the engine just handed us.
fn serve_blocking(
    state: &ProxyState,
    method: &Method,
    path_and_query: &str,
    headers: &[(String, String)],
) -> Result<Response, CoreError> {
    let digest = state.engine.digest_for(method.as_str(), path_and_query);
    let now = now_secs();

    for _ in 0..MAX_CLASSIFY_RETRIES {
        match state
            .engine
            .classify(digest, path_and_query, headers, now, false, false)
        {
            Decision::Serve(oc) => return build_response(digest, &oc, state.waitlist_timeout),
            Decision::ServeAndRefresh(oc) => {
                spawn_background_refresh(state, digest, path_and_query.to_string(), headers.to_vec());
                return build_response(digest, &oc, state.waitlist_timeout);
            }
            Decision::Fetch(oc) => {
                if let Err(err) = fetch_and_fill(
                    &state.engine,
                    &state.origin_base_url,
                    &state.http_client,
                    digest,
                    path_and_query,
                    headers,
                    &oc,
                ) {
                    // build_response never runs on this path, so its
                    // ref_dec doesn't either; release the reference
                    // classify() pinned for this fetcher ourselves.
                    oc.ref_dec();
                    return Err(err);
                }
                return build_response(digest, &oc, state.waitlist_timeout);
            }
            Decision::Retry => continue,
            Decision::TimedOut => {
                return Err(CoreError::WaitTimeout {
                    digest: digest.to_hex(),
                });
            }
        }
    }
    Err(CoreError::WaitTimeout {
        digest: digest.to_hex(),
    })
}

/// A `ServeAndRefresh` decision means the caller who noticed the object was
/// gracious is invited to start the background revalidation itself; this
/// does so on its own blocking-pool task so the client response already
/// returned isn't held up by it (spec §4.5 "expired-with-grace" note).
fn spawn_background_refresh(
    state: &ProxyState,
    digest: Digest,
    path_and_query: String,
    headers: Vec<(String, String)>,
) {
    let engine = state.engine.clone();
    let origin_base_url = state.origin_base_url.clone();
    let http_client = state.http_client.clone();

    tokio::task::spawn_blocking(move || {
        let now = now_secs();
        match engine.classify(digest, &path_and_query, &headers, now, false, true) {
            Decision::Fetch(oc) => {
                // Nothing downstream of this task serves `oc` to a client
                // (the gracious copy already answered the request that
                // triggered this refresh), so there's no build_response to
                // release classify()'s pinned reference for us.
                if let Err(err) = fetch_and_fill(
                    &engine,
                    &origin_base_url,
                    &http_client,
                    digest,
                    &path_and_query,
                    &headers,
                    &oc,
                ) {
                    warn!(url = %path_and_query, "background refresh fetch failed: {err}");
                }
                oc.ref_dec();
            }
            _ => {
                // always_insert always classifies as Fetch; any other
                // branch here means classify's contract changed underneath
                // this caller.
                debug_assert!(false, "always_insert classify must return Decision::Fetch");
            }
        }
    });
}

/// Fetches the origin and streams the response into `oc`'s body, completing
/// or failing the fetch against the engine once the origin's response ends.
fn fetch_and_fill(
    engine: &CacheEngine,
    origin_base_url: &str,
    http_client: &reqwest::blocking::Client,
    digest: Digest,
    path_and_query: &str,
    headers: &[(String, String)],
    oc: &Arc<Objcore>,
) -> Result<(), CoreError> {
    let boc = oc
        .boc()
        .expect("a Decision::Fetch objcore always carries a BOC");
    let url = format!("{}{}", origin_base_url.trim_end_matches('/'), path_and_query);

    let result = (|| -> Result<(), CoreError> {
        let mut resp = http_client.get(&url).send()?;
        let status = resp.status().as_u16();
        let response_headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let vary = resolve_vary(&response_headers, headers);
        apply_sentinel_flags(oc, status, &response_headers);

        {
            let mut attrs = oc.attrs.lock();
            attrs.status = status;
            attrs.headers = response_headers;
        }
        oc.set_vary(vary);

        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = resp.read(&mut buf)?;
            if n == 0 {
                break;
            }
            oc.body.extend(&buf[..n])?;
            boc.extend_notify(oc.body.total_len() as u64);
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            boc.set_state(BocState::Finished);
            engine.complete_fetch(digest, path_and_query, headers, oc);
            Ok(())
        }
        Err(err) => {
            boc.set_state(BocState::Failed);
            engine.fail_fetch(digest, path_and_query, headers, oc);
            Err(err)
        }
    }
}

/// Marks `oc` a HFM/HFP sentinel when the origin's response says this
/// digest must not be served as a normal cache hit for a while (spec
/// §3.2/§4.5's HFM/HFP note): a `no-store` response forces a pass for the
/// object's TTL window, and a server error forces a fresh re-fetch rather
/// than quietly caching the failure.
fn apply_sentinel_flags(oc: &Arc<Objcore>, status: u16, response_headers: &[(String, String)]) {
    let no_store = response_headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("cache-control") && value.to_ascii_lowercase().contains("no-store")
    });
    if no_store {
        oc.mark_hfp();
    } else if (500..600).contains(&status) {
        oc.mark_hfm();
    }
}

/// Resolves which incoming request headers the origin's `Vary` response
/// header names, pairing each with the value this response was generated
/// under (spec §3.3 supplement; `*` degrades to "never matches again",
/// which this port treats conservatively by dropping it — an object whose
/// Vary axis is `*` simply isn't shared, since it is never re-matched).
fn resolve_vary(
    response_headers: &[(String, String)],
    request_headers: &[(String, String)],
) -> Vec<(String, String)> {
    let Some((_, vary_value)) = response_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("vary"))
    else {
        return Vec::new();
    };

    vary_value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "*")
        .filter_map(|name| {
            request_headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| (name.to_string(), v.clone()))
        })
        .collect()
}

/// Drains `oc`'s body through `iter_body` into a response. The core streams
/// internally via BOC synchronization; this port buffers the drained bytes
/// before handing them to axum rather than wiring a streaming `axum::body::Body`,
/// which keeps the bridge between the blocking core and the async response
/// path straightforward at the cost of holding a full response in memory.
fn build_response(digest: Digest, oc: &Arc<Objcore>, wait_timeout: Duration) -> Result<Response, CoreError> {
    let (status, headers) = {
        let attrs = oc.attrs.lock();
        (attrs.status, attrs.headers.clone())
    };
    let boc = oc.boc();

    let mut buf = Vec::new();
    let result = iter_body(&oc.body, boc.as_ref(), &digest.to_hex(), wait_timeout, |step| {
        buf.extend_from_slice(step.data);
    });
    // classify() pinned a reference for the duration of this delivery (spec
    // §8's HIT/EXP/EXPBUSY refcount invariant); release it now that the
    // body has been fully drained, success or not.
    oc.ref_dec();
    result?;

    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status_code);
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(&value),
        ) {
            builder = builder.header(name, value);
        }
    }
    Ok(builder
        .body(AxumBody::from(Bytes::from(buf)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

fn error_response(err: CoreError) -> Response {
    let status = match &err {
        CoreError::WaitTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CoreError::FetchFailed { .. } | CoreError::Origin(_) => StatusCode::BAD_GATEWAY,
        CoreError::OutOfStorage { .. } => StatusCode::INSUFFICIENT_STORAGE,
        CoreError::PersistDrop { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
