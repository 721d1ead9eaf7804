// src/server/initialization.rs

//! Turns a resolved `Config` into a bound listener and a ready-to-serve
//! `CacheEngine`: builds the stevedore registry, the object index, the
//! origin HTTP client, and checks the origin URL against the configured
//! SSRF guardrails before the server starts accepting connections.

use super::proxy::ProxyState;
use crate::config::Config;
use crate::core::engine::CacheEngine;
use anyhow::{bail, Context, Result};
use reqwest::Url;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub struct ServerContext {
    pub config: Config,
    pub state: Arc<ProxyState>,
    pub listener: TcpListener,
}

pub async fn setup(config: Config) -> Result<ServerContext> {
    check_origin_against_security_policy(&config)?;

    let engine = CacheEngine::from_config(&config).context("building cache engine from configuration")?;
    let http_client = reqwest::blocking::Client::builder()
        .timeout(config.origin.timeout)
        .build()
        .context("building origin HTTP client")?;

    let state = Arc::new(ProxyState {
        engine: Arc::new(engine),
        origin_base_url: config.origin.base_url.clone(),
        http_client,
        waitlist_timeout: config.waitlist_timeout,
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.host, config.port))?;

    info!(
        host = %config.host,
        port = config.port,
        origin = %config.origin.base_url,
        "cache engine initialized"
    );

    Ok(ServerContext {
        config,
        state,
        listener,
    })
}

/// Refuses to start if the configured origin falls outside
/// `security.allowed_fetch_hosts`, or resolves to a private/loopback
/// address while `security.allow_private_fetch_ips` is unset (spec §6
/// ambient concerns supplement: SSRF guarding on outbound fetches).
fn check_origin_against_security_policy(config: &Config) -> Result<()> {
    let url = Url::parse(&config.origin.base_url)
        .with_context(|| format!("invalid origin.base_url '{}'", config.origin.base_url))?;
    let host = url.host_str().unwrap_or_default();

    if !config.security.allowed_fetch_hosts.is_empty()
        && !config
            .security
            .allowed_fetch_hosts
            .iter()
            .any(|pattern| wildmatch::WildMatch::new(pattern).matches(host))
    {
        bail!("origin host '{host}' is not allowed by security.allowed_fetch_hosts");
    }

    if !config.security.allow_private_fetch_ips && is_private_or_loopback(host) {
        bail!(
            "origin host '{host}' resolves to a private or loopback address; \
             set security.allow_private_fetch_ips to permit this"
        );
    }

    Ok(())
}

fn is_private_or_loopback(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}
