// src/config.rs

//! Loading, resolving and validating the server's configuration.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Security controls on outbound origin fetches (spec §6 "ambient
/// concerns"). Mirrors the guardrails a reverse proxy needs regardless of
/// whether metrics or any other outer surface is in scope.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SecurityConfig {
    /// Glob patterns for hosts the fetch path may connect to. Empty means
    /// unrestricted.
    #[serde(default)]
    pub allowed_fetch_hosts: Vec<String>,
    /// If false, refuses to fetch from private/loopback IP ranges, guarding
    /// against SSRF via a crafted or redirected origin URL.
    #[serde(default)]
    pub allow_private_fetch_ips: bool,
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8878
}

/// What kind of backing store a configured stevedore is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StevedoreKind {
    Memory,
    MmapFile,
}

/// One entry in the configured stevedore list (spec §3.6).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StevedoreConfig {
    pub name: String,
    pub kind: StevedoreKind,
    /// Resident-byte cap for `memory` stevedores. `None` is unlimited.
    #[serde(default)]
    pub max_resident_bytes: Option<usize>,
    /// Scratch directory for `mmap-file` stevedores.
    #[serde(default)]
    pub scratch_dir: Option<String>,
}

fn default_stevedores() -> Vec<StevedoreConfig> {
    vec![StevedoreConfig {
        name: "default".to_string(),
        kind: StevedoreKind::Memory,
        max_resident_bytes: Some(512 * 1024 * 1024),
        scratch_dir: None,
    }]
}

/// Which object-index strategy backs the hash table (spec §4.4).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashStrategy {
    #[default]
    Simple,
    Classic,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HashConfig {
    #[serde(default)]
    pub strategy: HashStrategy,
    /// Only meaningful for `classic`.
    #[serde(default = "default_shard_count")]
    pub shards: usize,
}

fn default_shard_count() -> usize {
    64
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            strategy: HashStrategy::default(),
            shards: default_shard_count(),
        }
    }
}

/// Chunk sizing policy handed to `storage::body::Body` (spec §4.2).
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ChunkConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_less_ok")]
    pub less_ok: bool,
}

fn default_max_chunk_size() -> usize {
    128 * 1024
}
fn default_min_chunk_size() -> usize {
    4 * 1024
}
fn default_less_ok() -> bool {
    true
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            less_ok: default_less_ok(),
        }
    }
}

/// Default freshness lifetimes applied to fetched objects that don't carry
/// their own cache-control directives (spec §4.3).
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct TtlConfig {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: f64,
    #[serde(default = "default_grace_secs")]
    pub default_grace_secs: f64,
    #[serde(default = "default_keep_secs")]
    pub default_keep_secs: f64,
}

fn default_ttl_secs() -> f64 {
    120.0
}
fn default_grace_secs() -> f64 {
    10.0
}
fn default_keep_secs() -> f64 {
    0.0
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            default_grace_secs: default_grace_secs(),
            default_keep_secs: default_keep_secs(),
        }
    }
}

/// The fully resolved, validated server configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_stevedores")]
    pub stevedores: Vec<StevedoreConfig>,
    #[serde(default)]
    pub hash: HashConfig,
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    /// How long a request parks on an objhead's waiting list before giving
    /// up and treating the digest as a MISS (spec §5).
    #[serde(default = "default_waitlist_timeout", with = "humantime_serde")]
    pub waitlist_timeout: Duration,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub origin: OriginConfig,
}

/// Where the reverse proxy forwards requests it must fetch (spec §6
/// "origin fetch").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OriginConfig {
    /// Prefixed onto the incoming request path to build the upstream URL.
    #[serde(default = "default_origin_base_url")]
    pub base_url: String,
    #[serde(default = "default_origin_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_origin_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_origin_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: default_origin_base_url(),
            timeout: default_origin_timeout(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7878
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_waitlist_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            stevedores: default_stevedores(),
            hash: HashConfig::default(),
            chunk: ChunkConfig::default(),
            ttl: TtlConfig::default(),
            waitlist_timeout: default_waitlist_timeout(),
            security: SecurityConfig::default(),
            metrics: MetricsConfig::default(),
            origin: OriginConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration layered from a TOML file (if present) over
    /// built-in defaults, with `QUAYWATCH_*` environment variables able to
    /// override individual leaf keys (e.g. `QUAYWATCH_PORT=9000`).
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(::config::Environment::with_prefix("QUAYWATCH").separator("__"));
        let raw = builder.build()?;
        let config: Config = raw
            .try_deserialize()
            .map_err(|e| anyhow!("failed to parse configuration from '{path}': {e}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.stevedores.is_empty() {
            return Err(anyhow!("at least one stevedore must be configured"));
        }
        let mut seen = std::collections::HashSet::new();
        for stv in &self.stevedores {
            if !seen.insert(stv.name.as_str()) {
                return Err(anyhow!("duplicate stevedore name '{}'", stv.name));
            }
            if stv.kind == StevedoreKind::MmapFile && stv.scratch_dir.is_none() {
                return Err(anyhow!(
                    "stevedore '{}' is mmap-file but has no scratch_dir",
                    stv.name
                ));
            }
        }
        if self.chunk.min_chunk_size == 0 {
            return Err(anyhow!("chunk.min_chunk_size cannot be 0"));
        }
        if self.chunk.min_chunk_size > self.chunk.max_chunk_size {
            return Err(anyhow!(
                "chunk.min_chunk_size cannot exceed chunk.max_chunk_size"
            ));
        }
        if self.hash.strategy == HashStrategy::Classic && self.hash.shards == 0 {
            return Err(anyhow!("hash.shards cannot be 0 when strategy is classic"));
        }
        if self.ttl.default_ttl_secs <= 0.0 {
            return Err(anyhow!("ttl.default_ttl_secs must be positive"));
        }
        if self.metrics.enabled && self.metrics.port == self.port {
            return Err(anyhow!(
                "metrics.port cannot be the same as the main server port"
            ));
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0"));
        }
        if self.origin.base_url.trim().is_empty() {
            return Err(anyhow!("origin.base_url cannot be empty"));
        }
        if self.security.allow_private_fetch_ips {
            warn!(
                "allow_private_fetch_ips is enabled: CACHE fetches may reach loopback or internal addresses"
            );
        }
        Ok(())
    }
}
