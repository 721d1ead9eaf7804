// src/core/errors.rs

//! Defines the primary error type for the cache core and its fetch-side
//! collaborators. Mirrors the taxonomy in spec §7.

use std::sync::Arc;
use thiserror::Error;

/// The error type surfaced across the core's external interfaces (spec §6).
///
/// `BadArgument`-class contract violations are not represented here: per
/// spec §7 they are programming bugs, detected by `debug_assert!`/`panic!`
/// at the point of violation rather than propagated as a `Result`.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Allocation failed even after the shrink-then-nuke retry loop in
    /// `alloc`/`allocobj` (spec §4.2, §7).
    #[error("out of storage: could not allocate {requested} bytes from stevedore '{stevedore}'")]
    OutOfStorage { stevedore: String, requested: usize },

    /// The producer transitioned the BOC to `FAILED` while a consumer was
    /// iterating, or a lookup found only a `DYING`/`FAILED` fetch in
    /// progress.
    #[error("fetch failed for digest {digest}")]
    FetchFailed { digest: String },

    /// A request's parked wait on an objhead's waiting list exceeded its
    /// deadline (spec §5 "Cancellation and timeouts").
    #[error("timed out waiting on busy object for digest {digest}")]
    WaitTimeout { digest: String },

    /// A storage backend could not persist a ban event. Non-fatal: spec §7
    /// says the bitwise-OR of backend return codes is handed back to the
    /// caller, who decides what to do with a non-zero result.
    #[error("stevedore '{stevedore}' could not persist the ban event")]
    PersistDrop { stevedore: String },

    /// The HTTP origin request itself failed (ambient error, not in the
    /// spec's core taxonomy, but needed to report `CoreError` from the
    /// fetch-side collaborator in `server/proxy.rs`).
    #[error("origin fetch error: {0}")]
    Origin(String),

    /// I/O failure from a stevedore's backing store (e.g. the mmap file).
    #[error("storage I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl Clone for CoreError {
    fn clone(&self) -> Self {
        match self {
            CoreError::OutOfStorage {
                stevedore,
                requested,
            } => CoreError::OutOfStorage {
                stevedore: stevedore.clone(),
                requested: *requested,
            },
            CoreError::FetchFailed { digest } => CoreError::FetchFailed {
                digest: digest.clone(),
            },
            CoreError::WaitTimeout { digest } => CoreError::WaitTimeout {
                digest: digest.clone(),
            },
            CoreError::PersistDrop { stevedore } => CoreError::PersistDrop {
                stevedore: stevedore.clone(),
            },
            CoreError::Origin(s) => CoreError::Origin(s.clone()),
            CoreError::Io(e) => CoreError::Io(Arc::clone(e)),
        }
    }
}

impl PartialEq for CoreError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                CoreError::OutOfStorage {
                    stevedore: s1,
                    requested: r1,
                },
                CoreError::OutOfStorage {
                    stevedore: s2,
                    requested: r2,
                },
            ) => s1 == s2 && r1 == r2,
            (CoreError::FetchFailed { digest: d1 }, CoreError::FetchFailed { digest: d2 }) => {
                d1 == d2
            }
            (CoreError::WaitTimeout { digest: d1 }, CoreError::WaitTimeout { digest: d2 }) => {
                d1 == d2
            }
            (
                CoreError::PersistDrop { stevedore: s1 },
                CoreError::PersistDrop { stevedore: s2 },
            ) => s1 == s2,
            (CoreError::Origin(s1), CoreError::Origin(s2)) => s1 == s2,
            (CoreError::Io(e1), CoreError::Io(e2)) => e1.to_string() == e2.to_string(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::Origin(e.to_string())
    }
}
