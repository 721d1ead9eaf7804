// src/core/digest.rs

//! The cache key: a fixed 32-byte fingerprint of a request's hash-key fields.

use sha2::{Digest as _, Sha256};
use std::fmt;

/// A 32-byte cryptographic digest used as the object index's lookup key.
///
/// The same sequence of canonicalized inputs, fed in the same order, always
/// yields the same digest; different inputs are not expected to collide in
/// practice. See spec §3.1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Builds a digest by feeding canonicalized request components into SHA-256,
/// in a fixed order, the way `HSH_AddString` accumulates hash-key fields
/// before closing the digest.
#[derive(Default)]
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Feeds one canonicalized field (method, URL, a Vary-selected header
    /// value, ...) into the digest. A separator byte is mixed in between
    /// fields so that `("ab", "c")` and `("a", "bc")` never collide.
    pub fn add(&mut self, field: &[u8]) -> &mut Self {
        self.hasher.update(field);
        self.hasher.update([0u8]);
        self
    }

    pub fn finish(self) -> Digest {
        let out = self.hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        Digest(bytes)
    }
}

/// Convenience: digest a method, a canonical URL and an ordered list of
/// `(name, value)` Vary-axis header pairs.
pub fn digest_request(method: &str, url: &str, vary_headers: &[(String, String)]) -> Digest {
    let mut b = DigestBuilder::new();
    b.add(method.as_bytes()).add(url.as_bytes());
    for (name, value) in vary_headers {
        b.add(name.to_ascii_lowercase().as_bytes());
        b.add(value.as_bytes());
    }
    b.finish()
}
