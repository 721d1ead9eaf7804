// src/core/storage/mod.rs

//! C2: the chunked body store. A body is a singly-linked chain of chunks,
//! each a contiguous raw allocation from a stevedore; the chain is appended
//! to as bytes arrive from the origin and walked by consumers as bytes are
//! delivered downstream (spec §3, §4.2).

pub mod body;
pub mod chunk;
pub mod lru;

pub use body::{Body, BodyIterError, IterStep};
pub use chunk::Chunk;
