// tests/property/invariants_test.rs

//! Property-based tests for the chunk-chain and BOC invariants that must
//! hold regardless of how a body is built up.

use proptest::prelude::*;
use quaywatch::core::object::boc::Boc;
use quaywatch::core::storage::body::{Body, ChunkPolicy};
use quaywatch::core::stevedore::memory::MemoryStevedore;
use quaywatch::core::stevedore::{self, Stevedore};
use std::sync::Arc;

fn body_with(max_chunk_size: usize, min_chunk_size: usize, less_ok: bool) -> Body {
    Body::new(
        Arc::new(MemoryStevedore::new("prop")),
        ChunkPolicy {
            max_chunk_size,
            min_chunk_size,
            less_ok,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    /// The sum of every chunk's filled length always equals the total bytes
    /// ever pushed through `extend`, no matter how the writes are split up.
    #[test]
    fn chunk_lengths_sum_to_total_bytes_written(
        writes in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 0..20),
        max_chunk_size in 8usize..64,
    ) {
        let min_chunk_size = (max_chunk_size / 2).max(1);
        let body = body_with(max_chunk_size, min_chunk_size, true);

        let mut expected_len = 0usize;
        for chunk in &writes {
            body.extend(chunk).unwrap();
            expected_len += chunk.len();
        }

        prop_assert_eq!(body.total_len(), expected_len);
    }

    /// Every chunk but the last in the chain is completely full. With an
    /// uncapped backend and `min_chunk_size <= max_chunk_size`, `get_space`
    /// always allocates fresh chunks sized exactly `min_chunk_size` (since
    /// every request asks for just 1 more byte of headroom), so a
    /// non-terminal chunk's filled length must equal that size exactly.
    #[test]
    fn every_chunk_but_the_last_is_full(
        writes in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..200), 1..20),
        max_chunk_size in 8usize..64,
    ) {
        let min_chunk_size = (max_chunk_size / 2).max(1);
        let body = body_with(max_chunk_size, min_chunk_size, true);

        for chunk in &writes {
            body.extend(chunk).unwrap();
        }

        let count = body.chunk_count();
        for idx in 0..count.saturating_sub(1) {
            let filled = body.with_chunk(idx, |data| data.len()).unwrap();
            prop_assert_eq!(filled, min_chunk_size);
        }
    }

    /// A BOC's reported length-so-far only ever moves forward, regardless
    /// of how the producer batches its `extend_notify` calls.
    #[test]
    fn boc_len_so_far_is_monotonically_non_decreasing(
        extends in prop::collection::vec(1u64..500, 0..50),
    ) {
        let boc = Boc::new();
        let mut running = 0u64;
        let mut last_seen = 0u64;
        for delta in extends {
            running += delta;
            boc.extend_notify(running);
            let now = boc.len_so_far();
            prop_assert!(now >= last_seen);
            last_seen = now;
        }
        prop_assert_eq!(last_seen, running);
    }

    /// Against an uncapped backend, `stv_alloc` never fails: without
    /// `less_ok` it hands back exactly the requested size (or refuses if
    /// that exceeds `max_chunk_size`); with `less_ok` it clamps the request
    /// down to `max_chunk_size` and still succeeds on the first try, since
    /// the backend never runs out of room.
    #[test]
    fn stv_alloc_honors_its_size_contract(
        requested in 1usize..256,
        max_chunk_size in 8usize..128,
        less_ok in any::<bool>(),
    ) {
        let min_chunk_size = (max_chunk_size / 2).max(1);
        let stv = MemoryStevedore::new("prop-alloc");

        let got = stevedore::stv_alloc(&stv, requested, less_ok, max_chunk_size, min_chunk_size);

        if !less_ok {
            if requested > max_chunk_size {
                prop_assert!(got.is_none());
            } else {
                let raw = got.unwrap();
                prop_assert_eq!(raw.space, requested);
                stv.sml_free(raw);
            }
        } else {
            let raw = got.expect("an uncapped backend always satisfies a less_ok request");
            prop_assert_eq!(raw.space, requested.min(max_chunk_size));
            stv.sml_free(raw);
        }
    }
}
