// src/core/iter.rs

//! Walking a body's chunk chain for delivery to a consumer (spec §4.2
//! `sml_iterator`). Two shapes exist, matched by whether a BOC is present:
//!
//! - No BOC: the body is already complete, so this is a plain walk of
//!   every chunk, flushing each one and marking the last.
//! - A live BOC: the body may still be growing. Once the walk catches up
//!   to the chunk currently being extended, it blocks on
//!   `Boc::wait_for_extend` rather than returning early, resuming as soon
//!   as either more bytes land or the fetch reaches a terminal state.

use crate::core::errors::CoreError;
use crate::core::object::boc::{Boc, WaitOutcome};
use crate::core::storage::body::{Body, IterStep};
use std::sync::Arc;
use std::time::Duration;

/// Walk `body`, calling `visit` with each newly-available slice in order.
/// `boc` is `None` once the body is finished and immutable; `digest_hex` is
/// only used to annotate errors.
pub fn iter_body(
    body: &Body,
    boc: Option<&Arc<Boc>>,
    digest_hex: &str,
    timeout: Duration,
    mut visit: impl FnMut(IterStep),
) -> Result<(), CoreError> {
    let mut chunk_idx = 0usize;
    let mut delivered_in_chunk = 0usize;

    loop {
        let total_chunks = body.chunk_count();

        if chunk_idx >= total_chunks {
            let Some(boc) = boc else {
                if chunk_idx == 0 {
                    // A finished, zero-length body: no chunk ever existed,
                    // but the consumer must still see a single terminal
                    // call (spec §8 "Zero-length body" boundary case).
                    visit(IterStep {
                        data: &[],
                        flush: true,
                        last: true,
                    });
                }
                return Ok(());
            };
            let have = body.total_len() as u64;
            match boc.wait_for_extend(have, timeout) {
                WaitOutcome::MoreData(_) => continue,
                WaitOutcome::Done(_) => return Ok(()),
                WaitOutcome::Failed => {
                    return Err(CoreError::FetchFailed {
                        digest: digest_hex.to_string(),
                    });
                }
                WaitOutcome::TimedOut => {
                    return Err(CoreError::WaitTimeout {
                        digest: digest_hex.to_string(),
                    });
                }
            }
        }

        let is_growing_chunk = boc.is_some() && chunk_idx == total_chunks - 1;
        let chunk_len = body.with_chunk(chunk_idx, |data| data.len()).unwrap_or(0);

        if delivered_in_chunk < chunk_len {
            body.with_chunk(chunk_idx, |data| {
                let slice = &data[delivered_in_chunk..];
                let last = !is_growing_chunk && chunk_idx == total_chunks - 1;
                visit(IterStep {
                    data: slice,
                    flush: true,
                    last,
                });
            });
            delivered_in_chunk = chunk_len;
        }

        if !is_growing_chunk {
            chunk_idx += 1;
            delivered_in_chunk = 0;
        } else {
            // The last chunk may still grow further; wait for it to, or
            // for the fetch to finish, before re-checking.
            match boc.unwrap().wait_for_extend(body.total_len() as u64, timeout) {
                WaitOutcome::MoreData(_) => {}
                WaitOutcome::Done(_) => {
                    chunk_idx += 1;
                    delivered_in_chunk = 0;
                }
                WaitOutcome::Failed => {
                    return Err(CoreError::FetchFailed {
                        digest: digest_hex.to_string(),
                    });
                }
                WaitOutcome::TimedOut => {
                    return Err(CoreError::WaitTimeout {
                        digest: digest_hex.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::body::ChunkPolicy;
    use crate::core::stevedore::memory::MemoryStevedore;
    use std::thread;

    fn body() -> Body {
        Body::new(
            Arc::new(MemoryStevedore::new("a")),
            ChunkPolicy {
                max_chunk_size: 4,
                min_chunk_size: 4,
                less_ok: true,
            },
        )
    }

    #[test]
    fn zero_length_finished_body_delivers_one_terminal_empty_call() {
        let b = body();
        let mut calls = 0;
        iter_body(&b, None, "d", Duration::from_secs(1), |step| {
            calls += 1;
            assert!(step.data.is_empty());
            assert!(step.last);
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn iterates_a_finished_body_with_no_boc() {
        let b = body();
        b.extend(b"ABCDEFGH").unwrap();
        let mut collected = Vec::new();
        iter_body(&b, None, "deadbeef", Duration::from_secs(1), |step| {
            collected.extend_from_slice(step.data);
            if step.last {
                collected.push(b'$');
            }
        })
        .unwrap();
        assert_eq!(collected, b"ABCDEFGH$");
    }

    #[test]
    fn blocks_on_growing_body_until_extended_then_finished() {
        let b = Arc::new(body());
        let boc = Arc::new(Boc::new());
        b.extend(b"AB").unwrap();
        boc.extend_notify(2);

        let b2 = b.clone();
        let boc2 = boc.clone();
        let handle = thread::spawn(move || {
            let mut collected = Vec::new();
            iter_body(&b2, Some(&boc2), "d", Duration::from_secs(5), |step| {
                collected.extend_from_slice(step.data);
            })
            .unwrap();
            collected
        });

        thread::sleep(Duration::from_millis(20));
        b.extend(b"CD").unwrap();
        boc.extend_notify(4);
        thread::sleep(Duration::from_millis(20));
        boc.set_state(crate::core::object::boc::BocState::Finished);

        let collected = handle.join().unwrap();
        assert_eq!(collected, b"ABCD");
    }

    #[test]
    fn failed_boc_surfaces_as_fetch_failed_error() {
        let b = body();
        let boc = Arc::new(Boc::new());
        boc.set_state(crate::core::object::boc::BocState::Failed);
        let err = iter_body(&b, Some(&boc), "d", Duration::from_secs(1), |_| {}).unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed { .. }));
    }
}
