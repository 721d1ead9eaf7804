// src/core/object/boc.rs

//! The "business of caching" state machine attached to an objcore while its
//! body is still being filled by a fetch (spec §4.3, §5's second
//! suspension point). A BOC lets a streaming consumer block until either
//! more bytes land or the fetch reaches a terminal state, without polling.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Lifecycle of a body under construction. Named after, and narrower than,
/// the original's `BOS_*` states: the request-header and prep-stream
/// phases collapse into `Streaming` here since nothing in this port
/// distinguishes them once a BOC exists at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BocState {
    /// Allocated, no bytes fetched yet.
    Streaming,
    /// All bytes fetched and the body is final; chunk chain won't grow
    /// further.
    Finished,
    /// The fetch failed partway; whatever bytes landed are abandoned.
    Failed,
}

/// What a blocked consumer's wait resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The body grew past the length the caller already has.
    MoreData(u64),
    /// The body is complete at this length; no more will come.
    Done(u64),
    /// The fetch failed.
    Failed,
    TimedOut,
}

struct Inner {
    state: BocState,
    len_so_far: u64,
}

/// One fetch-in-progress's synchronization point. Owned by the objcore that
/// is being filled; dropped once the body reaches a terminal state and
/// every consumer has caught up (spec §4.3 `ObjBocDone`).
pub struct Boc {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Default for Boc {
    fn default() -> Self {
        Self::new()
    }
}

impl Boc {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BocState::Streaming,
                len_so_far: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn state(&self) -> BocState {
        self.inner.lock().state
    }

    pub fn len_so_far(&self) -> u64 {
        self.inner.lock().len_so_far
    }

    /// Record that the body grew to `new_len` and wake anyone blocked in
    /// `wait_for_extend`. `new_len` must never go backwards.
    pub fn extend_notify(&self, new_len: u64) {
        {
            let mut inner = self.inner.lock();
            debug_assert!(
                new_len >= inner.len_so_far,
                "body length must be monotonically non-decreasing"
            );
            inner.len_so_far = new_len;
        }
        self.cond.notify_all();
    }

    /// Move to a terminal state and wake everyone still waiting.
    pub fn set_state(&self, state: BocState) {
        {
            let mut inner = self.inner.lock();
            inner.state = state;
        }
        self.cond.notify_all();
    }

    /// Block until the body has grown past `have_len`, or reached a
    /// terminal state, or `timeout` elapses.
    pub fn wait_for_extend(&self, have_len: u64, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.len_so_far > have_len {
                return WaitOutcome::MoreData(inner.len_so_far);
            }
            match inner.state {
                BocState::Finished => return WaitOutcome::Done(inner.len_so_far),
                BocState::Failed => return WaitOutcome::Failed,
                BocState::Streaming => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            self.cond.wait_for(&mut inner, deadline - now);
        }
    }
}
