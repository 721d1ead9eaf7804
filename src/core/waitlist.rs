// src/core/waitlist.rs

//! The condvar-based FIFO waiting list attached to each objhead (spec §4.4,
//! §5's first of the two suspension points). Requests that find a BUSY
//! object park here instead of spinning; the objcore that finishes the
//! fetch "rushes" a batch of them back off the list.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::core::metrics;

/// Why a parked request was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RushReason {
    /// The fetch finished successfully; go re-do the lookup.
    Unbusy,
    /// The fetch failed; go re-do the lookup and expect a MISS or a chance
    /// to become the new inserting request.
    Fail,
}

/// What a parked call resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    Rushed(RushReason),
    TimedOut,
}

struct Slot {
    id: u64,
    rushed: Option<RushReason>,
}

struct State {
    next_id: u64,
    queue: VecDeque<Slot>,
    /// Grows each time `rush` is called with fewer candidates than waiters,
    /// so a thundering-herd rush batch grows geometrically rather than
    /// waking exactly one request per completed fetch (spec §4.4 "rush").
    rush_exponent: u32,
}

/// A single objhead's FIFO of parked requests.
pub struct WaitList {
    state: Mutex<State>,
    cond: Condvar,
}

impl Default for WaitList {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitList {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 0,
                queue: VecDeque::new(),
                rush_exponent: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Park the calling thread until rushed or `timeout` elapses (`None`
    /// means wait indefinitely, though callers are expected to always pass
    /// a concrete deadline per spec §5 "Cancellation and timeouts").
    pub fn park(&self, timeout: Option<Duration>) -> ParkOutcome {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.queue.push_back(Slot { id, rushed: None });
            id
        };

        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock();
        loop {
            if let Some(pos) = state.queue.iter().position(|s| s.id == id) {
                if let Some(reason) = state.queue[pos].rushed {
                    state.queue.remove(pos);
                    return ParkOutcome::Rushed(reason);
                }
            } else {
                // Already removed by a rush that found no live slot; treat
                // as a benign timeout rather than panicking.
                return ParkOutcome::TimedOut;
            }
            match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        state.queue.retain(|s| s.id != id);
                        metrics::WAITLIST_TIMEOUT_TOTAL.inc();
                        return ParkOutcome::TimedOut;
                    }
                    self.cond.wait_for(&mut state, dl - now);
                }
                None => self.cond.wait(&mut state),
            }
        }
    }

    /// Wake the oldest `n` parked requests for `reason`, returning how many
    /// were actually woken (may be fewer than `n` if the list is shorter).
    /// Grows `rush_exponent` when the list empties, shrinks it back down
    /// otherwise, implementing the exponential-growth rush batching from
    /// spec §4.4.
    pub fn rush(&self, n: usize, reason: RushReason) -> usize {
        let mut state = self.state.lock();
        let batch = n.max(1 << state.rush_exponent);
        let mut woken = 0;
        for slot in state.queue.iter_mut() {
            if woken >= batch {
                break;
            }
            if slot.rushed.is_none() {
                slot.rushed = Some(reason);
                woken += 1;
            }
        }
        if state.queue.iter().all(|s| s.rushed.is_some()) {
            state.rush_exponent = state.rush_exponent.saturating_add(1);
        } else {
            state.rush_exponent = 0;
        }
        metrics::WAITLIST_RUSHED_TOTAL
            .with_label_values(&[match reason {
                RushReason::Unbusy => "unbusy",
                RushReason::Fail => "fail",
            }])
            .inc_by(woken as f64);
        drop(state);
        self.cond.notify_all();
        woken
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
