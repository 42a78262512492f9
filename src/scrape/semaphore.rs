//! Priority-fair bounded semaphore gating all upstream I/O.
//!
//! Every network operation, pagination fetches and media downloads alike,
//! passes through one of these. Waiters are woken in descending priority
//! order: pagination requests use their page offset as priority, and the
//! downloads produced by a page inherit that offset, so work from later
//! pages outranks stale backlog and the pipeline keeps advancing instead of
//! draining old downloads first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

struct Waiter {
    priority: i64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap by priority; ties in heap order.
        self.priority.cmp(&other.priority)
    }
}

struct State {
    capacity: usize,
    allocated: usize,
    waiters: BinaryHeap<Waiter>,
}

/// Bounded counting semaphore whose wait queue is a max-heap keyed by a
/// caller-supplied priority (larger = earlier).
///
/// Clones share the same state. Permits are RAII: dropping a [`Permit`]
/// releases its slot and wakes the highest-priority waiters that fit.
/// Higher-priority arrivals may indefinitely delay strictly lower-priority
/// waiters; that is the point.
#[derive(Clone)]
pub struct PrioritySemaphore {
    inner: Arc<Mutex<State>>,
}

impl PrioritySemaphore {
    /// Create a semaphore admitting at most `capacity` concurrent permits.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "invalid capacity");
        Self {
            inner: Arc::new(Mutex::new(State {
                capacity,
                allocated: 0,
                waiters: BinaryHeap::new(),
            })),
        }
    }

    /// Acquire a permit, waiting behind any higher-priority waiters when the
    /// semaphore is full.
    ///
    /// The returned future is cancellation-safe: dropping it while enqueued
    /// leaves a dead entry in the heap that release skips over, so no
    /// capacity leaks.
    pub async fn acquire(&self, priority: i64) -> Permit {
        let rx = {
            let mut state = self.inner.lock();
            if state.allocated < state.capacity {
                state.allocated += 1;
                return Permit {
                    inner: Arc::clone(&self.inner),
                };
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(Waiter { priority, tx });
            rx
        };

        // The sender side only fires from a release that already counted our
        // slot; it cannot error while we are still awaiting it.
        let _ = rx.await;
        Permit {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of currently-held permits.
    pub fn allocated(&self) -> usize {
        self.inner.lock().allocated
    }

    /// Number of enqueued waiters (including abandoned ones not yet drained).
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

/// A held semaphore slot. Dropping it releases the slot.
pub struct Permit {
    inner: Arc<Mutex<State>>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.allocated -= 1;
        while state.allocated < state.capacity {
            let waiter = match state.waiters.pop() {
                Some(w) => w,
                None => break,
            };
            // A failed send means the acquirer went away; skip it without
            // consuming capacity.
            if waiter.tx.send(()).is_ok() {
                state.allocated += 1;
            }
        }
    }
}
