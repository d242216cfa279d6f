//! # Completion Barrier
//!
//! A wait-group used to block a phase until every worker has finished.
//!
//! Each participant holds a [`CompletionGuard`]. Dropping the guard releases
//! the participant, whatever the exit path: normal return, early `return`, or
//! a panic unwinding out of the worker's task. Release is tied to ownership,
//! not to a call at the end of the worker body.
//!
//! Workers call [`CompletionGuard::finish`] when their loop ran to the end.
//! A guard dropped without it is counted as a fault and reported by
//! [`CompletionBarrier::wait`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

struct Inner {
    remaining: watch::Sender<usize>,
    registered: AtomicUsize,
    faults: AtomicUsize,
}

/// Count-down barrier with guaranteed release.
#[derive(Clone)]
pub struct CompletionBarrier {
    inner: Arc<Inner>,
}

/// Summary returned once the barrier opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierReport {
    /// Guards handed out by [`CompletionBarrier::register`]
    pub participants: usize,
    pub faults: usize,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        let (remaining, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(Inner {
                remaining,
                registered: AtomicUsize::new(0),
                faults: AtomicUsize::new(0),
            }),
        }
    }

    /// Register one more participant and hand out its guard.
    ///
    /// All guards must be registered before [`wait`](Self::wait) is called,
    /// otherwise the barrier may open early.
    pub fn register(&self) -> CompletionGuard {
        self.inner.registered.fetch_add(1, Ordering::AcqRel);
        self.inner.remaining.send_modify(|n| *n += 1);
        CompletionGuard {
            inner: Arc::clone(&self.inner),
            finished: false,
        }
    }

    /// Participants that have not yet released.
    pub fn pending(&self) -> usize {
        *self.inner.remaining.borrow()
    }

    /// Block until every registered guard has been dropped.
    pub async fn wait(&self) -> BarrierReport {
        let mut rx = self.inner.remaining.subscribe();
        // The sender lives in `self.inner`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
        BarrierReport {
            participants: self.inner.registered.load(Ordering::Acquire),
            faults: self.inner.faults.load(Ordering::Acquire),
        }
    }
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases one participant of a [`CompletionBarrier`] when dropped.
pub struct CompletionGuard {
    inner: Arc<Inner>,
    finished: bool,
}

impl CompletionGuard {
    /// Mark the participant as having completed normally, then release it.
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.faults.fetch_add(1, Ordering::AcqRel);
            warn!("Worker exited without completing its workload");
        }
        self.inner
            .remaining
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}
