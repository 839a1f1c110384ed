//! Single-writer / many-reader snapshot publication (§4.3).
//!
//! The collection loop is the only writer; any number of readers take a
//! handle to the current snapshot without blocking it. `tokio::sync::watch`
//! already provides exactly this shape — a single "current value" cell plus
//! a change notification every receiver can await — so publication is a thin
//! wrapper around it rather than a bespoke primitive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;

use crate::model::Snapshot;

/// Owns the current snapshot and the export flag. Constructed once by
/// whatever assembles the collection loop; `subscribe()` hands out readers.
pub struct SnapshotPublisher {
    tx: watch::Sender<Arc<Snapshot>>,
    /// Set by `mark_exported`, observed and cleared by the writer at the
    /// start of the next tick (§4.2, §4.3).
    exported: AtomicBool,
}

impl SnapshotPublisher {
    /// Starts with the implicit empty pre-first-tick snapshot (§4.1).
    pub fn new(now: SystemTime) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Snapshot::empty(now)));
        Self {
            tx,
            exported: AtomicBool::new(false),
        }
    }

    /// Swaps in a newly-computed snapshot and wakes every receiver awaiting
    /// a change. Non-blocking (§4.4, suspension point (c)).
    pub fn publish(&self, snapshot: Snapshot) {
        // send_replace always succeeds even with no receivers left; the
        // publisher does not care whether anyone is currently listening.
        self.tx.send_replace(Arc::new(snapshot));
    }

    /// `Current()`: a non-blocking, shareable handle to the latest snapshot.
    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// `DataChannel()`: a fresh receiver that yields whenever a new snapshot
    /// is published. Readers await `changed()` rather than polling.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    /// `MarkExported()`. Idempotent: calling it twice before the next tick
    /// observes it has the same effect as calling it once.
    pub fn mark_exported(&self) {
        self.exported.store(true, Ordering::Release);
    }

    /// Observes and clears the export flag in one step. Called by the
    /// writer at the start of each tick; if it returns `true`, the
    /// terminated tracker is cleared for this tick.
    pub fn take_exported(&self) -> bool {
        self.exported.swap(false, Ordering::AcqRel)
    }
}

/// Implements the freshness contract of §4.3: returns a snapshot no older
/// than `max_age`, waiting on `rx` for at most `max_wait` if the current one
/// is stale. Returns whatever is current when `max_wait` elapses, even if
/// still stale — the core never forces a refresh.
pub async fn wait_for_fresh(rx: &mut watch::Receiver<Arc<Snapshot>>, max_age: Duration, max_wait: Duration) -> Arc<Snapshot> {
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        let snapshot = rx.borrow().clone();
        let age = SystemTime::now().duration_since(snapshot.timestamp).unwrap_or(Duration::ZERO);
        if age <= max_age {
            return snapshot;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return snapshot;
        }
        if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
            return rx.borrow().clone();
        }
    }
}
