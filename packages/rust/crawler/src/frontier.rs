//! Per-run work queue of crawl targets.
//!
//! The frontier is a mutex-guarded priority queue with a per-run dedup set.
//! Workers take targets through [`Frontier::dequeue`], which hands out a
//! [`Lease`]; dropping the lease marks the target complete. A dequeue waits
//! while the queue is empty but leases are outstanding, because the holders
//! may still discover more work.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use url::Url;

use lexcrawl_shared::{DocId, TargetKind, canonicalize_url};

use crate::scope::priority_score;

// ---------------------------------------------------------------------------
// CrawlTarget
// ---------------------------------------------------------------------------

/// A unit of crawl work. Consumed exactly once per run; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    /// Canonical URL.
    pub url: Url,
    pub kind: TargetKind,
    pub source_id: String,
    pub depth: u32,
    pub parent: Option<Url>,
    pub priority: i64,
}

impl CrawlTarget {
    /// Build a target, canonicalizing `url` and computing its priority.
    pub fn new(
        url: &Url,
        kind: TargetKind,
        source_id: impl Into<String>,
        depth: u32,
        parent: Option<Url>,
    ) -> Self {
        let url = canonicalize_url(url);
        let priority = priority_score(&url, depth, kind);
        Self {
            url,
            kind,
            source_id: source_id.into(),
            depth,
            parent,
            priority,
        }
    }

    /// Document identity of this target.
    pub fn doc_id(&self) -> DocId {
        DocId::from_url(&self.url)
    }
}

/// Result of [`Frontier::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The identity was already accepted this run.
    Duplicate,
    DepthExceeded,
    /// `max_targets` targets were already accepted.
    CapacityReached,
    Closed,
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

struct Entry {
    seq: u64,
    target: CrawlTarget,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap: invert so the lowest score, then the
    // earliest insertion, pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .target
            .priority
            .cmp(&self.target.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Entry>,
    seen: HashSet<String>,
    next_seq: u64,
    in_flight: usize,
    closed: bool,
}

/// Ordered, deduplicated work queue for one run.
pub struct Frontier {
    state: Mutex<State>,
    notify: Notify,
    max_depth: u32,
    max_targets: usize,
}

impl Frontier {
    pub fn new(max_depth: u32, max_targets: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            max_depth,
            max_targets,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a target unless it was seen, exceeds the bounds, or the frontier
    /// is closed.
    pub fn enqueue(&self, target: CrawlTarget) -> EnqueueOutcome {
        let mut state = self.lock();
        if state.closed {
            return EnqueueOutcome::Closed;
        }
        let identity = target.url.as_str();
        if state.seen.contains(identity) {
            return EnqueueOutcome::Duplicate;
        }
        if target.depth > self.max_depth {
            return EnqueueOutcome::DepthExceeded;
        }
        if state.seen.len() >= self.max_targets {
            return EnqueueOutcome::CapacityReached;
        }

        state.seen.insert(identity.to_string());
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry { seq, target });
        drop(state);

        self.notify.notify_waiters();
        EnqueueOutcome::Queued
    }

    /// Take the next target. Returns `None` once the frontier is drained or
    /// closed.
    pub async fn dequeue(self: &Arc<Self>) -> Option<Lease> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a wake-up between check and await
            // is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(entry) = state.heap.pop() {
                    state.in_flight += 1;
                    return Some(Lease {
                        frontier: Arc::clone(self),
                        target: entry.target,
                    });
                }
                if state.in_flight == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Queue empty and no leases outstanding.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.heap.is_empty() && state.in_flight == 0
    }

    /// Stop handing out work and reject further enqueues.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Targets waiting in the queue.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Distinct identities accepted this run.
    pub fn accepted(&self) -> usize {
        self.lock().seen.len()
    }

    fn complete(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }
}

/// A dequeued target marked in flight until dropped.
pub struct Lease {
    frontier: Arc<Frontier>,
    target: CrawlTarget,
}

impl Lease {
    pub fn target(&self) -> &CrawlTarget {
        &self.target
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("target", &self.target).finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.frontier.complete();
    }
}
