//! Breadth-first frontier: a FIFO of reserved-but-unfetched URLs. The
//! de-dup set is the Result Store's fingerprint table, so `enqueue` and
//! `reserve` cannot disagree about who fetches a URL.

pub mod scope;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::debug;

use siteaudit_core::{Fingerprint, FoundUrl, SkipReason};
use siteaudit_store::ResultStore;

pub use scope::{ScopeDecision, ScopeFilter};

#[derive(Debug, Clone)]
pub struct QueuedUrl {
    pub found: FoundUrl,
    pub depth: u32,
}

/// What happened to an enqueue attempt. Duplicates are dropped silently;
/// skips are recorded in the store's skip log by the frontier itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued(Fingerprint),
    Duplicate,
    Skipped(SkipReason),
}

pub struct Frontier {
    store: Arc<ResultStore>,
    queue: Mutex<VecDeque<QueuedUrl>>,
    notify: Notify,
    /// 0 = seed only; negative = unlimited.
    max_depth: i32,
    max_urls: usize,
    stopped: AtomicBool,
}

impl Frontier {
    pub fn new(store: Arc<ResultStore>, max_depth: i32, max_urls: usize) -> Self {
        Self {
            store,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            max_depth,
            max_urls,
            stopped: AtomicBool::new(false),
        }
    }

    /// Reserve and queue a candidate. Exactly one of three things happens:
    /// the URL is queued (this caller reserved it), dropped as a duplicate,
    /// or skipped with a recorded reason.
    pub fn enqueue(&self, found: FoundUrl, depth: u32) -> Enqueue {
        if self.max_depth >= 0 && depth > self.max_depth as u32 {
            self.store.record_skip(
                found.url.clone(),
                SkipReason::TooDeep,
                found.source_fingerprint,
                found.source_attr,
            );
            return Enqueue::Skipped(SkipReason::TooDeep);
        }
        if self.store.reserved_count() >= self.max_urls {
            self.store.record_skip(
                found.url.clone(),
                SkipReason::MaxUrlsReached,
                found.source_fingerprint,
                found.source_attr,
            );
            return Enqueue::Skipped(SkipReason::MaxUrlsReached);
        }
        let (fp, newly) = self.store.reserve(&found.url);
        if !newly {
            return Enqueue::Duplicate;
        }
        debug!(url = %found.url, depth, fingerprint = %fp, "queued");
        self.lock_queue().push_back(QueuedUrl { found, depth });
        self.notify.notify_one();
        Enqueue::Queued(fp)
    }

    /// Non-blocking FIFO pop; `None` once stopped or empty.
    pub fn try_pop(&self) -> Option<QueuedUrl> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        self.lock_queue().pop_front()
    }

    /// Park until another worker queues a URL or signals completion. Callers
    /// re-check the queue after waking; wakeups may be spurious.
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    /// Wake every parked worker (work arrived, a fetch finished, or the pool
    /// is shutting down).
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Refuse further dequeues; queued items stay for `drain`.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Remove and return everything still queued (used after an interrupt to
    /// account for reserved-but-unfetched URLs).
    pub fn drain(&self) -> Vec<QueuedUrl> {
        self.lock_queue().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<QueuedUrl>> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
