use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admission control in front of the fetcher: at most
/// `per_host_concurrency` in-flight requests per origin, plus an optional
/// global requests-per-second bucket shared by every worker.
pub struct FetchGate {
    per_host: DashMap<String, Arc<Semaphore>>,
    per_host_limit: usize,
    global: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl FetchGate {
    /// Reads `crawler.per_host_concurrency` and `crawler.max_req_per_sec`
    /// (0 = unlimited).
    pub fn new(per_host_limit: usize, max_req_per_sec: u32) -> Self {
        let global = NonZeroU32::new(max_req_per_sec)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));
        Self {
            per_host: DashMap::new(),
            per_host_limit: per_host_limit.max(1),
            global,
        }
    }

    /// Wait for a slot on this origin (and a global token, when capped).
    /// The returned permit releases the origin slot on drop.
    pub async fn acquire(&self, origin: &str) -> OwnedSemaphorePermit {
        let semaphore = self
            .per_host
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone();
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("per-host semaphore is never closed");
        if let Some(limiter) = &self.global {
            limiter.until_ready().await;
        }
        permit
    }

    pub fn tracked_hosts(&self) -> usize {
        self.per_host.len()
    }
}
