use tokio::sync::mpsc;
use url::Url;

use crate::types::{Fingerprint, SkipReason};

/// Structured progress records emitted while the crawl runs. One `Attempt`
/// per wire request, so retry sequences stay observable.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Attempt {
        fingerprint: Fingerprint,
        attempt: u32,
    },
    Fetched {
        fingerprint: Fingerprint,
        status: i32,
        bytes: u64,
        elapsed_ms: u64,
        in_flight: usize,
        reserved_total: usize,
    },
    Skipped {
        url: Url,
        reason: SkipReason,
    },
    Finalize {
        analyzer: &'static str,
        elapsed_ms: u64,
    },
}

/// Cloneable emitter; sending never blocks and a closed receiver is ignored.
#[derive(Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops everything, for tests and library callers.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
