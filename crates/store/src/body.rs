use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use tempfile::TempDir;
use tracing::warn;

use siteaudit_core::Fingerprint;

/// Body bytes keyed by fingerprint. Bodies live in memory until the
/// configured budget is exhausted, then spill to a process-lifetime temp
/// directory. Readers never see the difference.
pub(crate) struct BodyStore {
    mem: DashMap<Fingerprint, Vec<u8>>,
    mem_bytes: AtomicU64,
    budget: u64,
    spill_dir: Mutex<Option<TempDir>>,
    spilled: DashMap<Fingerprint, PathBuf>,
}

impl BodyStore {
    pub(crate) fn new(budget: u64) -> Self {
        Self {
            mem: DashMap::new(),
            mem_bytes: AtomicU64::new(0),
            budget,
            spill_dir: Mutex::new(None),
            spilled: DashMap::new(),
        }
    }

    pub(crate) fn put(&self, fp: Fingerprint, bytes: Vec<u8>) {
        let len = bytes.len() as u64;
        let before = self.mem_bytes.fetch_add(len, Ordering::SeqCst);
        if before + len <= self.budget {
            self.mem.insert(fp, bytes);
            return;
        }
        self.mem_bytes.fetch_sub(len, Ordering::SeqCst);
        match self.spill(fp, &bytes) {
            Ok(path) => {
                self.spilled.insert(fp, path);
            }
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "body spill failed, keeping in memory");
                self.mem_bytes.fetch_add(len, Ordering::SeqCst);
                self.mem.insert(fp, bytes);
            }
        }
    }

    fn spill(&self, fp: Fingerprint, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let mut guard = self
            .spill_dir
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            *guard = Some(tempfile::Builder::new().prefix("siteaudit-bodies-").tempdir()?);
        }
        let dir = guard.as_ref().map(|d| d.path().to_path_buf());
        drop(guard);
        let path = dir
            .ok_or_else(|| std::io::Error::other("spill dir unavailable"))?
            .join(fp.as_hex());
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    pub(crate) fn get(&self, fp: &Fingerprint) -> Option<Vec<u8>> {
        if let Some(bytes) = self.mem.get(fp) {
            return Some(bytes.clone());
        }
        let path = self.spilled.get(fp)?.clone();
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "spilled body unreadable");
                None
            }
        }
    }

    pub(crate) fn contains(&self, fp: &Fingerprint) -> bool {
        self.mem.contains_key(fp) || self.spilled.contains_key(fp)
    }

    pub(crate) fn stored_count(&self) -> usize {
        self.mem.len() + self.spilled.len()
    }
}
