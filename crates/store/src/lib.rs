//! The Result Store: the one legitimately shared-mutable piece of state.
//! Frontier, fetch workers, and analyzers all read and write it
//! concurrently; locking is fine-grained (per-shard maps plus short
//! critical sections for the ordered collections).

mod body;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use url::Url;

use siteaudit_core::{
    url as urlmod, Fingerprint, SkippedUrl, SourceAttr, SummaryItem, SummaryStatus, SuperTable,
    UrlAnalysis, VisitedUrl,
};

use body::BodyStore;

struct Record {
    url: Url,
    visited: Option<VisitedUrl>,
    extras_set: bool,
}

#[derive(Default)]
struct SummaryInner {
    order: Vec<String>,
    items: HashMap<String, SummaryItem>,
}

pub struct ResultStore {
    records: DashMap<Fingerprint, Record>,
    commit_order: Mutex<Vec<Fingerprint>>,
    reserved: AtomicUsize,
    bodies: BodyStore,
    analyses: DashMap<Fingerprint, Vec<(String, UrlAnalysis)>>,
    summary: Mutex<SummaryInner>,
    tables: Mutex<Vec<SuperTable>>,
    skipped: Mutex<Vec<SkippedUrl>>,
}

impl ResultStore {
    pub fn new(body_memory_budget: u64) -> Self {
        Self {
            records: DashMap::new(),
            commit_order: Mutex::new(Vec::new()),
            reserved: AtomicUsize::new(0),
            bodies: BodyStore::new(body_memory_budget),
            analyses: DashMap::new(),
            summary: Mutex::new(SummaryInner::default()),
            tables: Mutex::new(Vec::new()),
            skipped: Mutex::new(Vec::new()),
        }
    }

    /// Atomically claim a URL for fetching. The single serialization point
    /// guaranteeing at-most-one fetch per fingerprint: only the call that
    /// returns `true` may fetch.
    pub fn reserve(&self, url: &Url) -> (Fingerprint, bool) {
        let fp = urlmod::fingerprint(url);
        let mut newly = false;
        self.records.entry(fp).or_insert_with(|| {
            newly = true;
            Record {
                url: url.clone(),
                visited: None,
                extras_set: false,
            }
        });
        if newly {
            self.reserved.fetch_add(1, Ordering::SeqCst);
        }
        (fp, newly)
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.load(Ordering::SeqCst)
    }

    /// Record a fetch outcome. Exactly once per fingerprint; violations are
    /// implementation bugs and abort the process.
    pub fn commit(&self, visited: VisitedUrl) {
        let fp = visited.fingerprint;
        {
            let mut record = self
                .records
                .get_mut(&fp)
                .unwrap_or_else(|| panic!("commit for unreserved fingerprint {fp}"));
            if record.visited.is_some() {
                panic!("fingerprint {fp} committed twice");
            }
            record.visited = Some(visited);
        }
        let mut order = lock(&self.commit_order);
        order.push(fp);
    }

    /// Store body bytes for a committed fingerprint.
    pub fn put_body(&self, fp: Fingerprint, bytes: Vec<u8>) {
        let record = self
            .records
            .get(&fp)
            .unwrap_or_else(|| panic!("body for unreserved fingerprint {fp}"));
        if record.visited.is_none() {
            panic!("body for uncommitted fingerprint {fp}");
        }
        drop(record);
        self.bodies.put(fp, bytes);
    }

    pub fn get_body(&self, fp: &Fingerprint) -> Option<Vec<u8>> {
        self.bodies.get(fp)
    }

    pub fn has_body(&self, fp: &Fingerprint) -> bool {
        self.bodies.contains(fp)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.stored_count()
    }

    /// Extras are written once per visited URL, during extraction.
    pub fn set_extras(&self, fp: Fingerprint, extras: HashMap<String, String>) {
        let mut record = self
            .records
            .get_mut(&fp)
            .unwrap_or_else(|| panic!("extras for unreserved fingerprint {fp}"));
        if record.extras_set {
            panic!("extras for fingerprint {fp} set twice");
        }
        record.extras_set = true;
        if let Some(visited) = record.visited.as_mut() {
            visited.extras = extras;
        }
    }

    pub fn url_of(&self, fp: &Fingerprint) -> Option<Url> {
        self.records.get(fp).map(|r| r.url.clone())
    }

    pub fn get_visited(&self, fp: &Fingerprint) -> Option<VisitedUrl> {
        self.records.get(fp).and_then(|r| r.visited.clone())
    }

    /// Snapshot of all committed records, in commit order.
    pub fn visited(&self) -> Vec<VisitedUrl> {
        let order = lock(&self.commit_order).clone();
        order
            .iter()
            .filter_map(|fp| self.records.get(fp).and_then(|r| r.visited.clone()))
            .collect()
    }

    pub fn visited_count(&self) -> usize {
        lock(&self.commit_order).len()
    }

    pub fn put_analysis(&self, fp: Fingerprint, analyzer: &str, result: UrlAnalysis) {
        self.analyses
            .entry(fp)
            .or_default()
            .push((analyzer.to_string(), result));
    }

    pub fn analyses_of(&self, fp: &Fingerprint) -> Vec<(String, UrlAnalysis)> {
        self.analyses
            .get(fp)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Add a summary item; codes are unique, last write wins but keeps the
    /// original position.
    pub fn add_summary(&self, item: SummaryItem) {
        let mut summary = lock(&self.summary);
        if !summary.items.contains_key(&item.code) {
            summary.order.push(item.code.clone());
        }
        summary.items.insert(item.code.clone(), item);
    }

    /// Items sorted worst-severity first, insertion order within a severity.
    pub fn summary_items(&self) -> Vec<SummaryItem> {
        let summary = lock(&self.summary);
        let mut items: Vec<SummaryItem> = summary
            .order
            .iter()
            .filter_map(|code| summary.items.get(code).cloned())
            .collect();
        items.sort_by_key(|item| item.status.rank());
        items
    }

    pub fn summary_counts(&self) -> HashMap<SummaryStatus, usize> {
        let summary = lock(&self.summary);
        let mut counts = HashMap::new();
        for item in summary.items.values() {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn prepend_table(&self, table: SuperTable) {
        lock(&self.tables).insert(0, table);
    }

    pub fn append_table(&self, table: SuperTable) {
        lock(&self.tables).push(table);
    }

    pub fn table_by_code(&self, code: &str) -> Option<SuperTable> {
        lock(&self.tables).iter().find(|t| t.code == code).cloned()
    }

    pub fn tables(&self) -> Vec<SuperTable> {
        lock(&self.tables).clone()
    }

    pub fn record_skip(
        &self,
        url: Url,
        reason: siteaudit_core::SkipReason,
        source_fingerprint: Option<Fingerprint>,
        source_attr: SourceAttr,
    ) {
        lock(&self.skipped).push(SkippedUrl {
            url,
            reason,
            source_fingerprint,
            source_attr,
        });
    }

    pub fn skipped(&self) -> Vec<SkippedUrl> {
        lock(&self.skipped).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use siteaudit_core::{CacheFlags, ContentTypeId, SkipReason};

    fn visited(url: &Url, status: i32) -> VisitedUrl {
        VisitedUrl {
            fingerprint: urlmod::fingerprint(url),
            url: url.clone(),
            source_fingerprint: None,
            source_attr: SourceAttr::AHref,
            status,
            content_type: ContentTypeId::Html,
            content_type_header: Some("text/html".to_string()),
            size: 10,
            request_time_ms: 5,
            cache_lifetime: None,
            cache_flags: CacheFlags::default(),
            is_external: false,
            is_allowed_for_crawling: true,
            extras: HashMap::new(),
            fetched_at: chrono::Utc::now(),
        }
    }

    fn parse(raw: &str) -> Url {
        urlmod::canonicalize(raw).expect("test url parses")
    }

    #[test]
    fn reserve_deduplicates_canonical_equals() {
        let store = ResultStore::new(1024);
        let a = parse("https://example.com/page#one");
        let b = parse("https://example.com/page#two");
        let (fp_a, newly_a) = store.reserve(&a);
        let (fp_b, newly_b) = store.reserve(&b);
        assert_eq!(fp_a, fp_b);
        assert!(newly_a);
        assert!(!newly_b);
        assert_eq!(store.reserved_count(), 1);
    }

    #[test]
    fn concurrent_reserve_yields_one_winner() {
        let store = Arc::new(ResultStore::new(1024));
        let url = parse("https://example.com/contended");
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let url = url.clone();
            handles.push(std::thread::spawn(move || store.reserve(&url).1));
        }
        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread joins"))
            .filter(|newly| *newly)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    #[should_panic(expected = "committed twice")]
    fn double_commit_panics() {
        let store = ResultStore::new(1024);
        let url = parse("https://example.com/");
        store.reserve(&url);
        store.commit(visited(&url, 200));
        store.commit(visited(&url, 200));
    }

    #[test]
    #[should_panic(expected = "unreserved fingerprint")]
    fn commit_without_reserve_panics() {
        let store = ResultStore::new(1024);
        let url = parse("https://example.com/");
        store.commit(visited(&url, 200));
    }

    #[test]
    fn visited_snapshot_in_commit_order() {
        let store = ResultStore::new(1024);
        for path in ["/c", "/a", "/b"] {
            let url = parse(&format!("https://example.com{path}"));
            store.reserve(&url);
            store.commit(visited(&url, 200));
        }
        let paths: Vec<String> = store
            .visited()
            .iter()
            .map(|v| v.url.path().to_string())
            .collect();
        assert_eq!(paths, vec!["/c", "/a", "/b"]);
    }

    #[test]
    fn extras_written_once_and_visible() {
        let store = ResultStore::new(1024);
        let url = parse("https://example.com/");
        let (fp, _) = store.reserve(&url);
        store.commit(visited(&url, 200));
        let mut extras = HashMap::new();
        extras.insert("Title".to_string(), "Home".to_string());
        store.set_extras(fp, extras);
        let snapshot = store.visited();
        assert_eq!(snapshot[0].extras.get("Title").map(String::as_str), Some("Home"));
    }

    #[test]
    #[should_panic(expected = "set twice")]
    fn extras_twice_panics() {
        let store = ResultStore::new(1024);
        let url = parse("https://example.com/");
        let (fp, _) = store.reserve(&url);
        store.commit(visited(&url, 200));
        store.set_extras(fp, HashMap::new());
        store.set_extras(fp, HashMap::new());
    }

    #[test]
    fn analyses_accumulate_per_fingerprint() {
        let store = ResultStore::new(1024);
        let url = parse("https://ex.com/");
        let (fp, _) = store.reserve(&url);
        store.commit(visited(&url, 200));
        let mut first = UrlAnalysis::default();
        first.warning("title", "missing title");
        store.put_analysis(fp, "seo", first);
        let mut second = UrlAnalysis::default();
        second.ok("csp", "present");
        store.put_analysis(fp, "security", second);

        let analyses = store.analyses_of(&fp);
        assert_eq!(analyses.len(), 2);
        assert_eq!(analyses[0].0, "seo");
        assert_eq!(analyses[1].0, "security");
        assert!(store.analyses_of(&urlmod::fingerprint(&parse("https://ex.com/x"))).is_empty());
    }

    #[test]
    fn summary_last_write_wins_keeps_position() {
        let store = ResultStore::new(1024);
        store.add_summary(SummaryItem {
            code: "x".to_string(),
            message: "first".to_string(),
            status: SummaryStatus::Ok,
        });
        store.add_summary(SummaryItem {
            code: "y".to_string(),
            message: "second".to_string(),
            status: SummaryStatus::Ok,
        });
        store.add_summary(SummaryItem {
            code: "x".to_string(),
            message: "replaced".to_string(),
            status: SummaryStatus::Ok,
        });
        let items = store.summary_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].code, "x");
        assert_eq!(items[0].message, "replaced");
    }

    #[test]
    fn summary_sorted_worst_first() {
        let store = ResultStore::new(1024);
        store.add_summary(SummaryItem {
            code: "fine".to_string(),
            message: String::new(),
            status: SummaryStatus::Ok,
        });
        store.add_summary(SummaryItem {
            code: "bad".to_string(),
            message: String::new(),
            status: SummaryStatus::Critical,
        });
        let items = store.summary_items();
        assert_eq!(items[0].code, "bad");
        assert_eq!(store.summary_counts().get(&SummaryStatus::Critical), Some(&1));
    }

    #[test]
    fn tables_prepend_append_lookup() {
        let store = ResultStore::new(1024);
        store.append_table(SuperTable::new("b", "B", vec![]));
        store.prepend_table(SuperTable::new("a", "A", vec![]));
        let tables = store.tables();
        assert_eq!(tables[0].code, "a");
        assert_eq!(tables[1].code, "b");
        assert!(store.table_by_code("b").is_some());
        assert!(store.table_by_code("zzz").is_none());
    }

    #[test]
    fn skip_log_snapshot() {
        let store = ResultStore::new(1024);
        store.record_skip(
            parse("https://other.example/"),
            SkipReason::DisallowedExternal,
            None,
            SourceAttr::AHref,
        );
        let skipped = store.skipped();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].reason, SkipReason::DisallowedExternal);
    }
}
