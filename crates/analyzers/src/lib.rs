//! Analyzer framework: a static registry of plug-ins that see every fetched
//! resource and produce findings, tables and summary entries. Analyzers
//! share state only through the Result Store; per-URL hooks run on the
//! worker that fetched the page, finalize runs once after the frontier
//! drains.

pub mod accessibility;
pub mod best_practice;
pub mod caching;
pub mod content_type;
pub mod dns;
pub mod headers;
pub mod page404;
pub mod redirects;
pub mod security;
pub mod seo;
pub mod skipped;
pub mod source_domains;
pub mod timing;
pub mod tls;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use siteaudit_core::{
    row, AuditConfig, Column, CrawlError, ProgressEvent, ProgressSink, Severity, SortDirection,
    SummaryItem, SummaryStatus, SuperTable, UrlAnalysis, VisitedUrl,
};
use siteaudit_store::ResultStore;

/// Everything a per-URL hook may look at. The DOM is the same lenient parse
/// the extractor used; headers are the raw response headers.
pub struct PageView<'a> {
    pub visited: &'a VisitedUrl,
    pub body: Option<&'a [u8]>,
    pub dom: Option<&'a Html>,
    pub headers: &'a [(String, String)],
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Finalize order, ascending.
    fn order(&self) -> i32 {
        100
    }

    /// Registration gate; inactive analyzers are dropped before the crawl.
    fn should_activate(&self, _cfg: &AuditConfig) -> bool {
        true
    }

    /// Explicit configuration hand-off. Each implementation documents the
    /// fields it reads.
    fn configure(&self, _cfg: &AuditConfig) {}

    /// Per-URL hook, called after extraction on the fetching worker. Errors
    /// become critical summary items; the crawl continues.
    fn on_fetched(&self, _page: &PageView<'_>) -> Result<Option<UrlAnalysis>> {
        Ok(None)
    }

    /// Run once after the crawl ends, in `order()` order.
    async fn finalize(&self, store: &ResultStore) -> Result<()>;

    /// Optional per-URL column hint for reporters.
    fn extra_column(&self) -> Option<Column> {
        None
    }
}

/// The static registry. Every analyzer the build knows about, in one place;
/// `analysis.analyzer_filter_regex` removes entries by name.
fn all_analyzers() -> Vec<Arc<dyn Analyzer>> {
    vec![
        Arc::new(dns::DnsAnalyzer::default()),
        Arc::new(tls::SslTlsAnalyzer::default()),
        Arc::new(security::SecurityAnalyzer::default()),
        Arc::new(redirects::RedirectsAnalyzer),
        Arc::new(page404::Page404Analyzer),
        Arc::new(timing::TimingAnalyzer::default()),
        Arc::new(seo::SeoAndOpenGraphAnalyzer::default()),
        Arc::new(best_practice::BestPracticeAnalyzer::default()),
        Arc::new(accessibility::AccessibilityAnalyzer::default()),
        Arc::new(headers::HeadersAnalyzer::default()),
        Arc::new(caching::CachingAnalyzer),
        Arc::new(content_type::ContentTypeAnalyzer),
        Arc::new(source_domains::SourceDomainsAnalyzer),
        Arc::new(skipped::SkippedUrlsAnalyzer),
    ]
}

/// Build the active analyzer set for this run: filter by regex, gate on
/// `should_activate`, hand each survivor the config.
pub fn build_registry(cfg: &AuditConfig) -> Result<Vec<Arc<dyn Analyzer>>, CrawlError> {
    let filter = match &cfg.analysis.analyzer_filter_regex {
        Some(pattern) => Some(
            Regex::new(pattern)
                .map_err(|e| CrawlError::Config(format!("bad analyzer filter {pattern:?}: {e}")))?,
        ),
        None => None,
    };
    let mut kept = Vec::new();
    for analyzer in all_analyzers() {
        if let Some(filter) = &filter {
            if filter.is_match(analyzer.name()) {
                info!(analyzer = analyzer.name(), "excluded by filter regex");
                continue;
            }
        }
        if !analyzer.should_activate(cfg) {
            continue;
        }
        analyzer.configure(cfg);
        kept.push(analyzer);
    }
    Ok(kept)
}

#[derive(Default, Clone)]
struct StatsEntry {
    on_fetched_calls: u64,
    total_micros: u64,
    max_micros: u64,
    /// Unique finding subjects per severity, de-duped by short hash.
    subjects: HashMap<Severity, HashSet<u64>>,
}

/// Drives the per-URL hooks and the finalize pass, with a fault boundary
/// around each call and per-analyzer timing counters.
pub struct AnalyzerRunner {
    analyzers: Vec<Arc<dyn Analyzer>>,
    stats: Mutex<HashMap<&'static str, StatsEntry>>,
}

impl AnalyzerRunner {
    pub fn new(cfg: &AuditConfig) -> Result<Self, CrawlError> {
        Ok(Self {
            analyzers: build_registry(cfg)?,
            stats: Mutex::new(HashMap::new()),
        })
    }

    pub fn analyzers(&self) -> &[Arc<dyn Analyzer>] {
        &self.analyzers
    }

    pub fn on_fetched(&self, store: &ResultStore, page: &PageView<'_>) {
        for analyzer in &self.analyzers {
            let started = Instant::now();
            let outcome = analyzer.on_fetched(page);
            let micros = started.elapsed().as_micros() as u64;
            match outcome {
                Ok(Some(result)) => {
                    self.record(analyzer.name(), micros, Some(&result));
                    if !result.is_empty() {
                        store.put_analysis(page.visited.fingerprint, analyzer.name(), result);
                    }
                }
                Ok(None) => self.record(analyzer.name(), micros, None),
                Err(e) => {
                    self.record(analyzer.name(), micros, None);
                    error!(analyzer = analyzer.name(), url = %page.visited.url, error = %e, "per-url analysis failed");
                    store.add_summary(SummaryItem {
                        code: analyzer.name().to_string(),
                        message: format!("{} failed on {}: {e}", analyzer.name(), page.visited.url),
                        status: SummaryStatus::Critical,
                    });
                }
            }
        }
    }

    pub async fn finalize(&self, store: &ResultStore, progress: &ProgressSink) {
        let mut ordered = self.analyzers.clone();
        ordered.sort_by_key(|a| a.order());
        for analyzer in ordered {
            let started = Instant::now();
            if let Err(e) = analyzer.finalize(store).await {
                error!(analyzer = analyzer.name(), error = %e, "finalize failed");
                store.add_summary(SummaryItem {
                    code: analyzer.name().to_string(),
                    message: format!("{} finalize failed: {e}", analyzer.name()),
                    status: SummaryStatus::Critical,
                });
            }
            let elapsed_ms = started.elapsed().as_millis() as u64;
            progress.emit(ProgressEvent::Finalize {
                analyzer: analyzer.name(),
                elapsed_ms,
            });
        }
        self.emit_stats_table(store);
    }

    fn record(&self, name: &'static str, micros: u64, result: Option<&UrlAnalysis>) {
        let mut stats = lock(&self.stats);
        let entry = stats.entry(name).or_default();
        entry.on_fetched_calls += 1;
        entry.total_micros += micros;
        entry.max_micros = entry.max_micros.max(micros);
        if let Some(result) = result {
            for finding in &result.findings {
                entry
                    .subjects
                    .entry(finding.severity)
                    .or_default()
                    .insert(subject_hash(&finding.message));
            }
        }
    }

    fn emit_stats_table(&self, store: &ResultStore) {
        let stats = lock(&self.stats).clone();
        let mut table = SuperTable::new(
            "analysis-stats",
            "Analyzer timing and findings",
            vec![
                Column::new("analyzer", "Analyzer"),
                Column::new("calls", "Per-URL calls"),
                Column::new("total_ms", "Total (ms)"),
                Column::new("max_ms", "Max (ms)"),
                Column::new("critical", "Critical"),
                Column::new("warning", "Warnings"),
                Column::new("notice", "Notices"),
                Column::new("ok", "OK"),
            ],
        )
        .sorted_by("total_ms", SortDirection::Desc);
        for analyzer in &self.analyzers {
            let entry = stats.get(analyzer.name()).cloned().unwrap_or_default();
            let count = |severity: Severity| {
                entry
                    .subjects
                    .get(&severity)
                    .map(HashSet::len)
                    .unwrap_or(0)
            };
            table.push_row(row! {
                "analyzer" => analyzer.name(),
                "calls" => entry.on_fetched_calls,
                "total_ms" => entry.total_micros / 1000,
                "max_ms" => entry.max_micros / 1000,
                "critical" => count(Severity::Critical),
                "warning" => count(Severity::Warning),
                "notice" => count(Severity::Notice),
                "ok" => count(Severity::Ok),
            });
        }
        table.sort_rows();
        store.append_table(table);
    }
}

/// Short content hash for subject de-duplication.
fn subject_hash(subject: &str) -> u64 {
    let digest = Sha256::digest(subject.as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::HashMap;

    use scraper::Html;
    use url::Url;

    use siteaudit_core::{url as urlmod, CacheFlags, ContentTypeId, SourceAttr, VisitedUrl};

    use crate::PageView;

    pub fn visited(raw: &str, status: i32, content_type: ContentTypeId) -> VisitedUrl {
        let url: Url = urlmod::canonicalize(raw).expect("test url parses");
        VisitedUrl {
            fingerprint: urlmod::fingerprint(&url),
            url,
            source_fingerprint: None,
            source_attr: SourceAttr::AHref,
            status,
            content_type,
            content_type_header: None,
            size: 1024,
            request_time_ms: 100,
            cache_lifetime: None,
            cache_flags: CacheFlags::default(),
            is_external: false,
            is_allowed_for_crawling: true,
            extras: HashMap::new(),
            fetched_at: chrono::Utc::now(),
        }
    }

    pub fn html_page(raw: &str, body: &str) -> (VisitedUrl, Html) {
        let v = visited(raw, 200, ContentTypeId::Html);
        (v, Html::parse_document(body))
    }

    pub fn page_view<'a>(
        visited: &'a VisitedUrl,
        dom: Option<&'a Html>,
        headers: &'a [(String, String)],
    ) -> PageView<'a> {
        PageView {
            visited,
            body: None,
            dom,
            headers,
        }
    }
}
