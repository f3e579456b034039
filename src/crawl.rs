use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use scraper::Html;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use siteaudit_analyzers::{AnalyzerRunner, PageView};
use siteaudit_core::{
    header_value, url as urlmod, AuditConfig, CacheFlags, ContentTypeId, FetchErrorKind,
    FetchOutcome, Fingerprint, FoundUrl, ProgressEvent, ProgressSink, SkipReason, SourceAttr,
    SummaryItem, SummaryStatus, UrlKind, VisitedUrl, STATUS_SKIPPED,
};
use siteaudit_extract::{self as extract, RawLink};
use siteaudit_fetch::{client, FetchGate, FetcherConfig, HttpFetcher, RobotsPolicy, RobotsVerdict};
use siteaudit_frontier::{Frontier, QueuedUrl, ScopeDecision, ScopeFilter};
use siteaudit_store::ResultStore;

pub struct AuditOutcome {
    pub store: Arc<ResultStore>,
    pub elapsed: Duration,
}

struct WorkerCtx {
    cfg: AuditConfig,
    store: Arc<ResultStore>,
    scope: Arc<ScopeFilter>,
    frontier: Arc<Frontier>,
    fetcher: Arc<HttpFetcher>,
    robots: Arc<RobotsPolicy>,
    gate: Arc<FetchGate>,
    analyzers: Arc<AnalyzerRunner>,
    progress: ProgressSink,
    in_flight: Arc<AtomicUsize>,
}

/// Run one audit: crawl from the seed until the frontier drains (or an
/// interrupt lands), then finalize every analyzer. The returned store holds
/// the full result: visited URLs, bodies, findings, tables, summary.
pub async fn run_audit(cfg: AuditConfig) -> Result<AuditOutcome> {
    let started = Instant::now();
    let seed = urlmod::canonicalize(&cfg.seed_url)?;
    if !urlmod::is_http(&seed) {
        anyhow::bail!("seed URL must be http or https: {seed}");
    }

    let store = Arc::new(ResultStore::new(cfg.limits.body_memory_budget_bytes));
    let scope = Arc::new(ScopeFilter::new(&seed, &cfg.scope)?);
    let frontier = Arc::new(Frontier::new(
        Arc::clone(&store),
        cfg.limits.max_depth,
        cfg.limits.max_urls,
    ));
    let fetcher = Arc::new(HttpFetcher::new(FetcherConfig::from_audit(&cfg))?);
    let robots = Arc::new(RobotsPolicy::new(
        &cfg.http.user_agent,
        cfg.http.respect_robots,
    )?);
    let gate = Arc::new(FetchGate::new(
        cfg.crawler.per_host_concurrency,
        cfg.crawler.max_req_per_sec,
    ));
    let analyzers = Arc::new(AnalyzerRunner::new(&cfg)?);

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let progress = ProgressSink::new(progress_tx);
    let progress_task = spawn_progress_logger(progress_rx);

    frontier.enqueue(
        FoundUrl {
            url: seed.clone(),
            source_fingerprint: None,
            source_attr: SourceAttr::Other,
            kind: UrlKind::Internal,
        },
        0,
    );

    let in_flight = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let interrupt_task = {
        let frontier = Arc::clone(&frontier);
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping crawl");
                frontier.stop();
                let _ = shutdown_tx.send(());
            }
        })
    };

    let ctx = Arc::new(WorkerCtx {
        cfg: cfg.clone(),
        store: Arc::clone(&store),
        scope,
        frontier: Arc::clone(&frontier),
        fetcher,
        robots,
        gate,
        analyzers: Arc::clone(&analyzers),
        progress: progress.clone(),
        in_flight,
    });

    let workers = cfg.crawler.workers.max(1);
    info!(workers, seed = %seed, "starting crawl");
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let ctx = Arc::clone(&ctx);
        let shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(worker_loop(ctx, worker_id, shutdown)));
    }
    for handle in handles {
        let _ = handle.await;
    }
    interrupt_task.abort();

    // Reserved but never dequeued (interrupt): account for every
    // reservation with a SKIPPED record.
    for queued in frontier.drain() {
        let fp = urlmod::fingerprint(&queued.found.url);
        store.commit(skipped_visited(fp, &queued));
    }

    info!(
        visited = store.visited_count(),
        reserved = store.reserved_count(),
        "crawl done, finalizing analyzers"
    );
    analyzers.finalize(&store, &progress).await;

    let elapsed = started.elapsed();
    let total_bytes: u64 = store.visited().iter().map(|v| v.size).sum();
    store.add_summary(SummaryItem {
        code: "crawl-totals".to_string(),
        message: format!(
            "{} URLs visited, {} bytes, {:.1} s",
            store.visited_count(),
            total_bytes,
            elapsed.as_secs_f64()
        ),
        status: SummaryStatus::Info,
    });

    drop(progress);
    drop(ctx);
    let _ = progress_task.await;

    Ok(AuditOutcome { store, elapsed })
}

async fn worker_loop(ctx: Arc<WorkerCtx>, worker_id: usize, mut shutdown: broadcast::Receiver<()>) {
    debug!(worker_id, "worker started");
    loop {
        if ctx.frontier.is_stopped() {
            break;
        }
        let Some(queued) = ctx.frontier.try_pop() else {
            if ctx.in_flight.load(Ordering::SeqCst) == 0 && ctx.frontier.is_empty() {
                // Nothing queued, nothing in flight: the crawl is over.
                ctx.frontier.wake_all();
                break;
            }
            tokio::select! {
                _ = ctx.frontier.wait_for_work() => {}
                _ = shutdown.recv() => {}
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
            continue;
        };
        ctx.in_flight.fetch_add(1, Ordering::SeqCst);
        process(&ctx, worker_id, queued, &mut shutdown).await;
        ctx.in_flight.fetch_sub(1, Ordering::SeqCst);
        ctx.frontier.wake_all();
    }
    debug!(worker_id, "worker finished");
}

async fn process(
    ctx: &WorkerCtx,
    worker_id: usize,
    queued: QueuedUrl,
    shutdown: &mut broadcast::Receiver<()>,
) {
    let url = queued.found.url.clone();
    let fp = urlmod::fingerprint(&url);
    let kind = queued.found.kind;
    let is_internal = !ctx.scope.is_external(&url);

    // Robots gates internal crawling; static externals are fetched as-is.
    if kind == UrlKind::Internal {
        match ctx.robots.check(&url).await {
            RobotsVerdict::Disallowed => {
                debug!(worker_id, url = %url, "disallowed by robots.txt");
                ctx.store.record_skip(
                    url.clone(),
                    SkipReason::RobotsTxt,
                    queued.found.source_fingerprint,
                    queued.found.source_attr,
                );
                ctx.progress.emit(ProgressEvent::Skipped {
                    url,
                    reason: SkipReason::RobotsTxt,
                });
                return;
            }
            RobotsVerdict::Unavailable => {
                ctx.store.add_summary(SummaryItem {
                    code: "robots-txt".to_string(),
                    message: "robots.txt could not be fetched; treating policy as allow-all"
                        .to_string(),
                    status: SummaryStatus::Notice,
                });
            }
            RobotsVerdict::Allowed => {}
        }
    }

    let origin = urlmod::origin_key(&url);
    let permit = ctx.gate.acquire(&origin).await;
    debug!(worker_id, url = %url, depth = queued.depth, "fetching");
    let fetch = ctx.fetcher.fetch(&url, is_internal, fp, &ctx.progress);
    tokio::pin!(fetch);
    let outcome = tokio::select! {
        outcome = &mut fetch => outcome,
        _ = shutdown.recv() => {
            // Interrupt: the request gets a short grace, then is dropped.
            let grace = Duration::from_secs(ctx.cfg.crawler.shutdown_grace_secs);
            match tokio::time::timeout(grace, &mut fetch).await {
                Ok(outcome) => outcome,
                Err(_) => aborted_outcome(),
            }
        }
    };
    drop(permit);

    let content_type = client::content_type_of(&outcome);
    let (cache_lifetime, cache_flags) = client::parse_cache(&outcome.headers);
    let visited = VisitedUrl {
        fingerprint: fp,
        url: url.clone(),
        source_fingerprint: queued.found.source_fingerprint,
        source_attr: queued.found.source_attr,
        status: outcome.status,
        content_type,
        content_type_header: outcome.content_type_header.clone(),
        size: outcome.size,
        request_time_ms: outcome.elapsed_ms,
        cache_lifetime,
        cache_flags,
        is_external: ctx.scope.is_external(&url),
        is_allowed_for_crawling: matches!(kind, UrlKind::Internal | UrlKind::AllowedExternal),
        extras: HashMap::new(),
        fetched_at: outcome.fetched_at,
    };
    ctx.store.commit(visited.clone());

    if (200..400).contains(&outcome.status) {
        if let Some(body) = &outcome.body {
            if body.len() as u64 <= ctx.cfg.limits.max_body_bytes {
                ctx.store.put_body(fp, body.clone());
            }
        }
    }

    // Extraction, then the per-URL analyzer hooks (which may reuse the DOM).
    let mut links: Vec<RawLink> = Vec::new();
    let mut extras: HashMap<String, String> = HashMap::new();
    let mut notices: Vec<String> = Vec::new();

    if visited.is_redirect() {
        if let Some(location) = header_value(&outcome.headers, "location") {
            match extract::redirect_location(&url, location) {
                Some(link) => {
                    extras.insert("Location".to_string(), link.url.to_string());
                    links.push(link);
                }
                None => {
                    extras.insert("Location".to_string(), location.to_string());
                }
            }
        }
        analyze_plain(ctx, &visited, &outcome);
    } else if visited.is_success() && outcome.body.is_some() {
        let body = outcome.body.as_deref().unwrap_or_default();
        if content_type == ContentTypeId::Html {
            let result = process_html(ctx, &visited, body, &outcome.headers);
            links = result.0;
            extras = result.1;
            notices = result.2;
        } else {
            let extraction = extract::extract_resource(
                content_type,
                &url,
                body,
                visited.source_attr,
                &ctx.cfg.extraction,
            );
            links = extraction.links;
            extras = extraction.extras;
            notices = extraction.notices;
            analyze_plain(ctx, &visited, &outcome);
        }
    } else {
        analyze_plain(ctx, &visited, &outcome);
    }

    if outcome.status > 0 {
        if let Some(link_header) = header_value(&outcome.headers, "link") {
            links.extend(extract::header_links(&url, link_header));
        }
    }

    // Sitemap discovery: robots.txt Sitemap directives, once, from the seed.
    if queued.depth == 0 && kind == UrlKind::Internal {
        for sitemap_url in ctx.robots.sitemaps(&url).await {
            links.push(RawLink {
                url: sitemap_url,
                attr: SourceAttr::Sitemap,
            });
        }
    }

    ctx.store.set_extras(fp, extras);

    for notice in &notices {
        ctx.store.add_summary(SummaryItem {
            code: "parse".to_string(),
            message: format!("{notice} ({url})"),
            status: SummaryStatus::Notice,
        });
    }

    // Scope-filter every discovered URL, then hand survivors to the
    // frontier; crawl seeds only come from crawlable pages.
    let next_depth = queued.depth + 1;
    let seeds_allowed = matches!(kind, UrlKind::Internal | UrlKind::AllowedExternal);
    if seeds_allowed {
        for link in links {
            match ctx.scope.decide(&link.url) {
                ScopeDecision::Skip(reason) => {
                    ctx.store.record_skip(
                        link.url.clone(),
                        reason,
                        Some(fp),
                        link.attr,
                    );
                    ctx.progress.emit(ProgressEvent::Skipped {
                        url: link.url,
                        reason,
                    });
                }
                ScopeDecision::Crawl | ScopeDecision::FetchStatic => {
                    let found = FoundUrl {
                        kind: ctx.scope.classify(&link.url),
                        url: link.url,
                        source_fingerprint: Some(fp),
                        source_attr: link.attr,
                    };
                    ctx.frontier.enqueue(found, next_depth);
                }
            }
        }
    }

    ctx.progress.emit(ProgressEvent::Fetched {
        fingerprint: fp,
        status: outcome.status,
        bytes: outcome.size,
        elapsed_ms: outcome.elapsed_ms,
        in_flight: ctx.in_flight.load(Ordering::SeqCst),
        reserved_total: ctx.store.reserved_count(),
    });
    if outcome.status < 0 {
        warn!(worker_id, url = %visited.url, status = outcome.status, error = ?outcome.error, "fetch failed");
    }
}

/// DOM-bearing path: one lenient parse shared by the extractor and every
/// per-URL analyzer hook. Synchronous on purpose; the DOM never crosses an
/// await point.
fn process_html(
    ctx: &WorkerCtx,
    visited: &VisitedUrl,
    body: &[u8],
    headers: &[(String, String)],
) -> (Vec<RawLink>, HashMap<String, String>, Vec<String>) {
    let text = String::from_utf8_lossy(body);
    let dom = Html::parse_document(&text);
    let extraction =
        extract::html::extract_document(&dom, &visited.url, ctx.cfg.extraction.scan_js_urls);
    let view = PageView {
        visited,
        body: Some(body),
        dom: Some(&dom),
        headers,
    };
    ctx.analyzers.on_fetched(&ctx.store, &view);
    (extraction.links, extraction.extras, extraction.notices)
}

/// Analyzer hooks for responses without a DOM (redirects, failures,
/// non-HTML resources).
fn analyze_plain(ctx: &WorkerCtx, visited: &VisitedUrl, outcome: &FetchOutcome) {
    let view = PageView {
        visited,
        body: outcome.body.as_deref(),
        dom: None,
        headers: &outcome.headers,
    };
    ctx.analyzers.on_fetched(&ctx.store, &view);
}

fn aborted_outcome() -> FetchOutcome {
    FetchOutcome {
        status: FetchErrorKind::Timeout.sentinel(),
        headers: Vec::new(),
        body: None,
        size: 0,
        elapsed_ms: 0,
        content_type_header: None,
        error: Some(FetchErrorKind::Timeout),
        attempts: 1,
        fetched_at: chrono::Utc::now(),
    }
}

fn skipped_visited(fp: Fingerprint, queued: &QueuedUrl) -> VisitedUrl {
    VisitedUrl {
        fingerprint: fp,
        url: queued.found.url.clone(),
        source_fingerprint: queued.found.source_fingerprint,
        source_attr: queued.found.source_attr,
        status: STATUS_SKIPPED,
        content_type: ContentTypeId::Other,
        content_type_header: None,
        size: 0,
        request_time_ms: 0,
        cache_lifetime: None,
        cache_flags: CacheFlags::default(),
        is_external: false,
        is_allowed_for_crawling: true,
        extras: HashMap::new(),
        fetched_at: chrono::Utc::now(),
    }
}

fn spawn_progress_logger(
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Attempt {
                    fingerprint,
                    attempt,
                } => {
                    if attempt > 1 {
                        debug!(fingerprint = %fingerprint, attempt, "retrying");
                    }
                }
                ProgressEvent::Fetched {
                    fingerprint,
                    status,
                    bytes,
                    elapsed_ms,
                    in_flight,
                    reserved_total,
                } => {
                    info!(
                        fingerprint = %fingerprint,
                        status,
                        bytes,
                        elapsed_ms,
                        in_flight,
                        reserved_total,
                        "fetched"
                    );
                }
                ProgressEvent::Skipped { url, reason } => {
                    debug!(url = %url, reason = reason.as_str(), "skipped");
                }
                ProgressEvent::Finalize {
                    analyzer,
                    elapsed_ms,
                } => {
                    info!(analyzer, elapsed_ms, "analyzer finalized");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_cfg(seed: String) -> AuditConfig {
        let mut cfg = AuditConfig::default();
        cfg.seed_url = seed;
        cfg.crawler.workers = 2;
        cfg.crawler.max_retries = 0;
        cfg.crawler.request_timeout_secs = 5;
        cfg
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html; charset=utf-8")
            .set_body_string(body.to_string())
    }

    async fn mount(server: &MockServer, p: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn seed_and_links_are_visited_once_each() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<a href="/a">a</a> <a href="/b">b</a> <a href="/a">again</a>"#)).await;
        mount(&server, "/a", html("<h1>a</h1>")).await;
        mount(&server, "/b", html("<h1>b</h1>")).await;

        let outcome = run_audit(test_cfg(format!("{}/", server.uri())))
            .await
            .expect("audit completes");
        let visited = outcome.store.visited();
        assert_eq!(visited.len(), 3);

        let items = outcome.store.summary_items();
        let dns = items.iter().find(|i| i.code == "dns-ipv4").expect("dns item");
        assert_eq!(dns.status, SummaryStatus::Ok);
        let security = items.iter().find(|i| i.code == "security").expect("security item");
        assert_eq!(security.status, SummaryStatus::Warning);
    }

    #[tokio::test]
    async fn robots_disallow_prevents_the_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin\n"),
            )
            .mount(&server)
            .await;
        mount(&server, "/", html(r#"<a href="/admin">admin</a>"#)).await;
        Mock::given(method("GET"))
            .and(path("/admin"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = run_audit(test_cfg(format!("{}/", server.uri())))
            .await
            .expect("audit completes");
        assert_eq!(outcome.store.visited().len(), 1);
        let skipped = outcome.store.skipped();
        assert!(skipped
            .iter()
            .any(|s| s.reason == SkipReason::RobotsTxt && s.url.path() == "/admin"));
    }

    #[tokio::test]
    async fn redirect_chain_yields_redirect_and_target() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<a href="/a">a</a>"#)).await;
        mount(
            &server,
            "/a",
            ResponseTemplate::new(301).insert_header("location", "/b"),
        )
        .await;
        mount(&server, "/b", html("<h1>landed</h1>")).await;

        let outcome = run_audit(test_cfg(format!("{}/", server.uri())))
            .await
            .expect("audit completes");
        let visited = outcome.store.visited();
        assert_eq!(visited.len(), 3);
        let redirect = visited
            .iter()
            .find(|v| v.url.path() == "/a")
            .expect("redirect visited");
        assert_eq!(redirect.content_type, ContentTypeId::Redirect);
        assert_eq!(
            redirect.extras.get("Location").map(String::as_str),
            Some(format!("{}/b", server.uri()).as_str())
        );
        let table = outcome
            .store
            .table_by_code("redirects")
            .expect("redirects table");
        assert_eq!(table.rows.len(), 1);
    }

    #[tokio::test]
    async fn depth_cap_stops_at_level_one() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<a href="/a">a</a>"#)).await;
        mount(&server, "/a", html(r#"<a href="/b">b</a>"#)).await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut cfg = test_cfg(format!("{}/", server.uri()));
        cfg.limits.max_depth = 1;
        let outcome = run_audit(cfg).await.expect("audit completes");
        assert_eq!(outcome.store.visited().len(), 2);
        assert!(outcome
            .store
            .skipped()
            .iter()
            .any(|s| s.reason == SkipReason::TooDeep && s.url.path() == "/b"));
    }

    #[tokio::test]
    async fn static_external_is_fetched_but_not_crawled() {
        let site = MockServer::start().await;
        let cdn = MockServer::start().await;
        mount(
            &site,
            "/",
            html(&format!(
                r#"<link rel="stylesheet" href="{0}/x.css"><a href="{0}/page.html">ext</a>"#,
                cdn.uri()
            )),
        )
        .await;
        mount(
            &cdn,
            "/x.css",
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/css")
                .set_body_string("body { color: red; }".to_string()),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/page.html"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&cdn)
            .await;

        let mut cfg = test_cfg(format!("{}/", site.uri()));
        cfg.scope.allowed_static_hosts = vec!["127.0.0.1".to_string()];
        let outcome = run_audit(cfg).await.expect("audit completes");
        let visited = outcome.store.visited();
        assert_eq!(visited.len(), 2);
        let css = visited
            .iter()
            .find(|v| v.url.path() == "/x.css")
            .expect("css fetched");
        assert!(css.is_external);
        assert!(!css.is_allowed_for_crawling);
        assert!(outcome
            .store
            .skipped()
            .iter()
            .any(|s| s.reason == SkipReason::DisallowedExternal && s.url.path() == "/page.html"));
    }

    #[tokio::test]
    async fn max_urls_reserves_only_the_seed() {
        let server = MockServer::start().await;
        mount(&server, "/", html(r#"<a href="/a">a</a>"#)).await;

        let mut cfg = test_cfg(format!("{}/", server.uri()));
        cfg.limits.max_urls = 1;
        let outcome = run_audit(cfg).await.expect("audit completes");
        assert_eq!(outcome.store.visited().len(), 1);
        assert!(outcome
            .store
            .skipped()
            .iter()
            .any(|s| s.reason == SkipReason::MaxUrlsReached));
    }

    #[tokio::test]
    async fn cache_headers_land_on_the_visited_record() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/",
            html("<h1>cached</h1>")
                .insert_header("cache-control", "max-age=3600, no-store")
                .insert_header("etag", "\"v1\""),
        )
        .await;
        let outcome = run_audit(test_cfg(format!("{}/", server.uri())))
            .await
            .expect("audit completes");
        let visited = outcome.store.visited();
        assert_eq!(visited[0].cache_lifetime, Some(3600));
        assert!(visited[0].cache_flags.contains(siteaudit_core::CacheFlags::MAX_AGE));
        assert!(visited[0].cache_flags.contains(siteaudit_core::CacheFlags::NO_STORE));
        assert!(visited[0].cache_flags.contains(siteaudit_core::CacheFlags::ETAG));
        let table = outcome
            .store
            .table_by_code("caching-per-content-type")
            .expect("caching table");
        assert_eq!(
            table.rows[0].get("cache").and_then(|v| v.as_str()),
            Some("no-store+max-age+etag")
        );
    }

    #[tokio::test]
    async fn robots_sitemap_directive_feeds_the_frontier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "User-agent: *\nSitemap: {}/sitemap.xml\n",
                server.uri()
            )))
            .mount(&server)
            .await;
        mount(&server, "/", html("<h1>home</h1>")).await;
        mount(
            &server,
            "/sitemap.xml",
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(format!(
                    "<urlset><url><loc>{}/from-sitemap</loc></url></urlset>",
                    server.uri()
                )),
        )
        .await;
        mount(&server, "/from-sitemap", html("<h1>found</h1>")).await;

        let outcome = run_audit(test_cfg(format!("{}/", server.uri())))
            .await
            .expect("audit completes");
        let visited = outcome.store.visited();
        assert_eq!(visited.len(), 3);
        let sitemap = visited
            .iter()
            .find(|v| v.url.path() == "/sitemap.xml")
            .expect("sitemap fetched");
        assert_eq!(sitemap.source_attr, SourceAttr::Sitemap);
        let page = visited
            .iter()
            .find(|v| v.url.path() == "/from-sitemap")
            .expect("sitemap target fetched");
        assert_eq!(page.source_attr, SourceAttr::Sitemap);
    }

    #[tokio::test]
    async fn unreachable_seed_still_produces_a_record() {
        let mut cfg = test_cfg("http://127.0.0.1:1/".to_string());
        cfg.http.respect_robots = false;
        let outcome = run_audit(cfg).await.expect("audit completes");
        let visited = outcome.store.visited();
        assert_eq!(visited.len(), 1);
        assert!(visited[0].status < 0);
        assert!(outcome
            .store
            .summary_items()
            .iter()
            .any(|i| i.code == "crawl-totals"));
    }

    #[tokio::test]
    async fn body_is_stored_for_success_pages() {
        let server = MockServer::start().await;
        mount(&server, "/", html("<h1>hello</h1>")).await;
        let outcome = run_audit(test_cfg(format!("{}/", server.uri())))
            .await
            .expect("audit completes");
        let visited = outcome.store.visited();
        let body = outcome
            .store
            .get_body(&visited[0].fingerprint)
            .expect("body stored");
        assert!(String::from_utf8_lossy(&body).contains("hello"));
        assert!(visited[0].extras.contains_key("H1"));
    }
}
