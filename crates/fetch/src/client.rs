use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use tracing::{debug, warn};
use url::Url;

use siteaudit_core::{
    header_value, AuditConfig, CacheFlags, ContentTypeId, CrawlError, FetchErrorKind,
    FetchOutcome, Fingerprint, ProgressEvent, ProgressSink,
};

use crate::decode;

const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_CAP_MS: u64 = 4_000;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub accept_encoding: String,
    /// Whole-request deadline: connect, headers, and body.
    pub timeout: Duration,
    pub max_body_bytes: u64,
    pub max_retries: u32,
}

impl FetcherConfig {
    /// Reads `http.user_agent`, `http.accept_encoding`,
    /// `crawler.request_timeout_secs`, `crawler.max_retries` and
    /// `limits.max_body_bytes`.
    pub fn from_audit(cfg: &AuditConfig) -> Self {
        Self {
            user_agent: cfg.http.user_agent.clone(),
            accept_encoding: cfg.http.accept_encoding.clone(),
            timeout: Duration::from_secs(cfg.crawler.request_timeout_secs),
            max_body_bytes: cfg.limits.max_body_bytes,
            max_retries: cfg.crawler.max_retries,
        }
    }
}

/// Single-request execution. Redirects are never followed (a 3xx is a
/// result, not transport); transient failures retry with jittered
/// exponential backoff; bodies stream against the size budget and are
/// decoded by hand so the wire stays observable.
pub struct HttpFetcher {
    client: reqwest::Client,
    cfg: FetcherConfig,
}

impl HttpFetcher {
    pub fn new(cfg: FetcherConfig) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(cfg.timeout)
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(|e| CrawlError::Network(e.to_string()))?;
        Ok(Self { client, cfg })
    }

    /// One logical fetch, retries included. `internal` opts 5xx responses
    /// into the retry budget; 4xx is always terminal. Emits one `Attempt`
    /// progress event per wire request.
    pub async fn fetch(
        &self,
        url: &Url,
        internal: bool,
        fp: Fingerprint,
        progress: &ProgressSink,
    ) -> FetchOutcome {
        let overall = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            progress.emit(ProgressEvent::Attempt {
                fingerprint: fp,
                attempt,
            });
            match self.attempt(url).await {
                Ok(mut outcome) => {
                    if internal && outcome.status >= 500 && attempt <= self.cfg.max_retries {
                        debug!(url = %url, status = outcome.status, attempt, "server error, retrying");
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    outcome.attempts = attempt;
                    return outcome;
                }
                Err(kind) => {
                    if kind.is_transient() && attempt <= self.cfg.max_retries {
                        warn!(url = %url, error = kind.as_str(), attempt, "fetch failed, retrying");
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    return failure_outcome(kind, attempt, overall.elapsed());
                }
            }
        }
    }

    async fn attempt(&self, url: &Url) -> Result<FetchOutcome, FetchErrorKind> {
        let started = Instant::now();
        let resp = self
            .client
            .get(url.as_str())
            .header("accept-encoding", &self.cfg.accept_encoding)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        let status = resp.status().as_u16() as i32;
        let headers = flatten_headers(resp.headers());
        let content_type_header = header_value(&headers, "content-type").map(str::to_string);
        let declared: Option<u64> =
            header_value(&headers, "content-length").and_then(|v| v.parse().ok());
        if let Some(declared) = declared {
            if declared > self.cfg.max_body_bytes {
                return Err(FetchErrorKind::TooLarge);
            }
        }

        let mut raw: Vec<u8> = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify_error(&e))?;
            if raw.len() as u64 + chunk.len() as u64 > self.cfg.max_body_bytes {
                return Err(FetchErrorKind::TooLarge);
            }
            raw.extend_from_slice(&chunk);
        }

        // Wire size: what the server declared, else what actually arrived.
        let size = declared.unwrap_or(raw.len() as u64);
        let encoding = header_value(&headers, "content-encoding").map(str::to_string);
        let body = match decode::decode_body(raw, encoding.as_deref()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %url, error = %e, "body decode failed");
                return Err(FetchErrorKind::ResponseMalformed);
            }
        };

        Ok(FetchOutcome {
            status,
            headers,
            body: Some(body),
            size,
            elapsed_ms: started.elapsed().as_millis() as u64,
            content_type_header,
            error: None,
            attempts: 0,
            fetched_at: Utc::now(),
        })
    }
}

/// 3xx responses classify as redirects regardless of the body's claimed type.
pub fn content_type_of(outcome: &FetchOutcome) -> ContentTypeId {
    if (300..400).contains(&outcome.status) {
        ContentTypeId::Redirect
    } else {
        outcome
            .content_type_header
            .as_deref()
            .map(ContentTypeId::from_header)
            .unwrap_or(ContentTypeId::Other)
    }
}

/// Cache lifetime (`s-maxage` > `max-age` > `Expires` − `Date`) and the
/// header-fact flags.
pub fn parse_cache(headers: &[(String, String)]) -> (Option<i64>, CacheFlags) {
    let mut flags = CacheFlags::default();
    let mut max_age: Option<i64> = None;
    let mut s_maxage: Option<i64> = None;
    if let Some(cc) = header_value(headers, "cache-control") {
        for directive in cc.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            if directive == "no-store" {
                flags.insert(CacheFlags::NO_STORE);
            } else if directive == "no-cache" {
                flags.insert(CacheFlags::NO_CACHE);
            } else if let Some(v) = directive.strip_prefix("max-age=") {
                if let Ok(n) = v.parse() {
                    max_age = Some(n);
                    flags.insert(CacheFlags::MAX_AGE);
                }
            } else if let Some(v) = directive.strip_prefix("s-maxage=") {
                s_maxage = v.parse().ok();
            }
        }
    }
    if header_value(headers, "etag").is_some() {
        flags.insert(CacheFlags::ETAG);
    }
    if header_value(headers, "last-modified").is_some() {
        flags.insert(CacheFlags::LAST_MODIFIED);
    }
    let lifetime = s_maxage.or(max_age).or_else(|| expires_minus_date(headers));
    (lifetime, flags)
}

fn expires_minus_date(headers: &[(String, String)]) -> Option<i64> {
    let expires = header_value(headers, "expires").and_then(http_date)?;
    let date = header_value(headers, "date").and_then(http_date)?;
    Some((expires - date).num_seconds())
}

fn http_date(value: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    chrono::DateTime::parse_from_rfc2822(value).ok()
}

fn flatten_headers(map: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    map.iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn failure_outcome(kind: FetchErrorKind, attempts: u32, elapsed: Duration) -> FetchOutcome {
    FetchOutcome {
        status: kind.sentinel(),
        headers: Vec::new(),
        body: None,
        size: 0,
        elapsed_ms: elapsed.as_millis() as u64,
        content_type_header: None,
        error: Some(kind),
        attempts,
        fetched_at: Utc::now(),
    }
}

fn classify_error(e: &reqwest::Error) -> FetchErrorKind {
    if e.is_timeout() {
        return FetchErrorKind::Timeout;
    }
    let text = error_chain_text(e);
    if text.contains("dns") || text.contains("resolve") || text.contains("name or service") {
        FetchErrorKind::DnsFailure
    } else if text.contains("certificate")
        || text.contains("handshake")
        || text.contains("tls")
        || text.contains("ssl")
    {
        FetchErrorKind::TlsFailure
    } else if e.is_connect()
        || text.contains("connection refused")
        || text.contains("connection reset")
        || text.contains("broken pipe")
    {
        FetchErrorKind::ConnectRefused
    } else {
        FetchErrorKind::ResponseMalformed
    }
}

fn error_chain_text(e: &dyn std::error::Error) -> String {
    let mut text = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text.to_ascii_lowercase()
}

/// 250 ms base, doubling, 4 s cap, ±20% jitter.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    let capped = (BACKOFF_BASE_MS << exp).min(BACKOFF_CAP_MS);
    let jitter = capped / 5;
    let ms = rand::thread_rng().gen_range(capped - jitter..=capped + jitter);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use siteaudit_core::{STATUS_TOO_LARGE, STATUS_TIMEOUT};

    fn fetcher(max_body: u64, max_retries: u32) -> HttpFetcher {
        HttpFetcher::new(FetcherConfig {
            user_agent: "siteaudit-test/0".to_string(),
            accept_encoding: "gzip, deflate, br".to_string(),
            timeout: Duration::from_secs(5),
            max_body_bytes: max_body,
            max_retries,
        })
        .expect("client builds")
    }

    fn fp() -> Fingerprint {
        Fingerprint::of("test")
    }

    async fn get(fetcher: &HttpFetcher, server: &MockServer, p: &str, internal: bool) -> FetchOutcome {
        let url = Url::parse(&format!("{}{p}", server.uri())).expect("test url");
        fetcher
            .fetch(&url, internal, fp(), &ProgressSink::disabled())
            .await
    }

    #[tokio::test]
    async fn redirect_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/b"))
            .mount(&server)
            .await;
        let outcome = get(&fetcher(1024, 0), &server, "/a", true).await;
        assert_eq!(outcome.status, 301);
        assert_eq!(header_value(&outcome.headers, "location"), Some("/b"));
        assert_eq!(content_type_of(&outcome), ContentTypeId::Redirect);
    }

    #[tokio::test]
    async fn four_xx_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        let outcome = get(&fetcher(1024, 3), &server, "/missing", true).await;
        assert_eq!(outcome.status, 404);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn internal_5xx_is_retried_max_retries_plus_one_times() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("{}/flaky", server.uri())).expect("test url");
        let outcome = fetcher(1024, 2)
            .fetch(&url, true, fp(), &ProgressSink::new(tx))
            .await;
        assert_eq!(outcome.status, 500);
        assert_eq!(outcome.attempts, 3);
        let mut attempts = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ProgressEvent::Attempt { .. }) {
                attempts += 1;
            }
        }
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn external_5xx_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;
        let outcome = get(&fetcher(1024, 3), &server, "/flaky", false).await;
        assert_eq!(outcome.status, 502);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn oversized_body_is_too_large_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 32]))
            .mount(&server)
            .await;
        let outcome = get(&fetcher(31, 3), &server, "/big", true).await;
        assert_eq!(outcome.status, STATUS_TOO_LARGE);
        assert_eq!(outcome.error, Some(FetchErrorKind::TooLarge));
        assert!(outcome.body.is_none());
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn gzip_body_is_decoded_but_size_stays_wire() {
        let html = b"<html><body>compressed page body</body></html>";
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(html).expect("gzip write");
        let packed = encoder.finish().expect("gzip finish");
        let wire_len = packed.len() as u64;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/z"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-encoding", "gzip")
                    .insert_header("content-type", "text/html")
                    .set_body_bytes(packed),
            )
            .mount(&server)
            .await;
        let outcome = get(&fetcher(4096, 0), &server, "/z", true).await;
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body.as_deref(), Some(html.as_slice()));
        assert_eq!(outcome.size, wire_len);
        assert_eq!(
            header_value(&outcome.headers, "content-encoding"),
            Some("gzip")
        );
    }

    #[tokio::test]
    async fn timeout_surfaces_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/slow", server.uri())).expect("test url");
        let quick = HttpFetcher::new(FetcherConfig {
            user_agent: "siteaudit-test/0".to_string(),
            accept_encoding: "identity".to_string(),
            timeout: Duration::from_millis(200),
            max_body_bytes: 1024,
            max_retries: 0,
        })
        .expect("client builds");
        let outcome = quick.fetch(&url, true, fp(), &ProgressSink::disabled()).await;
        assert_eq!(outcome.status, STATUS_TIMEOUT);
        assert_eq!(outcome.error, Some(FetchErrorKind::Timeout));
    }

    #[test]
    fn cache_parsing_prefers_s_maxage() {
        let headers = vec![(
            "cache-control".to_string(),
            "s-maxage=600, max-age=60".to_string(),
        )];
        let (lifetime, flags) = parse_cache(&headers);
        assert_eq!(lifetime, Some(600));
        assert!(flags.contains(CacheFlags::MAX_AGE));
    }

    #[test]
    fn cache_parsing_max_age_with_no_store() {
        let headers = vec![(
            "cache-control".to_string(),
            "max-age=3600, no-store".to_string(),
        )];
        let (lifetime, flags) = parse_cache(&headers);
        assert_eq!(lifetime, Some(3600));
        assert!(flags.contains(CacheFlags::MAX_AGE));
        assert!(flags.contains(CacheFlags::NO_STORE));
    }

    #[test]
    fn cache_parsing_expires_fallback() {
        let headers = vec![
            ("date".to_string(), "Sun, 06 Nov 1994 08:49:37 GMT".to_string()),
            (
                "expires".to_string(),
                "Sun, 06 Nov 1994 09:49:37 GMT".to_string(),
            ),
            ("etag".to_string(), "\"abc\"".to_string()),
        ];
        let (lifetime, flags) = parse_cache(&headers);
        assert_eq!(lifetime, Some(3600));
        assert!(flags.contains(CacheFlags::ETAG));
        assert!(!flags.contains(CacheFlags::MAX_AGE));
    }

    #[test]
    fn backoff_stays_within_jitter_bounds() {
        for _ in 0..50 {
            let first = backoff_delay(1).as_millis() as u64;
            assert!((200..=300).contains(&first), "first delay {first}");
            let late = backoff_delay(10).as_millis() as u64;
            assert!((3200..=4800).contains(&late), "late delay {late}");
        }
    }
}
