use serde::Deserialize;

/// Typed configuration record for one audit run. Analyzers receive it via an
/// explicit `configure` call and document which fields they read.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct AuditConfig {
    /// Starting URL; usually supplied on the command line rather than in
    /// the config file.
    #[serde(default)]
    pub seed_url: String,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_per_host")]
    pub per_host_concurrency: usize,
    /// Global requests-per-second cap; 0 = unlimited.
    #[serde(default)]
    pub max_req_per_sec: u32,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// How long in-flight requests may run after an interrupt.
    #[serde(default = "default_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// 0 = seed only; -1 = unlimited.
    #[serde(default = "default_depth")]
    pub max_depth: i32,
    /// Hard cap on reserved URLs per run.
    #[serde(default = "default_max_urls")]
    pub max_urls: usize,
    #[serde(default = "default_max_body")]
    pub max_body_bytes: u64,
    /// In-memory body budget before spilling to the temp directory.
    #[serde(default = "default_body_budget")]
    pub body_memory_budget_bytes: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Comma list sent as Accept-Encoding; `br` opts in Brotli reporting.
    #[serde(default = "default_accept_encoding")]
    pub accept_encoding: String,
    #[serde(default = "default_true")]
    pub respect_robots: bool,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScopeConfig {
    #[serde(default)]
    pub include_regex: Vec<String>,
    #[serde(default)]
    pub exclude_regex: Vec<String>,
    /// External host globs allowed for full crawling.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// External host globs allowed only for static-resource fetches.
    #[serde(default)]
    pub allowed_static_hosts: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_true")]
    pub scan_css_urls: bool,
    /// Heuristic URL scan inside JavaScript bodies and inline scripts.
    #[serde(default = "default_true")]
    pub scan_js_urls: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Analyzers whose name matches are excluded from the registry.
    #[serde(default)]
    pub analyzer_filter_regex: Option<String>,
    /// 1-6; heading-tree extraction depth for the SEO analyzer.
    #[serde(default = "default_heading_level")]
    pub max_heading_level: u8,
    /// Row count for top-K tables (fastest/slowest and friends).
    #[serde(default = "default_top_count")]
    pub top_count: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            per_host_concurrency: default_per_host(),
            max_req_per_sec: 0,
            request_timeout_secs: default_timeout(),
            max_retries: default_retries(),
            shutdown_grace_secs: default_grace(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_depth: default_depth(),
            max_urls: default_max_urls(),
            max_body_bytes: default_max_body(),
            body_memory_budget_bytes: default_body_budget(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            accept_encoding: default_accept_encoding(),
            respect_robots: true,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            scan_css_urls: true,
            scan_js_urls: true,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analyzer_filter_regex: None,
            max_heading_level: default_heading_level(),
            top_count: default_top_count(),
        }
    }
}

fn default_workers() -> usize {
    10
}
fn default_per_host() -> usize {
    5
}
fn default_timeout() -> u64 {
    10
}
fn default_retries() -> u32 {
    3
}
fn default_grace() -> u64 {
    2
}
fn default_depth() -> i32 {
    -1
}
fn default_max_urls() -> usize {
    2000
}
fn default_max_body() -> u64 {
    10 * 1024 * 1024
}
fn default_body_budget() -> u64 {
    64 * 1024 * 1024
}
fn default_user_agent() -> String {
    "siteaudit/0.1".to_string()
}
fn default_accept_encoding() -> String {
    "gzip, deflate, br".to_string()
}
fn default_heading_level() -> u8 {
    3
}
fn default_top_count() -> usize {
    10
}
fn default_true() -> bool {
    true
}

impl AuditConfig {
    /// True when the request side advertises Brotli, which opts the
    /// best-practice analyzer into Brotli reporting.
    pub fn advertises_brotli(&self) -> bool {
        self.http
            .accept_encoding
            .split(',')
            .any(|e| e.trim().eq_ignore_ascii_case("br"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_toml() {
        let cfg: AuditConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(cfg.crawler.workers, 10);
        assert_eq!(cfg.crawler.per_host_concurrency, 5);
        assert_eq!(cfg.limits.max_depth, -1);
        assert!(cfg.http.respect_robots);
        assert_eq!(cfg.analysis.max_heading_level, 3);
        assert!(cfg.advertises_brotli());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: AuditConfig = toml::from_str(
            r#"
            [limits]
            max_depth = 2
            [http]
            accept_encoding = "gzip"
            "#,
        )
        .expect("partial config parses");
        assert_eq!(cfg.limits.max_depth, 2);
        assert_eq!(cfg.limits.max_urls, 2000);
        assert!(!cfg.advertises_brotli());
    }
}
