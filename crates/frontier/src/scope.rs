use regex::Regex;
use url::Url;

use siteaudit_core::url::{host_matches_glob, is_http, is_static_extension, origin_key};
use siteaudit_core::{CrawlError, ScopeConfig, SkipReason, UrlKind};

/// What to do with a candidate URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDecision {
    /// In scope: fetch it and crawl what it links to.
    Crawl,
    /// Fetch the resource, but never use it as a crawl seed.
    FetchStatic,
    Skip(SkipReason),
}

/// Decides crawl / fetch-only / skip for candidates, from the seed origin,
/// host allow-lists and the include/exclude path regexes. Reads
/// `scope.include_regex`, `scope.exclude_regex`, `scope.allowed_hosts`,
/// `scope.allowed_static_hosts`.
pub struct ScopeFilter {
    seed_origin: String,
    allowed_hosts: Vec<String>,
    allowed_static_hosts: Vec<String>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl ScopeFilter {
    pub fn new(seed: &Url, cfg: &ScopeConfig) -> Result<Self, CrawlError> {
        Ok(Self {
            seed_origin: origin_key(seed),
            allowed_hosts: cfg.allowed_hosts.clone(),
            allowed_static_hosts: cfg.allowed_static_hosts.clone(),
            include: compile_all(&cfg.include_regex)?,
            exclude: compile_all(&cfg.exclude_regex)?,
        })
    }

    pub fn decide(&self, url: &Url) -> ScopeDecision {
        if !is_http(url) {
            let reason = match url.scheme() {
                "mailto" | "javascript" | "tel" | "data" | "ftp" | "file" => {
                    SkipReason::UnsupportedScheme
                }
                _ => SkipReason::NotHttp,
            };
            return ScopeDecision::Skip(reason);
        }
        let host = url.host_str().unwrap_or("");
        let host_allowed = origin_key(url) == self.seed_origin
            || self
                .allowed_hosts
                .iter()
                .any(|glob| host_matches_glob(host, glob));
        if host_allowed {
            return match self.regex_gate(url) {
                Some(reason) => ScopeDecision::Skip(reason),
                None => ScopeDecision::Crawl,
            };
        }
        if is_static_extension(url)
            && self
                .allowed_static_hosts
                .iter()
                .any(|glob| host_matches_glob(host, glob))
        {
            return ScopeDecision::FetchStatic;
        }
        ScopeDecision::Skip(SkipReason::DisallowedExternal)
    }

    /// Path-level regex gates for host-allowed URLs: exclusion wins, then an
    /// include list (when given) must match.
    fn regex_gate(&self, url: &Url) -> Option<SkipReason> {
        let path = url.path();
        if self.exclude.iter().any(|re| re.is_match(path)) {
            return Some(SkipReason::ExcludedByRegex);
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(path)) {
            return Some(SkipReason::IncludeRegexMismatch);
        }
        None
    }

    /// Scope class for a `FoundUrl`, independent of the regex gates.
    pub fn classify(&self, url: &Url) -> UrlKind {
        if !is_http(url) {
            return UrlKind::Disallowed;
        }
        let host = url.host_str().unwrap_or("");
        if origin_key(url) == self.seed_origin {
            return UrlKind::Internal;
        }
        if self
            .allowed_hosts
            .iter()
            .any(|glob| host_matches_glob(host, glob))
        {
            return UrlKind::AllowedExternal;
        }
        if is_static_extension(url)
            && self
                .allowed_static_hosts
                .iter()
                .any(|glob| host_matches_glob(host, glob))
        {
            return UrlKind::StaticExternal;
        }
        UrlKind::Disallowed
    }

    /// External means "not the seed origin", whatever the allow-lists say.
    pub fn is_external(&self, url: &Url) -> bool {
        origin_key(url) != self.seed_origin
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, CrawlError> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| CrawlError::Config(format!("bad regex {p:?}: {e}"))))
        .collect()
}
