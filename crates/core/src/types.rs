use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use url::Url;

/// Fetch outcome sentinels stored in `VisitedUrl::status` alongside real
/// HTTP status codes.
pub const STATUS_CONNECTION_FAIL: i32 = -1;
pub const STATUS_TIMEOUT: i32 = -2;
pub const STATUS_SKIPPED: i32 = -3;
pub const STATUS_TOO_LARGE: i32 = -4;

/// Human label for an HTTP status or a negative sentinel.
pub fn status_label(status: i32) -> String {
    match status {
        STATUS_CONNECTION_FAIL => "connection-fail".to_string(),
        STATUS_TIMEOUT => "timeout".to_string(),
        STATUS_SKIPPED => "skipped".to_string(),
        STATUS_TOO_LARGE => "too-large".to_string(),
        s => s.to_string(),
    }
}

/// Stable 128-bit identity of a canonicalized URL, rendered as 32 hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn of(canonical: &str) -> Self {
        let digest = Sha256::digest(canonical.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }

    pub fn as_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

/// The HTML/HTTP context a URL was discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceAttr {
    AHref,
    ImgSrc,
    ImgSrcset,
    SourceSrc,
    ScriptSrc,
    LinkHref,
    CssUrl,
    MetaRedirect,
    Manifest,
    Sitemap,
    RedirectLocation,
    InputSrc,
    JsStringLiteral,
    HeaderLink,
    Other,
}

impl SourceAttr {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceAttr::AHref => "a-href",
            SourceAttr::ImgSrc => "img-src",
            SourceAttr::ImgSrcset => "img-srcset",
            SourceAttr::SourceSrc => "source-src",
            SourceAttr::ScriptSrc => "script-src",
            SourceAttr::LinkHref => "link-href",
            SourceAttr::CssUrl => "css-url",
            SourceAttr::MetaRedirect => "meta-redirect",
            SourceAttr::Manifest => "manifest",
            SourceAttr::Sitemap => "sitemap",
            SourceAttr::RedirectLocation => "redirect-location",
            SourceAttr::InputSrc => "input-src",
            SourceAttr::JsStringLiteral => "js-string-literal",
            SourceAttr::HeaderLink => "header-link",
            SourceAttr::Other => "other",
        }
    }
}

/// Coarse resource class derived from the Content-Type header (3xx responses
/// are always `Redirect`, whatever the body claims to be).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTypeId {
    Html,
    Script,
    Stylesheet,
    Image,
    Font,
    Document,
    Audio,
    Video,
    Redirect,
    Json,
    Xml,
    Other,
}

impl ContentTypeId {
    pub fn from_header(value: &str) -> Self {
        let ct = value
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if ct.starts_with("text/html") || ct == "application/xhtml+xml" {
            ContentTypeId::Html
        } else if ct == "text/css" {
            ContentTypeId::Stylesheet
        } else if ct.contains("javascript") || ct.contains("ecmascript") || ct == "text/jsx" {
            ContentTypeId::Script
        } else if ct.starts_with("image/") {
            ContentTypeId::Image
        } else if ct.starts_with("font/")
            || ct == "application/vnd.ms-fontobject"
            || ct.contains("font-woff")
        {
            ContentTypeId::Font
        } else if ct == "application/json" {
            ContentTypeId::Json
        } else if (ct.starts_with("application/") && ct.ends_with("xml")) || ct == "text/xml" {
            ContentTypeId::Xml
        } else if ct.starts_with("audio/") {
            ContentTypeId::Audio
        } else if ct.starts_with("video/") {
            ContentTypeId::Video
        } else if ct == "application/pdf"
            || ct.contains("msword")
            || ct.contains("officedocument")
            || ct.contains("zip")
            || ct.contains("tar")
            || ct.contains("compressed")
        {
            ContentTypeId::Document
        } else {
            ContentTypeId::Other
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ContentTypeId::Html => "html",
            ContentTypeId::Script => "script",
            ContentTypeId::Stylesheet => "stylesheet",
            ContentTypeId::Image => "image",
            ContentTypeId::Font => "font",
            ContentTypeId::Document => "document",
            ContentTypeId::Audio => "audio",
            ContentTypeId::Video => "video",
            ContentTypeId::Redirect => "redirect",
            ContentTypeId::Json => "json",
            ContentTypeId::Xml => "xml",
            ContentTypeId::Other => "other",
        }
    }
}

/// Bitset of caching-relevant response header facts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheFlags(pub u8);

impl CacheFlags {
    pub const NO_STORE: CacheFlags = CacheFlags(1 << 0);
    pub const NO_CACHE: CacheFlags = CacheFlags(1 << 1);
    pub const ETAG: CacheFlags = CacheFlags(1 << 2);
    pub const LAST_MODIFIED: CacheFlags = CacheFlags(1 << 3);
    pub const MAX_AGE: CacheFlags = CacheFlags(1 << 4);

    pub fn insert(&mut self, other: CacheFlags) {
        self.0 |= other.0;
    }

    pub fn contains(&self, other: CacheFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Short label used by the caching cross-tabs, e.g. "max-age+etag".
    pub fn label(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        let mut parts = Vec::new();
        if self.contains(Self::NO_STORE) {
            parts.push("no-store");
        }
        if self.contains(Self::NO_CACHE) {
            parts.push("no-cache");
        }
        if self.contains(Self::MAX_AGE) {
            parts.push("max-age");
        }
        if self.contains(Self::ETAG) {
            parts.push("etag");
        }
        if self.contains(Self::LAST_MODIFIED) {
            parts.push("last-modified");
        }
        parts.join("+")
    }
}

/// Why a candidate URL was rejected by scope or policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    DisallowedExternal,
    RobotsTxt,
    ExcludedByRegex,
    IncludeRegexMismatch,
    TooDeep,
    MaxUrlsReached,
    UnsupportedScheme,
    NotHttp,
    Malformed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::DisallowedExternal => "disallowed-external",
            SkipReason::RobotsTxt => "robots-txt",
            SkipReason::ExcludedByRegex => "excluded-by-regex",
            SkipReason::IncludeRegexMismatch => "include-regex-mismatch",
            SkipReason::TooDeep => "too-deep",
            SkipReason::MaxUrlsReached => "max-urls-reached",
            SkipReason::UnsupportedScheme => "unsupported-scheme",
            SkipReason::NotHttp => "not-http",
            SkipReason::Malformed => "malformed",
        }
    }
}

/// Where a discovered URL sits relative to the crawl scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlKind {
    /// Same origin as the seed.
    Internal,
    /// External host explicitly allowed for crawling.
    AllowedExternal,
    /// External host allowed only for static-resource fetches.
    StaticExternal,
    /// Out of scope.
    Disallowed,
}

/// A URL discovered at extraction time, before scope filtering.
#[derive(Debug, Clone)]
pub struct FoundUrl {
    pub url: Url,
    pub source_fingerprint: Option<Fingerprint>,
    pub source_attr: SourceAttr,
    pub kind: UrlKind,
}

/// The unit record of one fetch attempt, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct VisitedUrl {
    pub fingerprint: Fingerprint,
    #[serde(serialize_with = "ser_url")]
    pub url: Url,
    pub source_fingerprint: Option<Fingerprint>,
    pub source_attr: SourceAttr,
    /// HTTP status, or one of the negative sentinels.
    pub status: i32,
    pub content_type: ContentTypeId,
    pub content_type_header: Option<String>,
    /// Wire size: Content-Length when the server declared one, otherwise the
    /// streamed byte count.
    pub size: u64,
    pub request_time_ms: u64,
    pub cache_lifetime: Option<i64>,
    pub cache_flags: CacheFlags,
    pub is_external: bool,
    pub is_allowed_for_crawling: bool,
    /// Small extractor-populated map (Title, Description, H1, Location, ...).
    pub extras: HashMap<String, String>,
    pub fetched_at: DateTime<Utc>,
}

fn ser_url<S: Serializer>(url: &Url, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(url.as_str())
}

impl VisitedUrl {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_failure(&self) -> bool {
        self.status < 0
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }
}

/// A candidate rejected by scope or policy, kept for the skipped-URLs report.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedUrl {
    #[serde(serialize_with = "ser_url")]
    pub url: Url,
    pub reason: SkipReason,
    pub source_fingerprint: Option<Fingerprint>,
    pub source_attr: SourceAttr,
}

/// Finer-grained failure kind behind a negative status sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    DnsFailure,
    ConnectRefused,
    TlsFailure,
    Timeout,
    ResponseMalformed,
    TooLarge,
    Skipped,
}

impl FetchErrorKind {
    pub fn sentinel(&self) -> i32 {
        match self {
            FetchErrorKind::DnsFailure
            | FetchErrorKind::ConnectRefused
            | FetchErrorKind::TlsFailure
            | FetchErrorKind::ResponseMalformed => STATUS_CONNECTION_FAIL,
            FetchErrorKind::Timeout => STATUS_TIMEOUT,
            FetchErrorKind::Skipped => STATUS_SKIPPED,
            FetchErrorKind::TooLarge => STATUS_TOO_LARGE,
        }
    }

    /// Transient failures are retried; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchErrorKind::Timeout
                | FetchErrorKind::ConnectRefused
                | FetchErrorKind::ResponseMalformed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::DnsFailure => "dns-failure",
            FetchErrorKind::ConnectRefused => "connect-refused",
            FetchErrorKind::TlsFailure => "tls-failure",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::ResponseMalformed => "response-malformed",
            FetchErrorKind::TooLarge => "too-large",
            FetchErrorKind::Skipped => "skipped",
        }
    }
}

/// What one HTTP exchange produced, before it becomes a `VisitedUrl`.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// HTTP status or a negative sentinel.
    pub status: i32,
    /// Lowercased header names in response order; repeated names kept.
    pub headers: Vec<(String, String)>,
    /// Decoded body, present only for non-failed responses within budget.
    pub body: Option<Vec<u8>>,
    pub size: u64,
    pub elapsed_ms: u64,
    pub content_type_header: Option<String>,
    pub error: Option<FetchErrorKind>,
    pub attempts: u32,
    pub fetched_at: DateTime<Utc>,
}

/// First value of a response header, by lowercase name.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// All values of a (possibly repeated) response header.
pub fn header_values<'a>(
    headers: &'a [(String, String)],
    name: &'a str,
) -> impl Iterator<Item = &'a str> {
    headers
        .iter()
        .filter(move |(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_32_hex() {
        let a = Fingerprint::of("https://example.com/");
        let b = Fingerprint::of("https://example.com/");
        assert_eq!(a, b);
        assert_eq!(a.as_hex().len(), 32);
        assert_ne!(a, Fingerprint::of("https://example.com/other"));
    }

    #[test]
    fn content_type_classification() {
        assert_eq!(
            ContentTypeId::from_header("text/html; charset=utf-8"),
            ContentTypeId::Html
        );
        assert_eq!(
            ContentTypeId::from_header("application/xhtml+xml"),
            ContentTypeId::Html
        );
        assert_eq!(ContentTypeId::from_header("text/css"), ContentTypeId::Stylesheet);
        assert_eq!(
            ContentTypeId::from_header("application/javascript"),
            ContentTypeId::Script
        );
        assert_eq!(ContentTypeId::from_header("text/jsx"), ContentTypeId::Script);
        assert_eq!(ContentTypeId::from_header("image/webp"), ContentTypeId::Image);
        assert_eq!(
            ContentTypeId::from_header("application/vnd.ms-fontobject"),
            ContentTypeId::Font
        );
        assert_eq!(
            ContentTypeId::from_header("application/font-woff2"),
            ContentTypeId::Font
        );
        assert_eq!(ContentTypeId::from_header("application/json"), ContentTypeId::Json);
        assert_eq!(
            ContentTypeId::from_header("application/rss+xml"),
            ContentTypeId::Xml
        );
        assert_eq!(ContentTypeId::from_header("audio/mpeg"), ContentTypeId::Audio);
        assert_eq!(ContentTypeId::from_header("video/mp4"), ContentTypeId::Video);
        assert_eq!(
            ContentTypeId::from_header("application/pdf"),
            ContentTypeId::Document
        );
        assert_eq!(
            ContentTypeId::from_header(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            ContentTypeId::Document
        );
        assert_eq!(ContentTypeId::from_header("application/zip"), ContentTypeId::Document);
        assert_eq!(ContentTypeId::from_header("application/x-thing"), ContentTypeId::Other);
    }

    #[test]
    fn cache_flags_bitset() {
        let mut flags = CacheFlags::default();
        assert!(flags.is_empty());
        flags.insert(CacheFlags::MAX_AGE);
        flags.insert(CacheFlags::NO_STORE);
        assert!(flags.contains(CacheFlags::MAX_AGE));
        assert!(flags.contains(CacheFlags::NO_STORE));
        assert!(!flags.contains(CacheFlags::ETAG));
        assert_eq!(flags.label(), "no-store+max-age");
    }

    #[test]
    fn error_kind_sentinels() {
        assert_eq!(FetchErrorKind::DnsFailure.sentinel(), STATUS_CONNECTION_FAIL);
        assert_eq!(FetchErrorKind::TlsFailure.sentinel(), STATUS_CONNECTION_FAIL);
        assert_eq!(FetchErrorKind::Timeout.sentinel(), STATUS_TIMEOUT);
        assert_eq!(FetchErrorKind::TooLarge.sentinel(), STATUS_TOO_LARGE);
        assert!(FetchErrorKind::Timeout.is_transient());
        assert!(!FetchErrorKind::DnsFailure.is_transient());
    }

    #[test]
    fn header_lookup() {
        let headers = vec![
            ("content-type".to_string(), "text/html".to_string()),
            ("set-cookie".to_string(), "a=1".to_string()),
            ("set-cookie".to_string(), "b=2; Secure".to_string()),
        ];
        assert_eq!(header_value(&headers, "content-type"), Some("text/html"));
        assert_eq!(header_values(&headers, "set-cookie").count(), 2);
        assert_eq!(header_value(&headers, "server"), None);
    }
}
