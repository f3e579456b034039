//! Content-dispatched URL discovery. Each extractor takes the fetched bytes
//! (or the already-parsed DOM for HTML) and yields links tagged with the
//! context they were found in, plus the extras map for the visited record.

pub mod css;
pub mod html;
pub mod js;
pub mod manifest;
pub mod sitemap;

use std::collections::HashMap;

use url::Url;

use siteaudit_core::url as urlmod;
use siteaudit_core::{ContentTypeId, ExtractionConfig, SourceAttr};

/// A URL pulled out of a resource, before scope filtering.
#[derive(Debug, Clone)]
pub struct RawLink {
    pub url: Url,
    pub attr: SourceAttr,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub links: Vec<RawLink>,
    pub extras: HashMap<String, String>,
    /// Parse problems worth a summary notice; empty on clean input.
    pub notices: Vec<String>,
}

impl Extraction {
    pub(crate) fn push(&mut self, url: Url, attr: SourceAttr) {
        self.links.push(RawLink { url, attr });
    }
}

/// Extract from a non-HTML resource. HTML goes through
/// [`html::extract_document`] so the DOM parse can be shared with the
/// analyzers.
pub fn extract_resource(
    content_type: ContentTypeId,
    url: &Url,
    body: &[u8],
    source_attr: SourceAttr,
    cfg: &ExtractionConfig,
) -> Extraction {
    match content_type {
        ContentTypeId::Stylesheet if cfg.scan_css_urls => {
            css::extract(&String::from_utf8_lossy(body), url)
        }
        ContentTypeId::Script if cfg.scan_js_urls => {
            js::extract(&String::from_utf8_lossy(body), url)
        }
        ContentTypeId::Xml if looks_like_sitemap(url, body) => {
            sitemap::extract(&String::from_utf8_lossy(body), url)
        }
        ContentTypeId::Json | ContentTypeId::Other if is_manifest(url, source_attr) => {
            manifest::extract(body, url)
        }
        _ => Extraction::default(),
    }
}

/// A 3xx Location header becomes a discovered URL, resolved against the
/// request URL.
pub fn redirect_location(base: &Url, location: &str) -> Option<RawLink> {
    resolve(base, location).map(|url| RawLink {
        url,
        attr: SourceAttr::RedirectLocation,
    })
}

/// URL references in an HTTP `Link:` response header
/// (`</style.css>; rel=preload, <https://cdn/x>; rel=dns-prefetch`).
pub fn header_links(base: &Url, value: &str) -> Vec<RawLink> {
    value
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let start = entry.find('<')?;
            let end = entry.find('>')?;
            if end <= start + 1 {
                return None;
            }
            resolve(base, &entry[start + 1..end])
        })
        .map(|url| RawLink {
            url,
            attr: SourceAttr::HeaderLink,
        })
        .collect()
}

fn looks_like_sitemap(url: &Url, body: &[u8]) -> bool {
    let path = url.path().to_ascii_lowercase();
    if path.contains("sitemap") && path.ends_with(".xml") {
        return true;
    }
    let head = &body[..body.len().min(512)];
    let head = String::from_utf8_lossy(head);
    head.contains("<urlset") || head.contains("<sitemapindex")
}

fn is_manifest(url: &Url, source_attr: SourceAttr) -> bool {
    if source_attr == SourceAttr::Manifest {
        return true;
    }
    let path = url.path().to_ascii_lowercase();
    path.ends_with(".webmanifest") || path.ends_with("manifest.json")
}

/// Resolve a raw reference against its base. Non-web schemes and
/// fragment-only references yield nothing; so do unparseable strings.
pub(crate) fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    for scheme in ["javascript:", "mailto:", "tel:", "data:", "blob:", "about:"] {
        if lower.starts_with(scheme) {
            return None;
        }
    }
    urlmod::canonicalize_in(base, raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        urlmod::canonicalize("https://ex.com/dir/page.html").expect("base parses")
    }

    #[test]
    fn resolve_skips_pseudo_schemes() {
        let base = base();
        assert!(resolve(&base, "javascript:void(0)").is_none());
        assert!(resolve(&base, "MAILTO:x@ex.com").is_none());
        assert!(resolve(&base, "#section").is_none());
        assert!(resolve(&base, "").is_none());
        assert!(resolve(&base, "  other.html ").is_some());
    }

    #[test]
    fn redirect_location_resolves_relative() {
        let link = redirect_location(&base(), "/landing").expect("resolves");
        assert_eq!(link.url.as_str(), "https://ex.com/landing");
        assert_eq!(link.attr, SourceAttr::RedirectLocation);
    }

    #[test]
    fn redirect_location_rejects_garbage() {
        assert!(redirect_location(&base(), "https://exa mple.com/\u{0}").is_none());
    }

    #[test]
    fn header_link_entries() {
        let links = header_links(
            &base(),
            r#"</assets/app.css>; rel=preload; as=style, <https://cdn.ex.net/f.woff2>; rel=preload"#,
        );
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://ex.com/assets/app.css", "https://cdn.ex.net/f.woff2"]
        );
        assert!(links.iter().all(|l| l.attr == SourceAttr::HeaderLink));
    }

    #[test]
    fn sitemap_detection() {
        let url = urlmod::canonicalize("https://ex.com/sitemap.xml").expect("parses");
        assert!(looks_like_sitemap(&url, b"<?xml?>"));
        let url = urlmod::canonicalize("https://ex.com/feed.xml").expect("parses");
        assert!(looks_like_sitemap(&url, b"<urlset xmlns=\"x\">"));
        assert!(!looks_like_sitemap(&url, b"<rss>"));
    }

    #[test]
    fn manifest_detection() {
        let url = urlmod::canonicalize("https://ex.com/app.webmanifest").expect("parses");
        assert!(is_manifest(&url, SourceAttr::LinkHref));
        let url = urlmod::canonicalize("https://ex.com/data.json").expect("parses");
        assert!(!is_manifest(&url, SourceAttr::AHref));
        assert!(is_manifest(&url, SourceAttr::Manifest));
    }
}
