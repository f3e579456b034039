use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use siteaudit_core::SourceAttr;

use crate::{resolve, Extraction};

static LOC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<loc>\s*([^<]+?)\s*</loc>").expect("sitemap loc regex"));

/// `<loc>` entries from sitemap.xml and sitemapindex.xml alike; index files
/// just yield further sitemap URLs to crawl.
pub fn extract(xml: &str, base: &Url) -> Extraction {
    let mut out = Extraction::default();
    for cap in LOC_RE.captures_iter(xml) {
        if let Some(url) = resolve(base, cap[1].trim()) {
            out.push(url, SourceAttr::Sitemap);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteaudit_core::url as urlmod;

    fn urls(xml: &str) -> Vec<String> {
        let base = urlmod::canonicalize("https://ex.com/sitemap.xml").expect("base parses");
        extract(xml, &base)
            .links
            .iter()
            .map(|l| l.url.as_str().to_string())
            .collect()
    }

    #[test]
    fn urlset_locs() {
        let xml = r#"<?xml version="1.0"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>https://ex.com/</loc></url>
              <url><loc>
                https://ex.com/about
              </loc></url>
            </urlset>"#;
        assert_eq!(urls(xml), vec!["https://ex.com/", "https://ex.com/about"]);
    }

    #[test]
    fn sitemapindex_locs() {
        let xml = r#"<sitemapindex>
              <sitemap><loc>https://ex.com/sitemap-posts.xml</loc></sitemap>
            </sitemapindex>"#;
        assert_eq!(urls(xml), vec!["https://ex.com/sitemap-posts.xml"]);
    }

    #[test]
    fn garbage_is_empty() {
        assert!(urls("<rss><item>no locs</item></rss>").is_empty());
    }
}
