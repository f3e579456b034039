use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use siteaudit_core::SourceAttr;

use crate::{resolve, Extraction};

static URL_FN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(\s*['\x22]?([^'\x22()\s]+)['\x22]?\s*\)"#).expect("css url regex")
});

static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"@import\s+['\x22]([^'\x22]+)['\x22]"#).expect("css import regex"));

/// Every `url(...)` plus bare-string `@import` targets. `@import url(...)`
/// is already covered by the url() scan.
pub fn extract(css: &str, base: &Url) -> Extraction {
    let mut out = Extraction::default();
    for cap in URL_FN_RE.captures_iter(css) {
        if let Some(url) = resolve(base, &cap[1]) {
            out.push(url, SourceAttr::CssUrl);
        }
    }
    for cap in IMPORT_RE.captures_iter(css) {
        if let Some(url) = resolve(base, &cap[1]) {
            out.push(url, SourceAttr::CssUrl);
        }
    }
    out
}
