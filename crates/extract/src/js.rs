use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use siteaudit_core::SourceAttr;

use crate::{resolve, Extraction};

static ABSOLUTE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"['\x22](https?://[^'\x22\s]+)['\x22]"#).expect("js url regex")
});

/// Absolute-path string literals: lowercase letters, digits, dash,
/// underscore and slash only, to keep the heuristic from chasing template
/// fragments.
static ABSOLUTE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['\x22](/[a-z0-9\-_/]*)['\x22]"#).expect("js path regex"));

/// Heuristic scan of JavaScript for fetchable URLs. Best-effort by design;
/// everything found is tagged `JS_STRING_LITERAL` so reports can show the
/// provenance.
pub fn extract(code: &str, base: &Url) -> Extraction {
    let mut out = Extraction::default();
    for cap in ABSOLUTE_URL_RE.captures_iter(code) {
        if let Some(url) = resolve(base, &cap[1]) {
            out.push(url, SourceAttr::JsStringLiteral);
        }
    }
    for cap in ABSOLUTE_PATH_RE.captures_iter(code) {
        let path = &cap[1];
        if path.len() < 2 {
            continue;
        }
        if let Some(url) = resolve(base, path) {
            out.push(url, SourceAttr::JsStringLiteral);
        }
    }
    out
}
