use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};

use siteaudit_core::{
    header_value, AuditConfig, ContentTypeId, SummaryItem, SummaryStatus, UrlAnalysis,
};
use siteaudit_store::ResultStore;

use crate::{lock, Analyzer, PageView};

const INLINE_SVG_SIZE_LIMIT: usize = 5 * 1024;
const MAX_DOM_DEPTH: usize = 32;

static UNQUOTED_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s(?:href|src|content|alt|title)=([^"'\s>][^\s>]*)"#)
        .expect("unquoted attr regex")
});

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+|00)[1-9][0-9 ().\-]{6,}[0-9]").expect("phone regex"));

#[derive(Default)]
struct Cross {
    html_pages: u64,
    titles: HashMap<String, u64>,
    descriptions: HashMap<String, u64>,
    images_seen: u64,
    brotli_seen: bool,
    webp_seen: bool,
    avif_seen: bool,
}

/// Markup and delivery hygiene: inline SVG weight, quoting, heading
/// structure, DOM depth, clickable phone numbers per page; title and
/// description uniqueness, Brotli and modern image formats across the
/// crawl. Reads `http.accept_encoding` (for the Brotli opt-in).
#[derive(Default)]
pub struct BestPracticeAnalyzer {
    advertises_brotli: Mutex<bool>,
    cross: Mutex<Cross>,
}

#[async_trait]
impl Analyzer for BestPracticeAnalyzer {
    fn name(&self) -> &'static str {
        "best-practice"
    }

    fn order(&self) -> i32 {
        50
    }

    fn configure(&self, cfg: &AuditConfig) {
        *lock(&self.advertises_brotli) = cfg.advertises_brotli();
    }

    fn on_fetched(&self, page: &PageView<'_>) -> Result<Option<UrlAnalysis>> {
        {
            let mut cross = lock(&self.cross);
            if header_value(page.headers, "content-encoding")
                .is_some_and(|e| e.split(',').any(|t| t.trim().eq_ignore_ascii_case("br")))
            {
                cross.brotli_seen = true;
            }
            if page.visited.content_type == ContentTypeId::Image {
                cross.images_seen += 1;
                let header = page.visited.content_type_header.as_deref().unwrap_or("");
                let path = page.visited.url.path().to_ascii_lowercase();
                if header.contains("webp") || path.ends_with(".webp") {
                    cross.webp_seen = true;
                }
                if header.contains("avif") || path.ends_with(".avif") {
                    cross.avif_seen = true;
                }
            }
        }

        if page.visited.content_type != ContentTypeId::Html || !page.visited.is_success() {
            return Ok(None);
        }
        let Some(dom) = page.dom else {
            return Ok(None);
        };

        let mut analysis = UrlAnalysis::default();

        {
            let mut cross = lock(&self.cross);
            cross.html_pages += 1;
            let title = first_text(dom, "title");
            if !title.is_empty() {
                *cross.titles.entry(title).or_insert(0) += 1;
            }
            let description = meta_description(dom);
            if !description.is_empty() {
                *cross.descriptions.entry(description).or_insert(0) += 1;
            }
        }

        svg_checks(dom, &mut analysis);
        if let Some(body) = page.body {
            unquoted_attributes(body, &mut analysis);
        }
        heading_structure(dom, &mut analysis);
        dom_depth(dom, &mut analysis);
        phone_numbers(dom, &mut analysis);

        Ok(Some(analysis))
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let advertises_brotli = *lock(&self.advertises_brotli);
        let cross = lock(&self.cross);
        let mut worst = SummaryStatus::Ok;
        let mut parts = Vec::new();

        let duplicate_titles: u64 = cross.titles.values().filter(|c| **c > 1).map(|c| c - 1).sum();
        if duplicate_titles > 0 {
            worst = SummaryStatus::Warning;
            parts.push(format!("{duplicate_titles} pages share a title with another page"));
        }
        let duplicate_descriptions: u64 = cross
            .descriptions
            .values()
            .filter(|c| **c > 1)
            .map(|c| c - 1)
            .sum();
        if duplicate_descriptions > 0 {
            worst = SummaryStatus::Warning;
            parts.push(format!("{duplicate_descriptions} pages share a meta description"));
        }

        if advertises_brotli {
            if cross.brotli_seen {
                parts.push("Brotli responses observed".to_string());
            } else if cross.html_pages > 0 {
                if worst == SummaryStatus::Ok {
                    worst = SummaryStatus::Notice;
                }
                parts.push("Brotli advertised but never served".to_string());
            }
        }

        if cross.images_seen > 0 && !cross.webp_seen && !cross.avif_seen {
            if worst == SummaryStatus::Ok {
                worst = SummaryStatus::Notice;
            }
            parts.push("no WebP or AVIF images served".to_string());
        }

        if parts.is_empty() {
            parts.push(format!("{} HTML pages pass the cross-page checks", cross.html_pages));
        }
        store.add_summary(SummaryItem {
            code: "best-practice".to_string(),
            message: parts.join("; "),
            status: worst,
        });
        Ok(())
    }
}

fn svg_checks(dom: &Html, analysis: &mut UrlAnalysis) {
    let Ok(sel) = Selector::parse("svg") else {
        return;
    };
    let mut seen: HashSet<[u8; 8]> = HashSet::new();
    let mut oversized = 0usize;
    let mut duplicates = 0usize;
    let mut undimensioned = 0usize;
    for el in dom.select(&sel) {
        let markup = el.html();
        if markup.len() > INLINE_SVG_SIZE_LIMIT {
            oversized += 1;
        }
        let digest = Sha256::digest(markup.as_bytes());
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest[..8]);
        if !seen.insert(key) {
            duplicates += 1;
        }
        let has_viewbox = el.value().attr("viewBox").is_some() || el.value().attr("viewbox").is_some();
        let has_dimensions = el.value().attr("width").is_some() && el.value().attr("height").is_some();
        if !has_viewbox && !has_dimensions {
            undimensioned += 1;
        }
    }
    if oversized > 0 {
        analysis.warning(
            "inline-svg",
            format!("{oversized} inline SVGs over {INLINE_SVG_SIZE_LIMIT} bytes"),
        );
    }
    if duplicates > 0 {
        analysis.notice(
            "inline-svg",
            format!("{duplicates} duplicated inline SVGs could be shared"),
        );
    }
    if undimensioned > 0 {
        analysis.notice(
            "inline-svg",
            format!("{undimensioned} inline SVGs without viewBox or dimensions"),
        );
    }
}

fn unquoted_attributes(body: &[u8], analysis: &mut UrlAnalysis) {
    let text = String::from_utf8_lossy(body);
    let count = UNQUOTED_ATTR_RE.captures_iter(&text).count();
    if count > 0 {
        analysis.notice(
            "unquoted-attributes",
            format!("{count} href/src/content/alt/title attributes without quotes"),
        );
    }
}

fn heading_structure(dom: &Html, analysis: &mut UrlAnalysis) {
    let mut levels = Vec::new();
    for node in dom.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let name = el.value().name();
        if let Some(level) = name
            .strip_prefix('h')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|l| (1..=6).contains(l))
        {
            levels.push((level, first_chars(&el.text().collect::<String>(), 40)));
        }
    }
    let h1_count = levels.iter().filter(|(l, _)| *l == 1).count();
    if h1_count == 0 {
        analysis.warning("heading-structure", "page has no <h1>");
    } else if h1_count > 1 {
        let extra: Vec<String> = levels
            .iter()
            .filter(|(l, _)| *l == 1)
            .map(|(_, t)| t.clone())
            .collect();
        analysis.add_with_details(
            siteaudit_core::Severity::Warning,
            "heading-structure",
            format!("{h1_count} <h1> elements on one page"),
            extra,
        );
    }
    for window in levels.windows(2) {
        let (prev, _) = &window[0];
        let (next, text) = &window[1];
        if *next > prev + 1 {
            analysis.add_with_details(
                siteaudit_core::Severity::Warning,
                "heading-structure",
                format!("heading level jumps from h{prev} to h{next}"),
                vec![text.clone()],
            );
        }
    }
}

fn dom_depth(dom: &Html, analysis: &mut UrlAnalysis) {
    let mut max_depth = 0usize;
    for node in dom.root_element().descendants() {
        if ElementRef::wrap(node).is_some() {
            max_depth = max_depth.max(node.ancestors().count());
        }
    }
    if max_depth > MAX_DOM_DEPTH {
        analysis.warning(
            "dom-depth",
            format!("DOM nests {max_depth} levels deep (limit {MAX_DOM_DEPTH})"),
        );
    }
}

fn phone_numbers(dom: &Html, analysis: &mut UrlAnalysis) {
    let text: String = dom.root_element().text().collect::<Vec<_>>().join(" ");
    let in_text = PHONE_RE.find_iter(&text).count();
    if in_text == 0 {
        return;
    }
    let tel_links = Selector::parse("a[href^='tel:']")
        .map(|sel| dom.select(&sel).count())
        .unwrap_or(0);
    if tel_links == 0 {
        analysis.notice(
            "phone-numbers",
            format!("{in_text} phone numbers in text without tel: links"),
        );
    }
}

fn first_text(dom: &Html, selector: &str) -> String {
    Selector::parse(selector)
        .ok()
        .and_then(|sel| dom.select(&sel).next())
        .map(|el| {
            el.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

fn meta_description(dom: &Html) -> String {
    Selector::parse("meta[name='description']")
        .ok()
        .and_then(|sel| dom.select(&sel).next())
        .and_then(|el| el.value().attr("content"))
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn first_chars(text: &str, n: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(n)
        .collect()
}
