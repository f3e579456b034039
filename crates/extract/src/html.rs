use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use siteaudit_core::SourceAttr;

use crate::{css, resolve, Extraction};

/// `<link rel>` tokens worth following.
const FOLLOWED_LINK_RELS: &[&str] = &[
    "stylesheet",
    "icon",
    "shortcut",
    "apple-touch-icon",
    "mask-icon",
    "preload",
    "prefetch",
    "alternate",
    "canonical",
];

static META_REFRESH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*\d+\s*;\s*url\s*=\s*['\x22]?([^'\x22]+)").expect("meta refresh regex")
});

/// Extract links and extras from an already-parsed document. The DOM is
/// parsed once per page and shared with the per-URL analyzer hooks.
pub fn extract_document(dom: &Html, visited_url: &Url, scan_js_urls: bool) -> Extraction {
    let mut out = Extraction::default();
    let base = effective_base(dom, visited_url);

    if !dom.errors.is_empty() {
        out.notices
            .push(format!("lenient html parse recovered {} errors", dom.errors.len()));
    }

    anchors(dom, &base, &mut out);
    images(dom, &base, &mut out);
    media_sources(dom, &base, &mut out);
    scripts(dom, &base, scan_js_urls, &mut out);
    link_elements(dom, &base, &mut out);
    meta_refresh(dom, &base, &mut out);
    inline_styles(dom, &base, &mut out);
    forms(dom, &base, &mut out);
    social_images(dom, &base, &mut out);
    page_extras(dom, &mut out);

    out
}

/// `<base href>` overrides the visited URL for relative resolution.
fn effective_base(dom: &Html, visited_url: &Url) -> Url {
    selector("base[href]")
        .and_then(|s| dom.select(&s).next())
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| resolve(visited_url, href))
        .unwrap_or_else(|| visited_url.clone())
}

fn anchors(dom: &Html, base: &Url, out: &mut Extraction) {
    let Some(sel) = selector("a[href]") else {
        return;
    };
    for el in dom.select(&sel) {
        if let Some(url) = el.value().attr("href").and_then(|h| resolve(base, h)) {
            out.push(url, SourceAttr::AHref);
        }
    }
}

fn images(dom: &Html, base: &Url, out: &mut Extraction) {
    if let Some(sel) = selector("img[src]") {
        for el in dom.select(&sel) {
            if let Some(url) = el.value().attr("src").and_then(|s| resolve(base, s)) {
                out.push(url, SourceAttr::ImgSrc);
            }
        }
    }
    if let Some(sel) = selector("img[srcset], source[srcset]") {
        for el in dom.select(&sel) {
            for candidate in parse_srcset(el.value().attr("srcset").unwrap_or_default()) {
                if let Some(url) = resolve(base, &candidate) {
                    out.push(url, SourceAttr::ImgSrcset);
                }
            }
        }
    }
    if let Some(sel) = selector("input[type='image'][src]") {
        for el in dom.select(&sel) {
            if let Some(url) = el.value().attr("src").and_then(|s| resolve(base, s)) {
                out.push(url, SourceAttr::InputSrc);
            }
        }
    }
}

fn media_sources(dom: &Html, base: &Url, out: &mut Extraction) {
    let Some(sel) = selector("source[src], video[src], audio[src]") else {
        return;
    };
    for el in dom.select(&sel) {
        if let Some(url) = el.value().attr("src").and_then(|s| resolve(base, s)) {
            out.push(url, SourceAttr::SourceSrc);
        }
    }
}

fn scripts(dom: &Html, base: &Url, scan_js_urls: bool, out: &mut Extraction) {
    if let Some(sel) = selector("script[src]") {
        for el in dom.select(&sel) {
            if let Some(url) = el.value().attr("src").and_then(|s| resolve(base, s)) {
                out.push(url, SourceAttr::ScriptSrc);
            }
        }
    }
    if scan_js_urls {
        if let Some(sel) = selector("script") {
            for el in dom.select(&sel) {
                if el.value().attr("src").is_some() {
                    continue;
                }
                let code = el.text().collect::<String>();
                let inline = crate::js::extract(&code, base);
                out.links.extend(inline.links);
            }
        }
    }
}

fn link_elements(dom: &Html, base: &Url, out: &mut Extraction) {
    let Some(sel) = selector("link[href]") else {
        return;
    };
    for el in dom.select(&sel) {
        let rel = el.value().attr("rel").unwrap_or_default().to_ascii_lowercase();
        let rel_tokens: Vec<&str> = rel.split_whitespace().collect();
        let attr = if rel_tokens.contains(&"manifest") {
            SourceAttr::Manifest
        } else if rel_tokens.iter().any(|t| FOLLOWED_LINK_RELS.contains(t)) {
            SourceAttr::LinkHref
        } else {
            continue;
        };
        if let Some(url) = el.value().attr("href").and_then(|h| resolve(base, h)) {
            out.push(url, attr);
        }
    }
}

fn meta_refresh(dom: &Html, base: &Url, out: &mut Extraction) {
    let Some(sel) = selector("meta[http-equiv]") else {
        return;
    };
    for el in dom.select(&sel) {
        let equiv = el.value().attr("http-equiv").unwrap_or_default();
        if !equiv.eq_ignore_ascii_case("refresh") {
            continue;
        }
        let content = el.value().attr("content").unwrap_or_default();
        if let Some(cap) = META_REFRESH_RE.captures(content) {
            if let Some(url) = resolve(base, &cap[1]) {
                out.push(url, SourceAttr::MetaRedirect);
            }
        }
    }
}

/// `url(...)` inside `<style>` blocks and style attributes.
fn inline_styles(dom: &Html, base: &Url, out: &mut Extraction) {
    if let Some(sel) = selector("style") {
        for el in dom.select(&sel) {
            let text = el.text().collect::<String>();
            let found = css::extract(&text, base);
            out.links.extend(found.links);
        }
    }
    if let Some(sel) = selector("[style]") {
        for el in dom.select(&sel) {
            let style = el.value().attr("style").unwrap_or_default();
            if style.contains("url(") {
                let found = css::extract(style, base);
                out.links.extend(found.links);
            }
        }
    }
}

/// Form actions are collected for reporting; scope rules apply as usual.
fn forms(dom: &Html, base: &Url, out: &mut Extraction) {
    let Some(sel) = selector("form[action]") else {
        return;
    };
    for el in dom.select(&sel) {
        if let Some(url) = el.value().attr("action").and_then(|a| resolve(base, a)) {
            out.push(url, SourceAttr::Other);
        }
    }
}

fn social_images(dom: &Html, base: &Url, out: &mut Extraction) {
    let Some(sel) = selector(
        "meta[property='og:image'], meta[name='twitter:image'], meta[name='twitter:image:src']",
    ) else {
        return;
    };
    for el in dom.select(&sel) {
        if let Some(url) = el.value().attr("content").and_then(|c| resolve(base, c)) {
            out.push(url, SourceAttr::Other);
        }
    }
}

fn page_extras(dom: &Html, out: &mut Extraction) {
    if let Some(title) = selector("title")
        .and_then(|s| dom.select(&s).next())
        .map(element_text)
    {
        if !title.is_empty() {
            out.extras.insert("Title".to_string(), title);
        }
    }
    if let Some(description) = selector("meta[name='description']")
        .and_then(|s| dom.select(&s).next())
        .and_then(|el| el.value().attr("content").map(str::to_string))
    {
        out.extras.insert("Description".to_string(), description);
    }
    if let Some(h1) = selector("h1").and_then(|s| dom.select(&s).next()).map(element_text) {
        if !h1.is_empty() {
            out.extras.insert("H1".to_string(), h1);
        }
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a srcset value into candidate URLs, dropping width/density
/// descriptors.
fn parse_srcset(srcset: &str) -> Vec<String> {
    srcset
        .split(',')
        .filter_map(|entry| entry.split_whitespace().next())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}
