use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use siteaudit_core::{
    row, AuditConfig, Column, ContentTypeId, SortDirection, SummaryItem, SummaryStatus, SuperTable,
    UrlAnalysis,
};
use siteaudit_store::ResultStore;

use crate::{lock, Analyzer, PageView};

const TITLE_LENGTH_LIMIT: usize = 60;
const DESCRIPTION_LENGTH_LIMIT: usize = 160;

#[derive(Clone)]
struct SeoRow {
    url: String,
    title: String,
    description: String,
    keywords: String,
    h1: String,
    robots_meta: String,
    og: BTreeMap<String, String>,
    twitter: BTreeMap<String, String>,
    heading_outline: String,
    heading_errors: usize,
}

/// Per-page SEO and social metadata: title, description, keywords, H1,
/// Open Graph and Twitter tags, robots meta, and a heading tree annotated
/// with structural errors. Reads `analysis.max_heading_level`.
#[derive(Default)]
pub struct SeoAndOpenGraphAnalyzer {
    max_heading_level: Mutex<u8>,
    rows: Mutex<Vec<SeoRow>>,
}

#[async_trait]
impl Analyzer for SeoAndOpenGraphAnalyzer {
    fn name(&self) -> &'static str {
        "seo-opengraph"
    }

    fn order(&self) -> i32 {
        45
    }

    fn configure(&self, cfg: &AuditConfig) {
        *lock(&self.max_heading_level) = cfg.analysis.max_heading_level.clamp(1, 6);
    }

    fn extra_column(&self) -> Option<Column> {
        Some(Column::new("title", "Title"))
    }

    fn on_fetched(&self, page: &PageView<'_>) -> Result<Option<UrlAnalysis>> {
        if page.visited.content_type != ContentTypeId::Html || !page.visited.is_success() {
            return Ok(None);
        }
        let Some(dom) = page.dom else {
            return Ok(None);
        };
        let max_level = *lock(&self.max_heading_level);

        let title = first_text(dom, "title");
        let description = meta_content(dom, "meta[name='description']");
        let keywords = meta_content(dom, "meta[name='keywords']");
        let h1 = first_text(dom, "h1");
        let robots_meta = meta_content(dom, "meta[name='robots']");
        let og = property_map(dom, "meta[property]", "property", "og:");
        let twitter = property_map(dom, "meta[name]", "name", "twitter:");
        let (heading_outline, heading_errors) = heading_tree(dom, max_level);

        let mut analysis = UrlAnalysis::default();
        if title.is_empty() {
            analysis.warning("title", "page has no <title>");
        } else if title.chars().count() > TITLE_LENGTH_LIMIT {
            analysis.notice(
                "title",
                format!("title exceeds {TITLE_LENGTH_LIMIT} characters"),
            );
        } else {
            analysis.ok("title", "title present");
        }
        if description.is_empty() {
            analysis.warning("meta-description", "page has no meta description");
        } else if description.chars().count() > DESCRIPTION_LENGTH_LIMIT {
            analysis.notice(
                "meta-description",
                format!("description exceeds {DESCRIPTION_LENGTH_LIMIT} characters"),
            );
        } else {
            analysis.ok("meta-description", "description present");
        }
        if robots_meta.to_ascii_lowercase().contains("noindex") {
            analysis.warning("robots-meta", "page is marked noindex");
        }
        if heading_errors > 0 {
            analysis.notice(
                "heading-tree",
                format!("{heading_errors} structural errors in the heading tree"),
            );
        }

        lock(&self.rows).push(SeoRow {
            url: page.visited.url.to_string(),
            title,
            description,
            keywords,
            h1,
            robots_meta,
            og,
            twitter,
            heading_outline,
            heading_errors,
        });
        Ok(Some(analysis))
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let rows = lock(&self.rows).clone();

        let mut seo_table = SuperTable::new(
            "seo",
            "SEO metadata per page",
            vec![
                Column::new("url", "URL"),
                Column::new("title", "Title"),
                Column::new("description", "Description"),
                Column::new("keywords", "Keywords"),
                Column::new("h1", "H1"),
                Column::new("robots", "Robots meta"),
                Column::new("headings", "Heading tree"),
                Column::new("heading_errors", "Heading errors"),
            ],
        )
        .sorted_by("url", SortDirection::Asc);
        for r in &rows {
            seo_table.push_row(row! {
                "url" => &r.url,
                "title" => &r.title,
                "description" => &r.description,
                "keywords" => &r.keywords,
                "h1" => &r.h1,
                "robots" => &r.robots_meta,
                "headings" => &r.heading_outline,
                "heading_errors" => r.heading_errors,
            });
        }
        seo_table.sort_rows();
        store.append_table(seo_table);

        let mut og_table = SuperTable::new(
            "open-graph",
            "Open Graph and Twitter metadata",
            vec![
                Column::new("url", "URL"),
                Column::new("og_title", "og:title"),
                Column::new("og_description", "og:description"),
                Column::new("og_image", "og:image"),
                Column::new("twitter_card", "twitter:card"),
                Column::new("twitter_image", "twitter:image"),
            ],
        )
        .sorted_by("url", SortDirection::Asc);
        for r in &rows {
            og_table.push_row(row! {
                "url" => &r.url,
                "og_title" => r.og.get("og:title").cloned().unwrap_or_default(),
                "og_description" => r.og.get("og:description").cloned().unwrap_or_default(),
                "og_image" => r.og.get("og:image").cloned().unwrap_or_default(),
                "twitter_card" => r.twitter.get("twitter:card").cloned().unwrap_or_default(),
                "twitter_image" => r.twitter.get("twitter:image").cloned().unwrap_or_default(),
            });
        }
        og_table.sort_rows();
        store.append_table(og_table);

        let missing_titles = rows.iter().filter(|r| r.title.is_empty()).count();
        let missing_descriptions = rows.iter().filter(|r| r.description.is_empty()).count();
        let status = if missing_titles > 0 || missing_descriptions > 0 {
            SummaryStatus::Warning
        } else {
            SummaryStatus::Ok
        };
        store.add_summary(SummaryItem {
            code: "seo".to_string(),
            message: format!(
                "{} pages: {missing_titles} without title, {missing_descriptions} without description",
                rows.len()
            ),
            status,
        });
        Ok(())
    }
}

fn first_text(dom: &Html, selector: &str) -> String {
    Selector::parse(selector)
        .ok()
        .and_then(|sel| dom.select(&sel).next())
        .map(|el| collapse(&el.text().collect::<String>()))
        .unwrap_or_default()
}

fn meta_content(dom: &Html, selector: &str) -> String {
    Selector::parse(selector)
        .ok()
        .and_then(|sel| dom.select(&sel).next())
        .and_then(|el| el.value().attr("content"))
        .map(|c| collapse(c))
        .unwrap_or_default()
}

fn property_map(dom: &Html, selector: &str, attr: &str, prefix: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Ok(sel) = Selector::parse(selector) {
        for el in dom.select(&sel) {
            let Some(key) = el.value().attr(attr) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(content) = el.value().attr("content") {
                map.entry(key.to_string()).or_insert_with(|| content.to_string());
            }
        }
    }
    map
}

/// Document-order heading outline up to `max_level`, plus a structural
/// error count (first heading not h1, skipped levels).
fn heading_tree(dom: &Html, max_level: u8) -> (String, usize) {
    let mut lines = Vec::new();
    let mut errors = 0usize;
    let mut previous: Option<u8> = None;
    for node in dom.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let Some(level) = heading_level(el.value().name()) else {
            continue;
        };
        match previous {
            None if level != 1 => errors += 1,
            Some(prev) if level > prev + 1 => errors += 1,
            _ => {}
        }
        previous = Some(level);
        if level <= max_level {
            let text: String = collapse(&el.text().collect::<String>())
                .chars()
                .take(80)
                .collect();
            let indent = "  ".repeat((level - 1) as usize);
            lines.push(format!("{indent}h{level}: {text}"));
        }
    }
    (lines.join("\n"), errors)
}

fn heading_level(name: &str) -> Option<u8> {
    let level = name.strip_prefix('h')?.parse::<u8>().ok()?;
    (1..=6).contains(&level).then_some(level)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
