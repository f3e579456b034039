use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use siteaudit_core::{ContentTypeId, SummaryItem, SummaryStatus, UrlAnalysis};
use siteaudit_store::ResultStore;

use crate::{lock, Analyzer, PageView};

#[derive(Default)]
struct Totals {
    pages: u64,
    missing_alt: u64,
    unlabeled_controls: u64,
    unnamed_interactive: u64,
    bare_landmarks: u64,
    missing_lang: u64,
}

/// WCAG-adjacent checks on every HTML page: alt text, form labels,
/// accessible names on interactive elements, landmark roles, document
/// language.
#[derive(Default)]
pub struct AccessibilityAnalyzer {
    totals: Mutex<Totals>,
}

#[async_trait]
impl Analyzer for AccessibilityAnalyzer {
    fn name(&self) -> &'static str {
        "accessibility"
    }

    fn order(&self) -> i32 {
        51
    }

    fn on_fetched(&self, page: &PageView<'_>) -> Result<Option<UrlAnalysis>> {
        if page.visited.content_type != ContentTypeId::Html || !page.visited.is_success() {
            return Ok(None);
        }
        let Some(dom) = page.dom else {
            return Ok(None);
        };

        let mut analysis = UrlAnalysis::default();
        let mut totals = lock(&self.totals);
        totals.pages += 1;

        let missing_alt = count(dom, "img", |el| el.value().attr("alt").is_none());
        if missing_alt > 0 {
            totals.missing_alt += missing_alt as u64;
            analysis.warning("missing-alt", format!("{missing_alt} images without alt text"));
        } else if count(dom, "img", |_| true) > 0 {
            analysis.ok("missing-alt", "all images carry alt text");
        }

        let unlabeled = unlabeled_controls(dom);
        if unlabeled > 0 {
            totals.unlabeled_controls += unlabeled as u64;
            analysis.warning(
                "unlabeled-controls",
                format!("{unlabeled} form controls without an associated label"),
            );
        }

        let unnamed = unnamed_interactive(dom);
        if unnamed > 0 {
            totals.unnamed_interactive += unnamed as u64;
            analysis.warning(
                "unnamed-interactive",
                format!("{unnamed} interactive elements without an accessible name"),
            );
        }

        let bare = count(dom, "header, footer, nav, main, aside", |el| {
            el.value().attr("role").is_none()
        });
        if bare > 0 {
            totals.bare_landmarks += bare as u64;
            analysis.notice("landmark-roles", format!("{bare} landmark tags without a role"));
        }

        let lang_missing = Selector::parse("html")
            .ok()
            .and_then(|sel| dom.select(&sel).next())
            .map(|el| el.value().attr("lang").map(str::trim).unwrap_or("").is_empty())
            .unwrap_or(true);
        if lang_missing {
            totals.missing_lang += 1;
            analysis.warning("document-language", "<html> lang attribute missing or empty");
        } else {
            analysis.ok("document-language", "document language declared");
        }

        Ok(Some(analysis))
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let totals = lock(&self.totals);
        let problems = totals.missing_alt
            + totals.unlabeled_controls
            + totals.unnamed_interactive
            + totals.missing_lang;
        let status = if problems == 0 {
            SummaryStatus::Ok
        } else {
            SummaryStatus::Warning
        };
        store.add_summary(SummaryItem {
            code: "accessibility".to_string(),
            message: format!(
                "{} pages checked: {} missing alt, {} unlabeled controls, {} unnamed interactive, {} pages without lang",
                totals.pages,
                totals.missing_alt,
                totals.unlabeled_controls,
                totals.unnamed_interactive,
                totals.missing_lang
            ),
            status,
        });
        Ok(())
    }
}

fn count(dom: &Html, selector: &str, pred: impl Fn(&ElementRef<'_>) -> bool) -> usize {
    Selector::parse(selector)
        .map(|sel| dom.select(&sel).filter(|el| pred(el)).count())
        .unwrap_or(0)
}

/// Inputs, selects and textareas that have neither a `<label for>` pointing
/// at them nor an aria label.
fn unlabeled_controls(dom: &Html) -> usize {
    let labeled_ids: HashSet<String> = Selector::parse("label[for]")
        .map(|sel| {
            dom.select(&sel)
                .filter_map(|el| el.value().attr("for").map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    count(dom, "input, select, textarea", |el| {
        let ty = el.value().attr("type").unwrap_or("text").to_ascii_lowercase();
        if matches!(ty.as_str(), "hidden" | "submit" | "button" | "reset" | "image") {
            return false;
        }
        let has_label = el
            .value()
            .attr("id")
            .is_some_and(|id| labeled_ids.contains(id));
        let has_aria = el.value().attr("aria-label").is_some()
            || el.value().attr("aria-labelledby").is_some();
        !has_label && !has_aria
    })
}

/// Buttons and links with no text content and no aria name (icon buttons).
fn unnamed_interactive(dom: &Html) -> usize {
    count(dom, "a, button", |el| {
        let has_text = !el.text().collect::<String>().trim().is_empty();
        let has_aria = el.value().attr("aria-label").is_some()
            || el.value().attr("aria-labelledby").is_some()
            || el.value().attr("title").is_some();
        !has_text && !has_aria
    })
}
