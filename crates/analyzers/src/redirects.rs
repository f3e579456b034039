use anyhow::Result;
use async_trait::async_trait;

use siteaudit_core::{
    row, Column, SortDirection, SummaryItem, SummaryStatus, SuperTable,
};
use siteaudit_store::ResultStore;

use crate::Analyzer;

/// Collects 301-308 responses into a from → to table, with the page that
/// linked to the redirecting URL when known.
pub struct RedirectsAnalyzer;

#[async_trait]
impl Analyzer for RedirectsAnalyzer {
    fn name(&self) -> &'static str {
        "redirects"
    }

    fn order(&self) -> i32 {
        30
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let mut table = SuperTable::new(
            "redirects",
            "Redirected URLs",
            vec![
                Column::new("url", "URL"),
                Column::new("status", "Status"),
                Column::new("target", "Target"),
                Column::new("found_on", "Found on"),
            ],
        )
        .sorted_by("url", SortDirection::Asc);

        let mut count = 0usize;
        for visited in store.visited() {
            if !(301..=308).contains(&visited.status) {
                continue;
            }
            count += 1;
            let found_on = visited
                .source_fingerprint
                .and_then(|fp| store.url_of(&fp))
                .map(|u| u.to_string())
                .unwrap_or_default();
            table.push_row(row! {
                "url" => visited.url.as_str(),
                "status" => visited.status,
                "target" => visited.extras.get("Location").cloned().unwrap_or_default(),
                "found_on" => found_on,
            });
        }
        table.sort_rows();
        store.append_table(table);

        let (message, status) = if count == 0 {
            ("no redirects encountered".to_string(), SummaryStatus::Ok)
        } else {
            (format!("{count} redirected URLs"), SummaryStatus::Notice)
        };
        store.add_summary(SummaryItem {
            code: "redirects".to_string(),
            message,
            status,
        });
        Ok(())
    }
}
