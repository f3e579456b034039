use anyhow::Result;
use async_trait::async_trait;

use siteaudit_core::{row, Column, SortDirection, SummaryItem, SummaryStatus, SuperTable};
use siteaudit_store::ResultStore;

use crate::Analyzer;

/// Broken links: every visited URL that answered 404, with the page it was
/// found on so the dead reference can be removed.
pub struct Page404Analyzer;

#[async_trait]
impl Analyzer for Page404Analyzer {
    fn name(&self) -> &'static str {
        "page-404"
    }

    fn order(&self) -> i32 {
        31
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let mut table = SuperTable::new(
            "page-404",
            "404 Not Found",
            vec![
                Column::new("url", "URL"),
                Column::new("found_on", "Found on"),
                Column::new("source", "Source"),
            ],
        )
        .sorted_by("url", SortDirection::Asc);

        let mut count = 0usize;
        for visited in store.visited() {
            if visited.status != 404 {
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
                "found_on" => found_on,
                "source" => visited.source_attr.as_str(),
            });
        }
        table.sort_rows();
        store.append_table(table);

        let (message, status) = if count == 0 {
            ("no broken links".to_string(), SummaryStatus::Ok)
        } else {
            (format!("{count} URLs answered 404"), SummaryStatus::Critical)
        };
        store.add_summary(SummaryItem {
            code: "page-404".to_string(),
            message,
            status,
        });
        Ok(())
    }
}
