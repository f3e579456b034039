use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use siteaudit_core::{row, Column, SortDirection, SummaryItem, SummaryStatus, SuperTable};
use siteaudit_store::ResultStore;

use crate::Analyzer;

/// Summarizes the skipped-URL log by `(host, reason)` so scope and policy
/// decisions stay visible in the report.
pub struct SkippedUrlsAnalyzer;

#[async_trait]
impl Analyzer for SkippedUrlsAnalyzer {
    fn name(&self) -> &'static str {
        "skipped-urls"
    }

    fn order(&self) -> i32 {
        80
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let skipped = store.skipped();
        let mut groups: BTreeMap<(String, &'static str), usize> = BTreeMap::new();
        for entry in &skipped {
            let host = entry.url.host_str().unwrap_or("").to_string();
            *groups.entry((host, entry.reason.as_str())).or_insert(0) += 1;
        }

        let mut table = SuperTable::new(
            "skipped-urls",
            "Skipped URLs by host and reason",
            vec![
                Column::new("host", "Host"),
                Column::new("reason", "Reason"),
                Column::new("count", "URLs"),
            ],
        )
        .sorted_by("count", SortDirection::Desc);
        for ((host, reason), count) in &groups {
            table.push_row(row! {
                "host" => host,
                "reason" => *reason,
                "count" => *count,
            });
        }
        table.sort_rows();
        store.append_table(table);

        store.add_summary(SummaryItem {
            code: "skipped-urls".to_string(),
            message: format!(
                "{} URLs skipped across {} host/reason groups",
                skipped.len(),
                groups.len()
            ),
            status: SummaryStatus::Info,
        });
        Ok(())
    }
}
