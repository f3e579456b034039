use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use siteaudit_core::{
    row, AuditConfig, Column, ContentTypeId, SortDirection, SummaryItem, SummaryStatus, SuperTable,
};
use siteaudit_store::ResultStore;

use crate::{lock, Analyzer};

/// Request-time classification thresholds in milliseconds.
const FAST_MS: u64 = 500;
const ACCEPTABLE_MS: u64 = 1_000;
const SLOW_MS: u64 = 2_000;

/// Top-K fastest and slowest HTML pages, plus summary ranges from the
/// threshold classification. Reads `analysis.top_count`.
#[derive(Default)]
pub struct TimingAnalyzer {
    top_count: Mutex<usize>,
}

#[async_trait]
impl Analyzer for TimingAnalyzer {
    fn name(&self) -> &'static str {
        "fastest-slowest"
    }

    fn order(&self) -> i32 {
        40
    }

    fn configure(&self, cfg: &AuditConfig) {
        *lock(&self.top_count) = cfg.analysis.top_count;
    }

    fn extra_column(&self) -> Option<Column> {
        Some(Column::new("request_time_ms", "Request time (ms)"))
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let top_count = (*lock(&self.top_count)).max(1);
        let mut pages: Vec<(String, u64)> = store
            .visited()
            .iter()
            .filter(|v| v.content_type == ContentTypeId::Html && v.is_success())
            .map(|v| (v.url.to_string(), v.request_time_ms))
            .collect();

        pages.sort_by_key(|(_, ms)| *ms);
        let fastest: Vec<_> = pages.iter().take(top_count).cloned().collect();
        let slowest: Vec<_> = pages.iter().rev().take(top_count).cloned().collect();

        for (code, title, rows, direction) in [
            ("fastest-urls", "Fastest pages", fastest, SortDirection::Asc),
            ("slowest-urls", "Slowest pages", slowest, SortDirection::Desc),
        ] {
            let mut table = SuperTable::new(
                code,
                title,
                vec![
                    Column::new("url", "URL"),
                    Column::new("request_time_ms", "Request time (ms)"),
                ],
            )
            .sorted_by("request_time_ms", direction);
            for (url, ms) in rows {
                table.push_row(row! {
                    "url" => url,
                    "request_time_ms" => ms,
                });
            }
            table.sort_rows();
            store.append_table(table);
        }

        let mut fast = 0usize;
        let mut acceptable = 0usize;
        let mut slow = 0usize;
        let mut very_slow = 0usize;
        for (_, ms) in &pages {
            match *ms {
                t if t < FAST_MS => fast += 1,
                t if t < ACCEPTABLE_MS => acceptable += 1,
                t if t < SLOW_MS => slow += 1,
                _ => very_slow += 1,
            }
        }
        let status = if very_slow > 0 {
            SummaryStatus::Critical
        } else if slow > 0 {
            SummaryStatus::Warning
        } else if acceptable > 0 {
            SummaryStatus::Notice
        } else {
            SummaryStatus::Ok
        };
        store.add_summary(SummaryItem {
            code: "request-time".to_string(),
            message: format!(
                "page request times: {fast} under {FAST_MS} ms, {acceptable} under {ACCEPTABLE_MS} ms, {slow} under {SLOW_MS} ms, {very_slow} slower"
            ),
            status,
        });
        Ok(())
    }
}
