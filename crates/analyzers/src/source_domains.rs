use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use siteaudit_core::{row, Column, SortDirection, SummaryItem, SummaryStatus, SuperTable};
use siteaudit_store::ResultStore;

use crate::Analyzer;

#[derive(Default)]
struct HostStat {
    count: u64,
    bytes: u64,
    time_ms: u64,
    errors: u64,
    external: bool,
}

/// Per-host traffic: where the bytes and the failures actually came from.
pub struct SourceDomainsAnalyzer;

#[async_trait]
impl Analyzer for SourceDomainsAnalyzer {
    fn name(&self) -> &'static str {
        "source-domains"
    }

    fn order(&self) -> i32 {
        65
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let mut hosts: BTreeMap<String, HostStat> = BTreeMap::new();
        for visited in store.visited() {
            let stat = hosts.entry(visited.host().to_string()).or_default();
            stat.count += 1;
            stat.bytes += visited.size;
            stat.time_ms += visited.request_time_ms;
            if visited.status < 0 || visited.status >= 400 {
                stat.errors += 1;
            }
            stat.external |= visited.is_external;
        }

        let mut table = SuperTable::new(
            "source-domains",
            "Traffic by source host",
            vec![
                Column::new("host", "Host"),
                Column::new("count", "URLs"),
                Column::new("bytes", "Bytes"),
                Column::new("avg_ms", "Avg time (ms)"),
                Column::new("errors", "Errors"),
                Column::new("external", "External"),
            ],
        )
        .sorted_by("count", SortDirection::Desc);
        for (host, stat) in &hosts {
            table.push_row(row! {
                "host" => host,
                "count" => stat.count,
                "bytes" => stat.bytes,
                "avg_ms" => if stat.count > 0 { stat.time_ms / stat.count } else { 0 },
                "errors" => stat.errors,
                "external" => if stat.external { "yes" } else { "no" },
            });
        }
        table.sort_rows();
        store.append_table(table);

        store.add_summary(SummaryItem {
            code: "source-domains".to_string(),
            message: format!("content served from {} hosts", hosts.len()),
            status: SummaryStatus::Info,
        });
        Ok(())
    }
}
