use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use siteaudit_core::{row, Column, SortDirection, SummaryItem, SummaryStatus, SuperTable};
use siteaudit_store::ResultStore;

use crate::Analyzer;

/// Cross-tabulates cache header facts against content types and hosts, and
/// reports lifetime statistics. Works entirely off the visited snapshot.
pub struct CachingAnalyzer;

#[async_trait]
impl Analyzer for CachingAnalyzer {
    fn name(&self) -> &'static str {
        "caching"
    }

    fn order(&self) -> i32 {
        70
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let visited = store.visited();

        let mut by_type: BTreeMap<(String, String), u64> = BTreeMap::new();
        let mut by_host: BTreeMap<(String, String), u64> = BTreeMap::new();
        let mut by_host_type: BTreeMap<(String, String, String), u64> = BTreeMap::new();
        let mut lifetimes: Vec<i64> = Vec::new();

        for v in visited.iter().filter(|v| v.is_success() || v.is_redirect()) {
            let label = v.cache_flags.label();
            let type_label = v.content_type.label().to_string();
            let host = v.host().to_string();
            *by_type.entry((type_label.clone(), label.clone())).or_insert(0) += 1;
            *by_host.entry((host.clone(), label.clone())).or_insert(0) += 1;
            *by_host_type.entry((host, type_label, label)).or_insert(0) += 1;
            if let Some(lifetime) = v.cache_lifetime {
                lifetimes.push(lifetime);
            }
        }

        let mut type_table = SuperTable::new(
            "caching-per-content-type",
            "Cache behavior by content type",
            vec![
                Column::new("type", "Content type"),
                Column::new("cache", "Cache headers"),
                Column::new("count", "URLs"),
            ],
        )
        .sorted_by("count", SortDirection::Desc);
        for ((type_label, cache), count) in &by_type {
            type_table.push_row(row! {
                "type" => type_label,
                "cache" => cache,
                "count" => *count,
            });
        }
        type_table.sort_rows();
        store.append_table(type_table);

        let mut host_table = SuperTable::new(
            "caching-per-host",
            "Cache behavior by host",
            vec![
                Column::new("host", "Host"),
                Column::new("cache", "Cache headers"),
                Column::new("count", "URLs"),
            ],
        )
        .sorted_by("count", SortDirection::Desc);
        for ((host, cache), count) in &by_host {
            host_table.push_row(row! {
                "host" => host,
                "cache" => cache,
                "count" => *count,
            });
        }
        host_table.sort_rows();
        store.append_table(host_table);

        let mut host_type_table = SuperTable::new(
            "caching-per-host-content-type",
            "Cache behavior by host and content type",
            vec![
                Column::new("host", "Host"),
                Column::new("type", "Content type"),
                Column::new("cache", "Cache headers"),
                Column::new("count", "URLs"),
            ],
        )
        .sorted_by("count", SortDirection::Desc);
        for ((host, type_label, cache), count) in &by_host_type {
            host_type_table.push_row(row! {
                "host" => host,
                "type" => type_label,
                "cache" => cache,
                "count" => *count,
            });
        }
        host_type_table.sort_rows();
        store.append_table(host_type_table);

        let (message, status) = if lifetimes.is_empty() {
            (
                "no cache lifetimes declared".to_string(),
                SummaryStatus::Notice,
            )
        } else {
            let min = lifetimes.iter().min().copied().unwrap_or(0);
            let max = lifetimes.iter().max().copied().unwrap_or(0);
            let avg = lifetimes.iter().sum::<i64>() / lifetimes.len() as i64;
            (
                format!(
                    "cache lifetime seconds: avg {avg}, min {min}, max {max} over {} URLs",
                    lifetimes.len()
                ),
                SummaryStatus::Ok,
            )
        };
        store.add_summary(SummaryItem {
            code: "caching".to_string(),
            message,
            status,
        });
        Ok(())
    }
}
