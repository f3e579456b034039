use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use siteaudit_core::{row, Column, ContentTypeId, SortDirection, SummaryItem, SummaryStatus, SuperTable};
use siteaudit_store::ResultStore;

use crate::Analyzer;

#[derive(Default)]
struct Bucket {
    count: u64,
    bytes: u64,
    time_ms: u64,
    ok_2xx: u64,
    redirect_3xx: u64,
    client_4xx: u64,
    server_5xx: u64,
    failed: u64,
}

impl Bucket {
    fn add(&mut self, status: i32, size: u64, time_ms: u64) {
        self.count += 1;
        self.bytes += size;
        self.time_ms += time_ms;
        match status {
            200..=299 => self.ok_2xx += 1,
            300..=399 => self.redirect_3xx += 1,
            400..=499 => self.client_4xx += 1,
            500..=599 => self.server_5xx += 1,
            _ => self.failed += 1,
        }
    }
}

/// Totals, sizes, times and status histograms per content type.
pub struct ContentTypeAnalyzer;

#[async_trait]
impl Analyzer for ContentTypeAnalyzer {
    fn name(&self) -> &'static str {
        "content-types"
    }

    fn order(&self) -> i32 {
        64
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let mut buckets: BTreeMap<ContentTypeId, Bucket> = BTreeMap::new();
        for visited in store.visited() {
            buckets
                .entry(visited.content_type)
                .or_default()
                .add(visited.status, visited.size, visited.request_time_ms);
        }

        let mut table = SuperTable::new(
            "content-types",
            "Traffic by content type",
            vec![
                Column::new("type", "Content type"),
                Column::new("count", "URLs"),
                Column::new("bytes", "Bytes"),
                Column::new("avg_ms", "Avg time (ms)"),
                Column::new("s2xx", "2xx"),
                Column::new("s3xx", "3xx"),
                Column::new("s4xx", "4xx"),
                Column::new("s5xx", "5xx"),
                Column::new("failed", "Failed"),
            ],
        )
        .sorted_by("count", SortDirection::Desc);
        for (id, bucket) in &buckets {
            table.push_row(row! {
                "type" => id.label(),
                "count" => bucket.count,
                "bytes" => bucket.bytes,
                "avg_ms" => if bucket.count > 0 { bucket.time_ms / bucket.count } else { 0 },
                "s2xx" => bucket.ok_2xx,
                "s3xx" => bucket.redirect_3xx,
                "s4xx" => bucket.client_4xx,
                "s5xx" => bucket.server_5xx,
                "failed" => bucket.failed,
            });
        }
        table.sort_rows();
        store.append_table(table);

        let total_bytes: u64 = buckets.values().map(|b| b.bytes).sum();
        store.add_summary(SummaryItem {
            code: "content-types".to_string(),
            message: format!("{} content types, {total_bytes} bytes total", buckets.len()),
            status: SummaryStatus::Info,
        });
        Ok(())
    }
}
