use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use siteaudit_core::{row, Column, SortDirection, SummaryItem, SummaryStatus, SuperTable, UrlAnalysis};
use siteaudit_store::ResultStore;

use crate::{lock, Analyzer, PageView};

/// Values of these headers are unique per response; counting them is
/// useful, keeping them is noise.
const NOISY_HEADERS: &[&str] = &["etag", "cf-ray", "set-cookie", "content-disposition"];
const DATE_HEADERS: &[&str] = &["date", "expires", "last-modified"];
const NUMERIC_HEADERS: &[&str] = &["content-length", "age"];
const MAX_UNIQUE_VALUES: usize = 20;

#[derive(Default, Clone)]
struct HeaderStat {
    occurrences: u64,
    values: BTreeSet<String>,
    values_overflowed: bool,
    min_date: Option<DateTime<FixedOffset>>,
    max_date: Option<DateTime<FixedOffset>>,
    min_number: Option<i64>,
    max_number: Option<i64>,
}

/// Aggregates response-header occurrences across the whole crawl: counts,
/// unique values (capped), and min/max for date- and number-typed headers.
#[derive(Default)]
pub struct HeadersAnalyzer {
    stats: Mutex<BTreeMap<String, HeaderStat>>,
}

#[async_trait]
impl Analyzer for HeadersAnalyzer {
    fn name(&self) -> &'static str {
        "headers"
    }

    fn order(&self) -> i32 {
        60
    }

    fn on_fetched(&self, page: &PageView<'_>) -> Result<Option<UrlAnalysis>> {
        let mut stats = lock(&self.stats);
        for (name, value) in page.headers {
            let stat = stats.entry(name.clone()).or_default();
            stat.occurrences += 1;
            if NOISY_HEADERS.contains(&name.as_str()) {
                // counted, not kept
            } else if stat.values.len() < MAX_UNIQUE_VALUES {
                stat.values.insert(value.clone());
            } else if !stat.values.contains(value) {
                stat.values_overflowed = true;
            }
            if DATE_HEADERS.contains(&name.as_str()) {
                if let Ok(date) = DateTime::parse_from_rfc2822(value) {
                    stat.min_date = Some(stat.min_date.map_or(date, |d| d.min(date)));
                    stat.max_date = Some(stat.max_date.map_or(date, |d| d.max(date)));
                }
            }
            if NUMERIC_HEADERS.contains(&name.as_str()) {
                if let Ok(number) = value.trim().parse::<i64>() {
                    stat.min_number = Some(stat.min_number.map_or(number, |n| n.min(number)));
                    stat.max_number = Some(stat.max_number.map_or(number, |n| n.max(number)));
                }
            }
        }
        Ok(None)
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let stats = lock(&self.stats).clone();
        let mut table = SuperTable::new(
            "headers",
            "Response headers",
            vec![
                Column::new("header", "Header"),
                Column::new("occurrences", "Occurrences"),
                Column::new("unique", "Unique values"),
                Column::new("values", "Values"),
                Column::new("min", "Min"),
                Column::new("max", "Max"),
            ],
        )
        .sorted_by("header", SortDirection::Asc);

        for (name, stat) in &stats {
            let unique = if stat.values_overflowed {
                format!("{}+", stat.values.len())
            } else {
                stat.values.len().to_string()
            };
            let (min, max) = if let (Some(min), Some(max)) = (stat.min_number, stat.max_number) {
                (min.to_string(), max.to_string())
            } else if let (Some(min), Some(max)) = (stat.min_date, stat.max_date) {
                (min.to_rfc2822(), max.to_rfc2822())
            } else {
                (String::new(), String::new())
            };
            table.push_row(row! {
                "header" => name,
                "occurrences" => stat.occurrences,
                "unique" => unique,
                "values" => stat.values.iter().cloned().collect::<Vec<_>>().join(" | "),
                "min" => min,
                "max" => max,
            });
        }
        table.sort_rows();
        store.append_table(table);

        store.add_summary(SummaryItem {
            code: "headers".to_string(),
            message: format!("{} distinct response headers observed", stats.len()),
            status: SummaryStatus::Info,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{page_view, visited};
    use siteaudit_core::ContentTypeId;

    fn feed(analyzer: &HeadersAnalyzer, headers: Vec<(String, String)>) {
        let v = visited("https://ex.com/", 200, ContentTypeId::Html);
        analyzer
            .on_fetched(&page_view(&v, None, &headers))
            .expect("hook succeeds");
    }

    #[tokio::test]
    async fn counts_and_min_max() {
        let analyzer = HeadersAnalyzer::default();
        feed(
            &analyzer,
            vec![
                ("server".to_string(), "nginx".to_string()),
                ("content-length".to_string(), "100".to_string()),
                ("date".to_string(), "Sun, 06 Nov 1994 08:49:37 GMT".to_string()),
            ],
        );
        feed(
            &analyzer,
            vec![
                ("server".to_string(), "nginx".to_string()),
                ("content-length".to_string(), "50".to_string()),
                ("date".to_string(), "Mon, 07 Nov 1994 08:49:37 GMT".to_string()),
            ],
        );
        let store = ResultStore::new(1024);
        analyzer.finalize(&store).await.expect("finalize succeeds");
        let table = store.table_by_code("headers").expect("table");

        let server = table
            .rows
            .iter()
            .find(|r| r.get("header").and_then(|v| v.as_str()) == Some("server"))
            .expect("server row");
        assert_eq!(server.get("occurrences").and_then(|v| v.as_i64()), Some(2));
        assert_eq!(server.get("unique").and_then(|v| v.as_str()), Some("1"));

        let length = table
            .rows
            .iter()
            .find(|r| r.get("header").and_then(|v| v.as_str()) == Some("content-length"))
            .expect("content-length row");
        assert_eq!(length.get("min").and_then(|v| v.as_str()), Some("50"));
        assert_eq!(length.get("max").and_then(|v| v.as_str()), Some("100"));

        let date = table
            .rows
            .iter()
            .find(|r| r.get("header").and_then(|v| v.as_str()) == Some("date"))
            .expect("date row");
        assert!(date
            .get("min")
            .and_then(|v| v.as_str())
            .is_some_and(|s| s.contains("6 Nov 1994")));
    }

    #[tokio::test]
    async fn noisy_header_values_are_counted_not_kept() {
        let analyzer = HeadersAnalyzer::default();
        for i in 0..3 {
            feed(
                &analyzer,
                vec![("set-cookie".to_string(), format!("session={i}"))],
            );
        }
        let store = ResultStore::new(1024);
        analyzer.finalize(&store).await.expect("finalize succeeds");
        let table = store.table_by_code("headers").expect("table");
        let cookie = &table.rows[0];
        assert_eq!(cookie.get("occurrences").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(cookie.get("values").and_then(|v| v.as_str()), Some(""));
    }

    #[tokio::test]
    async fn unique_values_cap_at_twenty() {
        let analyzer = HeadersAnalyzer::default();
        for i in 0..25 {
            feed(&analyzer, vec![("x-request-path".to_string(), format!("/p{i}"))]);
        }
        let store = ResultStore::new(1024);
        analyzer.finalize(&store).await.expect("finalize succeeds");
        let table = store.table_by_code("headers").expect("table");
        assert_eq!(
            table.rows[0].get("unique").and_then(|v| v.as_str()),
            Some("20+")
        );
    }
}
