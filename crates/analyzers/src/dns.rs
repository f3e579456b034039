use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use siteaudit_core::{row, AuditConfig, Column, SortDirection, SummaryItem, SummaryStatus, SuperTable};
use siteaudit_fetch::dns;
use siteaudit_store::ResultStore;

use crate::{lock, Analyzer};

/// Out-of-band DNS probe of the seed host using the platform resolver.
/// Reads `seed_url`. Never on the fetch path; runs once at finalize.
#[derive(Default)]
pub struct DnsAnalyzer {
    seed: Mutex<Option<Url>>,
}

#[async_trait]
impl Analyzer for DnsAnalyzer {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn order(&self) -> i32 {
        10
    }

    fn configure(&self, cfg: &AuditConfig) {
        *lock(&self.seed) = Url::parse(&cfg.seed_url).ok();
    }

    async fn finalize(&self, store: &ResultStore) -> Result<()> {
        let Some(seed) = lock(&self.seed).clone() else {
            return Ok(());
        };
        let Some(host) = seed.host_str().map(str::to_string) else {
            return Ok(());
        };
        let port = seed.port_or_known_default().unwrap_or(443);

        match dns::probe(&host, port).await {
            Ok(probe) => {
                let mut table = SuperTable::new(
                    "dns",
                    "DNS resolution",
                    vec![
                        Column::new("host", "Host"),
                        Column::new("record", "Record"),
                        Column::new("address", "Address"),
                    ],
                )
                .sorted_by("record", SortDirection::Asc);
                for ip in &probe.ipv4 {
                    table.push_row(row! {"host" => &probe.host, "record" => "A", "address" => ip.to_string()});
                }
                for ip in &probe.ipv6 {
                    table.push_row(row! {"host" => &probe.host, "record" => "AAAA", "address" => ip.to_string()});
                }
                table.sort_rows();
                store.append_table(table);

                store.add_summary(SummaryItem {
                    code: "dns-ipv4".to_string(),
                    message: if probe.ipv4.is_empty() {
                        format!("{host} has no IPv4 address")
                    } else {
                        format!("{host} resolves to {} IPv4 addresses in {} ms", probe.ipv4.len(), probe.resolve_ms)
                    },
                    status: if probe.ipv4.is_empty() {
                        SummaryStatus::Warning
                    } else {
                        SummaryStatus::Ok
                    },
                });
                store.add_summary(SummaryItem {
                    code: "dns-ipv6".to_string(),
                    message: if probe.ipv6.is_empty() {
                        format!("{host} has no IPv6 address")
                    } else {
                        format!("{host} resolves to {} IPv6 addresses", probe.ipv6.len())
                    },
                    status: if probe.ipv6.is_empty() {
                        SummaryStatus::Notice
                    } else {
                        SummaryStatus::Ok
                    },
                });
            }
            Err(e) => {
                store.add_summary(SummaryItem {
                    code: "dns-ipv4".to_string(),
                    message: format!("DNS resolution of {host} failed: {e}"),
                    status: SummaryStatus::Critical,
                });
            }
        }
        Ok(())
    }
}
