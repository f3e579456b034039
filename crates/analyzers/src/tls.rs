use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use siteaudit_core::{row, AuditConfig, Column, SortDirection, SummaryItem, SummaryStatus, SuperTable};
use siteaudit_fetch::tls;
use siteaudit_store::ResultStore;

use crate::{lock, Analyzer};

/// Raw-handshake TLS probe of the seed origin: negotiated protocol and
/// cipher, per-version support, certificate chain shape. Reads `seed_url`;
/// only activates for https seeds. Out-of-band like the DNS probe.
#[derive(Default)]
pub struct SslTlsAnalyzer {
    seed: Mutex<Option<Url>>,
}

#[async_trait]
impl Analyzer for SslTlsAnalyzer {
    fn name(&self) -> &'static str {
        "ssl-tls"
    }

    fn order(&self) -> i32 {
        11
    }

    fn should_activate(&self, cfg: &AuditConfig) -> bool {
        Url::parse(&cfg.seed_url)
            .map(|u| u.scheme() == "https")
            .unwrap_or(false)
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

        match tls::probe(&host, port).await {
            Ok(probe) => {
                let mut table = SuperTable::new(
                    "ssl-tls",
                    "TLS configuration",
                    vec![Column::new("key", "Property"), Column::new("value", "Value")],
                )
                .sorted_by("key", SortDirection::Asc);
                table.push_row(row! {"key" => "host", "value" => &probe.host});
                table.push_row(row! {
                    "key" => "negotiated-protocol",
                    "value" => probe.negotiated_protocol.clone().unwrap_or_default(),
                });
                table.push_row(row! {
                    "key" => "negotiated-cipher",
                    "value" => probe.negotiated_cipher.clone().unwrap_or_default(),
                });
                table.push_row(row! {"key" => "tls1.2-supported", "value" => probe.tls12_supported});
                table.push_row(row! {"key" => "tls1.3-supported", "value" => probe.tls13_supported});
                table.push_row(row! {"key" => "certificate-chain-length", "value" => probe.certificate_chain_len});
                table.push_row(row! {"key" => "leaf-certificate-bytes", "value" => probe.leaf_certificate_bytes});
                table.push_row(row! {"key" => "handshake-ms", "value" => probe.handshake_ms});
                table.sort_rows();
                store.append_table(table);

                let (message, status) = if probe.tls13_supported {
                    (
                        format!("{host} negotiates {}", probe.negotiated_protocol.as_deref().unwrap_or("TLS")),
                        SummaryStatus::Ok,
                    )
                } else if probe.tls12_supported {
                    (
                        format!("{host} supports TLS 1.2 but not TLS 1.3"),
                        SummaryStatus::Notice,
                    )
                } else {
                    (
                        format!("{host} negotiated an unexpected protocol set"),
                        SummaryStatus::Warning,
                    )
                };
                store.add_summary(SummaryItem {
                    code: "ssl-tls".to_string(),
                    message,
                    status,
                });
            }
            Err(e) => {
                store.add_summary(SummaryItem {
                    code: "ssl-tls".to_string(),
                    message: format!("TLS probe of {host}:{port} failed: {e}"),
                    status: SummaryStatus::Warning,
                });
            }
        }
        Ok(())
    }
}
