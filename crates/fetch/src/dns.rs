use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use tracing::debug;

use siteaudit_core::CrawlError;

/// What the platform resolver knows about a host. Out-of-band: this runs at
/// finalize, never on the fetch path.
#[derive(Debug, Clone)]
pub struct DnsProbe {
    pub host: String,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
    pub resolve_ms: u64,
}

pub async fn probe(host: &str, port: u16) -> Result<DnsProbe, CrawlError> {
    let started = Instant::now();
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| CrawlError::Network(format!("dns lookup {host}: {e}")))?;
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();
    for addr in addrs {
        match addr.ip() {
            IpAddr::V4(ip) => {
                if !ipv4.contains(&ip) {
                    ipv4.push(ip);
                }
            }
            IpAddr::V6(ip) => {
                if !ipv6.contains(&ip) {
                    ipv6.push(ip);
                }
            }
        }
    }
    let resolve_ms = started.elapsed().as_millis() as u64;
    debug!(host, v4 = ipv4.len(), v6 = ipv6.len(), resolve_ms, "dns probe");
    Ok(DnsProbe {
        host: host.to_string(),
        ipv4,
        ipv6,
        resolve_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn localhost_resolves() {
        let probe = probe("localhost", 80).await.expect("localhost resolves");
        assert!(!probe.ipv4.is_empty() || !probe.ipv6.is_empty());
    }

    #[tokio::test]
    async fn nonsense_host_errors() {
        assert!(probe("host.invalid", 80).await.is_err());
    }
}
