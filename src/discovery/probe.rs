//! Subnet Probe
//!
//! Active fallback scanner, used when the passive listen window elapses
//! with no beacon. Walks the local /24 in a prioritized order and issues a
//! bounded identification request per candidate, HTTP first, then HTTPS
//! with self-signed certificates accepted.

use std::net::Ipv4Addr;

use futures::future;

use crate::config::ProbeConfig;
use crate::discovery::{
    IdentityDocument, RelayAnnouncement, RelayMode, Transport, IDENTIFY_PATH, SERVICE_TAG,
};
use crate::error::{Error, Result};

/// Conventional router/server host octets, probed right after the
/// neighbourhood of our own address
const COMMON_OCTETS: [u8; 11] = [1, 2, 3, 10, 20, 50, 100, 150, 200, 254, 253];

/// How far around our own last octet the first probe wave reaches
const NEIGHBOUR_SPAN: i16 = 10;

/// Identification prober over the local subnet
pub struct SubnetProbe {
    /// Plain-HTTP client, short timeout
    http: reqwest::Client,
    /// HTTPS client accepting self-signed certificates, longer timeout
    https: reqwest::Client,
    batch_size: usize,
}

impl SubnetProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        let https = reqwest::Client::builder()
            .timeout(config.https_timeout())
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            http,
            https,
            batch_size: config.batch_size,
        })
    }

    /// Request the identification document over one transport.
    async fn identify(
        &self,
        address: Ipv4Addr,
        port: u16,
        transport: Transport,
    ) -> Option<IdentityDocument> {
        let url = format!("{}://{address}:{port}{IDENTIFY_PATH}", transport.scheme());
        let client = match transport {
            Transport::Http => &self.http,
            Transport::Https => &self.https,
        };

        let doc = client
            .get(&url)
            .send()
            .await
            .ok()?
            .json::<IdentityDocument>()
            .await
            .ok()?;

        (doc.service == SERVICE_TAG).then_some(doc)
    }

    /// Identify a single host, trying HTTP before HTTPS.
    pub async fn identify_host(
        &self,
        address: Ipv4Addr,
        port: u16,
    ) -> Option<(Transport, IdentityDocument)> {
        for transport in [Transport::Http, Transport::Https] {
            if let Some(doc) = self.identify(address, port, transport).await {
                return Some((transport, doc));
            }
        }
        None
    }

    /// Which transport a known relay host serves. Used after a leadership
    /// change, when the new leader's transport is not known a priori.
    pub async fn detect_transport(&self, address: Ipv4Addr, port: u16) -> Option<Transport> {
        self.identify_host(address, port)
            .await
            .map(|(transport, _)| transport)
    }

    /// Scan the local /24 in priority order, in fixed-size concurrent
    /// batches. Returns the first primary-capable responder, or
    /// [`Error::NoRelayFound`] after exhausting the list.
    pub async fn scan(&self, own_address: Ipv4Addr, port: u16) -> Result<RelayAnnouncement> {
        let candidates = candidate_addresses(own_address);
        tracing::info!(
            "scanning {} candidates on the local /24 (batches of {})",
            candidates.len(),
            self.batch_size
        );

        for batch in candidates.chunks(self.batch_size) {
            let probes = batch
                .iter()
                .map(|&address| async move { (address, self.identify_host(address, port).await) });

            for (address, found) in future::join_all(probes).await {
                let Some((transport, doc)) = found else { continue };
                if doc.mode != RelayMode::Primary {
                    tracing::debug!("skipping fallback-mode host at {address}");
                    continue;
                }
                tracing::info!("relay found at {address}:{port} ({transport})");
                return Ok(RelayAnnouncement {
                    service: doc.service,
                    version: doc.version,
                    ip: address,
                    port,
                    transport,
                    mode: doc.mode,
                });
            }
        }

        Err(Error::NoRelayFound)
    }
}

/// Candidate ordering for the scan: last octets near our own first (±10),
/// then the conventional addresses, then the rest of the /24. Our own
/// address is never probed.
pub fn candidate_addresses(own_address: Ipv4Addr) -> Vec<Ipv4Addr> {
    let [a, b, c, own_octet] = own_address.octets();
    let mut added = [false; 256];
    added[own_octet as usize] = true;
    let mut list = Vec::with_capacity(253);

    for delta in -NEIGHBOUR_SPAN..=NEIGHBOUR_SPAN {
        let octet = own_octet as i16 + delta;
        if (1..=254).contains(&octet) && !added[octet as usize] {
            added[octet as usize] = true;
            list.push(Ipv4Addr::new(a, b, c, octet as u8));
        }
    }

    for octet in COMMON_OCTETS {
        if !added[octet as usize] {
            added[octet as usize] = true;
            list.push(Ipv4Addr::new(a, b, c, octet));
        }
    }

    for octet in 1..=254u8 {
        if !added[octet as usize] {
            list.push(Ipv4Addr::new(a, b, c, octet));
        }
    }

    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_candidates_cover_subnet_without_self() {
        let own = Ipv4Addr::new(192, 168, 1, 57);
        let candidates = candidate_addresses(own);

        // Every address of the /24 except our own, exactly once
        assert_eq!(candidates.len(), 253);
        let unique: HashSet<_> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
        assert!(!candidates.contains(&own));
        assert!(candidates.iter().all(|ip| ip.octets()[..3] == [192, 168, 1]));
    }

    #[test]
    fn test_neighbours_probed_first() {
        let candidates = candidate_addresses(Ipv4Addr::new(192, 168, 1, 57));

        // The first wave is the ±10 neighbourhood, ascending
        assert_eq!(candidates[0], Ipv4Addr::new(192, 168, 1, 47));
        assert_eq!(candidates[19], Ipv4Addr::new(192, 168, 1, 67));
        // Conventional addresses follow (50 already covered by the wave)
        assert_eq!(candidates[20], Ipv4Addr::new(192, 168, 1, 1));
        assert!(candidates[20..30].contains(&Ipv4Addr::new(192, 168, 1, 254)));
    }

    #[test]
    fn test_candidates_clamped_at_subnet_edge() {
        let candidates = candidate_addresses(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(candidates.len(), 253);
        // No octet 0 or 255, own address excluded
        assert!(candidates
            .iter()
            .all(|ip| (1..=254).contains(&ip.octets()[3]) && ip.octets()[3] != 2));
    }
}
