//! Discovery Beacon
//!
//! While a node hosts the relay it broadcasts a small JSON announcement on
//! the discovery multicast group at a fixed interval. Late-joining
//! consumers learn the endpoint passively, without implementing any of the
//! election protocol.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::DiscoveryConfig;
use crate::discovery::{RelayMode, Transport, SERVICE_TAG};
use crate::error::{Error, Result};

/// Multicast announcement of a reachable relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAnnouncement {
    /// Service tag, always [`SERVICE_TAG`]
    pub service: String,
    /// Announcing server version
    pub version: String,
    /// LAN address the relay is reachable at
    pub ip: Ipv4Addr,
    /// Relay port
    pub port: u16,
    /// Transport the relay serves
    pub transport: Transport,
    /// Advertised role of the announcing host
    pub mode: RelayMode,
}

impl RelayAnnouncement {
    /// Announcement for a relay hosted by this process
    pub fn new(ip: Ipv4Addr, port: u16, transport: Transport, mode: RelayMode) -> Self {
        Self {
            service: SERVICE_TAG.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ip,
            port,
            transport,
            mode,
        }
    }

    /// Whether a primary-capable consumer at `own_address` should adopt
    /// this announcement. Filters foreign services, fallback-only hosts,
    /// and the consumer's own broadcasts.
    pub fn is_acceptable_to(&self, own_address: Ipv4Addr) -> bool {
        self.service == SERVICE_TAG && self.mode == RelayMode::Primary && self.ip != own_address
    }
}

/// Periodic announcement broadcaster, active only while this node hosts
/// the relay
pub struct BeaconAnnouncer {
    task: Option<JoinHandle<()>>,
}

impl BeaconAnnouncer {
    /// Bind a sender socket and start broadcasting `announcement` every
    /// interval.
    pub async fn start(config: &DiscoveryConfig, announcement: RelayAnnouncement) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::Network(format!("failed to bind beacon socket: {e}")))?;
        socket
            .set_multicast_ttl_v4(config.multicast_ttl)
            .map_err(|e| Error::Network(format!("failed to set multicast TTL: {e}")))?;

        let payload = serde_json::to_vec(&announcement)
            .map_err(|e| Error::Internal(format!("announcement encoding failed: {e}")))?;
        let group = config.multicast_group;
        let port = config.port;
        let interval = config.announce_interval();

        tracing::info!(
            "announcing relay {}:{} on {}:{} every {}ms",
            announcement.ip,
            announcement.port,
            group,
            port,
            interval.as_millis()
        );

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = socket.send_to(&payload, (group, port)).await {
                    // Some networks drop multicast; the next tick retries
                    tracing::trace!("beacon send failed: {e}");
                }
            }
        });

        Ok(Self { task: Some(task) })
    }

    /// Stop announcing. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for BeaconAnnouncer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Listen on the discovery group for a bounded window and return the
/// first acceptable announcement, or None when the window elapses empty.
pub async fn listen_for_announcement(
    config: &DiscoveryConfig,
    own_address: Ipv4Addr,
    window: Duration,
) -> Result<Option<RelayAnnouncement>> {
    let socket = UdpSocket::bind(("0.0.0.0", config.port))
        .await
        .map_err(|e| Error::Network(format!("failed to bind discovery port {}: {e}", config.port)))?;
    socket
        .join_multicast_v4(config.multicast_group, Ipv4Addr::UNSPECIFIED)
        .map_err(|e| {
            Error::Network(format!(
                "failed to join discovery group {}: {e}",
                config.multicast_group
            ))
        })?;

    tracing::debug!(
        "listening on {}:{} for {}ms",
        config.multicast_group,
        config.port,
        window.as_millis()
    );

    let deadline = time::Instant::now() + window;
    let mut buf = [0u8; 512];

    loop {
        let remaining = deadline.saturating_duration_since(time::Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        match time::timeout(remaining, socket.recv_from(&mut buf)).await {
            // Window elapsed
            Err(_) => return Ok(None),
            Ok(Err(e)) => {
                tracing::trace!("discovery recv error: {e}");
            }
            Ok(Ok((len, src))) => {
                // Malformed payloads are dropped silently
                let Ok(announcement) = serde_json::from_slice::<RelayAnnouncement>(&buf[..len])
                else {
                    continue;
                };
                if announcement.is_acceptable_to(own_address) {
                    tracing::info!(
                        "relay announced at {}:{} ({}, from {src})",
                        announcement.ip,
                        announcement.port,
                        announcement.transport
                    );
                    return Ok(Some(announcement));
                }
            }
        }
    }
}
