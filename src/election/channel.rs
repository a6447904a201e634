//! Election Channel
//!
//! Message transport bound to the well-known election multicast group.
//! The trait seam lets tests drive the state machine over an in-memory
//! hub instead of real sockets.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::election::message::ElectionMessage;
use crate::error::{Error, Result};

/// Transport carrying election frames between participants
#[async_trait]
pub trait ElectionChannel: Send + Sync {
    /// Broadcast a frame to every participant. Fire-and-forget: failures
    /// are reported but the caller never retries inline.
    async fn send(&self, msg: ElectionMessage) -> Result<()>;

    /// Next frame from another participant. Self-originated and malformed
    /// frames never surface here.
    async fn recv(&self) -> Result<ElectionMessage>;
}

/// UDP multicast implementation of the election channel
pub struct MulticastChannel {
    socket: UdpSocket,
    group: Ipv4Addr,
    port: u16,
    own_address: Ipv4Addr,
}

impl MulticastChannel {
    /// Bind the election port and join the multicast group.
    pub async fn open(group: Ipv4Addr, port: u16, own_address: Ipv4Addr) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|e| Error::Network(format!("failed to bind election port {port}: {e}")))?;

        socket
            .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
            .map_err(|e| Error::Network(format!("failed to join election group {group}: {e}")))?;

        tracing::info!("election channel listening on {group}:{port}");

        Ok(Self {
            socket,
            group,
            port,
            own_address,
        })
    }
}

#[async_trait]
impl ElectionChannel for MulticastChannel {
    async fn send(&self, msg: ElectionMessage) -> Result<()> {
        let frame = msg.encode();
        self.socket
            .send_to(frame.as_bytes(), (self.group, self.port))
            .await
            .map_err(|e| Error::Network(format!("election broadcast failed: {e}")))?;
        tracing::trace!("election -> {frame}");
        Ok(())
    }

    async fn recv(&self) -> Result<ElectionMessage> {
        let mut buf = [0u8; 256];
        loop {
            let (len, _src) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| Error::Network(format!("election receive failed: {e}")))?;

            // Malformed frames are dropped silently
            let Ok(frame) = std::str::from_utf8(&buf[..len]) else {
                continue;
            };
            let Some(msg) = ElectionMessage::decode(frame) else {
                continue;
            };

            // Self-loopback filter: multicast echoes our own broadcasts
            if msg.address == self.own_address {
                continue;
            }

            tracing::trace!("election <- {frame}");
            return Ok(msg);
        }
    }
}
