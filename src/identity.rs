//! Node Identity
//!
//! Derives a total-ordered election priority from a host's IPv4 address
//! and device class. The priority is the only thing the election protocol
//! compares, so it must be deterministic and collision-free across classes.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use serde::{Deserialize, Serialize};

/// Device class of a candidate host.
///
/// Primary-capable hosts can serve any consumer and always outrank
/// fallback-only hosts in the election, regardless of address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Full relay host, preferred leader
    Primary,
    /// Constrained host, leads only when no primary is present
    Fallback,
}

impl DeviceClass {
    /// Additive priority offset for this class.
    ///
    /// The primary offset exceeds every possible 32-bit address value, so
    /// class ranges never overlap.
    pub fn priority_offset(self) -> u64 {
        match self {
            DeviceClass::Primary => 1 << 32,
            DeviceClass::Fallback => 0,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Primary => write!(f, "primary"),
            DeviceClass::Fallback => write!(f, "fallback"),
        }
    }
}

/// Election priority of a host: big-endian integer form of its IPv4
/// address plus the class offset. Pure and total; the caller supplies a
/// valid address.
pub fn priority_of(address: Ipv4Addr, class: DeviceClass) -> u64 {
    u64::from(u32::from(address)) + class.priority_offset()
}

/// Immutable identity of the local election participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Election priority, derived once at startup
    pub priority: u64,
    /// LAN address this node is reachable at
    pub address: Ipv4Addr,
    /// Device class the priority was derived from
    pub class: DeviceClass,
}

impl NodeIdentity {
    /// Create an identity for the given address and class.
    pub fn new(address: Ipv4Addr, class: DeviceClass) -> Self {
        Self {
            priority: priority_of(address, class),
            address,
            class,
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, priority {})", self.address, self.class, self.priority)
    }
}

/// Best-effort detection of the local LAN IPv4 address.
///
/// Opens a connected UDP socket and reads its local address; no packet is
/// sent. Falls back to loopback when the host has no usable route.
pub fn local_ipv4() -> Ipv4Addr {
    fn detect() -> std::io::Result<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        match socket.local_addr()? {
            SocketAddr::V4(addr) => Ok(*addr.ip()),
            SocketAddr::V6(_) => Err(std::io::Error::other("v6 route")),
        }
    }

    match detect() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!("could not detect a LAN address ({e}), using loopback");
            Ipv4Addr::LOCALHOST
        }
    }
}
