//! RelayWarden - LAN Relay Failover Manager
//!
//! Keeps exactly one relay server alive on a local network. Every
//! primary-capable host runs a RelayWarden node; the nodes elect the
//! highest-priority host as the relay leader and the rest redirect their
//! local consumers to it. When the leader disappears the survivors
//! re-elect within seconds.
//!
//! # Architecture
//!
//! RelayWarden runs a Bully-style election over UDP multicast, with the
//! priority derived deterministically from each host's IPv4 address and
//! device class. The winner hosts the relay and broadcasts a discovery
//! beacon; non-participating consumers find the relay passively through
//! the beacon, or actively through a prioritized subnet probe.
//!
//! # Features
//!
//! - Decentralized leader election, no coordinator or shared state
//! - Automatic failover on leader silence
//! - Passive multicast discovery beacon for non-participants
//! - Active /24 subnet probe fallback with transport detection
//! - Speculative local relay start to remove the handover gap
//! - HTTP control API for status and operator-triggered re-discovery

pub mod api;
pub mod config;
pub mod discovery;
pub mod election;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod relay;

pub use config::RelayWardenConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::RelayWardenConfig;
    pub use crate::discovery::{RelayAnnouncement, SubnetProbe, Transport};
    pub use crate::election::{ElectionEvent, LeaderElection};
    pub use crate::error::{Error, Result};
    pub use crate::identity::{DeviceClass, NodeIdentity};
    pub use crate::orchestrator::{FailoverOrchestrator, ResolvedEndpoint};
    pub use crate::relay::{LocalRelay, RelayLifecycle};
}
