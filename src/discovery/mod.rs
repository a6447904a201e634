//! Service Discovery
//!
//! Two independent paths for consumers that do not take part in the
//! election: a passive multicast beacon and an active subnet probe
//! fallback.

mod beacon;
mod probe;

pub use beacon::{listen_for_announcement, BeaconAnnouncer, RelayAnnouncement};
pub use probe::{candidate_addresses, SubnetProbe};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::DeviceClass;

/// Service tag carried by every announcement and identification document
pub const SERVICE_TAG: &str = "relaywarden";

/// Path of the identification document on a relay host
pub const IDENTIFY_PATH: &str = "/api/relay-discovery";

/// Transport a relay serves its clients over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Https,
}

impl Transport {
    /// URL scheme for this transport
    pub fn scheme(self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Https => "https",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Role a host advertises to discovery consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Primary-capable host; any consumer may connect
    Primary,
    /// Fallback-only host; skipped by primary-capable consumers
    Fallback,
}

impl From<DeviceClass> for RelayMode {
    fn from(class: DeviceClass) -> Self {
        match class {
            DeviceClass::Primary => RelayMode::Primary,
            DeviceClass::Fallback => RelayMode::Fallback,
        }
    }
}

/// Identification document served at [`IDENTIFY_PATH`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityDocument {
    /// Service tag, always [`SERVICE_TAG`]
    pub service: String,
    /// Server version
    #[serde(default)]
    pub version: String,
    /// Advertised role
    pub mode: RelayMode,
}

impl IdentityDocument {
    /// Document describing the local relay
    pub fn local(mode: RelayMode) -> Self {
        Self {
            service: SERVICE_TAG.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode,
        }
    }
}
