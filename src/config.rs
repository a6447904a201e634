//! RelayWarden Configuration
//!
//! Configuration structures for the relay failover manager. Every field
//! has a default, so an empty TOML file yields a working single-host setup.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::DeviceClass;

/// Main RelayWarden configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayWardenConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Leader election configuration
    #[serde(default)]
    pub election: ElectionConfig,

    /// Discovery beacon configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Subnet probe configuration
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Local relay configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Control API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Device class used to derive the election priority
    #[serde(default = "default_device_class")]
    pub class: DeviceClass,

    /// LAN address to advertise (autodetected when unset)
    #[serde(default)]
    pub address: Option<Ipv4Addr>,
}

/// Leader election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Multicast group carrying election traffic
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,

    /// UDP port of the election group
    #[serde(default = "default_election_port")]
    pub port: u16,

    /// Leader heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Silence threshold after which a follower re-elects, in milliseconds
    #[serde(default = "default_leader_timeout_ms")]
    pub leader_timeout_ms: u64,

    /// How long a candidate waits for a higher-priority challenger
    #[serde(default = "default_election_wait_ms")]
    pub election_wait_ms: u64,

    /// Minimum randomized startup delay in milliseconds
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,

    /// Maximum randomized startup delay in milliseconds
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

/// Discovery beacon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Multicast group carrying relay announcements
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,

    /// UDP port of the discovery group
    #[serde(default = "default_discovery_port")]
    pub port: u16,

    /// Announcement interval in milliseconds
    #[serde(default = "default_announce_interval_ms")]
    pub announce_interval_ms: u64,

    /// Passive listen window before falling back to a subnet scan
    #[serde(default = "default_listen_window_ms")]
    pub listen_window_ms: u64,

    /// Multicast TTL for announcements
    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,
}

/// Subnet probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Identification timeout over plain HTTP, in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Identification timeout over HTTPS (self-signed accepted), in milliseconds
    #[serde(default = "default_https_timeout_ms")]
    pub https_timeout_ms: u64,

    /// Number of addresses probed concurrently per batch
    #[serde(default = "default_probe_batch_size")]
    pub batch_size: usize,
}

/// Local relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Port the relay serves on; every node uses the same well-known port
    #[serde(default = "default_relay_port")]
    pub port: u16,
}

/// Control API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable the HTTP control API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Control API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_device_class() -> DeviceClass {
    DeviceClass::Primary
}

fn default_multicast_group() -> Ipv4Addr {
    Ipv4Addr::new(224, 0, 0, 251)
}

fn default_election_port() -> u16 {
    9998
}

fn default_discovery_port() -> u16 {
    9999
}

fn default_heartbeat_interval_ms() -> u64 {
    2000
}

fn default_leader_timeout_ms() -> u64 {
    6000
}

fn default_election_wait_ms() -> u64 {
    2000
}

fn default_jitter_min_ms() -> u64 {
    500
}

fn default_jitter_max_ms() -> u64 {
    1500
}

fn default_announce_interval_ms() -> u64 {
    2000
}

fn default_listen_window_ms() -> u64 {
    3000
}

fn default_multicast_ttl() -> u32 {
    4
}

fn default_http_timeout_ms() -> u64 {
    600
}

fn default_https_timeout_ms() -> u64 {
    1200
}

fn default_probe_batch_size() -> usize {
    50
}

fn default_relay_port() -> u16 {
    3001
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "127.0.0.1:3080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            class: default_device_class(),
            address: None,
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            multicast_group: default_multicast_group(),
            port: default_election_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            leader_timeout_ms: default_leader_timeout_ms(),
            election_wait_ms: default_election_wait_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_group: default_multicast_group(),
            port: default_discovery_port(),
            announce_interval_ms: default_announce_interval_ms(),
            listen_window_ms: default_listen_window_ms(),
            multicast_ttl: default_multicast_ttl(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: default_http_timeout_ms(),
            https_timeout_ms: default_https_timeout_ms(),
            batch_size: default_probe_batch_size(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ElectionConfig {
    /// Heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Leader silence threshold as Duration
    pub fn leader_timeout(&self) -> Duration {
        Duration::from_millis(self.leader_timeout_ms)
    }

    /// Candidate wait as Duration
    pub fn election_wait(&self) -> Duration {
        Duration::from_millis(self.election_wait_ms)
    }

    /// Startup jitter bounds as Durations
    pub fn jitter_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.jitter_min_ms),
            Duration::from_millis(self.jitter_max_ms),
        )
    }
}

impl DiscoveryConfig {
    /// Announcement interval as Duration
    pub fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms)
    }

    /// Passive listen window as Duration
    pub fn listen_window(&self) -> Duration {
        Duration::from_millis(self.listen_window_ms)
    }
}

impl ProbeConfig {
    /// Plain HTTP identification timeout as Duration
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// HTTPS identification timeout as Duration
    pub fn https_timeout(&self) -> Duration {
        Duration::from_millis(self.https_timeout_ms)
    }
}

impl RelayWardenConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayWardenConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: RelayWardenConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.election.jitter_min_ms > self.election.jitter_max_ms {
            return Err(crate::Error::Config(
                "election.jitter_min_ms cannot exceed election.jitter_max_ms".into(),
            ));
        }

        // Zero-length intervals would panic the periodic timers
        if self.election.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config(
                "election.heartbeat_interval_ms cannot be zero".into(),
            ));
        }

        if self.discovery.announce_interval_ms == 0 {
            return Err(crate::Error::Config(
                "discovery.announce_interval_ms cannot be zero".into(),
            ));
        }

        if self.election.leader_timeout_ms <= self.election.heartbeat_interval_ms {
            return Err(crate::Error::Config(
                "election.leader_timeout_ms must exceed election.heartbeat_interval_ms".into(),
            ));
        }

        if self.election.port == self.discovery.port {
            return Err(crate::Error::Config(
                "election.port and discovery.port must differ".into(),
            ));
        }

        if self.probe.batch_size == 0 {
            return Err(crate::Error::Config("probe.batch_size cannot be zero".into()));
        }

        if self.relay.port == 0 {
            return Err(crate::Error::Config("relay.port cannot be zero".into()));
        }

        Ok(())
    }
}

/// Template written by `relaywarden init`
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# RelayWarden configuration

[node]
# primary | fallback
class = "primary"
# address = "192.168.1.40"   # autodetected when unset

[election]
multicast_group = "224.0.0.251"
port = 9998
heartbeat_interval_ms = 2000
leader_timeout_ms = 6000
election_wait_ms = 2000
jitter_min_ms = 500
jitter_max_ms = 1500

[discovery]
multicast_group = "224.0.0.251"
port = 9999
announce_interval_ms = 2000
listen_window_ms = 3000
multicast_ttl = 4

[probe]
http_timeout_ms = 600
https_timeout_ms = 1200
batch_size = 50

[relay]
port = 3001

[api]
enabled = true
bind_address = "127.0.0.1:3080"
cors_enabled = false

[logging]
level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = RelayWardenConfig::from_str("").unwrap();
        assert_eq!(config.node.class, DeviceClass::Primary);
        assert_eq!(config.election.port, 9998);
        assert_eq!(config.discovery.port, 9999);
        assert_eq!(config.relay.port, 3001);
        assert_eq!(config.election.leader_timeout(), Duration::from_millis(6000));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
class = "fallback"
address = "192.168.1.40"

[election]
port = 19998
leader_timeout_ms = 4000

[discovery]
port = 19999
"#;
        let config = RelayWardenConfig::from_str(toml).unwrap();
        assert_eq!(config.node.class, DeviceClass::Fallback);
        assert_eq!(config.node.address, Some(Ipv4Addr::new(192, 168, 1, 40)));
        assert_eq!(config.election.port, 19998);
        assert_eq!(config.election.leader_timeout_ms, 4000);
        // Untouched sections keep their defaults
        assert_eq!(config.probe.batch_size, 50);
    }

    #[test]
    fn test_template_parses_and_validates() {
        RelayWardenConfig::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
    }

    #[test]
    fn test_validate_rejects_inverted_jitter() {
        let toml = r#"
[election]
jitter_min_ms = 2000
jitter_max_ms = 500
"#;
        assert!(RelayWardenConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        // The heartbeat and beacon tickers cannot run on a zero period
        let toml = r#"
[election]
heartbeat_interval_ms = 0
leader_timeout_ms = 1
"#;
        assert!(RelayWardenConfig::from_str(toml).is_err());

        let toml = r#"
[discovery]
announce_interval_ms = 0
"#;
        assert!(RelayWardenConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_validate_rejects_shared_port() {
        let toml = r#"
[election]
port = 9999
"#;
        assert!(RelayWardenConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaywarden.toml");
        std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE).unwrap();
        let config = RelayWardenConfig::from_file(&path).unwrap();
        assert!(config.api.enabled);
    }
}
