//! Election Wire Format
//!
//! Compact textual frames `KIND:priority:address`, e.g.
//! `ELECTION:4512725288:192.168.1.40`. Anything that does not parse is
//! dropped silently by the channel.

use std::fmt;
use std::net::Ipv4Addr;

use crate::identity::NodeIdentity;

/// Kind of an election frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Candidacy announcement / priority reassertion
    Election,
    /// Leadership announcement
    Leader,
    /// Periodic liveness signal from the leader
    Heartbeat,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Election => write!(f, "ELECTION"),
            MessageKind::Leader => write!(f, "LEADER"),
            MessageKind::Heartbeat => write!(f, "HEARTBEAT"),
        }
    }
}

/// A single election frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionMessage {
    pub kind: MessageKind,
    /// Sender's election priority
    pub priority: u64,
    /// Sender's LAN address
    pub address: Ipv4Addr,
}

impl ElectionMessage {
    /// ELECTION frame for the local node
    pub fn election(identity: &NodeIdentity) -> Self {
        Self {
            kind: MessageKind::Election,
            priority: identity.priority,
            address: identity.address,
        }
    }

    /// LEADER frame for the local node
    pub fn leader(identity: &NodeIdentity) -> Self {
        Self {
            kind: MessageKind::Leader,
            priority: identity.priority,
            address: identity.address,
        }
    }

    /// HEARTBEAT frame for the local node
    pub fn heartbeat(identity: &NodeIdentity) -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            priority: identity.priority,
            address: identity.address,
        }
    }

    /// Encode to the wire representation
    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.kind, self.priority, self.address)
    }

    /// Decode a wire frame; returns None for malformed input
    pub fn decode(frame: &str) -> Option<Self> {
        let mut parts = frame.trim_end().splitn(3, ':');

        let kind = match parts.next()? {
            "ELECTION" => MessageKind::Election,
            "LEADER" => MessageKind::Leader,
            "HEARTBEAT" => MessageKind::Heartbeat,
            _ => return None,
        };
        let priority: u64 = parts.next()?.parse().ok()?;
        let address: Ipv4Addr = parts.next()?.parse().ok()?;

        Some(Self { kind, priority, address })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DeviceClass;

    #[test]
    fn test_encode_decode_roundtrip() {
        let identity = NodeIdentity::new(Ipv4Addr::new(192, 168, 1, 40), DeviceClass::Primary);
        let msg = ElectionMessage::election(&identity);

        let decoded = ElectionMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.kind, MessageKind::Election);
        assert_eq!(decoded.priority, identity.priority);
    }

    #[test]
    fn test_decode_known_frame() {
        let msg = ElectionMessage::decode("LEADER:4512725288:192.168.1.40").unwrap();
        assert_eq!(msg.kind, MessageKind::Leader);
        assert_eq!(msg.priority, 4512725288);
        assert_eq!(msg.address, Ipv4Addr::new(192, 168, 1, 40));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        // Unknown kind
        assert!(ElectionMessage::decode("VOTE:1:10.0.0.1").is_none());
        // Truncated
        assert!(ElectionMessage::decode("ELECTION:123").is_none());
        assert!(ElectionMessage::decode("ELECTION").is_none());
        assert!(ElectionMessage::decode("").is_none());
        // Non-numeric priority
        assert!(ElectionMessage::decode("ELECTION:abc:10.0.0.1").is_none());
        // Bad address
        assert!(ElectionMessage::decode("ELECTION:123:300.0.0.1").is_none());
    }
}
