//! Leader Election
//!
//! Bully-style election over UDP multicast: the highest-priority live
//! participant becomes the relay host, everyone else follows it.

mod channel;
mod message;
mod participant;

pub use channel::{ElectionChannel, MulticastChannel};
pub use message::{ElectionMessage, MessageKind};
pub use participant::{ElectionEvent, ElectionState, ElectionTimings, LeaderElection};
