//! Failover Orchestrator
//!
//! Top-level sequencer: speculatively starts the local relay, drives the
//! leader election, and reacts to leadership changes by starting/stopping
//! the relay and repointing the resolved endpoint. The endpoint has a
//! single writer (this module); consumers watch it.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::RelayWardenConfig;
use crate::discovery::{BeaconAnnouncer, RelayAnnouncement, SubnetProbe, Transport};
use crate::election::{ElectionChannel, ElectionEvent, LeaderElection, MulticastChannel};
use crate::identity::NodeIdentity;
use crate::relay::RelayLifecycle;
use crate::Result;

/// The endpoint handed to the client-facing layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedEndpoint {
    pub address: IpAddr,
    pub port: u16,
    pub transport: Transport,
}

impl ResolvedEndpoint {
    /// Full URL of the endpoint
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.transport.scheme(), self.address, self.port)
    }
}

/// Human-readable phase transition, consumed by the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// State shared between the orchestrator and its per-cycle event task
struct Shared {
    config: RelayWardenConfig,
    identity: NodeIdentity,
    relay: Arc<dyn RelayLifecycle>,
    probe: SubnetProbe,
    endpoint_tx: watch::Sender<Option<ResolvedEndpoint>>,
    status_tx: broadcast::Sender<StatusUpdate>,
    /// Cycle token; events carrying an older value are discarded
    generation: AtomicU64,
    beacon: Mutex<Option<BeaconAnnouncer>>,
}

impl Shared {
    fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        let _ = self.status_tx.send(StatusUpdate {
            at: Utc::now(),
            message,
        });
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    async fn stop_beacon(&self) {
        if let Some(mut beacon) = self.beacon.lock().await.take() {
            beacon.stop();
        }
    }

    /// React to one election event. `generation` identifies the cycle the
    /// event belongs to; a superseded cycle never touches the endpoint.
    async fn handle_event(&self, generation: u64, event: ElectionEvent) {
        if self.is_stale(generation) {
            tracing::debug!("discarding {event:?} from superseded cycle");
            return;
        }

        match event {
            ElectionEvent::BecameLeader(address) => self.on_become_leader(address).await,
            ElectionEvent::LeaderElected(address) => self.on_leader_elected(generation, address).await,
            ElectionEvent::LeaderLost(address) => {
                self.status(format!("Leader {address} went silent, re-electing"));
            }
        }
    }

    async fn on_become_leader(&self, address: Ipv4Addr) {
        let port = self.config.relay.port;
        self.status(format!("Leader — relay active on {address}:{port}"));

        let announcement = RelayAnnouncement::new(
            address,
            port,
            Transport::Http,
            self.identity.class.into(),
        );
        match BeaconAnnouncer::start(&self.config.discovery, announcement).await {
            Ok(beacon) => *self.beacon.lock().await = Some(beacon),
            // Not fatal: election heartbeats still advertise us to peers
            Err(e) if e.is_retryable() => tracing::warn!("discovery beacon unavailable: {e}"),
            Err(e) => tracing::error!("discovery beacon unavailable: {e}"),
        }

        // Local consumers talk to their own relay over loopback
        self.endpoint_tx.send_replace(Some(ResolvedEndpoint {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            transport: Transport::Http,
        }));
    }

    async fn on_leader_elected(&self, generation: u64, address: Ipv4Addr) {
        let port = self.config.relay.port;
        self.status(format!("Follower — leader at {address}:{port}"));

        self.stop_beacon().await;
        if let Err(e) = self.relay.stop().await {
            if e.is_retryable() {
                tracing::warn!("local relay stop failed: {e}");
            } else {
                tracing::error!("local relay stop failed: {e}");
            }
        }

        // The leader's transport is not known a priori
        let transport = self
            .probe
            .detect_transport(address, port)
            .await
            .unwrap_or(Transport::Http);

        // The probe awaited; a newer cycle may have started meanwhile
        if self.is_stale(generation) {
            tracing::debug!("discarding redirect to {address} from superseded cycle");
            return;
        }

        let endpoint = ResolvedEndpoint {
            address: IpAddr::V4(address),
            port,
            transport,
        };
        self.status(format!("Redirecting to {}", endpoint.url()));
        self.endpoint_tx.send_replace(Some(endpoint));
    }
}

/// One election cycle's tasks
struct Cycle {
    election: LeaderElection,
    events_task: JoinHandle<()>,
}

/// Sequences relay, election, and discovery; owns the resolved endpoint
pub struct FailoverOrchestrator {
    shared: Arc<Shared>,
    /// Serializes start/rediscover/shutdown (single-flight)
    cycle: Mutex<Option<Cycle>>,
    endpoint_rx: watch::Receiver<Option<ResolvedEndpoint>>,
}

impl FailoverOrchestrator {
    pub fn new(
        config: RelayWardenConfig,
        identity: NodeIdentity,
        relay: Arc<dyn RelayLifecycle>,
    ) -> Result<Self> {
        let (endpoint_tx, endpoint_rx) = watch::channel(None);
        let (status_tx, _) = broadcast::channel(64);
        let probe = SubnetProbe::new(&config.probe)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                identity,
                relay,
                probe,
                endpoint_tx,
                status_tx,
                generation: AtomicU64::new(0),
                beacon: Mutex::new(None),
            }),
            cycle: Mutex::new(None),
            endpoint_rx,
        })
    }

    /// Identity of the local participant
    pub fn identity(&self) -> &NodeIdentity {
        &self.shared.identity
    }

    /// Watch the resolved endpoint; None while unresolved
    pub fn endpoint(&self) -> watch::Receiver<Option<ResolvedEndpoint>> {
        self.endpoint_rx.clone()
    }

    /// Subscribe to the status stream
    pub fn status_stream(&self) -> broadcast::Receiver<StatusUpdate> {
        self.shared.status_tx.subscribe()
    }

    /// Start the full sequence: speculative relay, election channel,
    /// participant. A repeated call supersedes the running cycle, so
    /// events still in flight from it can no longer touch the endpoint.
    pub async fn start(&self) -> Result<()> {
        let mut cycle = self.cycle.lock().await;
        if cycle.is_some() {
            self.teardown(&mut cycle).await;
        }
        self.start_cycle(&mut cycle).await
    }

    /// Tear everything down and restart from the process-start behavior.
    /// Safe to call repeatedly; concurrent calls are serialized, and
    /// events of the superseded cycle are invalidated before teardown.
    pub async fn rediscover(&self) -> Result<()> {
        let mut cycle = self.cycle.lock().await;
        self.shared.status("Re-discovery requested");
        self.teardown(&mut cycle).await;
        self.shared.endpoint_tx.send_replace(None);
        self.start_cycle(&mut cycle).await
    }

    /// Stop the election participant, beacon, and relay
    pub async fn shutdown(&self) {
        let mut cycle = self.cycle.lock().await;
        self.teardown(&mut cycle).await;
    }

    async fn teardown(&self, cycle: &mut Option<Cycle>) {
        // Invalidate in-flight events of the old cycle first
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(mut old) = cycle.take() {
            old.election.stop();
            old.events_task.abort();
        }
        self.shared.stop_beacon().await;
        if let Err(e) = self.shared.relay.stop().await {
            if e.is_retryable() {
                tracing::warn!("local relay stop failed: {e}");
            } else {
                tracing::error!("local relay stop failed: {e}");
            }
        }
    }

    async fn start_cycle(&self, cycle: &mut Option<Cycle>) -> Result<()> {
        let generation = self.shared.generation.load(Ordering::SeqCst);

        // Speculative start: cheap, and removes the handover gap if this
        // node wins the election
        self.shared.status("Starting local relay");
        match self.shared.relay.start().await {
            Ok(addr) => self.shared.status(format!("Local relay up on {addr}")),
            Err(e) => {
                // No relay, no candidacy; recoverable via rediscover()
                self.shared.status(format!("Local relay failed to start: {e}"));
                return Ok(());
            }
        }

        let election_config = &self.shared.config.election;
        let channel: Arc<dyn ElectionChannel> = match MulticastChannel::open(
            election_config.multicast_group,
            election_config.port,
            self.shared.identity.address,
        )
        .await
        {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                self.shared.status(format!("Election channel unavailable: {e}"));
                return Ok(());
            }
        };

        let (jitter_min, jitter_max) = election_config.jitter_bounds();
        let timings = crate::election::ElectionTimings {
            heartbeat_interval: election_config.heartbeat_interval(),
            leader_timeout: election_config.leader_timeout(),
            election_wait: election_config.election_wait(),
            jitter_min,
            jitter_max,
        };

        let (event_tx, mut event_rx) = mpsc::channel(16);
        let election = LeaderElection::spawn(self.shared.identity, timings, channel, event_tx);

        let shared = Arc::clone(&self.shared);
        let events_task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                shared.handle_event(generation, event).await;
            }
        });

        *cycle = Some(Cycle {
            election,
            events_task,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::identity::DeviceClass;
    use async_trait::async_trait;
    use std::net::SocketAddr;

    struct BrokenRelay;

    #[async_trait]
    impl RelayLifecycle for BrokenRelay {
        async fn start(&self) -> Result<SocketAddr> {
            Err(Error::Relay("port already in use".into()))
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    struct StubRelay;

    #[async_trait]
    impl RelayLifecycle for StubRelay {
        async fn start(&self) -> Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 3001)))
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    fn test_orchestrator(relay: Arc<dyn RelayLifecycle>) -> FailoverOrchestrator {
        let identity = NodeIdentity::new(Ipv4Addr::new(192, 168, 1, 40), DeviceClass::Primary);
        FailoverOrchestrator::new(RelayWardenConfig::default(), identity, relay).unwrap()
    }

    #[tokio::test]
    async fn test_relay_start_failure_surfaces_status_not_crash() {
        let orchestrator = test_orchestrator(Arc::new(BrokenRelay));
        let mut status = orchestrator.status_stream();

        orchestrator.start().await.unwrap();

        // Endpoint stays unresolved
        assert!(orchestrator.endpoint().borrow().is_none());

        // The failure is visible on the status stream
        let mut saw_failure = false;
        while let Ok(update) = status.try_recv() {
            if update.message.contains("failed to start") {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_stale_generation_event_never_mutates_endpoint() {
        let orchestrator = test_orchestrator(Arc::new(BrokenRelay));
        let shared = Arc::clone(&orchestrator.shared);

        let old_generation = shared.generation.load(Ordering::SeqCst);
        // A newer cycle supersedes the old one
        shared.generation.fetch_add(1, Ordering::SeqCst);

        shared
            .handle_event(
                old_generation,
                ElectionEvent::BecameLeader(Ipv4Addr::new(192, 168, 1, 40)),
            )
            .await;
        assert!(orchestrator.endpoint().borrow().is_none());

        shared
            .handle_event(
                old_generation,
                ElectionEvent::LeaderElected(Ipv4Addr::new(192, 168, 1, 77)),
            )
            .await;
        assert!(orchestrator.endpoint().borrow().is_none());
    }

    #[tokio::test]
    async fn test_current_generation_event_updates_endpoint() {
        let orchestrator = test_orchestrator(Arc::new(BrokenRelay));
        let shared = Arc::clone(&orchestrator.shared);

        let generation = shared.generation.load(Ordering::SeqCst);
        shared
            .handle_event(
                generation,
                ElectionEvent::BecameLeader(Ipv4Addr::new(192, 168, 1, 40)),
            )
            .await;

        let endpoint = orchestrator.endpoint().borrow().unwrap();
        assert_eq!(endpoint.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(endpoint.port, 3001);
        assert_eq!(endpoint.transport, Transport::Http);

        shared.stop_beacon().await;
    }

    #[tokio::test]
    async fn test_repeated_start_supersedes_previous_cycle() {
        let identity = NodeIdentity::new(Ipv4Addr::new(192, 168, 1, 40), DeviceClass::Primary);
        let mut config = RelayWardenConfig::default();
        // Ephemeral election port; the test must not claim the real one
        config.election.port = 0;
        let orchestrator =
            FailoverOrchestrator::new(config, identity, Arc::new(StubRelay)).unwrap();
        let shared = Arc::clone(&orchestrator.shared);

        orchestrator.start().await.unwrap();
        let first = shared.generation.load(Ordering::SeqCst);

        // Restarting invalidates the first cycle before its jitter elapses
        orchestrator.start().await.unwrap();
        assert!(shared.generation.load(Ordering::SeqCst) > first);

        // An event the first cycle had in flight can no longer land
        shared
            .handle_event(first, ElectionEvent::BecameLeader(identity.address))
            .await;
        assert!(orchestrator.endpoint().borrow().is_none());

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_without_start_is_safe() {
        let orchestrator = test_orchestrator(Arc::new(BrokenRelay));
        orchestrator.shutdown().await;
        orchestrator.shutdown().await;
    }
}
