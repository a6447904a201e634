//! Election Participant
//!
//! The Bully-style state machine. All election state lives inside a single
//! tokio task; the rest of the process only ever sees `ElectionEvent`s on
//! an mpsc channel, so nothing else can race a transition.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::election::channel::ElectionChannel;
use crate::election::message::{ElectionMessage, MessageKind};
use crate::identity::NodeIdentity;

/// Election state of the local participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Following a leader (initial state)
    Follower,
    /// Candidacy announced, waiting out the election window
    Candidate,
    /// Won the election, hosting the relay
    Leader,
}

/// Timing parameters of the election protocol
#[derive(Debug, Clone, Copy)]
pub struct ElectionTimings {
    /// Leader heartbeat broadcast interval
    pub heartbeat_interval: Duration,
    /// Silence threshold after which a follower re-elects
    pub leader_timeout: Duration,
    /// How long a candidate waits for a higher-priority challenger
    pub election_wait: Duration,
    /// Randomized startup delay bounds, desynchronizing simultaneous boots
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for ElectionTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(2000),
            leader_timeout: Duration::from_millis(6000),
            election_wait: Duration::from_millis(2000),
            jitter_min: Duration::from_millis(500),
            jitter_max: Duration::from_millis(1500),
        }
    }
}

/// Notifications emitted by the state machine, consumed by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionEvent {
    /// This node won the election
    BecameLeader(Ipv4Addr),
    /// Another node holds leadership (emitted only when the address changes)
    LeaderElected(Ipv4Addr),
    /// The recorded leader went silent past the timeout
    LeaderLost(Ipv4Addr),
}

/// Handle to a running election participant
pub struct LeaderElection {
    task: Option<JoinHandle<()>>,
}

impl LeaderElection {
    /// Spawn a participant over the given channel. Events arrive on
    /// `events` until `stop()` is called.
    pub fn spawn(
        identity: NodeIdentity,
        timings: ElectionTimings,
        channel: Arc<dyn ElectionChannel>,
        events: mpsc::Sender<ElectionEvent>,
    ) -> Self {
        let participant = Participant {
            identity,
            timings,
            channel,
            events,
            state: ElectionState::Follower,
            leader: None,
            last_heartbeat: Instant::now(),
            start_at: None,
            election_deadline: None,
        };

        Self {
            task: Some(tokio::spawn(participant.run())),
        }
    }

    /// Stop the participant. Idempotent; no event is emitted after return.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Internal task state; owned exclusively by `run()`
struct Participant {
    identity: NodeIdentity,
    timings: ElectionTimings,
    channel: Arc<dyn ElectionChannel>,
    events: mpsc::Sender<ElectionEvent>,
    state: ElectionState,
    /// Recorded active leader
    leader: Option<Ipv4Addr>,
    /// Last heartbeat received from the recorded leader
    last_heartbeat: Instant,
    /// Startup jitter expiry; fires once
    start_at: Option<Instant>,
    /// One-shot election timeout; the expiry re-checks the state
    election_deadline: Option<Instant>,
}

impl Participant {
    async fn run(mut self) {
        let jitter = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.timings.jitter_min..=self.timings.jitter_max)
        };
        self.start_at = Some(Instant::now() + jitter);
        tracing::info!(
            "election participant up as {}, first election in {}ms",
            self.identity,
            jitter.as_millis()
        );

        let mut heartbeat = time::interval(self.timings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watchdog = time::interval(self.timings.leader_timeout / 2);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let channel = Arc::clone(&self.channel);
            tokio::select! {
                result = channel.recv() => match result {
                    Ok(msg) => self.handle_message(msg).await,
                    Err(e) => {
                        tracing::warn!("election channel receive failed: {e}");
                        // Back off instead of spinning on a dead socket
                        time::sleep(Duration::from_millis(250)).await;
                    }
                },

                _ = deadline(self.start_at), if self.start_at.is_some() => {
                    self.start_at = None;
                    self.begin_election().await;
                }

                _ = deadline(self.election_deadline), if self.election_deadline.is_some() => {
                    self.election_deadline = None;
                    // A higher-priority challenger may have demoted us while
                    // the timer was armed
                    if self.state == ElectionState::Candidate {
                        self.become_leader().await;
                    }
                }

                _ = heartbeat.tick(), if self.state == ElectionState::Leader => {
                    self.broadcast(ElectionMessage::heartbeat(&self.identity)).await;
                }

                _ = watchdog.tick(), if self.state == ElectionState::Follower && self.leader.is_some() => {
                    let elapsed = self.last_heartbeat.elapsed();
                    if elapsed > self.timings.leader_timeout {
                        let lost = self.leader.expect("watchdog requires a recorded leader");
                        tracing::warn!(
                            "leader {lost} silent for {}ms, starting re-election",
                            elapsed.as_millis()
                        );
                        let _ = self.events.send(ElectionEvent::LeaderLost(lost)).await;
                        self.begin_election().await;
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: ElectionMessage) {
        match msg.kind {
            MessageKind::Election => {
                if msg.priority > self.identity.priority {
                    // Higher-priority challenger: concede. The election timer
                    // stays armed; its expiry re-checks the state.
                    tracing::debug!("conceding to {} (priority {})", msg.address, msg.priority);
                    self.state = ElectionState::Follower;
                } else if msg.priority < self.identity.priority {
                    // Reassert our priority so the lower node concedes
                    self.broadcast(ElectionMessage::election(&self.identity)).await;
                }
                // Equal priority means a duplicated address+class deployment;
                // treated as noise
            }

            MessageKind::Leader => {
                // Unconditional override: any LEADER frame wins over local
                // candidacy, even from a lower priority
                tracing::info!("leader announced: {} (priority {})", msg.address, msg.priority);
                self.become_follower(msg.address).await;
            }

            MessageKind::Heartbeat => {
                if self.leader == Some(msg.address) {
                    self.last_heartbeat = Instant::now();
                } else if self.state == ElectionState::Follower
                    && msg.priority > self.identity.priority
                {
                    // The LEADER frame was lost in transit but its heartbeats
                    // still arrive; adopt the sender
                    self.become_follower(msg.address).await;
                }
            }
        }
    }

    async fn begin_election(&mut self) {
        tracing::info!("starting election (priority {})", self.identity.priority);
        self.state = ElectionState::Candidate;
        self.broadcast(ElectionMessage::election(&self.identity)).await;
        self.election_deadline = Some(Instant::now() + self.timings.election_wait);
    }

    async fn become_leader(&mut self) {
        self.state = ElectionState::Leader;
        self.leader = Some(self.identity.address);
        tracing::info!("election won, assuming leadership as {}", self.identity.address);
        self.broadcast(ElectionMessage::leader(&self.identity)).await;
        let _ = self
            .events
            .send(ElectionEvent::BecameLeader(self.identity.address))
            .await;
    }

    async fn become_follower(&mut self, new_leader: Ipv4Addr) {
        let changed = self.leader != Some(new_leader);
        self.state = ElectionState::Follower;
        self.leader = Some(new_leader);
        self.last_heartbeat = Instant::now();
        if changed {
            let _ = self
                .events
                .send(ElectionEvent::LeaderElected(new_leader))
                .await;
        }
    }

    async fn broadcast(&self, msg: ElectionMessage) {
        // Fire-and-forget; the next heartbeat or watchdog cycle retries
        if let Err(e) = self.channel.send(msg).await {
            tracing::warn!("election broadcast failed: {e}");
        }
    }
}

/// Sleep until an optional deadline; pends forever when unset. Guarded by
/// select preconditions, so the pending arm is never the only one polled.
async fn deadline(at: Option<Instant>) {
    match at {
        Some(instant) => time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::identity::DeviceClass;
    use async_trait::async_trait;
    use tokio::sync::{broadcast, Mutex};
    use tokio::time::timeout;

    /// Lossless, synchronous-delivery in-memory hub standing in for the
    /// multicast group.
    #[derive(Clone)]
    struct Hub {
        tx: broadcast::Sender<ElectionMessage>,
    }

    impl Hub {
        fn new() -> Self {
            let (tx, _) = broadcast::channel(256);
            Self { tx }
        }

        fn join(&self, own_address: Ipv4Addr) -> Arc<HubChannel> {
            Arc::new(HubChannel {
                own_address,
                tx: self.tx.clone(),
                rx: Mutex::new(self.tx.subscribe()),
            })
        }
    }

    struct HubChannel {
        own_address: Ipv4Addr,
        tx: broadcast::Sender<ElectionMessage>,
        rx: Mutex<broadcast::Receiver<ElectionMessage>>,
    }

    #[async_trait]
    impl ElectionChannel for HubChannel {
        async fn send(&self, msg: ElectionMessage) -> Result<()> {
            let _ = self.tx.send(msg);
            Ok(())
        }

        async fn recv(&self) -> Result<ElectionMessage> {
            let mut rx = self.rx.lock().await;
            loop {
                match rx.recv().await {
                    // Self-loopback filter, as in the real transport
                    Ok(msg) if msg.address == self.own_address => continue,
                    Ok(msg) => return Ok(msg),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Network("hub closed".into()))
                    }
                }
            }
        }
    }

    fn identity(last_octet: u8) -> NodeIdentity {
        NodeIdentity::new(Ipv4Addr::new(10, 0, 0, last_octet), DeviceClass::Primary)
    }

    fn spawn_node(
        hub: &Hub,
        identity: NodeIdentity,
    ) -> (LeaderElection, mpsc::Receiver<ElectionEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let election = LeaderElection::spawn(identity, ElectionTimings::default(), hub.join(identity.address), tx);
        (election, rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<ElectionEvent>) -> ElectionEvent {
        timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for election event")
            .expect("event channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_nodes_converge_on_highest_priority() {
        let hub = Hub::new();
        let (_e1, mut rx1) = spawn_node(&hub, identity(10));
        let (_e2, mut rx2) = spawn_node(&hub, identity(20));
        let (_e3, mut rx3) = spawn_node(&hub, identity(30));

        // Highest priority wins its own election
        assert_eq!(
            next_event(&mut rx3).await,
            ElectionEvent::BecameLeader(Ipv4Addr::new(10, 0, 0, 30))
        );

        // Everyone else ends FOLLOWER with the winner recorded as leader
        assert_eq!(
            next_event(&mut rx1).await,
            ElectionEvent::LeaderElected(Ipv4Addr::new(10, 0, 0, 30))
        );
        assert_eq!(
            next_event(&mut rx2).await,
            ElectionEvent::LeaderElected(Ipv4Addr::new(10, 0, 0, 30))
        );
    }

    // Documented asymmetry, preserved from the observed protocol: a LEADER
    // frame forces FOLLOWER even when the receiver outranks the sender. A
    // textbook Bully would reject the lower-priority announcement.
    #[tokio::test(start_paused = true)]
    async fn test_leader_frame_overrides_higher_priority_candidate() {
        let hub = Hub::new();
        let (_election, mut rx) = spawn_node(&hub, identity(200));

        // Alone on the network, the node elects itself
        assert_eq!(
            next_event(&mut rx).await,
            ElectionEvent::BecameLeader(Ipv4Addr::new(10, 0, 0, 200))
        );

        // A lower-priority node announces leadership anyway
        let intruder = identity(1);
        let fake = hub.join(intruder.address);
        fake.send(ElectionMessage::leader(&intruder)).await.unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            ElectionEvent::LeaderElected(Ipv4Addr::new(10, 0, 0, 1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_triggers_single_reelection() {
        let hub = Hub::new();
        let (_election, mut rx) = spawn_node(&hub, identity(5));

        assert_eq!(
            next_event(&mut rx).await,
            ElectionEvent::BecameLeader(Ipv4Addr::new(10, 0, 0, 5))
        );

        // A higher-priority leader appears, then goes silent
        let leader = identity(250);
        let fake = hub.join(leader.address);
        fake.send(ElectionMessage::leader(&leader)).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            ElectionEvent::LeaderElected(leader.address)
        );
        fake.send(ElectionMessage::heartbeat(&leader)).await.unwrap();

        // Silence past the timeout: exactly one loss, then the node re-elects
        // itself (the watchdog is disarmed during candidacy)
        assert_eq!(
            next_event(&mut rx).await,
            ElectionEvent::LeaderLost(leader.address)
        );
        assert_eq!(
            next_event(&mut rx).await,
            ElectionEvent::BecameLeader(Ipv4Addr::new(10, 0, 0, 5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_from_unknown_higher_priority_adopts_leader() {
        let hub = Hub::new();
        let (_election, mut rx) = spawn_node(&hub, identity(5));

        assert_eq!(
            next_event(&mut rx).await,
            ElectionEvent::BecameLeader(Ipv4Addr::new(10, 0, 0, 5))
        );

        // Known leader X
        let x = identity(100);
        hub.join(x.address)
            .send(ElectionMessage::leader(&x))
            .await
            .unwrap();
        assert_eq!(next_event(&mut rx).await, ElectionEvent::LeaderElected(x.address));

        // Y's LEADER frame was lost, only its heartbeat arrives; Y outranks us
        let y = identity(150);
        hub.join(y.address)
            .send(ElectionMessage::heartbeat(&y))
            .await
            .unwrap();
        assert_eq!(next_event(&mut rx).await, ElectionEvent::LeaderElected(y.address));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conceded_candidate_never_declares_leadership() {
        let hub = Hub::new();
        let me = identity(5);
        let (_election, mut rx) = spawn_node(&hub, me);

        let rival = identity(240);
        let fake = hub.join(rival.address);

        // Wait for the node's candidacy broadcast, then outbid it
        loop {
            let msg = timeout(Duration::from_secs(30), fake.recv())
                .await
                .expect("no candidacy observed")
                .unwrap();
            if msg.kind == MessageKind::Election {
                break;
            }
        }
        fake.send(ElectionMessage::election(&rival)).await.unwrap();

        // The armed election timer expires, re-checks the state, and must
        // not declare leadership; no event may surface
        let quiet = timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(quiet.is_err(), "conceded candidate emitted {:?}", quiet);

        // The rival finally announces; the node follows
        fake.send(ElectionMessage::leader(&rival)).await.unwrap();
        assert_eq!(next_event(&mut rx).await, ElectionEvent::LeaderElected(rival.address));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_silences_events() {
        let hub = Hub::new();
        let (mut election, mut rx) = spawn_node(&hub, identity(5));

        election.stop();
        election.stop();

        // The task is gone, so the sender side drops and no event ever fires
        let closed = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("receiver did not settle");
        assert!(closed.is_none());

        // Stopping a never-started handle is also fine
        let (tx, _rx2) = mpsc::channel(1);
        let mut fresh = LeaderElection::spawn(
            identity(6),
            ElectionTimings::default(),
            hub.join(Ipv4Addr::new(10, 0, 0, 6)),
            tx,
        );
        fresh.stop();
        fresh.stop();
    }
}
