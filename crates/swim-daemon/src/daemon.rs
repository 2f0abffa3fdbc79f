//! The daemon event loop.
//!
//! One task owns the `SwimInstance`. A single `tokio::select!` loop feeds it
//! datagrams, periodic ticks and probe deadlines, and carries out the
//! directives it returns.

use crate::transport::{MAX_DATAGRAM_SIZE, UdpPeer};
use anyhow::Result;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swim_core::swim::InMemoryMetrics;
use swim_core::{
    Directive, GossipUpdate, MemberStatusChange, MetricsSink, NodeIdentity, Status, SwimInstance,
    SwimMessage, SwimPeer, SwimSettings,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

/// How often the daemon logs a membership summary.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// A probe the engine wants to hear about once `at_ms` passes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ProbeDeadline {
    at_ms: u64,
    target: NodeIdentity,
    seq: u64,
}

/// Daemon state: the engine plus the I/O around it.
pub struct SwimDaemon {
    swim: SwimInstance,
    socket: Arc<UdpSocket>,
    /// Send handles by member
    peers: HashMap<NodeIdentity, UdpPeer>,
    /// Reverse index for datagrams that do not name their sender
    addresses: HashMap<SocketAddr, NodeIdentity>,
    deadlines: BinaryHeap<Reverse<ProbeDeadline>>,
    next_tick_ms: u64,
    started: Instant,
    metrics: InMemoryMetrics,
    subscribers: Vec<mpsc::UnboundedSender<MemberStatusChange>>,
}

impl SwimDaemon {
    /// Bind the UDP socket and create the engine.
    ///
    /// The advertised host defaults to the bound IP. A wildcard bind without
    /// `advertise` falls back to loopback, which only works on one machine.
    pub async fn bind(
        listen: &str,
        advertise: Option<&str>,
        uid: Option<u64>,
        settings: SwimSettings,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(listen).await?;
        let local = socket.local_addr()?;
        info!("Listening on udp://{}", local);

        let host = match advertise {
            Some(host) => host.to_string(),
            None if local.ip().is_unspecified() => {
                warn!("Bound to {} without --advertise, advertising 127.0.0.1", local.ip());
                "127.0.0.1".to_string()
            }
            None => local.ip().to_string(),
        };
        let myself = match uid {
            Some(uid) => NodeIdentity::new("udp", host, local.port(), uid),
            None => NodeIdentity::generate("udp", host, local.port()),
        };
        if myself.uid() == 0 {
            anyhow::bail!("uid 0 is reserved for seeds");
        }

        let metrics = InMemoryMetrics::new();
        let swim = SwimInstance::with_metrics(settings, myself, metrics.clone())?;

        Ok(Self {
            swim,
            socket: Arc::new(socket),
            peers: HashMap::new(),
            addresses: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_tick_ms: 0,
            started: Instant::now(),
            metrics,
            subscribers: Vec::new(),
        })
    }

    pub fn myself(&self) -> &NodeIdentity {
        self.swim.myself()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The engine, for inspecting membership.
    pub fn swim(&self) -> &SwimInstance {
        &self.swim
    }

    pub fn metrics(&self) -> &InMemoryMetrics {
        &self.metrics
    }

    /// Receive every membership change from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<MemberStatusChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Add seed members. Seeds are probed like any other member.
    pub async fn join(&mut self, seeds: Vec<NodeIdentity>) {
        let now = self.now_ms();
        for seed in seeds {
            if seed.same_endpoint(self.myself()) {
                debug!("Skipping seed {}: that is us", seed);
                continue;
            }
            match self.swim.add_member(seed.clone(), Status::Alive, 0, now) {
                Ok(directives) => {
                    info!("Added seed {}", seed);
                    self.carry_out(directives).await;
                }
                Err(e) => warn!("Failed to add seed {}: {}", seed, e),
            }
        }
    }

    /// Run until `shutdown` resolves, then hand the daemon back.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Self {
        tokio::pin!(shutdown);
        let socket = self.socket.clone();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut status = tokio::time::interval(STATUS_LOG_INTERVAL);

        info!("Daemon running as {}", self.myself());

        loop {
            let wakeup = self.next_wakeup();

            tokio::select! {
                // Handle graceful shutdown
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }

                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => self.on_datagram(&buf[..len], from).await,
                        Err(e) => warn!("Failed to receive datagram: {}", e),
                    }
                }

                // Probe deadlines and the next protocol period
                _ = sleep_until(wakeup) => {
                    self.on_timers().await;
                }

                _ = status.tick() => {
                    self.log_status();
                }
            }
        }

        self
    }

    /// Leave the cluster and tell every member we are gone.
    pub async fn leave(&mut self) {
        let now = self.now_ms();
        let myself = self.myself().clone();
        let directives = self.swim.remove_member(&myself, now);
        self.carry_out(directives).await;

        // Unsolicited pings; their acks match no probe and are dropped
        let farewell = GossipUpdate::dead(myself.clone(), self.swim.incarnation());
        for member in self.swim.other_members() {
            let message = SwimMessage::ping(myself.clone(), 0, vec![farewell.clone()]);
            self.send(&member.node, &message).await;
        }
    }

    // ==================== Event handlers ====================

    async fn on_datagram(&mut self, data: &[u8], from: SocketAddr) {
        self.metrics.record_message_inbound(data.len());
        let message = match SwimMessage::from_json(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed datagram from {}: {}", from, e);
                return;
            }
        };
        let kind = message.kind();
        trace!("Received {} from {}", kind, from);

        let now = self.now_ms();
        let result = match message {
            SwimMessage::Ping {
                origin,
                seq,
                payload,
            } => {
                self.learn_address(&origin, from);
                self.swim.on_ping(&origin, seq, payload, now)
            }
            SwimMessage::PingRequest {
                origin,
                target,
                seq,
                payload,
            } => {
                self.learn_address(&origin, from);
                self.swim.on_ping_request(&origin, &target, seq, payload, now)
            }
            // Forwarded acks come from the relay, so `from` is not the target
            SwimMessage::Ack {
                target,
                incarnation,
                seq,
                payload,
            } => self.swim.on_ack(&target, incarnation, seq, payload, now),
            SwimMessage::Nack { target, seq } => {
                let Some(relay) = self.addresses.get(&from).cloned() else {
                    debug!("Dropping nack from unknown address {}", from);
                    return;
                };
                Ok(self.swim.on_nack(&relay, &target, seq, now))
            }
        };

        match result {
            Ok(directives) => self.carry_out(directives).await,
            Err(e) => warn!("Rejected {} from {}: {}", kind, from, e),
        }
    }

    async fn on_timers(&mut self) {
        let now = self.now_ms();

        while let Some(Reverse(due)) = self.deadlines.peek() {
            if due.at_ms > now {
                break;
            }
            let Some(Reverse(due)) = self.deadlines.pop() else {
                break;
            };
            let directives = self.swim.on_ping_timeout(&due.target, due.seq, now);
            self.carry_out(directives).await;
        }

        if now >= self.next_tick_ms {
            // Replaced by the tick's ScheduleNextTick
            self.next_tick_ms = now + self.swim.settings().probe_interval_ms;
            let directives = self.swim.on_periodic_tick(now);
            self.carry_out(directives).await;
        }
    }

    fn on_membership_changed(&mut self, change: MemberStatusChange) {
        match &change.previous {
            Some(previous) => info!(
                "{} is now {} (was {}, incarnation {})",
                change.node,
                change.current.name(),
                previous.name(),
                change.incarnation
            ),
            None => info!("{} joined as {}", change.node, change.current.name()),
        }

        if change.current.is_dead()
            && let Some(peer) = self.peers.remove(&change.node)
        {
            self.addresses.remove(&peer.addr());
        }

        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    // ==================== Directives ====================

    async fn carry_out(&mut self, directives: Vec<Directive>) {
        for directive in directives {
            if let Some((target, seq, at_ms)) = directive.probe_deadline() {
                self.deadlines
                    .push(Reverse(ProbeDeadline { at_ms, target, seq }));
            }
            match directive {
                Directive::Send { to, message, .. } => self.send(&to, &message).await,
                Directive::ScheduleNextTick { at_ms } => self.next_tick_ms = at_ms,
                Directive::MembershipChanged(change) => self.on_membership_changed(change),
            }
        }
    }

    async fn send(&mut self, to: &NodeIdentity, message: &SwimMessage) {
        if !self.peers.contains_key(to) {
            match UdpPeer::resolve(to.clone(), self.socket.clone()).await {
                Ok(peer) => {
                    self.addresses.insert(peer.addr(), to.clone());
                    self.peers.insert(to.clone(), peer);
                }
                Err(e) => {
                    warn!("Cannot send {} to {}: {}", message.kind(), to, e);
                    return;
                }
            }
        }

        let Some(peer) = self.peers.get(to) else {
            return;
        };
        // Best effort: a lost datagram looks like a lost ack to the engine
        match peer.send(message).await {
            Ok(bytes) => self.metrics.record_message_outbound(bytes),
            Err(e) => debug!("Failed to send {} to {}: {}", message.kind(), to, e),
        }
    }

    // ==================== Helpers ====================

    /// Remember where a member's datagrams come from.
    fn learn_address(&mut self, node: &NodeIdentity, addr: SocketAddr) {
        if self.peers.get(node).is_some_and(|p| p.addr() == addr) {
            return;
        }
        if let Some(old) = self.peers.insert(
            node.clone(),
            UdpPeer::new(node.clone(), addr, self.socket.clone()),
        ) {
            self.addresses.remove(&old.addr());
        }
        self.addresses.insert(addr, node.clone());
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn instant_at(&self, at_ms: u64) -> Instant {
        self.started + Duration::from_millis(at_ms)
    }

    /// Earliest of the next tick and the nearest probe deadline.
    fn next_wakeup(&self) -> Instant {
        let next = match self.deadlines.peek() {
            Some(Reverse(due)) => due.at_ms.min(self.next_tick_ms),
            None => self.next_tick_ms,
        };
        self.instant_at(next)
    }

    fn log_status(&self) {
        let snapshot = self.metrics.snapshot();
        info!(
            "Members: {} alive, {} suspect, {} unreachable; {} dead so far, {} tombstones, health {}, incarnation {}",
            snapshot.members_alive,
            snapshot.members_suspect,
            snapshot.members_unreachable,
            snapshot.total_dead,
            snapshot.tombstones,
            snapshot.local_health_multiplier,
            snapshot.incarnation
        );
        debug!(
            "Probes: {} ok, {} failed, {} pending; {} suspicions, {} gossip queued",
            snapshot.successful_probes,
            snapshot.failed_probes,
            self.swim.pending_probe_count(),
            self.swim.suspicion_count(),
            self.swim.gossip_backlog()
        );
        debug!(
            "Traffic: {} in ({} bytes), {} out ({} bytes); mean ping round trip {:?} ms",
            snapshot.messages_inbound,
            snapshot.bytes_inbound,
            snapshot.messages_outbound,
            snapshot.bytes_outbound,
            snapshot.mean_ping_round_trip_ms()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines_pop_earliest_first() {
        let node = NodeIdentity::new("udp", "127.0.0.1", 7001, 1);
        let mut heap = BinaryHeap::new();
        for (at_ms, seq) in [(300, 1), (100, 2), (200, 3)] {
            heap.push(Reverse(ProbeDeadline {
                at_ms,
                target: node.clone(),
                seq,
            }));
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|Reverse(d)| d.seq)).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_bind_rejects_zero_uid() {
        let result = SwimDaemon::bind("127.0.0.1:0", None, Some(0), SwimSettings::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bind_advertises_bound_address() {
        let daemon = SwimDaemon::bind("127.0.0.1:0", None, Some(7), SwimSettings::default())
            .await
            .unwrap();
        let addr = daemon.local_addr().unwrap();

        assert_eq!(daemon.myself().host(), "127.0.0.1");
        assert_eq!(daemon.myself().port(), addr.port());
        assert_eq!(daemon.myself().uid(), 7);
    }
}
