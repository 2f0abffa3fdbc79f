//! End-to-end tests for swim-daemon.
//!
//! Runs real daemons on loopback UDP and checks that they find each other,
//! answer raw protocol messages and detect a member that goes away.

use std::time::Duration;

use swim_core::swim::{SuspicionSettings, Unreachability};
use swim_core::{GossipUpdate, MemberStatusChange, NodeIdentity, SwimMessage, SwimSettings};
use swim_daemon::{MAX_DATAGRAM_SIZE, SwimDaemon, parse_seed};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

// ============================================================================
// Helpers
// ============================================================================

/// Fast protocol periods so tests finish in a few seconds.
fn fast_settings() -> SwimSettings {
    SwimSettings {
        probe_interval_ms: 100,
        ping_timeout_ms: 40,
        indirect_probe_count: 2,
        suspicion: SuspicionSettings {
            min_timeout_ms: 200,
            max_timeout_ms: 600,
            ..SuspicionSettings::default()
        },
        unreachability: Unreachability::Disabled,
        ..SwimSettings::default()
    }
}

/// A daemon running on its own task.
struct RunningDaemon {
    myself: NodeIdentity,
    changes: mpsc::UnboundedReceiver<MemberStatusChange>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<SwimDaemon>,
}

impl RunningDaemon {
    async fn start(uid: u64, seeds: &[&str]) -> Self {
        let mut daemon = SwimDaemon::bind("127.0.0.1:0", None, Some(uid), fast_settings())
            .await
            .expect("Failed to bind daemon");
        let myself = daemon.myself().clone();
        let changes = daemon.subscribe();

        let seeds = seeds
            .iter()
            .map(|s| parse_seed(s).expect("valid seed"))
            .collect();
        daemon.join(seeds).await;

        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(daemon.run(async {
            let _ = stopped.await;
        }));

        Self {
            myself,
            changes,
            stop,
            handle,
        }
    }

    fn seed(&self) -> String {
        self.myself.endpoint()
    }

    /// Wait for a change matching `predicate`.
    async fn expect_change(
        &mut self,
        what: &str,
        predicate: impl Fn(&MemberStatusChange) -> bool,
    ) -> MemberStatusChange {
        timeout(Duration::from_secs(10), async {
            loop {
                let change = self.changes.recv().await.expect("daemon stopped");
                if predicate(&change) {
                    return change;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {}", what))
    }

    async fn stop(self) -> SwimDaemon {
        let _ = self.stop.send(());
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("daemon did not stop")
            .expect("daemon task panicked")
    }
}

async fn recv_message(socket: &UdpSocket) -> SwimMessage {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("Timed out waiting for datagram")
        .expect("recv failed");
    SwimMessage::from_json(&buf[..len]).expect("valid message")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_two_daemons_join_through_seed() {
    let mut first = RunningDaemon::start(1001, &[]).await;
    let mut second = RunningDaemon::start(1002, &[&first.seed()]).await;

    let first_id = first.myself.clone();
    let second_id = second.myself.clone();

    first
        .expect_change("first to see second", |c| {
            c.node == second_id && c.current.is_alive()
        })
        .await;
    second
        .expect_change("second to learn first's identity", |c| {
            c.node == first_id && c.current.is_alive()
        })
        .await;

    let second = second.stop().await;
    let first = first.stop().await;

    let traffic = first.metrics().snapshot();
    assert!(traffic.messages_inbound > 0);
    assert!(traffic.messages_outbound > 0);
    assert!(traffic.bytes_inbound >= traffic.messages_inbound);
    assert!(second.metrics().snapshot().ping_round_trips > 0);

    // The placeholder seed was replaced by the real identity
    let seen: Vec<_> = second.swim().other_members();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].node, first_id);
    assert!(first.swim().member(&second_id).is_some());
}

#[tokio::test]
async fn test_daemon_answers_raw_ping() {
    let daemon = RunningDaemon::start(2001, &[]).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_id = NodeIdentity::new("udp", "127.0.0.1", client.local_addr().unwrap().port(), 9);

    // Garbage is dropped without killing the loop
    client
        .send_to(b"not a swim message", daemon.seed())
        .await
        .unwrap();

    let ping = SwimMessage::ping(
        client_id.clone(),
        77,
        vec![GossipUpdate::alive(client_id.clone(), 0)],
    );
    client
        .send_to(&ping.to_json().unwrap(), daemon.seed())
        .await
        .unwrap();

    // The daemon may probe us too; wait for the ack
    let ack = loop {
        match recv_message(&client).await {
            SwimMessage::Ack {
                target,
                seq: 77,
                incarnation,
                payload,
            } => break (target, incarnation, payload),
            SwimMessage::Ping { .. } => continue,
            other => panic!("Expected Ack, got {:?}", other),
        }
    };
    assert_eq!(ack.0, daemon.myself);
    assert_eq!(ack.1, 0);
    assert!(!ack.2.is_empty());

    let daemon = daemon.stop().await;
    assert!(daemon.swim().member(&client_id).is_some());
}

#[tokio::test]
async fn test_stopped_daemon_is_declared_dead() {
    let mut first = RunningDaemon::start(3001, &[]).await;
    let second = RunningDaemon::start(3002, &[&first.seed()]).await;
    let third = RunningDaemon::start(3003, &[&first.seed()]).await;

    let third_id = third.myself.clone();
    first
        .expect_change("third to join", |c| c.node == third_id && c.current.is_alive())
        .await;

    // Stop without leaving: the others must notice on their own
    third.stop().await;

    first
        .expect_change("third to be declared dead", |c| {
            c.node == third_id && c.current.is_dead()
        })
        .await;

    let first = first.stop().await;
    let second = second.stop().await;
    assert!(first.swim().is_tombstoned(&third_id));
    assert!(first.metrics().snapshot().total_dead >= 1);
    assert!(
        second
            .swim()
            .other_members()
            .iter()
            .all(|m| m.node != third_id || !m.status.is_alive())
    );
}

#[tokio::test]
async fn test_leave_is_gossiped() {
    let mut first = RunningDaemon::start(4001, &[]).await;
    let second = RunningDaemon::start(4002, &[&first.seed()]).await;

    let second_id = second.myself.clone();
    first
        .expect_change("second to join", |c| c.node == second_id && c.current.is_alive())
        .await;

    let mut second = second.stop().await;
    second.leave().await;
    assert!(second.swim().has_left());

    let change = first
        .expect_change("second's departure", |c| c.node == second_id && c.current.is_dead())
        .await;
    assert!(change.incarnation >= 1);

    first.stop().await;
}

#[tokio::test]
async fn test_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swim.json");
    std::fs::write(&path, r#"{"probe_interval_ms": 250, "ping_timeout_ms": 50}"#).unwrap();

    let settings = SwimSettings::load(&path).unwrap();
    let daemon = SwimDaemon::bind("127.0.0.1:0", None, Some(5001), settings)
        .await
        .unwrap();

    assert_eq!(daemon.swim().settings().probe_interval_ms, 250);
    assert_eq!(daemon.swim().settings().ping_timeout_ms, 50);
}
