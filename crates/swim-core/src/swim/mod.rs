//! SWIM (Scalable Weakly-consistent Infection-style Membership) protocol implementation.
//!
//! Transport-agnostic engine with the Lifeguard extensions. The same engine
//! can sit behind any shell: the engine says what to send and when, the shell
//! does the I/O.
//!
//! # Protocol Overview
//!
//! **Failure Detection:**
//! 1. Each period, ping the next member in a shuffled round-robin order
//! 2. If no ack within timeout, ask K other members to ping the target (ping-request)
//! 3. If no relay forwards an ack either, mark the target as "suspect"
//! 4. If nobody refutes the suspicion in time, mark it "unreachable" (optional) and then "dead"
//!
//! **Lifeguard:**
//! - Independent suspicions of the same member shorten its suspicion timeout
//! - A local health multiplier stretches timeouts while this node looks unhealthy
//!
//! **Gossip Dissemination:**
//! - Piggyback membership updates on every ping, ping-request and ack
//! - Updates: `Alive`, `Suspect`, `Unreachable`, `Dead`
//! - A member refutes suspicion of itself by bumping its incarnation
//! - Dead members are tombstoned so stale gossip cannot bring them back

pub mod config;
pub mod failure;
pub mod gossip;
pub mod health;
pub mod instance;
pub mod membership;
pub mod messages;
pub mod metrics;
pub mod suspicion;
pub mod tombstone;

pub use config::{
    GossipSettings, LifeguardSettings, SuspicionDecay, SuspicionSettings, SwimSettings,
    Unreachability,
};
pub use failure::ProbeTracker;
pub use gossip::GossipQueue;
pub use health::LocalHealthMultiplier;
pub use instance::SwimInstance;
pub use membership::{Incarnation, Member, MembershipTable, MergeResult, Status, StatusCounts};
pub use messages::{Directive, GossipUpdate, MemberStatusChange, SwimMessage};
pub use metrics::{InMemoryMetrics, MetricsSink, MetricsSnapshot, NoopMetrics};
pub use suspicion::{Suspicion, SuspicionOutcome, SuspicionTimeouts, SuspicionTracker};
pub use tombstone::{Tombstone, TombstoneStore};
