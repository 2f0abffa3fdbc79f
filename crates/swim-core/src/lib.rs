//! swim-core: SWIM failure detection and membership dissemination.
//!
//! This crate provides:
//! - `NodeIdentity`, the `(protocol, host, port, uid)` identity of a process
//! - The membership table with incarnation-based conflict resolution
//! - Suspicion tracking, local health and piggyback gossip (Lifeguard)
//! - `SwimInstance`, a clock-free engine that returns directives instead of doing I/O
//! - The `SwimPeer` trait shells implement to deliver messages

pub mod error;
pub mod node;
pub mod peer;
pub mod swim;

pub use error::{Result, SwimError};
pub use node::{NodeIdentity, NodeIdentityError};
pub use peer::{SwimPeer, TransportError};
pub use swim::{
    Directive, GossipUpdate, InMemoryMetrics, Member, MemberStatusChange, MetricsSink,
    NoopMetrics, Status, SwimInstance, SwimMessage, SwimSettings,
};
