//! SWIM protocol message types.
//!
//! Messages are plain serde values. `to_json`/`from_json` give the JSON wire
//! form used by the UDP daemon; any other shell is free to pick its own codec.

use super::membership::{Incarnation, Member, Status};
use crate::NodeIdentity;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Piggybacked membership state about one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GossipUpdate {
    pub node: NodeIdentity,
    pub incarnation: Incarnation,
    pub status: Status,
}

impl GossipUpdate {
    pub fn new(node: NodeIdentity, incarnation: Incarnation, status: Status) -> Self {
        Self {
            node,
            incarnation,
            status,
        }
    }

    /// Create an Alive update.
    pub fn alive(node: NodeIdentity, incarnation: Incarnation) -> Self {
        Self::new(node, incarnation, Status::Alive)
    }

    /// Create a Suspect update with a single reporter.
    pub fn suspect(node: NodeIdentity, incarnation: Incarnation, reporter: NodeIdentity) -> Self {
        Self::new(node, incarnation, Status::suspect_by(reporter))
    }

    /// Create a Dead update.
    pub fn dead(node: NodeIdentity, incarnation: Incarnation) -> Self {
        Self::new(node, incarnation, Status::Dead)
    }
}

impl From<&Member> for GossipUpdate {
    fn from(member: &Member) -> Self {
        Self::new(member.node.clone(), member.incarnation, member.status.clone())
    }
}

/// SWIM protocol messages.
///
/// Ping, PingRequest and Ack carry piggybacked gossip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SwimMessage {
    /// Direct probe.
    Ping {
        origin: NodeIdentity,
        /// Sequence number for matching acks
        seq: u64,
        payload: Vec<GossipUpdate>,
    },

    /// Ask the recipient to probe `target` on the origin's behalf.
    PingRequest {
        origin: NodeIdentity,
        target: NodeIdentity,
        seq: u64,
        payload: Vec<GossipUpdate>,
    },

    /// Proof that `target` is alive at `incarnation`.
    ///
    /// Relays forward the target's ack to the origin with the origin's `seq`.
    Ack {
        target: NodeIdentity,
        incarnation: Incarnation,
        seq: u64,
        payload: Vec<GossipUpdate>,
    },

    /// A relay could not reach `target` in time.
    Nack { target: NodeIdentity, seq: u64 },
}

impl SwimMessage {
    /// Create a ping message with gossip updates.
    pub fn ping(origin: NodeIdentity, seq: u64, payload: Vec<GossipUpdate>) -> Self {
        Self::Ping {
            origin,
            seq,
            payload,
        }
    }

    pub fn ping_request(
        origin: NodeIdentity,
        target: NodeIdentity,
        seq: u64,
        payload: Vec<GossipUpdate>,
    ) -> Self {
        Self::PingRequest {
            origin,
            target,
            seq,
            payload,
        }
    }

    /// Create an ack message with gossip updates.
    pub fn ack(
        target: NodeIdentity,
        incarnation: Incarnation,
        seq: u64,
        payload: Vec<GossipUpdate>,
    ) -> Self {
        Self::Ack {
            target,
            incarnation,
            seq,
            payload,
        }
    }

    pub fn nack(target: NodeIdentity, seq: u64) -> Self {
        Self::Nack { target, seq }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from JSON bytes.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Piggybacked gossip, empty for nacks.
    pub fn payload(&self) -> &[GossipUpdate] {
        match self {
            Self::Ping { payload, .. }
            | Self::PingRequest { payload, .. }
            | Self::Ack { payload, .. } => payload,
            Self::Nack { .. } => &[],
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::Ping { seq, .. }
            | Self::PingRequest { seq, .. }
            | Self::Ack { seq, .. }
            | Self::Nack { seq, .. } => *seq,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::PingRequest { .. } => "pingRequest",
            Self::Ack { .. } => "ack",
            Self::Nack { .. } => "nack",
        }
    }
}

/// A member's status as seen locally changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberStatusChange {
    pub node: NodeIdentity,
    /// `None` when the member was just added
    pub previous: Option<Status>,
    pub current: Status,
    pub incarnation: Incarnation,
}

impl MemberStatusChange {
    /// True when the member moved between reachable and unreachable/dead.
    pub fn is_reachability_change(&self) -> bool {
        let reachable = |s: &Status| s.is_alive() || s.is_suspect();
        match &self.previous {
            Some(previous) => reachable(previous) != reachable(&self.current),
            None => true,
        }
    }
}

/// Instruction returned by the engine to its hosting shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Deliver `message` to `to`.
    ///
    /// When `deadline_ms` is set the message starts a probe; see
    /// [`Directive::probe_deadline`].
    Send {
        to: NodeIdentity,
        message: SwimMessage,
        deadline_ms: Option<u64>,
    },

    /// Call `on_periodic_tick` at `at_ms`.
    ScheduleNextTick { at_ms: u64 },

    MembershipChanged(MemberStatusChange),
}

impl Directive {
    /// `(target, seq, deadline_ms)` of the probe this directive starts.
    ///
    /// The shell should call
    /// [`SwimInstance::on_ping_timeout`](super::SwimInstance::on_ping_timeout)
    /// with `target` and `seq` once the deadline passes. For a ping request the
    /// target is the probed node, not the relay the message goes to. Duplicate
    /// or late timeout calls are ignored, and the next periodic tick sweeps
    /// overdue probes as well.
    pub fn probe_deadline(&self) -> Option<(NodeIdentity, u64, u64)> {
        match self {
            Self::Send {
                to,
                message: SwimMessage::Ping { seq, .. },
                deadline_ms: Some(deadline),
            } => Some((to.clone(), *seq, *deadline)),
            Self::Send {
                message: SwimMessage::PingRequest { target, seq, .. },
                deadline_ms: Some(deadline),
                ..
            } => Some((target.clone(), *seq, *deadline)),
            _ => None,
        }
    }
}
