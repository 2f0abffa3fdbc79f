//! Outstanding probe bookkeeping.
//!
//! Tracks three kinds of in-flight probes, all keyed by a local sequence number:
//! 1. Direct probes: we pinged a target and wait for its ack
//! 2. Indirect probes: the direct probe timed out and we asked K relays for help
//! 3. Relayed probes: another node asked us to ping a target on its behalf
//!
//! The tracker only records state. Deciding what a timeout means is up to the
//! engine.

use crate::NodeIdentity;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Phase of one of our own probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbePhase {
    /// Waiting for the target's ack
    Direct,
    /// Waiting for any relay to forward an ack
    Indirect {
        relays: Vec<NodeIdentity>,
        /// When the ping-requests went out
        requested_at_ms: u64,
        /// Relays that answered with a nack
        nacks: BTreeSet<NodeIdentity>,
    },
}

/// A probe we started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub target: NodeIdentity,
    pub seq: u64,
    pub started_at_ms: u64,
    pub deadline_ms: u64,
    pub phase: ProbePhase,
}

impl Probe {
    /// Relays that neither forwarded an ack nor sent a nack.
    pub fn missing_nacks(&self) -> Vec<NodeIdentity> {
        match &self.phase {
            ProbePhase::Direct => Vec::new(),
            ProbePhase::Indirect { relays, nacks, .. } => relays
                .iter()
                .filter(|r| !nacks.contains(*r))
                .cloned()
                .collect(),
        }
    }

    /// When the probe moved to the indirect phase, if it has.
    pub fn requested_at_ms(&self) -> Option<u64> {
        match &self.phase {
            ProbePhase::Direct => None,
            ProbePhase::Indirect {
                requested_at_ms, ..
            } => Some(*requested_at_ms),
        }
    }
}

/// A probe we run for another node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedProbe {
    pub origin: NodeIdentity,
    /// Sequence number the origin is waiting on
    pub origin_seq: u64,
    pub target: NodeIdentity,
    pub deadline_ms: u64,
}

/// What an incoming ack resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckMatch {
    Own(Probe),
    Relayed(RelayedProbe),
}

/// What an expired sequence number was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimedOut {
    Direct(Probe),
    Indirect(Probe),
    Relayed(RelayedProbe),
}

/// True if an ack from `responder` settles a probe of `probed`.
///
/// A seed added with uid 0 is answered by whatever process runs on its endpoint.
fn answers_for(probed: &NodeIdentity, responder: &NodeIdentity) -> bool {
    probed == responder || (probed.uid() == 0 && probed.same_endpoint(responder))
}

/// Outstanding probes indexed by sequence number.
#[derive(Debug)]
pub struct ProbeTracker {
    /// Next sequence number, shared by own and relayed probes
    next_seq: u64,
    probes: HashMap<u64, Probe>,
    relayed: HashMap<u64, RelayedProbe>,
}

impl Default for ProbeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeTracker {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            probes: HashMap::new(),
            relayed: HashMap::new(),
        }
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);
        seq
    }

    /// Start a direct probe of `target`.
    ///
    /// Returns the sequence number to put in the ping.
    pub fn start_probe(&mut self, target: NodeIdentity, now_ms: u64, deadline_ms: u64) -> u64 {
        let seq = self.allocate_seq();
        self.probes.insert(
            seq,
            Probe {
                target,
                seq,
                started_at_ms: now_ms,
                deadline_ms,
                phase: ProbePhase::Direct,
            },
        );
        seq
    }

    /// Move a direct probe to the indirect phase.
    ///
    /// Returns false if `seq` is unknown or already indirect.
    pub fn escalate(
        &mut self,
        seq: u64,
        relays: Vec<NodeIdentity>,
        now_ms: u64,
        deadline_ms: u64,
    ) -> bool {
        match self.probes.get_mut(&seq) {
            Some(probe) if probe.phase == ProbePhase::Direct => {
                probe.phase = ProbePhase::Indirect {
                    relays,
                    requested_at_ms: now_ms,
                    nacks: BTreeSet::new(),
                };
                probe.deadline_ms = deadline_ms;
                true
            }
            _ => false,
        }
    }

    /// Start a probe of `target` on behalf of `origin`.
    pub fn start_relay(
        &mut self,
        origin: NodeIdentity,
        origin_seq: u64,
        target: NodeIdentity,
        deadline_ms: u64,
    ) -> u64 {
        let seq = self.allocate_seq();
        self.relayed.insert(
            seq,
            RelayedProbe {
                origin,
                origin_seq,
                target,
                deadline_ms,
            },
        );
        seq
    }

    /// Resolve the probe `seq` with an ack about `target`.
    ///
    /// An ack for the wrong target leaves the probe pending.
    pub fn ack(&mut self, seq: u64, target: &NodeIdentity) -> Option<AckMatch> {
        if self.probes.get(&seq).is_some_and(|p| answers_for(&p.target, target)) {
            return self.probes.remove(&seq).map(AckMatch::Own);
        }
        if self.relayed.get(&seq).is_some_and(|r| answers_for(&r.target, target)) {
            return self.relayed.remove(&seq).map(AckMatch::Relayed);
        }
        None
    }

    /// Record a nack from `relay` for our indirect probe `seq`.
    pub fn nack(&mut self, seq: u64, relay: &NodeIdentity, target: &NodeIdentity) -> bool {
        match self.probes.get_mut(&seq) {
            Some(Probe {
                target: probe_target,
                phase: ProbePhase::Indirect { relays, nacks, .. },
                ..
            }) if probe_target == target && relays.contains(relay) => nacks.insert(relay.clone()),
            _ => false,
        }
    }

    /// Take the probe `seq` about `target` out for timeout handling.
    ///
    /// Nothing happens before the probe's current deadline, so a timer armed
    /// for the direct phase cannot end an escalated probe early. A direct
    /// probe is left in place so it can be escalated.
    pub fn timed_out(&mut self, seq: u64, target: &NodeIdentity, now_ms: u64) -> Option<TimedOut> {
        let is_direct = self
            .probes
            .get(&seq)
            .filter(|p| p.target == *target && p.deadline_ms <= now_ms)
            .map(|p| p.phase == ProbePhase::Direct);
        match is_direct {
            Some(true) => return self.probes.get(&seq).cloned().map(TimedOut::Direct),
            Some(false) => return self.probes.remove(&seq).map(TimedOut::Indirect),
            None => {}
        }
        if self
            .relayed
            .get(&seq)
            .is_some_and(|r| r.target == *target && r.deadline_ms <= now_ms)
        {
            return self.relayed.remove(&seq).map(TimedOut::Relayed);
        }
        None
    }

    /// Drop the probe `seq` without resolving it.
    pub fn cancel(&mut self, seq: u64) -> Option<Probe> {
        self.probes.remove(&seq)
    }

    /// Drop every own probe of `target`.
    pub fn cancel_target(&mut self, target: &NodeIdentity) {
        self.probes.retain(|_, p| p.target != *target);
    }

    /// `(target, seq)` of every probe whose deadline is at or before `now_ms`,
    /// earliest first.
    pub fn overdue(&self, now_ms: u64) -> Vec<(NodeIdentity, u64)> {
        let mut due: Vec<(u64, u64, NodeIdentity)> = self
            .probes
            .values()
            .filter(|p| p.deadline_ms <= now_ms)
            .map(|p| (p.deadline_ms, p.seq, p.target.clone()))
            .chain(
                self.relayed
                    .iter()
                    .filter(|(_, r)| r.deadline_ms <= now_ms)
                    .map(|(seq, r)| (r.deadline_ms, *seq, r.target.clone())),
            )
            .collect();
        due.sort();
        due.into_iter().map(|(_, seq, target)| (target, seq)).collect()
    }

    pub fn is_probing(&self, target: &NodeIdentity) -> bool {
        self.probes.values().any(|p| p.target == *target)
    }

    /// Targets of our own probes in flight.
    pub fn probing_targets(&self) -> HashSet<NodeIdentity> {
        self.probes.values().map(|p| p.target.clone()).collect()
    }

    pub fn get(&self, seq: u64) -> Option<&Probe> {
        self.probes.get(&seq)
    }

    /// Number of our own probes in flight.
    pub fn pending_probe_count(&self) -> usize {
        self.probes.len()
    }

    pub fn relayed_count(&self) -> usize {
        self.relayed.len()
    }
}
