//! Membership table for tracking known nodes.
//!
//! The membership table is the core data structure for SWIM. It tracks:
//! - All known nodes in the cluster, including ourselves
//! - Their current status (Alive, Suspect, Unreachable, Dead)
//! - Incarnation numbers for conflict resolution
//! - Tombstones for recently removed dead nodes
//! - The round-robin probe order

use super::tombstone::TombstoneStore;
use crate::NodeIdentity;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Per-node counter, only ever incremented by the node it belongs to.
pub type Incarnation = u64;

/// Status of a member in the membership table.
///
/// Ordered by certainty: `Alive < Suspect < Unreachable < Dead`. Within one
/// incarnation a member only moves towards `Dead`; only a higher incarnation
/// moves it back to `Alive`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Status {
    /// Member is believed to be alive
    Alive,
    /// Member failed to respond to a probe, reported by `suspected_by`
    #[serde(rename_all = "camelCase")]
    Suspect {
        suspected_by: BTreeSet<NodeIdentity>,
    },
    /// Suspicion expired without refutation
    Unreachable,
    /// Member confirmed dead; it will be removed and tombstoned
    Dead,
}

impl Status {
    /// Suspect status with a single reporter.
    pub fn suspect_by(reporter: NodeIdentity) -> Self {
        Self::Suspect {
            suspected_by: BTreeSet::from([reporter]),
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }

    pub fn is_suspect(&self) -> bool {
        matches!(self, Self::Suspect { .. })
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable)
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }

    /// Short lowercase name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Suspect { .. } => "suspect",
            Self::Unreachable => "unreachable",
            Self::Dead => "dead",
        }
    }
}

/// A member in the membership table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub node: NodeIdentity,
    pub status: Status,
    pub incarnation: Incarnation,
    /// Protocol period in which the status last changed
    pub protocol_period: u64,
}

impl Member {
    pub fn new(node: NodeIdentity, status: Status, incarnation: Incarnation, period: u64) -> Self {
        Self {
            node,
            status,
            incarnation,
            protocol_period: period,
        }
    }

    /// Create a new alive member.
    pub fn alive(node: NodeIdentity, incarnation: Incarnation, period: u64) -> Self {
        Self::new(node, Status::Alive, incarnation, period)
    }
}

/// Outcome of merging a status observation into the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// The local view changed; `previous` is `None` for a newly added member.
    Applied {
        previous: Option<(Status, Incarnation)>,
    },
    /// The observation was not newer than what we already know.
    IgnoredStale,
    /// The identity is tombstoned.
    IgnoredTombstoned,
}

impl MergeResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Member counts per status, for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub alive: usize,
    pub suspect: usize,
    pub unreachable: usize,
    pub dead: usize,
}

enum Merge {
    Replace,
    Union(BTreeSet<NodeIdentity>),
    Stale,
}

/// Decide how `(incoming, incoming_inc)` combines with `(current, current_inc)`.
///
/// `Dead` is terminal: only `Alive` at a higher incarnation replaces it. A
/// higher-incarnation `Suspect` or `Unreachable` about a dead member is stale,
/// so its incarnation is not recorded.
fn merge_status(
    current: &Status,
    current_inc: Incarnation,
    incoming: &Status,
    incoming_inc: Incarnation,
) -> Merge {
    use Status::*;

    match (current, incoming) {
        // Only a newer process state brings a member back
        (Dead, Alive) if incoming_inc > current_inc => Merge::Replace,
        (Dead, _) => Merge::Stale,
        _ if incoming_inc > current_inc => Merge::Replace,
        (_, Dead) => Merge::Replace,
        _ if incoming_inc < current_inc => Merge::Stale,
        (Alive, Suspect { .. }) | (Alive, Unreachable) | (Suspect { .. }, Unreachable) => {
            Merge::Replace
        }
        (Suspect { suspected_by: known }, Suspect { suspected_by: reported }) => {
            if reported.is_subset(known) {
                Merge::Stale
            } else {
                Merge::Union(known.union(reported).cloned().collect())
            }
        }
        _ => Merge::Stale,
    }
}

/// Membership table tracking every known node.
///
/// Handles:
/// - Monotonic merging of status observations
/// - Removing dead members into the tombstone store
/// - Round-robin probe target selection
pub struct MembershipTable {
    myself: NodeIdentity,
    members: HashMap<NodeIdentity, Member>,
    tombstones: TombstoneStore,
    /// Probe order; holds every non-dead member except ourselves
    probe_order: Vec<NodeIdentity>,
    /// Next position in `probe_order`
    probe_index: usize,
}

impl MembershipTable {
    /// Create a table containing only ourselves, alive at `incarnation`.
    pub fn new(myself: NodeIdentity, incarnation: Incarnation, tombstone_ttl_ms: u64) -> Self {
        let mut members = HashMap::new();
        members.insert(myself.clone(), Member::alive(myself.clone(), incarnation, 0));
        Self {
            myself,
            members,
            tombstones: TombstoneStore::new(tombstone_ttl_ms),
            probe_order: Vec::new(),
            probe_index: 0,
        }
    }

    pub fn myself(&self) -> &NodeIdentity {
        &self.myself
    }

    /// Our own entry. Always present.
    pub fn myself_member(&self) -> &Member {
        &self.members[&self.myself]
    }

    /// Overwrite our own entry. Only the engine's refutation and leave paths use this.
    pub fn update_myself(&mut self, status: Status, incarnation: Incarnation, period: u64) {
        let me = Member::new(self.myself.clone(), status, incarnation, period);
        self.members.insert(self.myself.clone(), me);
    }

    /// Merge a status observation about `node`.
    ///
    /// Observations about ourselves are never applied here; they are
    /// refuted by the engine instead.
    pub fn upsert(
        &mut self,
        node: NodeIdentity,
        status: Status,
        incarnation: Incarnation,
        period: u64,
    ) -> MergeResult {
        if node == self.myself {
            return MergeResult::IgnoredStale;
        }
        if self.tombstones.is_tombstoned(&node) {
            return MergeResult::IgnoredTombstoned;
        }

        let Some(existing) = self.members.get_mut(&node) else {
            let is_dead = status.is_dead();
            self.members
                .insert(node.clone(), Member::new(node.clone(), status, incarnation, period));
            if !is_dead {
                self.insert_probe_target(node);
            }
            return MergeResult::Applied { previous: None };
        };

        let previous = (existing.status.clone(), existing.incarnation);
        match merge_status(&existing.status, existing.incarnation, &status, incarnation) {
            Merge::Stale => return MergeResult::IgnoredStale,
            Merge::Replace => {
                existing.status = status;
                existing.incarnation = existing.incarnation.max(incarnation);
            }
            Merge::Union(suspected_by) => {
                existing.status = Status::Suspect { suspected_by };
            }
        }
        existing.protocol_period = period;

        let now_dead = existing.status.is_dead();
        let was_dead = previous.0.is_dead();
        if now_dead && !was_dead {
            self.remove_probe_target(&node);
        } else if was_dead && !now_dead {
            self.insert_probe_target(node);
        }

        MergeResult::Applied {
            previous: Some(previous),
        }
    }

    /// Overwrite `node`'s entry without the merge rules.
    ///
    /// For administrative changes. Ourselves and tombstoned identities are still
    /// refused, and writing back exactly what is stored changes nothing.
    pub fn set(
        &mut self,
        node: NodeIdentity,
        status: Status,
        incarnation: Incarnation,
        period: u64,
    ) -> MergeResult {
        if node == self.myself {
            return MergeResult::IgnoredStale;
        }
        if self.tombstones.is_tombstoned(&node) {
            return MergeResult::IgnoredTombstoned;
        }

        let now_dead = status.is_dead();
        let previous = self
            .members
            .get(&node)
            .map(|m| (m.status.clone(), m.incarnation));
        if previous
            .as_ref()
            .is_some_and(|(s, inc)| *s == status && *inc == incarnation)
        {
            return MergeResult::IgnoredStale;
        }

        self.members
            .insert(node.clone(), Member::new(node.clone(), status, incarnation, period));
        if now_dead {
            self.remove_probe_target(&node);
        } else {
            self.insert_probe_target(node);
        }
        MergeResult::Applied { previous }
    }

    /// Move `node` to `status` at its current incarnation.
    pub fn mark(&mut self, node: &NodeIdentity, status: Status, period: u64) -> MergeResult {
        match self.members.get(node) {
            Some(member) => {
                let incarnation = member.incarnation;
                self.upsert(node.clone(), status, incarnation, period)
            }
            None => MergeResult::IgnoredStale,
        }
    }

    /// Local suspicion timeout with unreachability enabled.
    pub fn mark_unreachable(&mut self, node: &NodeIdentity, period: u64) -> MergeResult {
        self.mark(node, Status::Unreachable, period)
    }

    /// Local confirmation that `node` is dead. The member stays in the table
    /// until it is tombstoned.
    pub fn mark_dead(&mut self, node: &NodeIdentity, period: u64) -> MergeResult {
        self.mark(node, Status::Dead, period)
    }

    /// First-hand evidence that `node` answered at `incarnation`.
    ///
    /// Revives a suspect or unreachable member at the same incarnation, which
    /// gossip alone may not do. Returns true if the status changed.
    pub fn refute_direct(&mut self, node: &NodeIdentity, incarnation: Incarnation, period: u64) -> bool {
        if *node == self.myself {
            return false;
        }
        if let Some(member) = self.members.get_mut(node)
            && incarnation >= member.incarnation
            && (member.status.is_suspect() || member.status.is_unreachable())
        {
            member.status = Status::Alive;
            member.incarnation = incarnation;
            member.protocol_period = period;
            return true;
        }
        false
    }

    /// Remove a member without tombstoning it.
    pub fn remove(&mut self, node: &NodeIdentity) -> Option<Member> {
        if *node == self.myself {
            return None;
        }
        self.remove_probe_target(node);
        self.members.remove(node)
    }

    /// Remove a member and tombstone its identity.
    ///
    /// The identity is tombstoned even if it was not in the table, so gossip
    /// about it stays suppressed.
    pub fn tombstone(&mut self, node: &NodeIdentity, now_ms: u64) -> Option<Member> {
        if *node == self.myself {
            return None;
        }
        let removed = self.remove(node);
        self.tombstones.tombstone(node.clone(), now_ms);
        removed
    }

    pub fn is_tombstoned(&self, node: &NodeIdentity) -> bool {
        self.tombstones.is_tombstoned(node)
    }

    pub fn expire_tombstones(&mut self, now_ms: u64) -> usize {
        self.tombstones.expire_older_than(now_ms)
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Get a member by identity.
    pub fn member(&self, node: &NodeIdentity) -> Option<&Member> {
        self.members.get(node)
    }

    pub fn contains(&self, node: &NodeIdentity) -> bool {
        self.members.contains_key(node)
    }

    /// Snapshot of every member, ourselves included.
    pub fn all_members(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    /// Iterate over every member, ourselves included.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Iterate over members other than ourselves.
    pub fn peers(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| m.node != self.myself)
    }

    /// Other members sharing `node`'s endpoint under a different uid.
    pub fn previous_incarnations_of(&self, node: &NodeIdentity) -> Vec<NodeIdentity> {
        self.peers()
            .filter(|m| m.node != *node && m.node.same_endpoint(node))
            .map(|m| m.node.clone())
            .collect()
    }

    /// Number of members, ourselves included.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Never true: the table always contains ourselves.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for member in self.members.values() {
            match member.status {
                Status::Alive => counts.alive += 1,
                Status::Suspect { .. } => counts.suspect += 1,
                Status::Unreachable => counts.unreachable += 1,
                Status::Dead => counts.dead += 1,
            }
        }
        counts
    }

    /// Pick the next member to probe.
    ///
    /// Walks a shuffled list of members and reshuffles once it has been fully
    /// iterated, so every member is probed once per sweep. Skips ourselves,
    /// dead members and anything in `excluding`.
    pub fn random_ping_target(&mut self, excluding: &HashSet<NodeIdentity>) -> Option<NodeIdentity> {
        let len = self.probe_order.len();
        if len == 0 {
            return None;
        }

        // Twice the length covers the tail of this sweep plus one full reshuffled sweep
        for _ in 0..(2 * len) {
            if self.probe_index >= self.probe_order.len() {
                self.probe_order.shuffle(&mut rand::rng());
                self.probe_index = 0;
            }
            let candidate = &self.probe_order[self.probe_index];
            self.probe_index += 1;

            let eligible = !excluding.contains(candidate)
                && self
                    .members
                    .get(candidate)
                    .is_some_and(|m| !m.status.is_dead());
            if eligible {
                return Some(candidate.clone());
            }
        }
        None
    }

    /// Pick up to `k` random alive members for indirect probing.
    pub fn random_members(&self, k: usize, excluding: &HashSet<NodeIdentity>) -> Vec<NodeIdentity> {
        let mut candidates: Vec<_> = self
            .peers()
            .filter(|m| m.status.is_alive() && !excluding.contains(&m.node))
            .map(|m| m.node.clone())
            .collect();

        candidates.shuffle(&mut rand::rng());
        candidates.truncate(k);
        candidates
    }

    fn insert_probe_target(&mut self, node: NodeIdentity) {
        if node == self.myself || self.probe_order.contains(&node) {
            return;
        }
        // Random position so a newcomer is not always probed last
        let position = rand::rng().random_range(0..=self.probe_order.len());
        self.probe_order.insert(position, node);
        if position < self.probe_index {
            self.probe_index += 1;
        }
    }

    fn remove_probe_target(&mut self, node: &NodeIdentity) {
        if let Some(position) = self.probe_order.iter().position(|n| n == node) {
            self.probe_order.remove(position);
            if position < self.probe_index {
                self.probe_index -= 1;
            }
        }
    }
}
