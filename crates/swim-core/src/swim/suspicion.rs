//! Suspicion tracking with Lifeguard corroboration.
//!
//! A suspicion starts with the maximum timeout. Every independent reporter
//! that suspects the same member at the same incarnation shortens the
//! deadline, down to the minimum once `max_independent_suspicions`
//! confirmations have arrived. Deadlines never grow while a suspicion is
//! tracked.
//!
//! When unreachability is enabled an expired suspicion enters a second
//! phase, tracked here as well, that ends with the member being declared dead.

use super::config::SuspicionDecay;
use super::membership::Incarnation;
use crate::NodeIdentity;
use std::collections::{BTreeSet, HashMap};

/// Suspicion timeout bounds in effect for one report.
///
/// The engine builds these from the settings after applying the local health
/// multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspicionTimeouts {
    pub min_ms: u64,
    pub max_ms: u64,
    /// Confirmations needed to reach `min_ms` (K)
    pub threshold: usize,
    pub decay: SuspicionDecay,
}

impl SuspicionTimeouts {
    /// Timeout for `confirmations` independent confirmations beyond the first reporter.
    pub fn timeout_for(&self, confirmations: usize) -> u64 {
        suspicion_timeout(self, confirmations)
    }
}

/// Timeout curve between `max_ms` (no confirmations) and `min_ms` (K or more).
///
/// Both curves are non-increasing in `confirmations` and clamped to `[min, max]`.
pub fn suspicion_timeout(timeouts: &SuspicionTimeouts, confirmations: usize) -> u64 {
    let min = timeouts.min_ms.min(timeouts.max_ms);
    let max = timeouts.max_ms;
    let k = timeouts.threshold;
    if k == 0 || max == min {
        return max;
    }

    let c = confirmations.min(k);
    let fraction = match timeouts.decay {
        SuspicionDecay::Logarithmic => ((c + 1) as f64).ln() / ((k + 1) as f64).ln(),
        SuspicionDecay::Linear => c as f64 / k as f64,
    };
    let reduction = ((max - min) as f64 * fraction).round() as u64;
    max.saturating_sub(reduction).clamp(min, max)
}

/// A tracked suspicion about one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suspicion {
    pub node: NodeIdentity,
    /// Incarnation the suspicion applies to
    pub incarnation: Incarnation,
    /// Everyone who independently suspects the member
    pub reporters: BTreeSet<NodeIdentity>,
    pub started_at_ms: u64,
    pub deadline_ms: u64,
}

impl Suspicion {
    /// Independent confirmations beyond the first reporter.
    pub fn confirmations(&self) -> usize {
        self.reporters.len().saturating_sub(1)
    }
}

/// Result of reporting a suspicion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspicionOutcome {
    /// First report for this incarnation.
    Started { deadline_ms: u64 },
    /// A new reporter joined; `accelerated` is true if the deadline moved earlier.
    Corroborated { deadline_ms: u64, accelerated: bool },
    /// The reporter was already known.
    Duplicate,
    /// The report is for an older incarnation than the tracked one.
    Stale,
}

/// Tracks suspected members and, when enabled, unreachable ones.
#[derive(Debug, Default)]
pub struct SuspicionTracker {
    suspicions: HashMap<NodeIdentity, Suspicion>,
    /// Unreachable members and when they are declared dead
    unreachable: HashMap<NodeIdentity, u64>,
}

impl SuspicionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `reporter` suspects `node` at `incarnation`.
    pub fn report(
        &mut self,
        node: NodeIdentity,
        reporter: NodeIdentity,
        incarnation: Incarnation,
        now_ms: u64,
        timeouts: &SuspicionTimeouts,
    ) -> SuspicionOutcome {
        if let Some(existing) = self.suspicions.get_mut(&node) {
            if incarnation < existing.incarnation {
                return SuspicionOutcome::Stale;
            }
            if incarnation == existing.incarnation {
                if !existing.reporters.insert(reporter) {
                    return SuspicionOutcome::Duplicate;
                }
                let computed = existing
                    .started_at_ms
                    .saturating_add(timeouts.timeout_for(existing.confirmations()));
                let deadline_ms = existing.deadline_ms.min(computed);
                let accelerated = deadline_ms < existing.deadline_ms;
                existing.deadline_ms = deadline_ms;
                return SuspicionOutcome::Corroborated {
                    deadline_ms,
                    accelerated,
                };
            }
        }

        // New suspicion, or a higher incarnation restarting tracking
        self.unreachable.remove(&node);
        let deadline_ms = now_ms.saturating_add(timeouts.timeout_for(0));
        self.suspicions.insert(
            node.clone(),
            Suspicion {
                node,
                incarnation,
                reporters: BTreeSet::from([reporter]),
                started_at_ms: now_ms,
                deadline_ms,
            },
        );
        SuspicionOutcome::Started { deadline_ms }
    }

    /// Remove and return every suspicion whose deadline is at or before `now_ms`.
    pub fn expire_due(&mut self, now_ms: u64) -> Vec<Suspicion> {
        let due: Vec<NodeIdentity> = self
            .suspicions
            .values()
            .filter(|s| s.deadline_ms <= now_ms)
            .map(|s| s.node.clone())
            .collect();

        let mut expired: Vec<Suspicion> = due
            .iter()
            .filter_map(|node| self.suspicions.remove(node))
            .collect();
        expired.sort_by_key(|s| s.deadline_ms);
        expired
    }

    /// Cancel the suspicion of `node` if `incarnation` refutes it.
    pub fn refute(&mut self, node: &NodeIdentity, incarnation: Incarnation) -> Option<Suspicion> {
        match self.suspicions.get(node) {
            Some(s) if incarnation >= s.incarnation => self.suspicions.remove(node),
            _ => None,
        }
    }

    /// Start the unreachable phase for `node`, which ends at `deadline_ms`.
    pub fn start_unreachable(&mut self, node: NodeIdentity, deadline_ms: u64) {
        self.suspicions.remove(&node);
        self.unreachable.insert(node, deadline_ms);
    }

    /// Remove and return every unreachable member whose deadline has passed.
    pub fn expire_unreachable(&mut self, now_ms: u64) -> Vec<NodeIdentity> {
        let mut due: Vec<(u64, NodeIdentity)> = self
            .unreachable
            .iter()
            .filter(|(_, deadline)| **deadline <= now_ms)
            .map(|(node, deadline)| (*deadline, node.clone()))
            .collect();
        due.sort();

        for (_, node) in &due {
            self.unreachable.remove(node);
        }
        due.into_iter().map(|(_, node)| node).collect()
    }

    /// Drop everything tracked about `node`.
    pub fn forget(&mut self, node: &NodeIdentity) {
        self.suspicions.remove(node);
        self.unreachable.remove(node);
    }

    pub fn get(&self, node: &NodeIdentity) -> Option<&Suspicion> {
        self.suspicions.get(node)
    }

    pub fn is_suspected(&self, node: &NodeIdentity) -> bool {
        self.suspicions.contains_key(node)
    }

    pub fn is_unreachable(&self, node: &NodeIdentity) -> bool {
        self.unreachable.contains_key(node)
    }

    pub fn suspicion_count(&self) -> usize {
        self.suspicions.len()
    }

    pub fn unreachable_count(&self) -> usize {
        self.unreachable.len()
    }
}
