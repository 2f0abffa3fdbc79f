//! Piggyback dissemination queue.
//!
//! Every membership change is queued here and attached to outgoing messages.
//! Updates that have been sent the fewest times go first, and an update is
//! retired after `multiplier * ceil(log2(n + 1))` transmissions, which is
//! enough for infection-style spread to reach every member with high
//! probability.

use super::config::GossipSettings;
use super::messages::GossipUpdate;
use crate::NodeIdentity;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct PendingUpdate {
    update: GossipUpdate,
    transmissions: u32,
}

/// Outgoing gossip, at most one pending update per node.
#[derive(Debug)]
pub struct GossipQueue {
    updates: HashMap<NodeIdentity, PendingUpdate>,
    max_per_message: usize,
    multiplier: u32,
}

impl GossipQueue {
    pub fn new(settings: &GossipSettings) -> Self {
        Self {
            updates: HashMap::new(),
            max_per_message: settings.max_updates_per_message,
            multiplier: settings.gossiped_enough_times_multiplier,
        }
    }

    /// Queue `update`, replacing anything pending for the same node.
    pub fn enqueue(&mut self, update: GossipUpdate) {
        self.updates.insert(
            update.node.clone(),
            PendingUpdate {
                update,
                transmissions: 0,
            },
        );
    }

    /// How many times an update is sent in a cluster of `member_count` members.
    pub fn retransmit_limit(&self, member_count: usize) -> u32 {
        // Bit length of n is ceil(log2(n + 1))
        let log = usize::BITS - member_count.leading_zeros();
        (self.multiplier * log).max(1)
    }

    /// Pick the updates for one outgoing message and count them as sent.
    pub fn select(&mut self, member_count: usize) -> Vec<GossipUpdate> {
        let limit = self.retransmit_limit(member_count);

        let mut candidates: Vec<&NodeIdentity> = self.updates.keys().collect();
        candidates.sort_by(|a, b| {
            let ta = self.updates[*a].transmissions;
            let tb = self.updates[*b].transmissions;
            ta.cmp(&tb).then_with(|| a.cmp(b))
        });
        let chosen: Vec<NodeIdentity> = candidates
            .into_iter()
            .take(self.max_per_message)
            .cloned()
            .collect();

        let mut selected = Vec::with_capacity(chosen.len());
        for node in chosen {
            if let Some(pending) = self.updates.get_mut(&node) {
                pending.transmissions += 1;
                selected.push(pending.update.clone());
                if pending.transmissions >= limit {
                    self.updates.remove(&node);
                }
            }
        }
        selected
    }

    /// Drop any pending update about `node`.
    pub fn remove(&mut self, node: &NodeIdentity) {
        self.updates.remove(node);
    }

    pub fn pending(&self, node: &NodeIdentity) -> Option<&GossipUpdate> {
        self.updates.get(node).map(|p| &p.update)
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(port: u16) -> NodeIdentity {
        NodeIdentity::new("test", "127.0.0.1", port, u64::from(port))
    }

    fn queue(max_per_message: usize, multiplier: u32) -> GossipQueue {
        GossipQueue::new(&GossipSettings {
            max_updates_per_message: max_per_message,
            gossiped_enough_times_multiplier: multiplier,
        })
    }

    #[test]
    fn test_retransmit_limit() {
        let q = queue(12, 3);
        assert_eq!(q.retransmit_limit(0), 1);
        assert_eq!(q.retransmit_limit(1), 3);
        assert_eq!(q.retransmit_limit(3), 6);
        assert_eq!(q.retransmit_limit(4), 9);
        assert_eq!(q.retransmit_limit(100), 21);
    }

    #[test]
    fn test_select_caps_message_size() {
        let mut q = queue(2, 3);
        for port in 1..=5 {
            q.enqueue(GossipUpdate::alive(node(port), 0));
        }

        assert_eq!(q.select(5).len(), 2);
        assert_eq!(q.len(), 5);
    }

    #[test]
    fn test_fewest_transmissions_first() {
        let mut q = queue(1, 10);
        q.enqueue(GossipUpdate::alive(node(1), 0));
        q.enqueue(GossipUpdate::alive(node(2), 0));
        q.enqueue(GossipUpdate::alive(node(3), 0));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(q.select(3)[0].node.clone());
        }
        seen.sort();
        assert_eq!(seen, vec![node(1), node(2), node(3)]);
    }

    #[test]
    fn test_update_retired_after_limit() {
        let mut q = queue(12, 1);
        q.enqueue(GossipUpdate::alive(node(1), 0));

        // Two members: limit is ceil(log2(3)) = 2
        assert_eq!(q.select(2).len(), 1);
        assert_eq!(q.select(2).len(), 1);
        assert!(q.select(2).is_empty());
        assert!(q.is_empty());
    }

    #[test]
    fn test_enqueue_replaces_and_resets() {
        let mut q = queue(12, 1);
        q.enqueue(GossipUpdate::alive(node(1), 0));
        q.select(2);

        q.enqueue(GossipUpdate::dead(node(1), 0));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pending(&node(1)).unwrap().status, crate::swim::Status::Dead);

        // Counter reset: sent twice more before retiring
        assert_eq!(q.select(2).len(), 1);
        assert_eq!(q.select(2).len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut q = queue(12, 3);
        q.enqueue(GossipUpdate::alive(node(1), 0));
        q.remove(&node(1));
        assert!(q.is_empty());
    }
}
