//! Tombstones for members that were declared dead.
//!
//! A tombstone keeps a dead identity from being revived by stale gossip that is
//! still circulating. A rejoining process gets a new uid and therefore a new
//! identity, so it is never blocked by its predecessor's tombstone.

use crate::NodeIdentity;
use std::collections::HashMap;

/// Record of a removed dead member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub node: NodeIdentity,
    /// When the member was removed (ms)
    pub died_at_ms: u64,
    /// When this tombstone may be forgotten (ms)
    pub expires_at_ms: u64,
}

/// Bounded-retention set of tombstoned identities.
#[derive(Debug)]
pub struct TombstoneStore {
    ttl_ms: u64,
    tombstones: HashMap<NodeIdentity, Tombstone>,
}

impl TombstoneStore {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            tombstones: HashMap::new(),
        }
    }

    /// Record `node` as dead at `at_ms`.
    ///
    /// Re-tombstoning an identity keeps the original death time but extends the deadline.
    pub fn tombstone(&mut self, node: NodeIdentity, at_ms: u64) {
        let expires_at_ms = at_ms.saturating_add(self.ttl_ms);
        self.tombstones
            .entry(node.clone())
            .and_modify(|t| t.expires_at_ms = t.expires_at_ms.max(expires_at_ms))
            .or_insert(Tombstone {
                node,
                died_at_ms: at_ms,
                expires_at_ms,
            });
    }

    pub fn is_tombstoned(&self, node: &NodeIdentity) -> bool {
        self.tombstones.contains_key(node)
    }

    pub fn get(&self, node: &NodeIdentity) -> Option<&Tombstone> {
        self.tombstones.get(node)
    }

    /// Drop every tombstone whose deadline is at or before `now_ms`.
    ///
    /// Returns how many were purged.
    pub fn expire_older_than(&mut self, now_ms: u64) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|_, t| t.expires_at_ms > now_ms);
        before - self.tombstones.len()
    }

    pub fn len(&self) -> usize {
        self.tombstones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tombstones.is_empty()
    }
}
