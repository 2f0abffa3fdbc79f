//! Protocol settings.
//!
//! Every field has a serde default so a partial JSON file only needs to name
//! the knobs it changes.

use crate::error::{Result, SwimError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level settings for a [`SwimInstance`](super::SwimInstance).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwimSettings {
    /// Base protocol period; one probe is started per period (default: 1s)
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// Base time to wait for an ack before escalating (default: 300ms)
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    /// Number of relays asked to probe a target indirectly (k)
    #[serde(default = "default_indirect_probe_count")]
    pub indirect_probe_count: usize,

    #[serde(default)]
    pub suspicion: SuspicionSettings,

    #[serde(default)]
    pub unreachability: Unreachability,

    #[serde(default)]
    pub lifeguard: LifeguardSettings,

    #[serde(default)]
    pub gossip: GossipSettings,

    /// How long a dead member's tombstone suppresses stale gossip (default: 4h)
    #[serde(default = "default_tombstone_ttl")]
    pub tombstone_ttl_ms: u64,
}

/// Suspicion timeout bounds and the curve between them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuspicionSettings {
    /// Timeout once the corroboration threshold is reached
    #[serde(default = "default_suspicion_min")]
    pub min_timeout_ms: u64,

    /// Timeout with a single reporter
    #[serde(default = "default_suspicion_max")]
    pub max_timeout_ms: u64,

    /// Independent confirmations needed to reach `min_timeout_ms`
    #[serde(default = "default_max_independent_suspicions")]
    pub max_independent_suspicions: usize,

    #[serde(default)]
    pub decay: SuspicionDecay,
}

/// How the suspicion timeout shrinks as independent confirmations arrive.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SuspicionDecay {
    /// `max - (max - min) * ln(c + 1) / ln(K + 1)`
    #[default]
    Logarithmic,
    /// `max - (max - min) * c / K`
    Linear,
}

/// What happens when a suspicion expires without refutation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Unreachability {
    /// Expired suspects are declared dead immediately.
    #[default]
    Disabled,
    /// Expired suspects become unreachable, then dead after `timeout_ms`
    /// unless `confirm_dead` is called earlier.
    #[serde(rename_all = "camelCase")]
    Enabled { timeout_ms: u64 },
}

/// Local health multiplier bounds (Lifeguard).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifeguardSettings {
    #[serde(default = "default_max_lhm")]
    pub max_local_health_multiplier: u32,

    /// Divisor in `base * (1 + multiplier / scale_factor)`
    #[serde(default = "default_scale_factor")]
    pub scale_factor: u32,
}

/// Piggyback dissemination limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GossipSettings {
    #[serde(default = "default_max_updates_per_message")]
    pub max_updates_per_message: usize,

    /// Each update is piggybacked `multiplier * ceil(log2(n + 1))` times
    #[serde(default = "default_gossiped_enough_times_multiplier")]
    pub gossiped_enough_times_multiplier: u32,
}

fn default_probe_interval() -> u64 {
    1_000
}

fn default_ping_timeout() -> u64 {
    300
}

fn default_indirect_probe_count() -> usize {
    3
}

fn default_tombstone_ttl() -> u64 {
    4 * 60 * 60 * 1_000
}

fn default_suspicion_min() -> u64 {
    3_000
}

fn default_suspicion_max() -> u64 {
    10_000
}

fn default_max_independent_suspicions() -> usize {
    4
}

fn default_max_lhm() -> u32 {
    8
}

fn default_scale_factor() -> u32 {
    1
}

fn default_max_updates_per_message() -> usize {
    12
}

fn default_gossiped_enough_times_multiplier() -> u32 {
    3
}

impl Default for SwimSettings {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval(),
            ping_timeout_ms: default_ping_timeout(),
            indirect_probe_count: default_indirect_probe_count(),
            suspicion: SuspicionSettings::default(),
            unreachability: Unreachability::default(),
            lifeguard: LifeguardSettings::default(),
            gossip: GossipSettings::default(),
            tombstone_ttl_ms: default_tombstone_ttl(),
        }
    }
}

impl Default for SuspicionSettings {
    fn default() -> Self {
        Self {
            min_timeout_ms: default_suspicion_min(),
            max_timeout_ms: default_suspicion_max(),
            max_independent_suspicions: default_max_independent_suspicions(),
            decay: SuspicionDecay::default(),
        }
    }
}

impl Default for LifeguardSettings {
    fn default() -> Self {
        Self {
            max_local_health_multiplier: default_max_lhm(),
            scale_factor: default_scale_factor(),
        }
    }
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            max_updates_per_message: default_max_updates_per_message(),
            gossiped_enough_times_multiplier: default_gossiped_enough_times_multiplier(),
        }
    }
}

impl SwimSettings {
    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SwimError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let settings: SwimSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        tracing::info!("Loaded SWIM settings from {}", path.display());
        Ok(settings)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_ms == 0 {
            return Err(SwimError::Config("probe_interval_ms must be > 0".into()));
        }
        if self.ping_timeout_ms >= self.probe_interval_ms {
            return Err(SwimError::Config(format!(
                "ping_timeout_ms ({}) must be smaller than probe_interval_ms ({})",
                self.ping_timeout_ms, self.probe_interval_ms
            )));
        }
        if self.suspicion.min_timeout_ms > self.suspicion.max_timeout_ms {
            return Err(SwimError::Config(format!(
                "suspicion min_timeout_ms ({}) exceeds max_timeout_ms ({})",
                self.suspicion.min_timeout_ms, self.suspicion.max_timeout_ms
            )));
        }
        if self.lifeguard.scale_factor == 0 {
            return Err(SwimError::Config("lifeguard scale_factor must be > 0".into()));
        }
        if self.gossip.max_updates_per_message == 0 {
            return Err(SwimError::Config(
                "gossip max_updates_per_message must be > 0".into(),
            ));
        }
        Ok(())
    }
}
