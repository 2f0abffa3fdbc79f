//! Local Health Multiplier (Lifeguard).
//!
//! A node that is itself slow (overloaded, paused, losing packets) tends to
//! blame healthy peers. The multiplier rises on evidence of local trouble and
//! stretches every timeout the engine uses, so a struggling node probes less
//! aggressively and gives suspects longer to refute.

use super::config::LifeguardSettings;

/// Saturating counter in `[0, max]`.
#[derive(Debug, Clone)]
pub struct LocalHealthMultiplier {
    value: u32,
    max: u32,
    scale_factor: u32,
}

impl LocalHealthMultiplier {
    pub fn new(settings: &LifeguardSettings) -> Self {
        Self {
            value: 0,
            max: settings.max_local_health_multiplier,
            scale_factor: settings.scale_factor.max(1),
        }
    }

    /// A probe we started got no ack in time.
    pub fn on_probe_timeout(&mut self) {
        self.increment();
    }

    /// Someone suspected us and we had to refute it.
    pub fn on_own_ping_refuted(&mut self) {
        self.increment();
    }

    /// A relay we asked for help never answered, not even with a nack.
    pub fn on_missed_nack(&mut self) {
        self.increment();
    }

    pub fn on_probe_success(&mut self) {
        self.value = self.value.saturating_sub(1);
    }

    pub fn current_multiplier(&self) -> u32 {
        self.value
    }

    /// `base * (1 + m / scale_factor)` in integer milliseconds.
    pub fn scale(&self, base_ms: u64) -> u64 {
        let factor = u64::from(self.scale_factor);
        base_ms.saturating_mul(factor + u64::from(self.value)) / factor
    }

    fn increment(&mut self) {
        if self.value < self.max {
            self.value += 1;
        }
    }
}
