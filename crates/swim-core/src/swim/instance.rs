//! The SWIM protocol engine.
//!
//! [`SwimInstance`] is a single-writer state machine. Every entry point takes
//! the current time in milliseconds and returns the [`Directive`]s the hosting
//! shell must carry out: messages to send, when to tick next, and membership
//! changes to report. The engine never performs I/O and never reads a clock.

use super::config::{SwimSettings, Unreachability};
use super::failure::{AckMatch, ProbeTracker, TimedOut};
use super::gossip::GossipQueue;
use super::health::LocalHealthMultiplier;
use super::membership::{Incarnation, Member, MembershipTable, MergeResult, Status};
use super::messages::{Directive, GossipUpdate, MemberStatusChange, SwimMessage};
use super::metrics::{MetricsSink, NoopMetrics};
use super::suspicion::{SuspicionOutcome, SuspicionTimeouts, SuspicionTracker};
use crate::NodeIdentity;
use crate::error::{Result, SwimError};
use std::collections::HashSet;
use std::mem::discriminant;
use tracing::{debug, info, trace, warn};

/// One node's view of the cluster and the protocol driving it.
pub struct SwimInstance {
    settings: SwimSettings,
    myself: NodeIdentity,
    incarnation: Incarnation,
    protocol_period: u64,
    membership: MembershipTable,
    suspicions: SuspicionTracker,
    lhm: LocalHealthMultiplier,
    gossip: GossipQueue,
    probes: ProbeTracker,
    metrics: Box<dyn MetricsSink>,
}

impl SwimInstance {
    /// Create an engine that discards metrics.
    pub fn new(settings: SwimSettings, myself: NodeIdentity) -> Result<Self> {
        Self::with_metrics(settings, myself, NoopMetrics)
    }

    /// Create an engine reporting to `metrics`.
    pub fn with_metrics(
        settings: SwimSettings,
        myself: NodeIdentity,
        metrics: impl MetricsSink + 'static,
    ) -> Result<Self> {
        settings.validate()?;
        myself.validate()?;

        let mut gossip = GossipQueue::new(&settings.gossip);
        // Announce ourselves on the first messages we send
        gossip.enqueue(GossipUpdate::alive(myself.clone(), 0));

        let instance = Self {
            membership: MembershipTable::new(myself.clone(), 0, settings.tombstone_ttl_ms),
            suspicions: SuspicionTracker::new(),
            lhm: LocalHealthMultiplier::new(&settings.lifeguard),
            gossip,
            probes: ProbeTracker::new(),
            metrics: Box::new(metrics),
            incarnation: 0,
            protocol_period: 0,
            myself,
            settings,
        };
        instance.record_metrics();
        info!("SWIM instance started as {}", instance.myself);
        Ok(instance)
    }

    // ==================== Accessors ====================

    pub fn myself(&self) -> &NodeIdentity {
        &self.myself
    }

    pub fn settings(&self) -> &SwimSettings {
        &self.settings
    }

    /// Our own current incarnation.
    pub fn incarnation(&self) -> Incarnation {
        self.incarnation
    }

    pub fn protocol_period(&self) -> u64 {
        self.protocol_period
    }

    pub fn local_health_multiplier(&self) -> u32 {
        self.lhm.current_multiplier()
    }

    pub fn member(&self, node: &NodeIdentity) -> Option<&Member> {
        self.membership.member(node)
    }

    /// Snapshot of every member, ourselves included.
    pub fn all_members(&self) -> Vec<Member> {
        self.membership.all_members()
    }

    /// Members other than ourselves that are not dead.
    pub fn other_members(&self) -> Vec<Member> {
        self.membership
            .peers()
            .filter(|m| !m.status.is_dead())
            .cloned()
            .collect()
    }

    pub fn is_tombstoned(&self, node: &NodeIdentity) -> bool {
        self.membership.is_tombstoned(node)
    }

    pub fn suspicion_count(&self) -> usize {
        self.suspicions.suspicion_count()
    }

    pub fn pending_probe_count(&self) -> usize {
        self.probes.pending_probe_count()
    }

    /// Updates still waiting to be piggybacked.
    pub fn gossip_backlog(&self) -> usize {
        self.gossip.len()
    }

    /// True once we have left the cluster with `remove_member(myself)`.
    pub fn has_left(&self) -> bool {
        self.membership.myself_member().status.is_dead()
    }

    // ==================== Periodic tick ====================

    /// Run one protocol period.
    ///
    /// Expires tombstones, suspicions and overdue probes, starts the next
    /// probe, and asks to be called again after one (health-scaled) interval.
    pub fn on_periodic_tick(&mut self, now_ms: u64) -> Vec<Directive> {
        let mut out = Vec::new();
        self.protocol_period += 1;

        let purged = self.membership.expire_tombstones(now_ms);
        if purged > 0 {
            debug!("Expired {} tombstones", purged);
        }

        self.expire_suspicions(now_ms, &mut out);

        for (target, seq) in self.probes.overdue(now_ms) {
            self.handle_ping_timeout(&target, seq, now_ms, &mut out);
        }

        let excluding = self.probes.probing_targets();
        if let Some(target) = self.membership.random_ping_target(&excluding) {
            let deadline_ms = now_ms.saturating_add(self.lhm.scale(self.settings.ping_timeout_ms));
            let seq = self.probes.start_probe(target.clone(), now_ms, deadline_ms);
            let payload = self.make_payload();
            trace!("Probing {} (seq {})", target, seq);
            out.push(Directive::Send {
                to: target,
                message: SwimMessage::ping(self.myself.clone(), seq, payload),
                deadline_ms: Some(deadline_ms),
            });
        }

        out.push(Directive::ScheduleNextTick {
            at_ms: now_ms.saturating_add(self.lhm.scale(self.settings.probe_interval_ms)),
        });
        self.record_metrics();
        out
    }

    fn expire_suspicions(&mut self, now_ms: u64, out: &mut Vec<Directive>) {
        for suspicion in self.suspicions.expire_due(now_ms) {
            let still_suspect = self.membership.member(&suspicion.node).is_some_and(|m| {
                m.status.is_suspect() && m.incarnation == suspicion.incarnation
            });
            if !still_suspect {
                continue;
            }

            let status = match self.settings.unreachability {
                Unreachability::Enabled { .. } => Status::Unreachable,
                Unreachability::Disabled => Status::Dead,
            };
            info!(
                "Suspicion of {} expired after {} confirmations, marking {}",
                suspicion.node,
                suspicion.confirmations(),
                status.name()
            );
            let update = GossipUpdate::new(suspicion.node, suspicion.incarnation, status);
            self.apply_update(update, now_ms, out);
        }

        for node in self.suspicions.expire_unreachable(now_ms) {
            if self
                .membership
                .member(&node)
                .is_some_and(|m| m.status.is_unreachable())
            {
                info!("{} stayed unreachable, declaring dead", node);
                self.declare_dead(&node, now_ms, out);
            }
        }
    }

    // ==================== Probe outcomes ====================

    /// A probe deadline passed without a matching ack.
    ///
    /// Unknown or already handled `(target, seq)` pairs are ignored, as are
    /// calls before the probe's current deadline.
    pub fn on_ping_timeout(&mut self, target: &NodeIdentity, seq: u64, now_ms: u64) -> Vec<Directive> {
        let mut out = Vec::new();
        self.handle_ping_timeout(target, seq, now_ms, &mut out);
        self.record_metrics();
        out
    }

    fn handle_ping_timeout(
        &mut self,
        target: &NodeIdentity,
        seq: u64,
        now_ms: u64,
        out: &mut Vec<Directive>,
    ) {
        let Some(timed_out) = self.probes.timed_out(seq, target, now_ms) else {
            trace!("Ignoring timeout for {} (seq {}): no pending probe", target, seq);
            return;
        };

        match timed_out {
            TimedOut::Direct(probe) => {
                self.lhm.on_probe_timeout();
                let excluding = HashSet::from([probe.target.clone()]);
                let relays = self
                    .membership
                    .random_members(self.settings.indirect_probe_count, &excluding);

                if relays.is_empty() {
                    debug!("No relays to probe {} indirectly", probe.target);
                    self.probes.cancel(seq);
                    self.metrics.increment_failed_probes();
                    self.suspect(&probe.target, now_ms, out);
                    return;
                }

                let window = self
                    .lhm
                    .scale(self.settings.probe_interval_ms)
                    .saturating_sub(self.lhm.scale(self.settings.ping_timeout_ms))
                    .max(1);
                let deadline_ms = now_ms.saturating_add(window);
                self.probes.escalate(seq, relays.clone(), now_ms, deadline_ms);

                debug!(
                    "Direct probe of {} timed out, asking {} relays",
                    probe.target,
                    relays.len()
                );
                let payload = self.make_payload();
                for relay in relays {
                    out.push(Directive::Send {
                        to: relay,
                        message: SwimMessage::ping_request(
                            self.myself.clone(),
                            probe.target.clone(),
                            seq,
                            payload.clone(),
                        ),
                        deadline_ms: Some(deadline_ms),
                    });
                }
            }
            TimedOut::Indirect(probe) => {
                let missing = probe.missing_nacks();
                if !missing.is_empty() {
                    trace!("{} relays sent no nack for {}", missing.len(), probe.target);
                    self.lhm.on_missed_nack();
                }
                self.metrics.increment_failed_probes();
                debug!("Indirect probe of {} timed out", probe.target);
                self.suspect(&probe.target, now_ms, out);
            }
            TimedOut::Relayed(relay) => {
                trace!(
                    "Relayed probe of {} for {} timed out",
                    relay.target, relay.origin
                );
                out.push(Directive::Send {
                    to: relay.origin,
                    message: SwimMessage::nack(relay.target, relay.origin_seq),
                    deadline_ms: None,
                });
            }
        }
    }

    /// Raise a local suspicion about `target`.
    fn suspect(&mut self, target: &NodeIdentity, now_ms: u64, out: &mut Vec<Directive>) {
        let Some(member) = self.membership.member(target) else {
            return;
        };
        if !(member.status.is_alive() || member.status.is_suspect()) {
            return;
        }
        let update = GossipUpdate::suspect(target.clone(), member.incarnation, self.myself.clone());
        self.apply_update(update, now_ms, out);
    }

    // ==================== Incoming messages ====================

    /// Answer a direct probe from `origin`.
    pub fn on_ping(
        &mut self,
        origin: &NodeIdentity,
        seq: u64,
        payload: Vec<GossipUpdate>,
        now_ms: u64,
    ) -> Result<Vec<Directive>> {
        origin.validate()?;
        self.validate_payload(&payload)?;

        let mut out = Vec::new();
        self.merge_payload(payload, now_ms, &mut out);
        self.ensure_known(origin, now_ms, &mut out);
        self.retire_previous_incarnations(origin, now_ms, &mut out);

        let reply = self.make_payload();
        out.push(Directive::Send {
            to: origin.clone(),
            message: SwimMessage::ack(self.myself.clone(), self.incarnation, seq, reply),
            deadline_ms: None,
        });
        self.record_metrics();
        Ok(out)
    }

    /// Probe `target` on behalf of `origin`.
    pub fn on_ping_request(
        &mut self,
        origin: &NodeIdentity,
        target: &NodeIdentity,
        seq: u64,
        payload: Vec<GossipUpdate>,
        now_ms: u64,
    ) -> Result<Vec<Directive>> {
        origin.validate()?;
        target.validate()?;
        self.validate_payload(&payload)?;

        let mut out = Vec::new();
        self.merge_payload(payload, now_ms, &mut out);
        self.ensure_known(origin, now_ms, &mut out);
        self.retire_previous_incarnations(origin, now_ms, &mut out);

        if *target == self.myself {
            // Asked to probe ourselves: answer directly
            let reply = self.make_payload();
            out.push(Directive::Send {
                to: origin.clone(),
                message: SwimMessage::ack(self.myself.clone(), self.incarnation, seq, reply),
                deadline_ms: None,
            });
        } else {
            let deadline_ms = now_ms.saturating_add(self.lhm.scale(self.settings.ping_timeout_ms));
            let local_seq = self
                .probes
                .start_relay(origin.clone(), seq, target.clone(), deadline_ms);
            trace!("Relaying probe of {} for {} (seq {})", target, origin, local_seq);
            let payload = self.make_payload();
            out.push(Directive::Send {
                to: target.clone(),
                message: SwimMessage::ping(self.myself.clone(), local_seq, payload),
                deadline_ms: Some(deadline_ms),
            });
        }
        self.record_metrics();
        Ok(out)
    }

    /// `from` proved it is alive at `incarnation`.
    ///
    /// Acks that match no pending probe are still first-hand refutations.
    pub fn on_ack(
        &mut self,
        from: &NodeIdentity,
        incarnation: Incarnation,
        seq: u64,
        payload: Vec<GossipUpdate>,
        now_ms: u64,
    ) -> Result<Vec<Directive>> {
        from.validate()?;
        self.validate_payload(&payload)?;

        let mut out = Vec::new();
        self.merge_payload(payload, now_ms, &mut out);

        match self.probes.ack(seq, from) {
            Some(AckMatch::Own(probe)) => {
                trace!("Probe of {} acked (seq {})", probe.target, seq);
                self.lhm.on_probe_success();
                self.metrics.increment_successful_probes();
                match probe.requested_at_ms() {
                    Some(requested_at_ms) => self
                        .metrics
                        .record_ping_request_response(now_ms.saturating_sub(requested_at_ms), true),
                    None => self
                        .metrics
                        .record_ping_round_trip(now_ms.saturating_sub(probe.started_at_ms)),
                }
            }
            Some(AckMatch::Relayed(relay)) => {
                let reply = self.make_payload();
                out.push(Directive::Send {
                    to: relay.origin,
                    message: SwimMessage::ack(from.clone(), incarnation, relay.origin_seq, reply),
                    deadline_ms: None,
                });
            }
            None => trace!("Late or unmatched ack from {} (seq {})", from, seq),
        }

        self.refute_first_hand(from, incarnation, now_ms, &mut out);
        self.record_metrics();
        Ok(out)
    }

    /// A relay could not reach `target` for our probe `seq`.
    pub fn on_nack(
        &mut self,
        from: &NodeIdentity,
        target: &NodeIdentity,
        seq: u64,
        now_ms: u64,
    ) -> Vec<Directive> {
        if !self.probes.nack(seq, from, target) {
            trace!("Ignoring nack from {} about {} (seq {})", from, target, seq);
            return Vec::new();
        }
        if let Some(requested_at_ms) = self.probes.get(seq).and_then(|p| p.requested_at_ms()) {
            self.metrics
                .record_ping_request_response(now_ms.saturating_sub(requested_at_ms), false);
        }
        Vec::new()
    }

    /// Merge gossip received outside a probe message.
    pub fn on_membership_gossip(
        &mut self,
        payload: Vec<GossipUpdate>,
        now_ms: u64,
    ) -> Result<Vec<Directive>> {
        self.validate_payload(&payload)?;
        let mut out = Vec::new();
        self.merge_payload(payload, now_ms, &mut out);
        self.record_metrics();
        Ok(out)
    }

    // ==================== Administrative ====================

    /// Add or overwrite a member, for seeding and external discovery.
    ///
    /// The given status and incarnation are taken as they are, without the
    /// merge rules gossip goes through. Tombstoned identities stay out.
    pub fn add_member(
        &mut self,
        node: NodeIdentity,
        status: Status,
        incarnation: Incarnation,
        now_ms: u64,
    ) -> Result<Vec<Directive>> {
        if node == self.myself {
            return Err(SwimError::Validation("Cannot add myself as a member".into()));
        }
        let update = GossipUpdate::new(node, incarnation, status);
        validate_update(&update)?;
        let GossipUpdate {
            node,
            incarnation,
            mut status,
        } = update;
        if status.is_unreachable() && self.settings.unreachability == Unreachability::Disabled {
            status = Status::Dead;
        }

        let mut out = Vec::new();
        if !self.membership.contains(&node) {
            self.forget_seed_placeholders(&node);
        }
        let result = self
            .membership
            .set(node.clone(), status, incarnation, self.protocol_period);
        match result {
            MergeResult::Applied { previous } => {
                // A suspicion tracked at another incarnation no longer applies
                self.suspicions.forget(&node);
                let previous = previous.map(|(status, _)| status);
                self.on_member_changed(&node, previous, now_ms, &mut out);
            }
            MergeResult::IgnoredTombstoned => debug!("Not adding tombstoned {}", node),
            MergeResult::IgnoredStale => trace!("{} is already known as given", node),
        }
        self.record_metrics();
        Ok(out)
    }

    /// Remove a member from the cluster.
    ///
    /// Removing ourselves is a graceful leave: our incarnation is bumped and
    /// our own death is gossiped. Any other member is declared dead and
    /// tombstoned.
    pub fn remove_member(&mut self, node: &NodeIdentity, now_ms: u64) -> Vec<Directive> {
        let mut out = Vec::new();
        if *node == self.myself {
            if !self.has_left() {
                self.incarnation += 1;
                self.membership
                    .update_myself(Status::Dead, self.incarnation, self.protocol_period);
                self.gossip
                    .enqueue(GossipUpdate::dead(self.myself.clone(), self.incarnation));
                out.push(Directive::MembershipChanged(MemberStatusChange {
                    node: self.myself.clone(),
                    previous: Some(Status::Alive),
                    current: Status::Dead,
                    incarnation: self.incarnation,
                }));
                info!("Leaving cluster at incarnation {}", self.incarnation);
            }
        } else if self.membership.contains(node) {
            self.declare_dead(node, now_ms, &mut out);
        } else {
            self.membership.tombstone(node, now_ms);
        }
        self.record_metrics();
        out
    }

    /// Promote an unreachable member to dead without waiting for its deadline.
    pub fn confirm_dead(&mut self, node: &NodeIdentity, now_ms: u64) -> Vec<Directive> {
        let mut out = Vec::new();
        match self.membership.member(node) {
            Some(member) if member.status.is_unreachable() => {
                info!("Confirming {} dead", node);
                self.declare_dead(node, now_ms, &mut out);
            }
            Some(member) => {
                debug!("Not confirming {} dead: it is {}", node, member.status.name());
            }
            None => trace!("Not confirming {} dead: unknown member", node),
        }
        self.record_metrics();
        out
    }

    // ==================== Merging ====================

    fn validate_payload(&self, payload: &[GossipUpdate]) -> Result<()> {
        let max = self.settings.gossip.max_updates_per_message;
        if payload.len() > max {
            warn!("Dropping payload with {} updates (max {})", payload.len(), max);
            return Err(SwimError::Validation(format!(
                "Payload has {} updates, max is {}",
                payload.len(),
                max
            )));
        }
        for update in payload {
            validate_update(update)?;
        }
        Ok(())
    }

    fn merge_payload(&mut self, payload: Vec<GossipUpdate>, now_ms: u64, out: &mut Vec<Directive>) {
        for update in payload {
            self.apply_update(update, now_ms, out);
        }
    }

    /// Add `node` as alive at incarnation 0 if we have never heard of it.
    fn ensure_known(&mut self, node: &NodeIdentity, now_ms: u64, out: &mut Vec<Directive>) {
        if *node != self.myself && !self.membership.contains(node) {
            self.apply_update(GossipUpdate::alive(node.clone(), 0), now_ms, out);
        }
    }

    /// Apply first-hand evidence that `node` is alive at `incarnation`.
    fn refute_first_hand(
        &mut self,
        node: &NodeIdentity,
        incarnation: Incarnation,
        now_ms: u64,
        out: &mut Vec<Directive>,
    ) {
        if *node == self.myself {
            return;
        }
        let result = self.apply_update(GossipUpdate::alive(node.clone(), incarnation), now_ms, out);
        self.retire_previous_incarnations(node, now_ms, out);
        if result.is_applied() {
            return;
        }

        let previous = self.membership.member(node).map(|m| m.status.clone());
        if self
            .membership
            .refute_direct(node, incarnation, self.protocol_period)
        {
            debug!("{} answered directly, clearing suspicion", node);
            self.suspicions.forget(node);
            self.gossip
                .enqueue(GossipUpdate::alive(node.clone(), incarnation));
            out.push(Directive::MembershipChanged(MemberStatusChange {
                node: node.clone(),
                previous,
                current: Status::Alive,
                incarnation,
            }));
        }
    }

    /// Mark `node` dead at its current incarnation.
    fn declare_dead(&mut self, node: &NodeIdentity, now_ms: u64, out: &mut Vec<Directive>) {
        if let Some(member) = self.membership.member(node) {
            let update = GossipUpdate::dead(node.clone(), member.incarnation);
            self.apply_update(update, now_ms, out);
        }
    }

    /// Merge one update into the local view and act on the result.
    fn apply_update(
        &mut self,
        update: GossipUpdate,
        now_ms: u64,
        out: &mut Vec<Directive>,
    ) -> MergeResult {
        if update.node == self.myself {
            self.handle_self_update(update, out);
            return MergeResult::IgnoredStale;
        }

        let GossipUpdate {
            node,
            incarnation,
            mut status,
        } = update;

        if status.is_unreachable() && self.settings.unreachability == Unreachability::Disabled {
            status = Status::Dead;
        }

        if !self.membership.contains(&node) {
            if self.membership.is_tombstoned(&node) {
                trace!("Ignoring gossip about tombstoned {}", node);
                return MergeResult::IgnoredTombstoned;
            }
            if status.is_dead() {
                // Never knew it; just keep stale gossip from bringing it back
                self.membership.tombstone(&node, now_ms);
                return MergeResult::IgnoredStale;
            }
            self.forget_seed_placeholders(&node);
        }

        let result = self
            .membership
            .upsert(node.clone(), status, incarnation, self.protocol_period);
        match &result {
            MergeResult::Applied { previous } => {
                let previous = previous.as_ref().map(|(status, _)| status.clone());
                self.on_member_changed(&node, previous, now_ms, out);
            }
            MergeResult::IgnoredStale => {
                trace!("Ignoring stale gossip about {} at incarnation {}", node, incarnation)
            }
            MergeResult::IgnoredTombstoned => trace!("Ignoring gossip about tombstoned {}", node),
        }
        result
    }

    /// Drop uid-0 seed entries on `node`'s endpoint; `node` is who runs there.
    fn forget_seed_placeholders(&mut self, node: &NodeIdentity) {
        for old in self.membership.previous_incarnations_of(node) {
            if old.uid() == 0 {
                debug!("Seed {} identified as {}", old, node);
                self.suspicions.forget(&old);
                self.probes.cancel_target(&old);
                self.gossip.remove(&old);
                self.membership.remove(&old);
            }
        }
    }

    /// `node` itself just talked to us, so any other uid on its endpoint
    /// belongs to a process that is gone.
    ///
    /// Only called with first-hand evidence. Gossip can still carry an older
    /// process long after it was replaced, and uids say nothing about which
    /// process is newer.
    fn retire_previous_incarnations(
        &mut self,
        node: &NodeIdentity,
        now_ms: u64,
        out: &mut Vec<Directive>,
    ) {
        let is_live = self
            .membership
            .member(node)
            .is_some_and(|m| !m.status.is_dead());
        if !is_live {
            return;
        }
        self.forget_seed_placeholders(node);
        for old in self.membership.previous_incarnations_of(node) {
            if !self.membership.member(&old).is_some_and(|m| m.status.is_dead()) {
                info!("{} restarted as {}", old, node);
                self.declare_dead(&old, now_ms, out);
            }
        }
    }

    fn on_member_changed(
        &mut self,
        node: &NodeIdentity,
        previous: Option<Status>,
        now_ms: u64,
        out: &mut Vec<Directive>,
    ) {
        let Some(member) = self.membership.member(node).cloned() else {
            return;
        };

        match &member.status {
            Status::Alive => self.suspicions.forget(node),
            Status::Suspect { suspected_by } => {
                let timeouts = self.suspicion_timeouts();
                for reporter in suspected_by {
                    match self.suspicions.report(
                        node.clone(),
                        reporter.clone(),
                        member.incarnation,
                        now_ms,
                        &timeouts,
                    ) {
                        SuspicionOutcome::Started { deadline_ms } => {
                            debug!(
                                "Suspicion of {} started by {}, deadline {}",
                                node, reporter, deadline_ms
                            )
                        }
                        SuspicionOutcome::Corroborated {
                            deadline_ms,
                            accelerated: true,
                        } => debug!(
                            "Suspicion of {} corroborated by {}, deadline now {}",
                            node, reporter, deadline_ms
                        ),
                        _ => {}
                    }
                }
            }
            Status::Unreachable => {
                if let Unreachability::Enabled { timeout_ms } = self.settings.unreachability
                    && !self.suspicions.is_unreachable(node)
                {
                    self.suspicions
                        .start_unreachable(node.clone(), now_ms.saturating_add(timeout_ms));
                }
            }
            Status::Dead => {}
        }

        self.gossip.enqueue(GossipUpdate::from(&member));

        let changed = previous
            .as_ref()
            .is_none_or(|p| discriminant(p) != discriminant(&member.status));
        if changed {
            match &previous {
                Some(p) => debug!(
                    "{}: {} -> {} (incarnation {})",
                    node,
                    p.name(),
                    member.status.name(),
                    member.incarnation
                ),
                None => debug!("Added {} as {}", node, member.status.name()),
            }
            out.push(Directive::MembershipChanged(MemberStatusChange {
                node: node.clone(),
                previous,
                current: member.status.clone(),
                incarnation: member.incarnation,
            }));
        }

        if member.status.is_dead() {
            info!("{} confirmed dead, tombstoning", node);
            self.metrics.increment_total_dead();
            self.suspicions.forget(node);
            self.probes.cancel_target(node);
            self.membership.tombstone(node, now_ms);
        }
    }

    /// Somebody gossiped about us.
    ///
    /// A refutation also goes straight out to one random member instead of
    /// waiting for the next probe to carry it.
    fn handle_self_update(&mut self, update: GossipUpdate, out: &mut Vec<Directive>) {
        if update.status.is_alive() || self.has_left() {
            return;
        }

        if update.incarnation < self.incarnation {
            trace!(
                "Stale {} about myself at incarnation {}",
                update.status.name(),
                update.incarnation
            );
            self.gossip
                .enqueue(GossipUpdate::alive(self.myself.clone(), self.incarnation));
            return;
        }

        self.incarnation = update.incarnation.saturating_add(1);
        self.membership
            .update_myself(Status::Alive, self.incarnation, self.protocol_period);
        self.lhm.on_own_ping_refuted();
        info!(
            "Refuting {} about myself, incarnation now {}",
            update.status.name(),
            self.incarnation
        );
        self.gossip
            .enqueue(GossipUpdate::alive(self.myself.clone(), self.incarnation));
        self.broadcast_refutation(out);
    }

    /// Ping one random alive member with our refutation up front.
    fn broadcast_refutation(&mut self, out: &mut Vec<Directive>) {
        let Some(to) = self
            .membership
            .random_members(1, &HashSet::new())
            .into_iter()
            .next()
        else {
            return;
        };

        let refutation = GossipUpdate::alive(self.myself.clone(), self.incarnation);
        let mut payload = self.make_payload();
        payload.retain(|u| u.node != self.myself);
        payload.insert(0, refutation);
        payload.truncate(self.settings.gossip.max_updates_per_message);

        trace!("Sending refutation to {}", to);
        // Unsolicited: seq 0 matches no probe on either side
        out.push(Directive::Send {
            to,
            message: SwimMessage::ping(self.myself.clone(), 0, payload),
            deadline_ms: None,
        });
    }

    // ==================== Helpers ====================

    fn suspicion_timeouts(&self) -> SuspicionTimeouts {
        let suspicion = &self.settings.suspicion;
        SuspicionTimeouts {
            min_ms: self.lhm.scale(suspicion.min_timeout_ms),
            max_ms: self.lhm.scale(suspicion.max_timeout_ms),
            threshold: suspicion.max_independent_suspicions,
            decay: suspicion.decay,
        }
    }

    /// Gossip to piggyback on the next outgoing message.
    ///
    /// Never empty: with nothing queued we gossip our own state.
    fn make_payload(&mut self) -> Vec<GossipUpdate> {
        let payload = self.gossip.select(self.membership.len());
        if payload.is_empty() {
            vec![GossipUpdate::from(self.membership.myself_member())]
        } else {
            payload
        }
    }

    fn record_metrics(&self) {
        let counts = self.membership.status_counts();
        self.metrics
            .record_members(counts.alive, counts.suspect, counts.unreachable);
        self.metrics
            .record_tombstones(self.membership.tombstone_count());
        self.metrics
            .record_local_health_multiplier(self.lhm.current_multiplier());
        self.metrics.record_incarnation(self.incarnation);
    }
}

/// Shape checks for one gossip update.
fn validate_update(update: &GossipUpdate) -> Result<()> {
    update.node.validate()?;
    if let Status::Suspect { suspected_by } = &update.status {
        if suspected_by.is_empty() {
            return Err(SwimError::Validation(format!(
                "Suspect update about {} has no reporters",
                update.node
            )));
        }
        for reporter in suspected_by {
            reporter.validate()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swim::InMemoryMetrics;

    fn myself() -> NodeIdentity {
        NodeIdentity::new("test", "127.0.0.1", 7001, 1111)
    }

    fn second() -> NodeIdentity {
        NodeIdentity::new("test", "127.0.0.1", 7002, 2222)
    }

    fn third() -> NodeIdentity {
        NodeIdentity::new("test", "127.0.0.1", 7003, 3333)
    }

    fn fourth() -> NodeIdentity {
        NodeIdentity::new("test", "127.0.0.1", 7004, 4444)
    }

    fn settings() -> SwimSettings {
        let mut settings = SwimSettings::default();
        settings.suspicion.min_timeout_ms = 1_000;
        settings.suspicion.max_timeout_ms = 5_000;
        settings.tombstone_ttl_ms = 60_000;
        settings
    }

    fn instance() -> SwimInstance {
        SwimInstance::new(settings(), myself()).unwrap()
    }

    fn sends(directives: &[Directive]) -> Vec<(NodeIdentity, SwimMessage)> {
        directives
            .iter()
            .filter_map(|d| match d {
                Directive::Send { to, message, .. } => Some((to.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    fn changes(directives: &[Directive]) -> Vec<MemberStatusChange> {
        directives
            .iter()
            .filter_map(|d| match d {
                Directive::MembershipChanged(change) => Some(change.clone()),
                _ => None,
            })
            .collect()
    }

    fn ping_seq(directives: &[Directive], to: &NodeIdentity) -> u64 {
        sends(directives)
            .into_iter()
            .find_map(|(dest, msg)| match msg {
                SwimMessage::Ping { seq, .. } if dest == *to => Some(seq),
                _ => None,
            })
            .expect("expected a ping")
    }

    // ==================== Construction ====================

    #[test]
    fn test_new_instance() {
        let swim = instance();

        assert_eq!(swim.myself(), &myself());
        assert_eq!(swim.incarnation(), 0);
        assert_eq!(swim.all_members().len(), 1);
        assert_eq!(swim.local_health_multiplier(), 0);
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let mut settings = settings();
        settings.gossip.max_updates_per_message = 0;
        assert!(matches!(
            SwimInstance::new(settings, myself()),
            Err(SwimError::Config(_))
        ));
    }

    #[test]
    fn test_add_myself_rejected() {
        let mut swim = instance();
        assert!(swim.add_member(myself(), Status::Alive, 0, 0).is_err());
    }

    // ==================== Periodic tick ====================

    #[test]
    fn test_tick_alone_only_schedules() {
        let mut swim = instance();

        let out = swim.on_periodic_tick(0);

        assert_eq!(out, vec![Directive::ScheduleNextTick { at_ms: 1_000 }]);
        assert_eq!(swim.protocol_period(), 1);
    }

    #[test]
    fn test_tick_pings_member_with_payload() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(0);

        assert_eq!(swim.pending_probe_count(), 1);
        match &out[0] {
            Directive::Send {
                to,
                message: SwimMessage::Ping { origin, payload, .. },
                deadline_ms,
            } => {
                assert_eq!(to, &second());
                assert_eq!(origin, &myself());
                assert_eq!(*deadline_ms, Some(300));
                assert!(!payload.is_empty());
            }
            other => panic!("Expected Ping, got {:?}", other),
        }
        assert_eq!(out[1], Directive::ScheduleNextTick { at_ms: 1_000 });
    }

    #[test]
    fn test_ack_clears_probe_and_counts_success() {
        let metrics = InMemoryMetrics::new();
        let mut swim = SwimInstance::with_metrics(settings(), myself(), metrics.clone()).unwrap();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(0);
        let seq = ping_seq(&out, &second());
        swim.on_ack(&second(), 0, seq, vec![], 100).unwrap();

        assert_eq!(swim.pending_probe_count(), 0);
        assert_eq!(metrics.snapshot().successful_probes, 1);
    }

    // ==================== Timeouts ====================

    #[test]
    fn test_timeout_without_relays_suspects() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(0);
        let seq = ping_seq(&out, &second());
        let out = swim.on_ping_timeout(&second(), seq, 300);

        assert!(swim.member(&second()).unwrap().status.is_suspect());
        assert_eq!(swim.local_health_multiplier(), 1);
        assert_eq!(swim.suspicion_count(), 1);
        assert_eq!(changes(&out).len(), 1);
    }

    #[test]
    fn test_timeout_escalates_to_ping_requests() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();
        swim.add_member(third(), Status::Alive, 0, 0).unwrap();
        swim.add_member(fourth(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(0);
        let (target, seq) = sends(&out)
            .into_iter()
            .find_map(|(to, msg)| match msg {
                SwimMessage::Ping { seq, .. } => Some((to, seq)),
                _ => None,
            })
            .unwrap();

        let out = swim.on_ping_timeout(&target, seq, 300);
        let requests: Vec<_> = sends(&out)
            .into_iter()
            .filter(|(_, msg)| matches!(msg, SwimMessage::PingRequest { .. }))
            .collect();

        assert_eq!(requests.len(), 2);
        for (relay, msg) in requests {
            assert_ne!(relay, target);
            assert!(matches!(msg, SwimMessage::PingRequest { target: t, .. } if t == target));
        }
        // Still just a probe, not yet a suspicion
        assert!(swim.member(&target).unwrap().status.is_alive());
        assert_eq!(swim.pending_probe_count(), 1);
    }

    #[test]
    fn test_indirect_timeout_suspects_and_missed_nack() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();
        swim.add_member(third(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(0);
        let (target, seq) = sends(&out)
            .into_iter()
            .find_map(|(to, msg)| match msg {
                SwimMessage::Ping { seq, .. } => Some((to, seq)),
                _ => None,
            })
            .unwrap();

        swim.on_ping_timeout(&target, seq, 300);
        // Window is scaled by the raised multiplier: 300 + (2000 - 600)
        swim.on_ping_timeout(&target, seq, 1_000);
        assert!(swim.member(&target).unwrap().status.is_alive());
        swim.on_ping_timeout(&target, seq, 1_700);

        assert!(swim.member(&target).unwrap().status.is_suspect());
        // Direct timeout plus the relay that never nacked
        assert_eq!(swim.local_health_multiplier(), 2);
    }

    #[test]
    fn test_nack_avoids_missed_nack_penalty() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();
        swim.add_member(third(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(0);
        let (target, seq) = sends(&out)
            .into_iter()
            .find_map(|(to, msg)| match msg {
                SwimMessage::Ping { seq, .. } => Some((to, seq)),
                _ => None,
            })
            .unwrap();
        let relay = if target == second() { third() } else { second() };

        swim.on_ping_timeout(&target, seq, 300);
        swim.on_nack(&relay, &target, seq, 500);
        swim.on_ping_timeout(&target, seq, 1_700);

        assert_eq!(swim.local_health_multiplier(), 1);
    }

    #[test]
    fn test_duplicate_timeout_ignored() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(0);
        let seq = ping_seq(&out, &second());
        swim.on_ping_timeout(&second(), seq, 300);

        assert!(swim.on_ping_timeout(&second(), seq, 300).is_empty());
        assert!(swim.on_ping_timeout(&third(), 999, 300).is_empty());
        assert_eq!(swim.local_health_multiplier(), 1);
    }

    #[test]
    fn test_overdue_probe_handled_on_next_tick() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        swim.on_periodic_tick(0);
        swim.on_periodic_tick(1_000);

        assert!(swim.member(&second()).unwrap().status.is_suspect());
    }

    // ==================== Ping / relay ====================

    #[test]
    fn test_ping_from_unknown_adds_member_and_acks() {
        let mut swim = instance();

        let out = swim.on_ping(&second(), 7, vec![], 0).unwrap();

        assert!(swim.member(&second()).unwrap().status.is_alive());
        assert_eq!(swim.member(&second()).unwrap().incarnation, 0);
        let sent = sends(&out);
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            (to, SwimMessage::Ack { target, seq: 7, incarnation: 0, .. }) if *to == second() && *target == myself()
        ));
    }

    #[test]
    fn test_ping_request_relays_and_forwards_ack() {
        let mut swim = instance();

        let out = swim
            .on_ping_request(&second(), &third(), 42, vec![], 0)
            .unwrap();
        let local_seq = ping_seq(&out, &third());

        let out = swim.on_ack(&third(), 3, local_seq, vec![], 100).unwrap();
        let forwarded = sends(&out);
        assert!(forwarded.iter().any(|(to, msg)| *to == second()
            && matches!(msg, SwimMessage::Ack { target, incarnation: 3, seq: 42, .. } if *target == third())));
    }

    #[test]
    fn test_ping_request_timeout_sends_nack() {
        let mut swim = instance();

        let out = swim
            .on_ping_request(&second(), &third(), 42, vec![], 0)
            .unwrap();
        let local_seq = ping_seq(&out, &third());

        let out = swim.on_ping_timeout(&third(), local_seq, 300);
        assert_eq!(
            sends(&out),
            vec![(second(), SwimMessage::nack(third(), 42))]
        );
    }

    // ==================== Refutation ====================

    #[test]
    fn test_self_suspicion_refuted() {
        let mut swim = instance();

        let payload = vec![GossipUpdate::suspect(myself(), 0, second())];
        swim.on_membership_gossip(payload, 0).unwrap();

        assert_eq!(swim.incarnation(), 1);
        assert!(swim.member(&myself()).unwrap().status.is_alive());
        assert_eq!(swim.local_health_multiplier(), 1);
    }

    #[test]
    fn test_stale_self_suspicion_does_not_bump() {
        let mut swim = instance();
        swim.on_membership_gossip(vec![GossipUpdate::suspect(myself(), 0, second())], 0)
            .unwrap();
        swim.on_membership_gossip(vec![GossipUpdate::suspect(myself(), 0, third())], 0)
            .unwrap();

        assert_eq!(swim.incarnation(), 1);
    }

    #[test]
    fn test_late_ack_refutes_suspicion() {
        let mut swim = instance();
        swim.add_member(second(), Status::suspect_by(third()), 0, 0)
            .unwrap();

        let out = swim.on_ack(&second(), 0, 999, vec![], 100).unwrap();

        assert!(swim.member(&second()).unwrap().status.is_alive());
        assert_eq!(swim.suspicion_count(), 0);
        assert_eq!(changes(&out)[0].current, Status::Alive);
    }

    #[test]
    fn test_refutation_sent_without_waiting_for_tick() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        let out = swim
            .on_membership_gossip(vec![GossipUpdate::suspect(myself(), 0, second())], 10)
            .unwrap();

        let sent = sends(&out);
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            (to, SwimMessage::Ping { seq: 0, payload, .. }) => {
                assert_eq!(*to, second());
                assert_eq!(payload[0], GossipUpdate::alive(myself(), 1));
            }
            other => panic!("Expected Ping, got {:?}", other),
        }
        // Not a probe
        assert_eq!(swim.pending_probe_count(), 0);
        assert!(out.iter().all(|d| d.probe_deadline().is_none()));
    }

    #[test]
    fn test_stale_self_suspicion_sends_nothing() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();
        swim.on_membership_gossip(vec![GossipUpdate::suspect(myself(), 0, second())], 0)
            .unwrap();

        let out = swim
            .on_membership_gossip(vec![GossipUpdate::suspect(myself(), 0, third())], 0)
            .unwrap();
        assert!(sends(&out).is_empty());
    }

    // ==================== Validation ====================

    #[test]
    fn test_oversized_payload_rejected() {
        let mut settings = settings();
        settings.gossip.max_updates_per_message = 1;
        let mut swim = SwimInstance::new(settings, myself()).unwrap();

        let payload = vec![
            GossipUpdate::alive(second(), 0),
            GossipUpdate::alive(third(), 0),
        ];
        assert!(matches!(
            swim.on_membership_gossip(payload, 0),
            Err(SwimError::Validation(_))
        ));
        assert!(swim.member(&second()).is_none());
    }

    #[test]
    fn test_empty_suspect_rejected() {
        let mut swim = instance();
        let payload = vec![GossipUpdate::new(
            second(),
            0,
            Status::Suspect {
                suspected_by: Default::default(),
            },
        )];
        assert!(swim.on_membership_gossip(payload, 0).is_err());
    }

    // ==================== Removal ====================

    #[test]
    fn test_remove_member_tombstones() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        let out = swim.remove_member(&second(), 10);

        assert!(swim.member(&second()).is_none());
        assert!(swim.is_tombstoned(&second()));
        assert_eq!(changes(&out)[0].current, Status::Dead);
    }

    #[test]
    fn test_remove_myself_leaves() {
        let mut swim = instance();

        let out = swim.remove_member(&myself(), 0);

        assert!(swim.has_left());
        assert_eq!(swim.incarnation(), 1);
        assert_eq!(changes(&out)[0].node, myself());

        // No refutation once we left
        swim.on_membership_gossip(vec![GossipUpdate::suspect(myself(), 1, second())], 0)
            .unwrap();
        assert_eq!(swim.incarnation(), 1);
    }

    #[test]
    fn test_restart_detected_by_new_uid() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        let restarted = NodeIdentity::new("test", "127.0.0.1", 7002, 9999);
        swim.on_ping(&restarted, 1, vec![], 0).unwrap();

        assert!(swim.is_tombstoned(&second()));
        assert!(swim.member(&restarted).unwrap().status.is_alive());
    }

    #[test]
    fn test_seed_placeholder_replaced() {
        let mut swim = instance();
        let seed = NodeIdentity::new("test", "127.0.0.1", 7002, 0);
        swim.add_member(seed.clone(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(0);
        let seq = ping_seq(&out, &seed);
        swim.on_ack(&second(), 2, seq, vec![], 50).unwrap();

        assert!(swim.member(&seed).is_none());
        assert!(!swim.is_tombstoned(&seed));
        assert_eq!(swim.member(&second()).unwrap().incarnation, 2);
        assert_eq!(swim.pending_probe_count(), 0);
    }

    #[test]
    fn test_confirm_dead_requires_unreachable() {
        let mut settings = settings();
        settings.unreachability = Unreachability::Enabled { timeout_ms: 60_000 };
        let mut swim = SwimInstance::new(settings, myself()).unwrap();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        assert!(swim.confirm_dead(&second(), 0).is_empty());

        swim.add_member(second(), Status::Unreachable, 0, 0).unwrap();
        let out = swim.confirm_dead(&second(), 10);

        assert!(swim.is_tombstoned(&second()));
        assert_eq!(changes(&out)[0].current, Status::Dead);
    }

    // ==================== Restarts and seeds ====================

    #[test]
    fn test_gossip_about_other_uid_does_not_retire_member() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        // Gossip about an older process on the same endpoint
        let older = NodeIdentity::new("test", "127.0.0.1", 7002, 1);
        let out = swim
            .on_membership_gossip(vec![GossipUpdate::alive(older.clone(), 0)], 0)
            .unwrap();

        assert!(!swim.is_tombstoned(&second()));
        assert!(swim.member(&second()).unwrap().status.is_alive());
        assert!(changes(&out).iter().all(|c| !c.current.is_dead()));
        assert_eq!(
            swim.gossip.pending(&second()).map(|u| u.status.clone()),
            Some(Status::Alive)
        );

        // The live process talking to us settles it
        swim.on_ping(&second(), 1, vec![], 10).unwrap();
        assert!(swim.is_tombstoned(&older));
        assert!(swim.member(&second()).unwrap().status.is_alive());
    }

    #[test]
    fn test_ack_from_new_uid_retires_old() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        let restarted = NodeIdentity::new("test", "127.0.0.1", 7002, 9999);
        swim.on_ack(&restarted, 0, 12345, vec![], 0).unwrap();

        assert!(swim.is_tombstoned(&second()));
        assert!(swim.member(&restarted).unwrap().status.is_alive());
    }

    // ==================== Administrative add ====================

    #[test]
    fn test_add_member_overrides_merge() {
        let mut swim = instance();
        swim.add_member(second(), Status::suspect_by(third()), 0, 0)
            .unwrap();
        assert_eq!(swim.suspicion_count(), 1);

        let out = swim.add_member(second(), Status::Alive, 0, 10).unwrap();

        assert!(swim.member(&second()).unwrap().status.is_alive());
        assert_eq!(swim.suspicion_count(), 0);
        let changed = changes(&out);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].current, Status::Alive);

        // Same thing again changes nothing
        assert!(swim.add_member(second(), Status::Alive, 0, 20).unwrap().is_empty());
    }

    #[test]
    fn test_add_member_refuses_tombstoned() {
        let mut swim = instance();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();
        swim.remove_member(&second(), 0);

        let out = swim.add_member(second(), Status::Alive, 5, 10).unwrap();

        assert!(out.is_empty());
        assert!(swim.member(&second()).is_none());
    }

    // ==================== Response times ====================

    #[test]
    fn test_ack_records_round_trip() {
        let metrics = InMemoryMetrics::new();
        let mut swim = SwimInstance::with_metrics(settings(), myself(), metrics.clone()).unwrap();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(1_000);
        let seq = ping_seq(&out, &second());
        swim.on_ack(&second(), 0, seq, vec![], 1_040).unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ping_round_trips, 1);
        assert_eq!(snapshot.mean_ping_round_trip_ms(), Some(40));
        assert_eq!(snapshot.ping_request_responses, 0);
    }

    #[test]
    fn test_ping_request_responses_recorded() {
        let metrics = InMemoryMetrics::new();
        let mut swim = SwimInstance::with_metrics(settings(), myself(), metrics.clone()).unwrap();
        swim.add_member(second(), Status::Alive, 0, 0).unwrap();
        swim.add_member(third(), Status::Alive, 0, 0).unwrap();
        swim.add_member(fourth(), Status::Alive, 0, 0).unwrap();

        let out = swim.on_periodic_tick(0);
        let (target, seq) = sends(&out)
            .into_iter()
            .find_map(|(to, msg)| match msg {
                SwimMessage::Ping { seq, .. } => Some((to, seq)),
                _ => None,
            })
            .unwrap();
        let out = swim.on_ping_timeout(&target, seq, 300);
        let relays: Vec<NodeIdentity> = sends(&out)
            .into_iter()
            .filter(|(_, msg)| matches!(msg, SwimMessage::PingRequest { .. }))
            .map(|(to, _)| to)
            .collect();

        swim.on_nack(&relays[0], &target, seq, 400);
        swim.on_ack(&target, 0, seq, vec![], 450).unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ping_request_responses, 2);
        assert_eq!(snapshot.ping_request_first_successful, 1);
        assert_eq!(snapshot.ping_request_first_successful_ms_total, 150);
        assert_eq!(snapshot.ping_round_trips, 0);
    }
}
