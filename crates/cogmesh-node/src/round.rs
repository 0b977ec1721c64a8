//! One synchronization round
//!
//! Order within a round: attention decay, liveness, discovery, heartbeats,
//! attention snapshot, membrane pushes. Send failures are logged and the
//! round carries on.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;

use tracing::{debug, trace, warn};

use cogmesh_core::{AgentId, MessageKind};
use cogmesh_transport::AttentionPayload;

use crate::coordinator::CoordinatorInner;
use crate::link::LinkState;

/// Clears the running flag however the round ends
struct RoundGuard<'a>(&'a CoordinatorInner);

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.0.round_running.store(false, Ordering::Release);
    }
}

impl CoordinatorInner {
    /// Returns `false` without doing anything if a round is already running
    pub(crate) async fn run_round(&self) -> bool {
        if self.round_running.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _guard = RoundGuard(self);

        let now = self.clock.now_secs();
        self.ledger.decay(now);
        self.check_liveness(now);

        self.send_discovery().await;
        self.send_heartbeats().await;
        self.send_attention().await;

        for id in self.store.ids() {
            if let Err(e) = self.push_membrane(id).await {
                debug!(membrane = id, error = %e, "Membrane push skipped");
            }
        }
        trace!(now, "Round complete");
        true
    }

    /// Stale and evict silent peers, count unanswered membrane pushes
    fn check_liveness(&self, now: u32) {
        let (stale, silent) = self.links.check(
            now,
            self.config.heartbeat_timeout_secs(),
            self.config.eviction_timeout_secs(),
        );
        for transition in stale {
            self.report(transition);
        }

        let overdue: Vec<AgentId> = self
            .awaiting
            .iter()
            .filter(|entry| now.saturating_sub(*entry.value()) >= self.config.round_trip_timeout_secs())
            .map(|entry| *entry.key())
            .collect();
        for agent in overdue {
            self.awaiting.remove(&agent);
            if let Some(transition) = self.links.record_miss(agent, self.config.max_missed_replies) {
                self.report(transition);
            }
        }

        let eviction_timeout = self.config.eviction_timeout_secs();
        let mut evicted: BTreeSet<AgentId> = self
            .registry
            .prune(now, eviction_timeout)
            .into_iter()
            .collect();
        evicted.extend(silent);
        for agent in evicted {
            match self.links.get(agent) {
                None => continue,
                Some(link) if link.state == LinkState::Unknown => continue,
                // Link traffic the registry does not count
                Some(link) if now.saturating_sub(link.last_heard) <= eviction_timeout => continue,
                Some(_) => self.evict(agent),
            }
        }
    }

    async fn send_discovery(&self) {
        let payload = match self.announce_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to build discovery payload");
                return;
            }
        };
        match self.broadcast(MessageKind::Discovery, payload).await {
            Ok(sent) => trace!(sent, "Discovery broadcast"),
            Err(e) => warn!(error = %e, "Discovery broadcast failed"),
        }
    }

    async fn send_heartbeats(&self) {
        let payload = match self.announce_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to build heartbeat payload");
                return;
            }
        };
        for agent in self.registry.agent_ids() {
            if agent == self.local || self.links.state(agent) == LinkState::Evicted {
                continue;
            }
            if let Err(e) = self.send_to(agent, MessageKind::Heartbeat, payload.clone()).await {
                debug!(agent = %agent, error = %e, "Heartbeat send failed");
            }
        }
    }

    async fn send_attention(&self) {
        if self.ledger.is_empty() {
            return;
        }
        let snapshot = self.ledger.snapshot();
        let payload = match AttentionPayload::from(&snapshot).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode attention snapshot");
                return;
            }
        };
        if let Err(e) = self.broadcast(MessageKind::AttentionSync, payload).await {
            warn!(error = %e, "Attention broadcast failed");
        }
    }
}
