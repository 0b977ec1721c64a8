//! Agent registry
//!
//! The [`AgentRegistry`] is the membership view of one agent: every peer it
//! has heard announce itself, with capabilities and load. Each record keeps
//! two clocks: the sender timestamp of the newest message, which orders
//! announcements, and the local receipt time, which drives pruning. Entries
//! are only removed by [`AgentRegistry::prune`].

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use cogmesh_core::{AgentAddress, AgentId, Capabilities};

/// Identity record for a known agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentNode {
    pub agent_id: AgentId,
    pub address: AgentAddress,
    pub capabilities: Capabilities,
    /// Lower is more available
    pub load_factor: u32,
    /// Sender timestamp of the newest message from this agent
    pub last_seen: u32,
    /// Local time the last message from this agent arrived
    pub last_contact: u32,
}

impl AgentNode {
    pub fn new(
        agent_id: AgentId,
        address: AgentAddress,
        capabilities: Capabilities,
        load_factor: u32,
        last_seen: u32,
    ) -> Self {
        Self {
            agent_id,
            address,
            capabilities,
            load_factor,
            last_seen,
            last_contact: last_seen,
        }
    }

    /// Set the local receipt time; defaults to the sender timestamp
    pub fn received_at(mut self, now: u32) -> Self {
        self.last_contact = now;
        self
    }

    /// Ordering key used by capability queries
    fn selection_key(&self) -> (u32, AgentId) {
        (self.load_factor, self.agent_id)
    }
}

/// Result of [`AgentRegistry::announce`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceOutcome {
    /// First contact with this agent
    Inserted,
    /// Existing record replaced
    Updated,
    /// Announcement older than the stored record; nothing changed
    Ignored,
}

/// Registry of known agents
///
/// Read-mostly: queries take the read lock, announcements and pruning take
/// the write lock briefly.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<AgentId, AgentNode>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `node.agent_id`
    ///
    /// Identity fields are last-writer-wins, but an announcement whose
    /// timestamp is older than the stored one is ignored so reordered
    /// datagrams cannot roll a record back.
    pub fn announce(&self, node: AgentNode) -> AnnounceOutcome {
        let mut agents = self.agents.write();
        match agents.get_mut(&node.agent_id) {
            None => {
                debug!(agent = %node.agent_id, address = %node.address, caps = %node.capabilities, "Agent registered");
                agents.insert(node.agent_id, node);
                AnnounceOutcome::Inserted
            }
            Some(existing) if node.last_seen < existing.last_seen => {
                trace!(
                    agent = %node.agent_id,
                    stored = existing.last_seen,
                    received = node.last_seen,
                    "Ignoring out-of-order announcement"
                );
                existing.last_contact = existing.last_contact.max(node.last_contact);
                AnnounceOutcome::Ignored
            }
            Some(existing) => {
                let last_contact = existing.last_contact.max(node.last_contact);
                *existing = node;
                existing.last_contact = last_contact;
                AnnounceOutcome::Updated
            }
        }
    }

    /// Refresh load and last contact for a known agent
    ///
    /// `timestamp` is the sender's, `received_at` the local arrival time.
    /// Returns `false` if the agent is not registered. A heartbeat older than
    /// the stored timestamp keeps the stored load but still counts as
    /// contact.
    pub fn heartbeat(
        &self,
        agent_id: AgentId,
        load_factor: u32,
        timestamp: u32,
        received_at: u32,
    ) -> bool {
        let mut agents = self.agents.write();
        match agents.get_mut(&agent_id) {
            Some(node) => {
                node.last_contact = node.last_contact.max(received_at);
                if timestamp >= node.last_seen {
                    node.load_factor = load_factor;
                    node.last_seen = timestamp;
                }
                true
            }
            None => false,
        }
    }

    /// All agents whose capabilities intersect `mask`, least loaded first
    ///
    /// Ties on load are broken by ascending agent id.
    pub fn find_by_capability(&self, mask: Capabilities) -> Vec<AgentNode> {
        let mut matches: Vec<AgentNode> = self
            .agents
            .read()
            .values()
            .filter(|node| node.capabilities.intersects(mask))
            .cloned()
            .collect();
        matches.sort_by_key(AgentNode::selection_key);
        matches
    }

    /// Remove every agent with no contact since `now - timeout_secs`
    ///
    /// Compares local receipt times only, so a peer with a skewed clock is
    /// kept as long as it keeps talking. Returns the removed ids in
    /// ascending order.
    pub fn prune(&self, now: u32, timeout_secs: u32) -> Vec<AgentId> {
        let cutoff = now.saturating_sub(timeout_secs);
        let mut removed = Vec::new();
        self.agents.write().retain(|id, node| {
            let keep = node.last_contact >= cutoff;
            if !keep {
                removed.push(*id);
            }
            keep
        });

        if !removed.is_empty() {
            debug!(count = removed.len(), cutoff, "Pruned silent agents");
        }
        removed
    }

    pub fn get(&self, agent_id: AgentId) -> Option<AgentNode> {
        self.agents.read().get(&agent_id).cloned()
    }

    pub fn contains(&self, agent_id: AgentId) -> bool {
        self.agents.read().contains_key(&agent_id)
    }

    /// Registered ids in ascending order
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.read().keys().copied().collect()
    }

    /// Snapshot of every record
    pub fn agents(&self) -> Vec<AgentNode> {
        self.agents.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}
