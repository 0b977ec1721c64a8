//! Per-peer link state machine
//!
//! ```text
//! Unknown -> Discovering -> Active <-> Stale -> Evicted
//! ```
//!
//! A discovery message moves a peer to `Discovering`, a heartbeat to
//! `Active`. Silence longer than the heartbeat timeout (or too many missed
//! replies) makes an active peer `Stale`; any message brings it back.
//! Silence longer than the eviction timeout evicts it. Times are local
//! receipt times, not sender timestamps.

use std::collections::BTreeMap;
use std::fmt;

use dashmap::DashMap;
use serde::Serialize;

use cogmesh_core::AgentId;

/// Liveness of one peer as seen locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Unknown,
    Discovering,
    Active,
    Stale,
    Evicted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Unknown => "unknown",
            LinkState::Discovering => "discovering",
            LinkState::Active => "active",
            LinkState::Stale => "stale",
            LinkState::Evicted => "evicted",
        };
        f.write_str(name)
    }
}

/// What we know about the link to one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLink {
    pub state: LinkState,
    /// Local time of the last valid message from the peer
    pub last_heard: u32,
    /// Exchanges the peer left unanswered since it was last heard
    pub missed_replies: u32,
}

/// A state change worth reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub agent: AgentId,
    pub from: LinkState,
    pub to: LinkState,
}

/// Link states of every peer this agent has heard from
#[derive(Debug, Default)]
pub struct LinkTable {
    links: DashMap<AgentId, PeerLink>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, agent: AgentId) -> LinkState {
        self.links
            .get(&agent)
            .map(|link| link.state)
            .unwrap_or(LinkState::Unknown)
    }

    pub fn get(&self, agent: AgentId) -> Option<PeerLink> {
        self.links.get(&agent).map(|link| link.clone())
    }

    /// A discovery message arrived from `agent`
    pub fn on_discovery(&self, agent: AgentId, now: u32) -> Option<Transition> {
        self.touch(agent, now, |state| match state {
            LinkState::Unknown | LinkState::Evicted => LinkState::Discovering,
            other => other,
        })
    }

    /// A heartbeat arrived from `agent`
    pub fn on_heartbeat(&self, agent: AgentId, now: u32) -> Option<Transition> {
        self.touch(agent, now, |_| LinkState::Active)
    }

    /// Any other valid message arrived from `agent`
    ///
    /// Only refreshes peers already known; an evicted peer has to announce
    /// itself again.
    pub fn on_message(&self, agent: AgentId, now: u32) -> Option<Transition> {
        match self.state(agent) {
            LinkState::Unknown | LinkState::Evicted => None,
            _ => self.touch(agent, now, |state| match state {
                LinkState::Stale => LinkState::Active,
                other => other,
            }),
        }
    }

    fn touch(
        &self,
        agent: AgentId,
        now: u32,
        next: impl FnOnce(LinkState) -> LinkState,
    ) -> Option<Transition> {
        let mut link = self.links.entry(agent).or_insert(PeerLink {
            state: LinkState::Unknown,
            last_heard: now,
            missed_replies: 0,
        });
        let from = link.state;
        link.state = next(from);
        link.last_heard = link.last_heard.max(now);
        link.missed_replies = 0;
        (from != link.state).then_some(Transition {
            agent,
            from,
            to: link.state,
        })
    }

    /// Count an unanswered exchange; too many make an active peer stale
    pub fn record_miss(&self, agent: AgentId, max_missed: u32) -> Option<Transition> {
        let mut link = self.links.get_mut(&agent)?;
        link.missed_replies = link.missed_replies.saturating_add(1);
        if link.state == LinkState::Active && link.missed_replies >= max_missed {
            link.state = LinkState::Stale;
            return Some(Transition {
                agent,
                from: LinkState::Active,
                to: LinkState::Stale,
            });
        }
        None
    }

    /// Apply timeouts
    ///
    /// Returns stale transitions and the peers whose silence exceeded the
    /// eviction timeout. A peer past both timeouts in one check still goes
    /// through `Stale` first. Nothing is marked evicted here; see
    /// [`evict`](Self::evict).
    pub fn check(
        &self,
        now: u32,
        heartbeat_timeout: u32,
        eviction_timeout: u32,
    ) -> (Vec<Transition>, Vec<AgentId>) {
        let mut stale = Vec::new();
        let mut evicted = Vec::new();

        for mut entry in self.links.iter_mut() {
            let agent = *entry.key();
            let link = entry.value_mut();
            let silence = now.saturating_sub(link.last_heard);
            let state = link.state;
            if matches!(state, LinkState::Discovering | LinkState::Active)
                && silence > heartbeat_timeout
            {
                stale.push(Transition {
                    agent,
                    from: state,
                    to: LinkState::Stale,
                });
                link.state = LinkState::Stale;
            }
            if link.state == LinkState::Stale && silence > eviction_timeout {
                evicted.push(agent);
            }
        }

        stale.sort_by_key(|t| t.agent);
        evicted.sort();
        (stale, evicted)
    }

    /// Mark a peer evicted; returns the state it left
    pub fn evict(&self, agent: AgentId) -> Option<LinkState> {
        let mut link = self.links.get_mut(&agent)?;
        let from = link.state;
        link.state = LinkState::Evicted;
        (from != LinkState::Evicted).then_some(from)
    }

    /// Peers in `state`, ascending
    pub fn in_state(&self, state: LinkState) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .links
            .iter()
            .filter(|entry| entry.state == state)
            .map(|entry| *entry.key())
            .collect();
        agents.sort();
        agents
    }

    pub fn snapshot(&self) -> BTreeMap<AgentId, LinkState> {
        self.links
            .iter()
            .map(|entry| (*entry.key(), entry.state))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
