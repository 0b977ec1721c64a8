//! Events published by the coordinator

use bytes::Bytes;

use cogmesh_core::AgentId;
use cogmesh_sync::MembraneId;
use cogmesh_transport::CognitiveStatePayload;

/// Something observers of the coordinator may care about
///
/// Delivered over a broadcast channel; slow subscribers lose the oldest
/// events.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// First discovery message from an agent
    AgentDiscovered { agent: AgentId },
    /// Agent sent a heartbeat or came back from stale
    AgentActive { agent: AgentId },
    /// Agent went quiet or stopped answering
    AgentStale { agent: AgentId },
    /// Agent removed from the registry
    AgentEvicted { agent: AgentId },
    /// A peer shared an encoded pattern
    PatternShared { origin: AgentId, key: String },
    /// A peer published its load and attention summary
    PeerState {
        agent: AgentId,
        state: CognitiveStatePayload,
    },
    /// Opaque memory-sync payload from a peer
    MemorySync { agent: AgentId, payload: Bytes },
    /// Local membrane state changed because of a peer
    MembraneUpdated {
        membrane_id: MembraneId,
        version: u64,
        from: AgentId,
    },
}
