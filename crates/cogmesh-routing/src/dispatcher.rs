//! Load-aware agent selection
//!
//! The [`Dispatcher`] never touches the network. It reads the registry as
//! it stands, so its answer is only as fresh as the last heartbeat round.

use std::sync::Arc;

use tracing::debug;

use cogmesh_core::{AgentId, Capabilities, DispatchError};

use crate::registry::{AgentNode, AgentRegistry};

/// Chooses a target agent for remote work
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Least-loaded agent whose capabilities intersect `mask`
    ///
    /// # Errors
    ///
    /// [`DispatchError::NoAgentAvailable`] when nothing matches. There is no
    /// fallback agent.
    pub fn select_agent(&self, mask: Capabilities) -> Result<AgentNode, DispatchError> {
        self.select_excluding(mask, &[])
    }

    /// Like [`select_agent`](Self::select_agent), skipping the listed agents
    pub fn select_excluding(
        &self,
        mask: Capabilities,
        exclude: &[AgentId],
    ) -> Result<AgentNode, DispatchError> {
        let selected = self
            .registry
            .find_by_capability(mask)
            .into_iter()
            .find(|node| !exclude.contains(&node.agent_id))
            .ok_or(DispatchError::NoAgentAvailable(mask))?;

        debug!(
            agent = %selected.agent_id,
            load = selected.load_factor,
            mask = %mask,
            "Selected agent"
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use cogmesh_core::AgentAddress;

    use super::*;

    fn dispatcher_with(nodes: &[(u32, u32, u32)]) -> Dispatcher {
        let registry = Arc::new(AgentRegistry::new());
        for &(id, load, caps) in nodes {
            registry.announce(AgentNode::new(
                AgentId::new(id),
                AgentAddress::new("localhost", 7400),
                Capabilities::new(caps),
                load,
                1,
            ));
        }
        Dispatcher::new(registry)
    }

    #[test]
    fn test_selects_least_loaded() {
        let dispatcher = dispatcher_with(&[(1, 3, 0x1), (2, 1, 0x1)]);
        let selected = dispatcher.select_agent(Capabilities::new(0x1)).unwrap();
        assert_eq!(selected.agent_id, AgentId::new(2));
    }

    #[test]
    fn test_no_agent_available() {
        let dispatcher = dispatcher_with(&[(1, 0, 0x2)]);
        assert_eq!(
            dispatcher.select_agent(Capabilities::new(0x1)),
            Err(DispatchError::NoAgentAvailable(Capabilities::new(0x1)))
        );

        let empty = dispatcher_with(&[]);
        assert!(empty.select_agent(Capabilities::ALL).is_err());
    }

    #[test]
    fn test_tie_broken_by_id() {
        let dispatcher = dispatcher_with(&[(9, 1, 0x1), (5, 1, 0x1)]);
        let selected = dispatcher.select_agent(Capabilities::new(0x1)).unwrap();
        assert_eq!(selected.agent_id, AgentId::new(5));
    }

    #[test]
    fn test_select_excluding() {
        let dispatcher = dispatcher_with(&[(1, 0, 0x1), (2, 4, 0x1)]);
        let selected = dispatcher
            .select_excluding(Capabilities::new(0x1), &[AgentId::new(1)])
            .unwrap();
        assert_eq!(selected.agent_id, AgentId::new(2));
        assert!(
            dispatcher
                .select_excluding(Capabilities::new(0x1), &[AgentId::new(1), AgentId::new(2)])
                .is_err()
        );
    }

    #[test]
    fn test_follows_heartbeat_load() {
        let dispatcher = dispatcher_with(&[(1, 0, 0x1), (2, 1, 0x1)]);
        dispatcher.registry().heartbeat(AgentId::new(1), 5, 2, 2);
        let selected = dispatcher.select_agent(Capabilities::new(0x1)).unwrap();
        assert_eq!(selected.agent_id, AgentId::new(2));
    }
}
