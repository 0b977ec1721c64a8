//! Process-wide cognitive context
//!
//! One [`CognitiveContext`] owns everything a node has: configuration,
//! coordinator, and module registry. It is created by [`cognitive_init`]
//! and torn down by [`cognitive_cleanup`]; nothing lives in globals.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use cogmesh_core::{AgentId, Clock, MockNetwork, SystemClock, Transport};
use cogmesh_transport::UdpTransport;

use crate::config::{FeatureFlags, NodeConfig};
use crate::coordinator::Coordinator;
use crate::error::{NodeError, NodeResult};
use crate::link::LinkState;
use crate::modules::ModuleRegistry;

/// Everything one node owns
#[derive(Debug)]
pub struct CognitiveContext {
    config: NodeConfig,
    coordinator: Arc<Coordinator>,
    modules: ModuleRegistry,
}

/// Snapshot of a node for status output
#[derive(Debug, Clone, Serialize)]
pub struct CognitiveStatus {
    pub agent_id: AgentId,
    pub features: FeatureFlags,
    pub modules: Vec<String>,
    pub known_agents: usize,
    pub links: BTreeMap<AgentId, LinkState>,
    pub membranes: usize,
    pub total_attention: f32,
    pub active_patterns: u32,
    pub shared_patterns: usize,
    pub started: bool,
}

/// Bring a node up and start its coordinator
///
/// With the `distributed` feature the UDP transport is bound to
/// `transport.bind`; without it the agent runs alone on an in-process
/// network.
///
/// # Errors
///
/// [`NodeError::Config`] for an invalid configuration and
/// [`NodeError::Init`] when the transport cannot be bound. Both are fatal.
#[instrument(skip(config), fields(agent = config.agent.agent_id))]
pub async fn cognitive_init(mut config: NodeConfig) -> NodeResult<CognitiveContext> {
    config.validate()?;

    let transport: Arc<dyn Transport> = if config.features.distributed {
        let udp = UdpTransport::bind(&config.transport.bind, &config.transport.seeds)
            .await
            .map_err(|e| NodeError::Init(e.to_string()))?;
        if config.agent.port == 0 {
            config.agent.port = udp.local_addr().port();
        }
        info!(bind = %udp.local_addr(), seeds = config.transport.seeds.len(), "Transport bound");
        Arc::new(udp)
    } else {
        info!("Distributed feature off, running standalone");
        MockNetwork::new().join(config.agent_id())
    };

    let context = CognitiveContext::with_transport(config, transport, Arc::new(SystemClock))?;
    context.coordinator.start().await?;
    info!(agent = %context.agent_id(), "Cognitive context ready");
    Ok(context)
}

/// Stop the coordinator and release every registry
#[instrument(skip(context), fields(agent = %context.agent_id()))]
pub async fn cognitive_cleanup(context: CognitiveContext) -> NodeResult<()> {
    let coordinator = &context.coordinator;
    if coordinator.is_started() {
        coordinator.shutdown().await?;
    } else {
        coordinator.transport().close().await;
    }

    for module in context.modules.cleanup_all() {
        info!(module = %module.name, "Module cleaned up");
    }
    coordinator.hooks().clear();
    coordinator.collaborators().clear();
    info!("Cognitive context released");
    Ok(())
}

impl CognitiveContext {
    /// Assemble a context over an existing transport without starting it
    pub fn with_transport(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> NodeResult<Self> {
        config.validate()?;
        let coordinator = Arc::new(Coordinator::new(&config, transport, clock));
        Ok(Self {
            config,
            coordinator,
            modules: ModuleRegistry::new(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn agent_id(&self) -> AgentId {
        self.config.agent_id()
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn status(&self) -> CognitiveStatus {
        let coordinator = &self.coordinator;
        let attention = coordinator.ledger().snapshot();
        CognitiveStatus {
            agent_id: self.agent_id(),
            features: self.config.features,
            modules: self.modules.list().into_iter().map(|m| m.name).collect(),
            known_agents: coordinator.registry().len(),
            links: coordinator.links(),
            membranes: coordinator.store().len(),
            total_attention: attention.total_attention,
            active_patterns: attention.active_patterns,
            shared_patterns: coordinator.shared_pattern_count(),
            started: coordinator.is_started(),
        }
    }
}

#[cfg(test)]
mod tests {
    use cogmesh_core::ManualClock;

    use super::*;

    fn standalone(id: u32) -> NodeConfig {
        let mut config = NodeConfig::default().with_agent_id(id);
        config.features.distributed = false;
        config
    }

    #[tokio::test]
    async fn test_init_rejects_bad_config() {
        let err = cognitive_init(standalone(0)).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[tokio::test]
    async fn test_standalone_lifecycle() {
        let context = cognitive_init(standalone(5)).await.unwrap();
        let status = context.status();
        assert_eq!(status.agent_id, AgentId::new(5));
        assert!(status.started);
        assert_eq!(status.known_agents, 0);

        cognitive_cleanup(context).await.unwrap();
    }

    #[tokio::test]
    async fn test_unbindable_address_is_init_error() {
        let config = NodeConfig::default().with_bind("not an address");
        let err = cognitive_init(config).await.unwrap_err();
        assert!(matches!(err, NodeError::Init(_)));
    }

    #[tokio::test]
    async fn test_cleanup_without_start() {
        let network = MockNetwork::new();
        let context = CognitiveContext::with_transport(
            standalone(2),
            network.join(AgentId::new(2)),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        assert!(!context.status().started);
        assert!(context.modules().is_empty());

        cognitive_cleanup(context).await.unwrap();
        assert!(network.agents().is_empty());
    }

    #[test]
    fn test_status_serializes() {
        let network = MockNetwork::new();
        let context = CognitiveContext::with_transport(
            standalone(3),
            network.join(AgentId::new(3)),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        let json = serde_json::to_value(context.status()).unwrap();
        assert_eq!(json["membranes"], 0);
        assert_eq!(json["started"], false);
    }
}
