//! # Cogmesh Node
//!
//! Runs one cognitive agent in the mesh.
//!
//! This crate provides the [`Coordinator`], which ties together:
//! - Membership ([`AgentRegistry`](cogmesh_routing::AgentRegistry)) fed by discovery and heartbeats
//! - Attention sync ([`AttentionLedger`](cogmesh_sync::AttentionLedger))
//! - Membrane replication ([`MembraneStore`](cogmesh_sync::MembraneStore))
//! - Remote command execution and inference queries
//!
//! [`cognitive_init`] builds a [`CognitiveContext`] around a coordinator,
//! the module registry, and the collaborator registry; [`cognitive_cleanup`]
//! releases all of it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cogmesh_core::Capabilities;
//! use cogmesh_node::{NodeConfig, cognitive_cleanup, cognitive_init};
//!
//! let config = NodeConfig::default()
//!     .with_agent_id(3)
//!     .with_peer("10.0.0.2:7400");
//! let context = cognitive_init(config).await?;
//!
//! let result = context
//!     .coordinator()
//!     .request_remote("(+ 1 2)", Capabilities::EVALUATE)
//!     .await?;
//!
//! cognitive_cleanup(context).await?;
//! ```

pub mod collaborators;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
mod handler;
pub mod hooks;
pub mod link;
pub mod modules;
mod round;

pub use collaborators::{
    Collaborator, CollaboratorKind, CollaboratorRegistry, Evaluator, Inference, PatternEngine,
    TensorHandle, TensorKernel,
};
pub use config::{
    AgentConfig, DEFAULT_PORT, FeatureFlags, NodeConfig, SyncConfig, TransportConfig,
    parse_capability_mask,
};
pub use context::{CognitiveContext, CognitiveStatus, cognitive_cleanup, cognitive_init};
pub use coordinator::{Coordinator, SharedPattern};
pub use error::{NodeError, NodeResult};
pub use events::NodeEvent;
pub use hooks::{HookAction, HookContext, HookId, HookKind, HookRegistry};
pub use link::{LinkState, LinkTable, PeerLink, Transition};
pub use modules::{CognitiveModule, ModuleInfo, ModuleRegistry};
