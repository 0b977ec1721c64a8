//! # Cogmesh Routing
//!
//! Membership and agent selection for cogmesh.
//!
//! ## Core Components
//!
//! - [`AgentRegistry`]: Known agents with their capabilities, load, and last contact
//! - [`Dispatcher`]: Picks the least-loaded agent for a capability mask
//!
//! ## Selection Order
//!
//! Registry queries return matching agents ordered by load factor, then by
//! agent id. The dispatcher takes the first entry, so every agent holding
//! the same registry contents makes the same choice.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cogmesh_core::{AgentAddress, AgentId, Capabilities};
//! use cogmesh_routing::{AgentNode, AgentRegistry, Dispatcher};
//!
//! let registry = Arc::new(AgentRegistry::new());
//! registry.announce(AgentNode::new(AgentId::new(2), AgentAddress::new("10.0.0.2", 7400),
//!     Capabilities::EVALUATE, 1, now));
//!
//! let dispatcher = Dispatcher::new(registry);
//! let target = dispatcher.select_agent(Capabilities::EVALUATE)?;
//! ```

pub mod dispatcher;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use registry::{AgentNode, AgentRegistry, AnnounceOutcome};
