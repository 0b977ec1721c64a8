//! # Cogmesh Core
//!
//! Core types, traits, and errors shared by every cogmesh crate.
//!
//! Cogmesh lets independent cognitive agents discover each other, exchange
//! attention and pattern state, and keep replicated tensor membranes
//! consistent. This crate holds the vocabulary the other layers speak:
//!
//! ## Key Types
//!
//! - [`AgentId`], [`Capabilities`], [`AgentAddress`]: agent identity and reachability
//! - [`CognitiveMessage`] / [`MessageKind`]: the wire envelope
//! - [`ECANValues`] / [`AttentionState`]: attention-economy records
//! - [`TruthValue`]: strength/confidence pair carried opaquely
//!
//! ## Key Traits
//!
//! - [`Transport`]: message passing between agents (UDP or in-memory)
//! - [`Clock`]: time abstraction so liveness logic can be tested deterministically

pub mod attention;
pub mod error;
pub mod identity;
pub mod message;
pub mod mock_transport;
pub mod traits;
pub mod transport;
pub mod truth;

// Re-export main types
pub use attention::*;
pub use error::*;
pub use identity::*;
pub use message::*;
pub use mock_transport::*;
pub use traits::*;
pub use transport::*;
pub use truth::*;
