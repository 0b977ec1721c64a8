//! # Cogmesh Sync
//!
//! Replicated state for cogmesh agents.
//!
//! ## Key Components
//!
//! - [`AttentionLedger`]: Per-pattern importance with decay and a max-merge
//!   that converges regardless of delivery order
//! - [`PrimeShape`]: Canonical prime-factor shape descriptor, also the shard key
//! - [`TensorMembrane`]: Versioned tensor payload with an integrity checksum
//! - [`MembraneStore`]: Owns membranes and resolves remote candidates
//!
//! ## Membrane Resolution
//!
//! A remote [`MembraneCandidate`] carries its version and the version it was
//! derived from. [`MembraneStore::apply_remote`] compares them to local state:
//!
//! 1. **Duplicate**: same version and content, nothing to do
//! 2. **Rejected**: not newer than local state, or corrupt
//! 3. **Accepted**: newer, and no local edits since its base (fast-forward)
//! 4. **Merged**: both sides edited; cells are merged against the last
//!    agreed payload and the result gets a version above both
//!
//! Replaying, reordering, or duplicating candidates converges to the same
//! `(version, checksum, payload)` everywhere.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cogmesh_core::AgentId;
//! use cogmesh_sync::{MembraneStore, PrimeShape};
//!
//! let store = MembraneStore::new(AgentId::new(1));
//! store.create(7, PrimeShape::new(vec![2, 3])?)?;
//! store.mutate_local(7, |data| data[0] = 1.5)?;
//!
//! let candidate = store.candidate(7)?;
//! let outcome = other_store.apply_remote(&candidate)?;
//! ```

pub mod attention;
pub mod membrane;
pub mod merge;
pub mod shape;
pub mod store;

pub use attention::{AttentionConfig, AttentionLedger};
pub use membrane::{MembraneCandidate, MembraneId, MembraneSummary, TensorMembrane, checksum};
pub use merge::{MergeSide, merge_cells, merge_membranes};
pub use shape::{MAX_ELEMENTS, MAX_FACTORS, PrimeShape};
pub use store::{ApplyOutcome, MembraneStore, RejectReason};
