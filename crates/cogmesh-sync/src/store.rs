//! Membrane store with three-way resolution of remote candidates
//!
//! Besides each membrane, the store remembers the last version it agreed
//! with a peer (`synced_version`) and the payload at that version (the
//! merge base). A membrane has local changes when its version is above the
//! synced version. All of this lives under one write lock, so an observer
//! never sees a version whose checksum does not match the payload.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::{debug, trace};

use cogmesh_core::{AgentId, SyncError};

use crate::membrane::{MembraneCandidate, MembraneId, MembraneSummary, TensorMembrane, checksum};
use crate::merge::{MergeSide, merge_membranes};
use crate::shape::PrimeShape;

/// Result of applying a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Candidate replaced local state (new membrane or fast-forward)
    Accepted { version: u64 },
    /// Candidate equals local state; nothing changed
    Duplicate,
    /// Candidate discarded
    Rejected(RejectReason),
    /// Both sides had edits; a merged state with a new version was produced
    Merged { version: u64 },
}

impl ApplyOutcome {
    /// Whether local state changed
    pub fn changed(&self) -> bool {
        matches!(self, ApplyOutcome::Accepted { .. } | ApplyOutcome::Merged { .. })
    }
}

/// Why a candidate was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Candidate is not newer than local state and differs from it
    Stale { local: u64, remote: u64 },
    /// Carried checksum does not match the carried payload
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl RejectReason {
    pub fn into_error(self, membrane_id: MembraneId) -> SyncError {
        match self {
            RejectReason::Stale { local, remote } => SyncError::StaleVersion {
                membrane_id,
                local,
                remote,
            },
            RejectReason::ChecksumMismatch { expected, actual } => SyncError::ChecksumMismatch {
                membrane_id,
                expected,
                actual,
            },
        }
    }
}

#[derive(Debug)]
struct Entry {
    membrane: TensorMembrane,
    /// Last version agreed with a peer; 0 if never synced
    synced_version: u64,
    /// Payload at `synced_version`
    base: Option<Vec<f32>>,
}

impl Entry {
    fn has_local_changes(&self) -> bool {
        self.membrane.version() > self.synced_version
    }

    fn mark_synced(&mut self) {
        self.synced_version = self.membrane.version();
        self.base = Some(self.membrane.data().to_vec());
    }

    fn matches(&self, candidate: &MembraneCandidate) -> bool {
        self.membrane.version() == candidate.version
            && self.membrane.checksum() == candidate.checksum
            && self.membrane.shape() == &candidate.shape
    }

    /// Merge `candidate` into local state and move past both versions
    fn merge_with(&mut self, local_agent: AgentId, candidate: &MembraneCandidate) -> u64 {
        let (shape, data) = merge_membranes(
            self.base.as_deref(),
            MergeSide {
                shape: self.membrane.shape(),
                data: self.membrane.data(),
                version: self.membrane.version(),
                agent: local_agent,
            },
            MergeSide {
                shape: &candidate.shape,
                data: &candidate.data,
                version: candidate.version,
                agent: candidate.origin,
            },
        );
        let version = self.membrane.version().max(candidate.version) + 1;
        self.membrane.replace(shape, data, version);
        self.synced_version = candidate.version;
        self.base = Some(candidate.data.clone());
        version
    }
}

/// Owner of every membrane held by one agent
#[derive(Debug)]
pub struct MembraneStore {
    local_agent: AgentId,
    entries: RwLock<BTreeMap<MembraneId, Entry>>,
}

impl MembraneStore {
    pub fn new(local_agent: AgentId) -> Self {
        Self {
            local_agent,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn local_agent(&self) -> AgentId {
        self.local_agent
    }

    /// Create a zero-filled membrane at version 1
    pub fn create(&self, id: MembraneId, shape: PrimeShape) -> Result<u64, SyncError> {
        let data = vec![0.0; shape.element_count()];
        self.create_with_data(id, shape, data)
    }

    /// Create a membrane with an initial payload at version 1
    pub fn create_with_data(
        &self,
        id: MembraneId,
        shape: PrimeShape,
        data: Vec<f32>,
    ) -> Result<u64, SyncError> {
        let membrane = TensorMembrane::new(id, shape, data, 1)?;
        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            return Err(SyncError::AlreadyExists(id));
        }
        debug!(membrane = id, shape = %membrane.shape(), "Membrane created");
        entries.insert(
            id,
            Entry {
                membrane,
                synced_version: 0,
                base: None,
            },
        );
        Ok(1)
    }

    pub fn get(&self, id: MembraneId) -> Result<TensorMembrane, SyncError> {
        self.entries
            .read()
            .get(&id)
            .map(|entry| entry.membrane.clone())
            .ok_or(SyncError::NotFound(id))
    }

    pub fn contains(&self, id: MembraneId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Summaries of every membrane, ordered by id
    pub fn list(&self) -> Vec<MembraneSummary> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.membrane.summary())
            .collect()
    }

    pub fn ids(&self) -> Vec<MembraneId> {
        self.entries.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn destroy(&self, id: MembraneId) -> Result<TensorMembrane, SyncError> {
        let entry = self
            .entries
            .write()
            .remove(&id)
            .ok_or(SyncError::NotFound(id))?;
        debug!(membrane = id, version = entry.membrane.version(), "Membrane destroyed");
        Ok(entry.membrane)
    }

    /// Edit the payload in place; returns the new version
    ///
    /// The closure runs under the store's write lock and must not call back
    /// into the store.
    pub fn mutate_local<F>(&self, id: MembraneId, f: F) -> Result<u64, SyncError>
    where
        F: FnOnce(&mut [f32]),
    {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&id).ok_or(SyncError::NotFound(id))?;
        f(entry.membrane.data_mut().as_mut_slice());
        let version = entry.membrane.commit();
        trace!(membrane = id, version, "Local mutation");
        Ok(version)
    }

    pub fn set(&self, id: MembraneId, index: usize, value: f32) -> Result<u64, SyncError> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&id).ok_or(SyncError::NotFound(id))?;
        let data = entry.membrane.data_mut();
        let len = data.len();
        let cell = data
            .get_mut(index)
            .ok_or(SyncError::IndexOutOfBounds { index, len })?;
        *cell = value;
        Ok(entry.membrane.commit())
    }

    pub fn fill(&self, id: MembraneId, value: f32) -> Result<u64, SyncError> {
        self.mutate_local(id, |data| data.fill(value))
    }

    /// Change the shape; the element count must stay the same
    pub fn reshape(&self, id: MembraneId, shape: PrimeShape) -> Result<u64, SyncError> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&id).ok_or(SyncError::NotFound(id))?;
        let current = entry.membrane.shape().element_count();
        if shape.element_count() != current {
            return Err(SyncError::LengthMismatch {
                expected: current,
                actual: shape.element_count(),
            });
        }
        entry.membrane.set_shape(shape);
        Ok(entry.membrane.commit())
    }

    /// Whether the membrane has edits no peer has acknowledged
    pub fn has_local_changes(&self, id: MembraneId) -> Result<bool, SyncError> {
        self.entries
            .read()
            .get(&id)
            .map(Entry::has_local_changes)
            .ok_or(SyncError::NotFound(id))
    }

    /// Current state as an outgoing sync candidate
    pub fn candidate(&self, id: MembraneId) -> Result<MembraneCandidate, SyncError> {
        let entries = self.entries.read();
        let entry = entries.get(&id).ok_or(SyncError::NotFound(id))?;
        Ok(MembraneCandidate {
            membrane_id: id,
            version: entry.membrane.version(),
            derived_from: entry.synced_version,
            checksum: entry.membrane.checksum(),
            shape: entry.membrane.shape().clone(),
            data: entry.membrane.data().to_vec(),
            origin: self.local_agent,
        })
    }

    /// Apply a candidate received from a peer
    ///
    /// All-or-nothing: either local state is untouched or it moves to a new
    /// valid `(version, checksum, payload)` in one step.
    ///
    /// # Errors
    ///
    /// [`SyncError::LengthMismatch`] if the payload does not fit the shape.
    pub fn apply_remote(&self, candidate: &MembraneCandidate) -> Result<ApplyOutcome, SyncError> {
        let id = candidate.membrane_id;
        if candidate.data.len() != candidate.shape.element_count() {
            return Err(SyncError::LengthMismatch {
                expected: candidate.shape.element_count(),
                actual: candidate.data.len(),
            });
        }

        let actual = checksum(&candidate.data);
        if actual != candidate.checksum {
            return Ok(ApplyOutcome::Rejected(RejectReason::ChecksumMismatch {
                expected: candidate.checksum,
                actual,
            }));
        }

        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&id) else {
            let membrane = TensorMembrane::new(
                id,
                candidate.shape.clone(),
                candidate.data.clone(),
                candidate.version,
            )?;
            let mut entry = Entry {
                membrane,
                synced_version: 0,
                base: None,
            };
            entry.mark_synced();
            entries.insert(id, entry);
            debug!(membrane = id, version = candidate.version, from = %candidate.origin, "Membrane replicated");
            return Ok(ApplyOutcome::Accepted {
                version: candidate.version,
            });
        };

        let local = entry.membrane.version();

        if entry.matches(candidate) {
            if entry.has_local_changes() {
                entry.mark_synced();
            }
            return Ok(ApplyOutcome::Duplicate);
        }

        if candidate.version <= local {
            return Ok(ApplyOutcome::Rejected(RejectReason::Stale {
                local,
                remote: candidate.version,
            }));
        }

        if !entry.has_local_changes() || local <= candidate.derived_from {
            entry.membrane.replace(
                candidate.shape.clone(),
                candidate.data.clone(),
                candidate.version,
            );
            entry.mark_synced();
            debug!(membrane = id, from = local, to = candidate.version, "Fast-forward");
            return Ok(ApplyOutcome::Accepted {
                version: candidate.version,
            });
        }

        let version = entry.merge_with(self.local_agent, candidate);
        debug!(
            membrane = id,
            local,
            remote = candidate.version,
            merged = version,
            "Merged concurrent edits"
        );
        Ok(ApplyOutcome::Merged { version })
    }

    /// Resolve a same-version divergence by merging `candidate` in
    ///
    /// Only one side of a divergent pair should absorb; the result has a
    /// version above both and fast-forwards the other side.
    pub fn absorb(&self, candidate: &MembraneCandidate) -> Result<u64, SyncError> {
        let id = candidate.membrane_id;
        if candidate.data.len() != candidate.shape.element_count() {
            return Err(SyncError::LengthMismatch {
                expected: candidate.shape.element_count(),
                actual: candidate.data.len(),
            });
        }
        let actual = checksum(&candidate.data);
        if actual != candidate.checksum {
            return Err(SyncError::ChecksumMismatch {
                membrane_id: id,
                expected: candidate.checksum,
                actual,
            });
        }

        let mut entries = self.entries.write();
        let entry = entries.get_mut(&id).ok_or(SyncError::NotFound(id))?;
        let version = entry.merge_with(self.local_agent, candidate);
        debug!(membrane = id, remote = candidate.version, merged = version, "Absorbed divergent state");
        Ok(version)
    }
}
