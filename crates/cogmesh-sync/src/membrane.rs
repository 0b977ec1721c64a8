//! Tensor membranes and sync candidates

use serde::{Deserialize, Serialize};

use cogmesh_core::{AgentId, SyncError};
use cogmesh_transport::MembraneSyncPayload;

use crate::shape::PrimeShape;

pub type MembraneId = u32;

/// Integrity checksum of a membrane payload
///
/// First four bytes (big-endian) of the BLAKE3 hash over the big-endian
/// encoding of every value.
pub fn checksum(data: &[f32]) -> u32 {
    let mut hasher = blake3::Hasher::new();
    for value in data {
        hasher.update(&value.to_be_bytes());
    }
    let hash = hasher.finalize();
    let bytes = hash.as_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// A replicated, versioned tensor
///
/// Only the membrane store constructs and mutates membranes, always
/// updating data, version, and checksum together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorMembrane {
    id: MembraneId,
    shape: PrimeShape,
    data: Vec<f32>,
    version: u64,
    checksum: u32,
}

impl TensorMembrane {
    pub(crate) fn new(
        id: MembraneId,
        shape: PrimeShape,
        data: Vec<f32>,
        version: u64,
    ) -> Result<Self, SyncError> {
        check_length(&shape, &data)?;
        let checksum = checksum(&data);
        Ok(Self {
            id,
            shape,
            data,
            version,
            checksum,
        })
    }

    /// Replace shape and payload and move to `version`
    pub(crate) fn replace(&mut self, shape: PrimeShape, data: Vec<f32>, version: u64) {
        self.shape = shape;
        self.data = data;
        self.version = version;
        self.checksum = checksum(&self.data);
    }

    pub(crate) fn data_mut(&mut self) -> &mut Vec<f32> {
        &mut self.data
    }

    /// Bump the version after the payload was changed in place
    pub(crate) fn commit(&mut self) -> u64 {
        self.version += 1;
        self.checksum = checksum(&self.data);
        self.version
    }

    pub(crate) fn set_shape(&mut self, shape: PrimeShape) {
        self.shape = shape;
    }

    pub fn id(&self) -> MembraneId {
        self.id
    }

    pub fn shape(&self) -> &PrimeShape {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Recompute the checksum and compare it to the stored one
    pub fn verify(&self) -> bool {
        checksum(&self.data) == self.checksum
    }

    pub fn summary(&self) -> MembraneSummary {
        MembraneSummary {
            id: self.id,
            shape: self.shape.clone(),
            version: self.version,
            checksum: self.checksum,
        }
    }
}

/// Listing entry for a membrane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembraneSummary {
    pub id: MembraneId,
    pub shape: PrimeShape,
    pub version: u64,
    pub checksum: u32,
}

/// Membrane state offered by one agent to another
#[derive(Debug, Clone, PartialEq)]
pub struct MembraneCandidate {
    pub membrane_id: MembraneId,
    pub version: u64,
    /// Last version the sender agreed with a peer before editing
    pub derived_from: u64,
    pub checksum: u32,
    pub shape: PrimeShape,
    pub data: Vec<f32>,
    /// Agent that produced the candidate, used for tie-breaks
    pub origin: AgentId,
}

impl MembraneCandidate {
    /// Validate a decoded payload
    ///
    /// The checksum is not checked here; the store reports a mismatch as a
    /// rejection so it can be logged distinctly.
    pub fn from_payload(payload: MembraneSyncPayload, origin: AgentId) -> Result<Self, SyncError> {
        let shape = PrimeShape::new(payload.factors)?;
        check_length(&shape, &payload.data)?;
        Ok(Self {
            membrane_id: payload.membrane_id,
            version: payload.version,
            derived_from: payload.derived_from,
            checksum: payload.checksum,
            shape,
            data: payload.data,
            origin,
        })
    }

    pub fn to_payload(&self) -> MembraneSyncPayload {
        MembraneSyncPayload {
            membrane_id: self.membrane_id,
            version: self.version,
            derived_from: self.derived_from,
            checksum: self.checksum,
            factors: self.shape.factors().to_vec(),
            data: self.data.clone(),
        }
    }

    /// Whether the carried checksum matches the carried data
    pub fn verify(&self) -> bool {
        checksum(&self.data) == self.checksum
    }
}

fn check_length(shape: &PrimeShape, data: &[f32]) -> Result<(), SyncError> {
    if data.len() != shape.element_count() {
        return Err(SyncError::LengthMismatch {
            expected: shape.element_count(),
            actual: data.len(),
        });
    }
    Ok(())
}
