//! Truth values attached to inference results
//!
//! Produced by the external inference collaborator. The core stores and
//! forwards them without interpreting strength or confidence.

use serde::{Deserialize, Serialize};

/// Strength/confidence pair
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TruthValue {
    pub strength: f32,
    pub confidence: f32,
}

impl TruthValue {
    pub fn new(strength: f32, confidence: f32) -> Self {
        Self {
            strength,
            confidence,
        }
    }
}
