//! Attention-economy records
//!
//! [`ECANValues`] is the per-pattern importance record; [`AttentionState`] is
//! the process-wide aggregate exchanged in attention-sync messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Importance scores for one pattern
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ECANValues {
    /// Short-term importance
    pub sti: f32,
    /// Long-term importance
    pub lti: f32,
    /// Very-long-term importance
    pub vlti: f32,
    /// Current stimulation level
    pub stimulation: f32,
}

impl ECANValues {
    pub fn new(sti: f32, lti: f32, vlti: f32, stimulation: f32) -> Self {
        Self {
            sti,
            lti,
            vlti,
            stimulation,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.sti.is_finite()
            && self.lti.is_finite()
            && self.vlti.is_finite()
            && self.stimulation.is_finite()
    }

    /// Field-wise maximum. Commutative, associative, and idempotent.
    pub fn join(&mut self, other: &ECANValues) {
        self.sti = self.sti.max(other.sti);
        self.lti = self.lti.max(other.lti);
        self.vlti = self.vlti.max(other.vlti);
        self.stimulation = self.stimulation.max(other.stimulation);
    }
}

/// Aggregated attention state of one agent
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttentionState {
    /// Sum of short-term importance over all patterns
    pub total_attention: f32,
    /// Patterns whose short-term importance is above the active threshold
    pub active_patterns: u32,
    /// Seconds since the UNIX epoch of the last update
    pub timestamp: u32,
    /// Per-pattern values, ordered by key
    pub patterns: BTreeMap<String, ECANValues>,
}

impl AttentionState {
    pub fn get(&self, pattern: &str) -> Option<&ECANValues> {
        self.patterns.get(pattern)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_fieldwise_max() {
        let mut a = ECANValues::new(1.0, 5.0, 0.0, 2.0);
        let b = ECANValues::new(3.0, 1.0, 0.5, 2.0);
        a.join(&b);
        assert_eq!(a, ECANValues::new(3.0, 5.0, 0.5, 2.0));

        // Idempotent
        let before = a;
        a.join(&before);
        assert_eq!(a, before);
    }
}
