//! Attention ledger
//!
//! Per-pattern ECAN importance values for one agent. Local stimulation and
//! decay change the ledger directly; remote snapshots are folded in with a
//! field-wise maximum so delivery order and duplicates never matter.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use cogmesh_core::{AttentionState, Clock, ECANValues};

/// Decay and promotion parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Exponential decay rate of short-term importance, per second
    pub decay_rate: f32,
    /// Short-term importance above this feeds long-term importance on decay
    pub promotion_threshold: f32,
    /// Fraction of the excess moved up one tier per decay
    pub promotion_rate: f32,
    /// Long-term importance above this feeds very-long-term importance
    pub long_term_threshold: f32,
    /// Patterns with short-term importance above this count as active
    pub active_threshold: f32,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.05,
            promotion_threshold: 10.0,
            promotion_rate: 0.1,
            long_term_threshold: 50.0,
            active_threshold: 0.5,
        }
    }
}

#[derive(Debug)]
struct LedgerState {
    patterns: BTreeMap<String, ECANValues>,
    /// Last change, local or merged
    timestamp: u32,
    /// Time the last decay was applied up to
    last_decay: u32,
}

/// Process-wide attention values
pub struct AttentionLedger {
    config: AttentionConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<LedgerState>,
}

impl AttentionLedger {
    pub fn new(config: AttentionConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_secs();
        Self {
            config,
            clock,
            state: RwLock::new(LedgerState {
                patterns: BTreeMap::new(),
                timestamp: 0,
                last_decay: now,
            }),
        }
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// Add `delta` to a pattern's short-term importance and stimulation
    ///
    /// Non-finite deltas are ignored.
    pub fn stimulate(&self, pattern: &str, delta: f32) {
        if !delta.is_finite() {
            trace!(pattern, delta, "Ignoring non-finite stimulation");
            return;
        }
        let now = self.clock.now_secs();
        let mut state = self.state.write();
        let values = state.patterns.entry(pattern.to_string()).or_default();
        values.sti += delta;
        values.stimulation += delta;
        state.timestamp = state.timestamp.max(now);
    }

    /// Apply promotion and exponential decay for the time since the last decay
    pub fn decay(&self, now: u32) {
        let mut state = self.state.write();
        let elapsed = now.saturating_sub(state.last_decay);
        if elapsed == 0 {
            return;
        }

        let factor = (-self.config.decay_rate * elapsed as f32).exp();
        let AttentionConfig {
            promotion_threshold,
            promotion_rate,
            long_term_threshold,
            ..
        } = self.config;

        for values in state.patterns.values_mut() {
            if values.sti > promotion_threshold {
                values.lti += (values.sti - promotion_threshold) * promotion_rate;
            }
            values.sti *= factor;
            values.stimulation *= factor;
            if values.lti > long_term_threshold {
                values.vlti += (values.lti - long_term_threshold) * promotion_rate;
            }
        }

        state.last_decay = now;
        state.timestamp = state.timestamp.max(now);
        trace!(elapsed, factor, patterns = state.patterns.len(), "Attention decayed");
    }

    /// Fold a remote snapshot in by per-field maximum
    pub fn merge_remote(&self, remote: &AttentionState) {
        let mut state = self.state.write();
        for (pattern, values) in &remote.patterns {
            if !values.is_finite() {
                debug!(pattern, ?values, "Ignoring non-finite remote attention");
                continue;
            }
            state
                .patterns
                .entry(pattern.clone())
                .and_modify(|local| local.join(values))
                .or_insert(*values);
        }
        state.timestamp = state.timestamp.max(remote.timestamp);
    }

    pub fn get(&self, pattern: &str) -> Option<ECANValues> {
        self.state.read().patterns.get(pattern).copied()
    }

    /// Current aggregate state
    pub fn snapshot(&self) -> AttentionState {
        let state = self.state.read();
        let total_attention = state.patterns.values().map(|v| v.sti).sum();
        let active_patterns = state
            .patterns
            .values()
            .filter(|v| v.sti > self.config.active_threshold)
            .count() as u32;
        AttentionState {
            total_attention,
            active_patterns,
            timestamp: state.timestamp,
            patterns: state.patterns.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().patterns.is_empty()
    }

    /// Drop every pattern and restart the decay clock
    pub fn reset(&self) {
        let now = self.clock.now_secs();
        let mut state = self.state.write();
        state.patterns.clear();
        state.timestamp = now;
        state.last_decay = now;
    }
}
