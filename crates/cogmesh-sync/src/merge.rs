//! Deterministic three-way merge of membrane payloads
//!
//! Each cell keeps whichever side moved further from the common base.
//! When both moved equally but disagree, the side from the higher agent id
//! wins. The rule only looks at the two values and their agent ids, so
//! swapping the sides gives the same result on every agent.

use std::cmp::Ordering;

use cogmesh_core::AgentId;

use crate::shape::PrimeShape;

/// One side of a merge
#[derive(Debug, Clone, Copy)]
pub struct MergeSide<'a> {
    pub shape: &'a PrimeShape,
    pub data: &'a [f32],
    pub version: u64,
    pub agent: AgentId,
}

/// Merge two equal-length payloads cell by cell against `base`
///
/// A `base` of the wrong length is treated as all zeros.
pub fn merge_cells(
    base: &[f32],
    local: &[f32],
    local_agent: AgentId,
    remote: &[f32],
    remote_agent: AgentId,
) -> Vec<f32> {
    debug_assert_eq!(local.len(), remote.len());
    let use_base = base.len() == local.len();

    local
        .iter()
        .zip(remote)
        .enumerate()
        .map(|(i, (&l, &r))| {
            let b = if use_base { base[i] } else { 0.0 };
            pick_cell(b, l, local_agent, r, remote_agent)
        })
        .collect()
}

fn pick_cell(base: f32, local: f32, local_agent: AgentId, remote: f32, remote_agent: AgentId) -> f32 {
    let local_change = (local - base).abs();
    let remote_change = (remote - base).abs();
    match local_change.total_cmp(&remote_change) {
        Ordering::Greater => local,
        Ordering::Less => remote,
        Ordering::Equal if local.total_cmp(&remote) == Ordering::Equal => local,
        Ordering::Equal => {
            if local_agent > remote_agent {
                local
            } else {
                remote
            }
        }
    }
}

/// Merge two membrane states into a new shape and payload
///
/// Different shapes cannot be merged cell by cell; the side with the higher
/// `(version, agent id)` is taken whole.
pub fn merge_membranes(base: Option<&[f32]>, local: MergeSide<'_>, remote: MergeSide<'_>) -> (PrimeShape, Vec<f32>) {
    if local.shape != remote.shape {
        let winner = if (local.version, local.agent) > (remote.version, remote.agent) {
            local
        } else {
            remote
        };
        return (winner.shape.clone(), winner.data.to_vec());
    }

    let merged = merge_cells(
        base.unwrap_or(&[]),
        local.data,
        local.agent,
        remote.data,
        remote.agent,
    );
    (local.shape.clone(), merged)
}
