//! Reciprocal Rank Fusion across strategies and fact-type partitions
//!
//! rrf(f) = Σ_s 1/(k + rank_s(f)) over every contributing list. A fact
//! has exactly one type, so the per-strategy rank keys in
//! `source_ranks` stay unambiguous even when strategies ran per type.

use std::collections::{BTreeMap, HashMap};

use ordered_float::OrderedFloat;

use super::retrieval::CandidateList;
use super::types::FactId;

/// One fused candidate carrying its provenance.
#[derive(Debug, Clone)]
pub struct FusedCandidate {
    pub fact_id: FactId,
    pub rrf_score: f32,
    /// Strategy name → rank within that strategy's list.
    pub source_ranks: BTreeMap<String, usize>,
    /// Lowest rank among contributing strategies; first tie-break key.
    pub min_rank: usize,
}

/// Fuse ranked lists into a single ranking capped at `cap`.
///
/// Facts missing from a list contribute nothing for it. Ordering:
/// rrf score descending, then lowest minimum contributing rank, then
/// fact id.
pub fn reciprocal_rank_fusion(
    lists: &[CandidateList],
    k_rrf: f32,
    cap: usize,
) -> Vec<FusedCandidate> {
    let mut fused: HashMap<FactId, FusedCandidate> = HashMap::new();

    for list in lists {
        for candidate in &list.items {
            let entry = fused
                .entry(candidate.fact_id)
                .or_insert_with(|| FusedCandidate {
                    fact_id: candidate.fact_id,
                    rrf_score: 0.0,
                    source_ranks: BTreeMap::new(),
                    min_rank: usize::MAX,
                });

            entry.rrf_score += 1.0 / (k_rrf + candidate.rank as f32);
            entry.min_rank = entry.min_rank.min(candidate.rank);
            entry
                .source_ranks
                .insert(list.strategy.as_str().to_string(), candidate.rank);
        }
    }

    let mut merged: Vec<FusedCandidate> = fused.into_values().collect();
    merged.sort_by(|a, b| {
        OrderedFloat(b.rrf_score)
            .cmp(&OrderedFloat(a.rrf_score))
            .then_with(|| a.min_rank.cmp(&b.min_rank))
            .then_with(|| a.fact_id.cmp(&b.fact_id))
    });
    merged.truncate(cap);
    merged
}
