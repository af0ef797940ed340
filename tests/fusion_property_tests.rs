//! Property-based tests for the pure ranking stages
//!
//! Rank fusion and token-budgeted assembly are deterministic functions
//! of their inputs, so they get the property treatment: coverage,
//! monotonicity, cap and budget respect over arbitrary candidate
//! lists.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use engram_memory::constants::{K_FUSE, RRF_K};
use engram_memory::memory::fusion::reciprocal_rank_fusion;
use engram_memory::memory::rerank::{
    assemble_within_budget, RerankedCandidate, ScoreComponents,
};
use engram_memory::memory::retrieval::{CandidateList, StrategyKind};
use engram_memory::memory::{BankId, Fact, FactId, FactType};

fn fact_id(n: u8) -> FactId {
    FactId(Uuid::from_u128(n as u128 + 1))
}

fn candidate_list(strategy: StrategyKind, ids: Vec<u8>) -> CandidateList {
    let mut seen = Vec::new();
    for id in ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    let scored: Vec<(FactId, f32)> = seen
        .into_iter()
        .enumerate()
        .map(|(idx, id)| (fact_id(id), 1.0 - idx as f32 * 0.01))
        .collect();
    CandidateList::from_scored(strategy, FactType::World, scored)
}

fn lists_strategy() -> impl Strategy<Value = Vec<CandidateList>> {
    let ids = prop::collection::vec(any::<u8>(), 0..40);
    prop::collection::vec(ids, 1..5).prop_map(|lists| {
        lists
            .into_iter()
            .enumerate()
            .map(|(idx, ids)| {
                let strategy = StrategyKind::ALL[idx % StrategyKind::ALL.len()];
                candidate_list(strategy, ids)
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn fused_facts_always_cite_a_source(lists in lists_strategy()) {
        let fused = reciprocal_rank_fusion(&lists, RRF_K, K_FUSE);
        for candidate in &fused {
            prop_assert!(!candidate.source_ranks.is_empty());
            prop_assert_eq!(
                candidate.min_rank,
                *candidate.source_ranks.values().min().unwrap()
            );
        }
    }

    #[test]
    fn fused_scores_are_non_increasing(lists in lists_strategy()) {
        let fused = reciprocal_rank_fusion(&lists, RRF_K, K_FUSE);
        for window in fused.windows(2) {
            prop_assert!(window[0].rrf_score >= window[1].rrf_score);
        }
    }

    #[test]
    fn fusion_respects_the_cap(lists in lists_strategy(), cap in 1usize..30) {
        let fused = reciprocal_rank_fusion(&lists, RRF_K, cap);
        prop_assert!(fused.len() <= cap);
    }

    #[test]
    fn rrf_score_matches_the_formula(lists in lists_strategy()) {
        let fused = reciprocal_rank_fusion(&lists, RRF_K, usize::MAX);
        for candidate in &fused {
            let expected: f32 = lists
                .iter()
                .filter_map(|list| {
                    list.items
                        .iter()
                        .find(|c| c.fact_id == candidate.fact_id)
                        .map(|c| 1.0 / (RRF_K + c.rank as f32))
                })
                .sum();
            prop_assert!((candidate.rrf_score - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn fusion_is_order_independent(lists in lists_strategy()) {
        let forward = reciprocal_rank_fusion(&lists, RRF_K, K_FUSE);
        let mut reversed_input = lists.clone();
        reversed_input.reverse();
        let reversed = reciprocal_rank_fusion(&reversed_input, RRF_K, K_FUSE);

        let forward_ids: Vec<FactId> = forward.iter().map(|c| c.fact_id).collect();
        let reversed_ids: Vec<FactId> = reversed.iter().map(|c| c.fact_id).collect();
        prop_assert_eq!(forward_ids, reversed_ids);
    }
}

fn reranked(text_lens: &[usize]) -> Vec<RerankedCandidate> {
    text_lens
        .iter()
        .enumerate()
        .map(|(idx, len)| RerankedCandidate {
            fact: Arc::new(Fact {
                id: FactId(Uuid::from_u128(idx as u128 + 1)),
                bank_id: BankId::from("prop"),
                fact_type: FactType::World,
                text: "x".repeat(*len),
                context: None,
                embedding: vec![0.0],
                occurred_start: None,
                occurred_end: None,
                mentioned_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
                document_id: None,
                chunk_id: None,
                entity_refs: Vec::new(),
                confidence: None,
                tags: BTreeMap::new(),
                metadata: BTreeMap::new(),
            }),
            rrf_rank: idx + 1,
            rerank_rank: idx + 1,
            rrf_score: 1.0 / (idx + 1) as f32,
            source_ranks: BTreeMap::new(),
            final_score: 1.0 - idx as f32 * 0.001,
            components: ScoreComponents {
                cross_encoder: None,
                rrf_norm: 0.0,
                recency: 0.0,
                frequency: 0.0,
            },
        })
        .collect()
}

proptest! {
    #[test]
    fn assembly_respects_the_token_budget(
        lens in prop::collection::vec(1usize..400, 1..30),
        max_tokens in 1usize..200,
        top_k in 1usize..20,
    ) {
        let candidates = reranked(&lens);
        let assembled = assemble_within_budget(&candidates, max_tokens, top_k);

        prop_assert!(assembled.len() <= top_k);

        let total: usize = assembled.iter().map(|c| c.fact.token_cost()).sum();
        if assembled.len() > 1 {
            prop_assert!(total <= max_tokens);
        }
        // At least one fact whenever candidates exist
        prop_assert!(!assembled.is_empty());
    }

    #[test]
    fn assembly_returns_a_prefix(
        lens in prop::collection::vec(1usize..400, 1..30),
        max_tokens in 1usize..200,
    ) {
        let candidates = reranked(&lens);
        let assembled = assemble_within_budget(&candidates, max_tokens, 30);

        for (idx, candidate) in assembled.iter().enumerate() {
            prop_assert_eq!(candidate.fact.id, candidates[idx].fact.id);
        }
    }
}
