//! Structured trace of a recall execution
//!
//! The trace records every ranking decision: per-strategy results (and
//! failures), the fused ranking with provenance, the reranked list
//! with score components, activation-walk visits, and a summary.
//! Given a store snapshot, a plan, a seed, and a clock, the trace is
//! deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph_retrieval::NodeVisit;
use super::rerank::{RerankedCandidate, ScoreComponents};
use super::retrieval::StrategyReport;
use super::types::FactId;

/// Query block of the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceQuery {
    pub query_text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_range: Option<(DateTime<Utc>, DateTime<Utc>)>,

    pub embedding_present: bool,
}

/// One result row inside a strategy's trace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceResult {
    pub rank: usize,
    pub fact_id: FactId,
    pub text: String,
    pub score: f32,
}

/// Per-strategy trace entry; present for every strategy whether or not
/// it produced results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyTraceEntry {
    pub method_name: String,
    pub duration_seconds: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub results: Vec<TraceResult>,
}

/// One row of the fused ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrfTraceEntry {
    pub final_rrf_rank: usize,
    pub fact_id: FactId,
    pub text: String,
    pub rrf_score: f32,
    pub source_ranks: BTreeMap<String, usize>,
}

/// One row of the reranked list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankTraceEntry {
    pub rerank_rank: usize,
    pub rrf_rank: usize,
    /// rrf_rank - rerank_rank: positive means the fact moved up.
    pub rank_change: i64,
    pub fact_id: FactId,
    pub text: String,
    pub rerank_score: f32,
    pub score_components: ScoreComponents,
}

/// Walk statistics and request totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub total_nodes_visited: usize,
    pub entry_points_found: usize,
    pub budget_used: usize,
    pub budget_remaining: usize,
    pub results_returned: usize,
    pub total_duration_seconds: f64,
}

/// Full structured record of a recall execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub query: TraceQuery,
    pub retrieval_results: Vec<StrategyTraceEntry>,
    pub rrf_merged: Vec<RrfTraceEntry>,
    pub reranked: Vec<RerankTraceEntry>,
    pub visits: Vec<NodeVisit>,
    pub summary: TraceSummary,
}

/// Build a strategy's trace entry from its report, hydrating result
/// text from the fact cache where available.
pub fn strategy_entry(
    report: &StrategyReport,
    text_of: impl Fn(&FactId) -> Option<String>,
) -> StrategyTraceEntry {
    // Flatten per-type lists in list order; ranks stay per-list dense.
    let results = report
        .lists
        .iter()
        .flat_map(|list| {
            list.items.iter().map(|candidate| TraceResult {
                rank: candidate.rank,
                fact_id: candidate.fact_id,
                text: text_of(&candidate.fact_id).unwrap_or_default(),
                score: candidate.score,
            })
        })
        .collect();

    StrategyTraceEntry {
        method_name: report.kind.as_str().to_string(),
        duration_seconds: report.duration_seconds,
        error: report.error.clone(),
        results,
    }
}

/// Build the reranked trace section.
pub fn rerank_entries(reranked: &[RerankedCandidate]) -> Vec<RerankTraceEntry> {
    reranked
        .iter()
        .map(|candidate| RerankTraceEntry {
            rerank_rank: candidate.rerank_rank,
            rrf_rank: candidate.rrf_rank,
            rank_change: candidate.rrf_rank as i64 - candidate.rerank_rank as i64,
            fact_id: candidate.fact.id,
            text: candidate.fact.text.clone(),
            rerank_score: candidate.final_score,
            score_components: candidate.components.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::retrieval::{CandidateList, StrategyKind};
    use crate::memory::types::FactType;
    use uuid::Uuid;

    #[test]
    fn test_strategy_entry_flattens_lists() {
        let id1 = FactId(Uuid::from_u128(1));
        let id2 = FactId(Uuid::from_u128(2));

        let mut report = StrategyReport::empty(StrategyKind::Semantic);
        report.lists.push(CandidateList::from_scored(
            StrategyKind::Semantic,
            FactType::World,
            vec![(id1, 0.9)],
        ));
        report.lists.push(CandidateList::from_scored(
            StrategyKind::Semantic,
            FactType::Bank,
            vec![(id2, 0.8)],
        ));

        let entry = strategy_entry(&report, |id| Some(format!("text-{id}")));
        assert_eq!(entry.method_name, "semantic");
        assert_eq!(entry.results.len(), 2);
        assert_eq!(entry.results[0].fact_id, id1);
        assert!(entry.results[0].text.starts_with("text-"));
    }

    #[test]
    fn test_trace_serializes_deterministically() {
        let trace = Trace {
            query: TraceQuery {
                query_text: "q".to_string(),
                temporal_range: None,
                embedding_present: true,
            },
            retrieval_results: Vec::new(),
            rrf_merged: Vec::new(),
            reranked: Vec::new(),
            visits: Vec::new(),
            summary: TraceSummary {
                total_nodes_visited: 0,
                entry_points_found: 0,
                budget_used: 0,
                budget_remaining: 300,
                results_returned: 0,
                total_duration_seconds: 0.0,
            },
        };

        let a = serde_json::to_string(&trace).unwrap();
        let b = serde_json::to_string(&trace).unwrap();
        assert_eq!(a, b);
    }
}
