//! Retrieval strategies: common candidate shape plus the semantic and
//! lexical executors
//!
//! All four strategies produce [`CandidateList`]s: dense ranks from 1,
//! scores monotonically non-increasing, one list per requested
//! fact-type partition. Strategy failures degrade to an empty report
//! with the error recorded; the orchestrator only fails the request
//! when every strategy errors.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{K_LEXICAL, K_SEMANTIC, TAU_SEMANTIC};
use crate::errors::EngineError;

use super::graph_retrieval::NodeVisit;
use super::query_parser::QueryPlan;
use super::storage::{with_store_deadline, FactStore, VectorFilters};
use super::types::{BankId, Clock, FactId, FactType};

/// The four retrieval strategies, in canonical trace order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Semantic,
    Lexical,
    Graph,
    TemporalGraph,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Semantic,
        StrategyKind::Lexical,
        StrategyKind::Graph,
        StrategyKind::TemporalGraph,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Semantic => "semantic",
            StrategyKind::Lexical => "lexical",
            StrategyKind::Graph => "graph",
            StrategyKind::TemporalGraph => "temporal_graph",
        }
    }
}

/// One scored candidate within a strategy list.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub fact_id: FactId,
    pub score: f32,
    /// Dense rank starting at 1.
    pub rank: usize,
}

/// Ranked output of one strategy over one fact-type partition.
#[derive(Debug, Clone)]
pub struct CandidateList {
    pub strategy: StrategyKind,
    pub fact_type: FactType,
    pub items: Vec<Candidate>,
}

impl CandidateList {
    /// Build a list from (fact_id, score) pairs already sorted by
    /// score descending; ranks are assigned densely from 1.
    pub fn from_scored(
        strategy: StrategyKind,
        fact_type: FactType,
        scored: Vec<(FactId, f32)>,
    ) -> Self {
        let items = scored
            .into_iter()
            .enumerate()
            .map(|(idx, (fact_id, score))| Candidate {
                fact_id,
                score,
                rank: idx + 1,
            })
            .collect();
        Self {
            strategy,
            fact_type,
            items,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Everything one strategy task hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct StrategyReport {
    pub kind: StrategyKind,
    pub lists: Vec<CandidateList>,
    /// Activation-walk visits; empty for non-graph strategies.
    pub visits: Vec<NodeVisit>,
    pub entry_points: usize,
    pub nodes_visited: usize,
    pub duration_seconds: f64,
    /// Recorded failure, if the strategy degraded to an empty result.
    pub error: Option<String>,
}

impl StrategyReport {
    pub fn empty(kind: StrategyKind) -> Self {
        Self {
            kind,
            lists: Vec::new(),
            visits: Vec::new(),
            entry_points: 0,
            nodes_visited: 0,
            duration_seconds: 0.0,
            error: None,
        }
    }

    pub fn candidate_count(&self) -> usize {
        self.lists.iter().map(|l| l.items.len()).sum()
    }
}

/// Remaining slack before the request deadline, bounded by the per-call
/// store deadline.
pub(crate) fn store_slack(deadline: Instant, store_deadline: Duration) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .min(store_deadline)
}

/// Semantic strategy: direct vector search per fact-type partition, no
/// time filter.
pub async fn run_semantic(
    store: Arc<dyn FactStore>,
    clock: Arc<dyn Clock>,
    store_deadline: Duration,
    deadline: Instant,
    bank: BankId,
    plan: Arc<QueryPlan>,
) -> StrategyReport {
    let started = clock.now();
    let mut report = StrategyReport::empty(StrategyKind::Semantic);

    let filters = VectorFilters {
        occurred_range: None,
        min_similarity: Some(TAU_SEMANTIC),
        fallback_to_mentioned: plan.temporal_fallback,
    };

    for fact_type in &plan.fact_types {
        let slack = store_slack(deadline, store_deadline);
        if slack.is_zero() {
            // Deadline hit: return whatever partial lists we have
            break;
        }

        let result = with_store_deadline(
            slack,
            "vector_topk",
            &bank,
            store.vector_topk(&bank, &[*fact_type], &plan.query_vec, K_SEMANTIC, &filters),
        )
        .await;

        match result {
            Ok(scored) => {
                if !scored.is_empty() {
                    report.lists.push(CandidateList::from_scored(
                        StrategyKind::Semantic,
                        *fact_type,
                        scored,
                    ));
                }
            }
            Err(err) => {
                record_strategy_error(&mut report, err);
                break;
            }
        }
    }

    report.duration_seconds = elapsed_seconds(started, clock.now());
    report
}

/// Lexical strategy: BM25 over the inverted index per fact-type
/// partition.
pub async fn run_lexical(
    store: Arc<dyn FactStore>,
    clock: Arc<dyn Clock>,
    store_deadline: Duration,
    deadline: Instant,
    bank: BankId,
    plan: Arc<QueryPlan>,
) -> StrategyReport {
    let started = clock.now();
    let mut report = StrategyReport::empty(StrategyKind::Lexical);

    for fact_type in &plan.fact_types {
        let slack = store_slack(deadline, store_deadline);
        if slack.is_zero() {
            break;
        }

        let result = with_store_deadline(
            slack,
            "bm25_topk",
            &bank,
            store.bm25_topk(&bank, &[*fact_type], &plan.query_text, K_LEXICAL),
        )
        .await;

        match result {
            Ok(scored) => {
                if !scored.is_empty() {
                    report.lists.push(CandidateList::from_scored(
                        StrategyKind::Lexical,
                        *fact_type,
                        scored,
                    ));
                }
            }
            Err(err) => {
                record_strategy_error(&mut report, err);
                break;
            }
        }
    }

    report.duration_seconds = elapsed_seconds(started, clock.now());
    report
}

/// An errored strategy contributes an empty candidate list; partial
/// results survive only plain deadline expiry, never a store failure.
pub(crate) fn record_strategy_error(report: &mut StrategyReport, err: EngineError) {
    tracing::warn!(
        strategy = report.kind.as_str(),
        code = err.code(),
        "Strategy degraded to empty result: {}",
        err
    );
    crate::metrics::STRATEGY_ERRORS
        .with_label_values(&[report.kind.as_str()])
        .inc();
    report.lists.clear();
    report.error = Some(format!("{}: {}", err.code(), err));
}

pub(crate) fn elapsed_seconds(
    started: chrono::DateTime<chrono::Utc>,
    ended: chrono::DateTime<chrono::Utc>,
) -> f64 {
    (ended - started).num_microseconds().unwrap_or(0).max(0) as f64 / 1_000_000.0
}
