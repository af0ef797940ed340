//! Memory retrieval engine
//!
//! [`RecallEngine`] sequences a recall request: analyze the query,
//! fan out the four retrieval strategies as parallel tasks, fuse their
//! rankings, rerank under the token budget, and assemble the response
//! with an optional trace.
//!
//! ```text
//! Query ─→ [Analyze] ─→ [Semantic]  ┐
//!                       [Lexical]   ├─→ [RRF] ─→ [Cross-Encoder] ─→ Results
//!                       [Graph]     │             + token budget      + trace
//!                       [Temporal]  ┘
//! ```
//!
//! Strategy failures degrade to empty lists and are recorded in the
//! trace; the request itself fails only when every strategy errors or
//! the deadline expires with no candidates at all.

pub mod fusion;
pub mod graph_retrieval;
pub mod query_parser;
pub mod rerank;
pub mod retrieval;
pub mod storage;
pub mod trace;
pub mod types;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, info_span, Instrument};

use crate::config::EngineConfig;
use crate::constants::{ENTITY_OBSERVATION_TOKEN_CAP, K_FUSE, RRF_K};
use crate::embeddings::{CachedEmbedder, Embedder};
use crate::errors::{EngineError, Result};
use crate::metrics;

use fusion::reciprocal_rank_fusion;
use graph_retrieval::run_activation_walk;
use query_parser::QueryPlan;
use rerank::{assemble_within_budget, rerank};
use retrieval::{
    elapsed_seconds, run_lexical, run_semantic, CandidateList, StrategyKind, StrategyReport,
};
use storage::with_store_deadline;
use trace::{rerank_entries, strategy_entry, RrfTraceEntry, TraceQuery, TraceSummary};
use types::derive_seed;

pub use fusion::FusedCandidate;
pub use rerank::{CrossEncoder, InferenceQueue, ScoreComponents};
pub use storage::{FactStore, InMemoryStore, VectorFilters};
pub use trace::Trace;
pub use types::{
    BankId, Budget, Clock, Entity, EntityId, EntityObservation, Fact, FactId, FactType, Link,
    LinkType, RecallOptions, RecallResponse, RecallResult, SharedFact, SystemClock,
};

/// The retrieval engine: a read-only view over one store, shared by
/// any number of concurrent `recall` calls.
pub struct RecallEngine {
    store: Arc<dyn FactStore>,
    embedder: Arc<CachedEmbedder>,
    inference: Arc<InferenceQueue>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl RecallEngine {
    pub fn new(
        store: Arc<dyn FactStore>,
        embedder: Arc<dyn Embedder>,
        cross_encoder: Arc<dyn CrossEncoder>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(store, embedder, cross_encoder, config, Arc::new(SystemClock))
    }

    /// Construct with an injected clock for deterministic tests.
    pub fn with_clock(
        store: Arc<dyn FactStore>,
        embedder: Arc<dyn Embedder>,
        cross_encoder: Arc<dyn CrossEncoder>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        metrics::register_metrics();
        let inference = Arc::new(InferenceQueue::new(
            cross_encoder,
            config.cross_encoder_concurrency,
            config.queue_depth_threshold,
        ));
        Self {
            store,
            embedder: Arc::new(CachedEmbedder::new(embedder)),
            inference,
            clock,
            config,
        }
    }

    pub fn store(&self) -> Arc<dyn FactStore> {
        Arc::clone(&self.store)
    }

    /// Retrieve the facts that best answer `query` from `bank_id`.
    pub async fn recall(
        &self,
        bank_id: &BankId,
        query: &str,
        options: RecallOptions,
    ) -> Result<RecallResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("recall", bank = %bank_id, request = %request_id);

        let timer = std::time::Instant::now();
        let result = self
            .recall_inner(bank_id, query, options, &request_id)
            .instrument(span)
            .await;

        metrics::RECALL_DURATION.observe(timer.elapsed().as_secs_f64());
        match &result {
            Ok(response) => {
                metrics::RECALL_TOTAL.with_label_values(&["ok"]).inc();
                metrics::RECALL_RESULTS.observe(response.results.len() as f64);
            }
            Err(err) => {
                metrics::RECALL_TOTAL.with_label_values(&[err.code()]).inc();
            }
        }

        result
    }

    async fn recall_inner(
        &self,
        bank_id: &BankId,
        query: &str,
        options: RecallOptions,
        request_id: &str,
    ) -> Result<RecallResponse> {
        if query.trim().is_empty() {
            return Err(EngineError::InvalidQuery {
                reason: "empty query text".to_string(),
            });
        }
        if options.max_tokens == 0 {
            return Err(EngineError::InvalidQuery {
                reason: "max_tokens must be positive".to_string(),
            });
        }
        // top_k == 0 cannot honor the at-least-one-result guarantee
        if options.top_k == 0 {
            return Err(EngineError::InvalidQuery {
                reason: "top_k must be positive".to_string(),
            });
        }

        let started_at = self.clock.now();
        let deadline = Instant::now() + options.deadline;
        let now = options.now.unwrap_or(started_at);

        let exists = with_store_deadline(
            self.config.store_call_deadline,
            "bank_exists",
            bank_id,
            self.store.bank_exists(bank_id),
        )
        .await
        .map_err(|err| store_failure(bank_id, err))?;

        if !exists {
            return Err(EngineError::BankNotFound {
                bank_id: bank_id.to_string(),
            });
        }

        let seed = options.seed.unwrap_or_else(|| derive_seed(bank_id, query));
        let fact_types = options
            .fact_types
            .clone()
            .unwrap_or_else(|| FactType::ALL.to_vec());
        let temporal_fallback = options
            .temporal_fallback_to_mentioned
            .unwrap_or(self.config.temporal_fallback_to_mentioned);

        let plan = Arc::new(query_parser::build_plan(
            query,
            now,
            fact_types,
            seed,
            temporal_fallback,
            &self.embedder,
        )?);

        let temporal_active = plan.temporal_range.is_some();

        // The node budget is per request: when both graph walks run
        // they split it, so the visited total still respects it.
        let walk_budget = if temporal_active {
            (options.budget.nodes() / 2).max(1)
        } else {
            options.budget.nodes()
        };

        let reports = self
            .run_strategies(bank_id, &plan, deadline, walk_budget)
            .await;

        // Deadline expiry with zero candidates anywhere is fatal.
        let total_candidates: usize = reports.iter().map(|r| r.candidate_count()).sum();
        if total_candidates == 0
            && deadline.saturating_duration_since(Instant::now()).is_zero()
        {
            return Err(EngineError::DeadlineExceeded {
                bank_id: bank_id.to_string(),
                request_id: request_id.to_string(),
            });
        }

        // The request survives any subset of strategy failures, but
        // not all of them failing.
        let active: Vec<&StrategyReport> = reports
            .iter()
            .filter(|r| r.kind != StrategyKind::TemporalGraph || temporal_active)
            .collect();
        if !active.is_empty() && active.iter().all(|r| r.error.is_some()) {
            return Err(EngineError::StoreUnavailable {
                bank_id: bank_id.to_string(),
                detail: "all retrieval strategies failed".to_string(),
            });
        }

        let all_lists: Vec<CandidateList> =
            reports.iter().flat_map(|r| r.lists.clone()).collect();
        let fused = reciprocal_rank_fusion(&all_lists, RRF_K, K_FUSE);

        // Hydrate what downstream stages and the trace will cite.
        let hydrate_ids: Vec<FactId> = if options.trace {
            let mut seen = BTreeSet::new();
            let mut ids = Vec::new();
            for list in &all_lists {
                for item in &list.items {
                    if seen.insert(item.fact_id) {
                        ids.push(item.fact_id);
                    }
                }
            }
            ids
        } else {
            fused.iter().map(|f| f.fact_id).collect()
        };

        let facts = self.hydrate_facts(bank_id, &hydrate_ids).await?;
        let mentions = self.roll_up_mentions(bank_id, &fused, &facts).await?;

        let slack = deadline.saturating_duration_since(Instant::now());
        if self.inference.would_overload(slack) {
            return Err(EngineError::Overloaded {
                estimated_wait_ms: self.inference.estimated_wait().as_millis() as u64,
            });
        }

        let (reranked, cross_used) = rerank(
            &self.inference,
            query,
            fused.clone(),
            &facts,
            &mentions,
            now,
            temporal_active,
            slack,
            seed,
        )
        .await;

        let assembled = assemble_within_budget(&reranked, options.max_tokens, options.top_k);

        let results: Vec<RecallResult> = assembled
            .iter()
            .map(|candidate| RecallResult {
                fact_id: candidate.fact.id,
                text: candidate.fact.text.clone(),
                fact_type: candidate.fact.fact_type,
                context: candidate.fact.context.clone(),
                occurred_start: candidate.fact.occurred_start,
                occurred_end: candidate.fact.occurred_end,
                mentioned_at: candidate.fact.mentioned_at,
                entity_refs: candidate.fact.entity_refs.clone(),
                final_score: candidate.final_score,
            })
            .collect();

        let entities = if options.include_entities {
            Some(self.entity_sidecar(bank_id, &results).await?)
        } else {
            None
        };

        let trace = if options.trace {
            Some(self.build_trace(
                &plan,
                &reports,
                &fused,
                &reranked,
                &facts,
                &options,
                results.len(),
                elapsed_seconds(started_at, self.clock.now()),
            ))
        } else {
            None
        };

        info!(
            results = results.len(),
            candidates = total_candidates,
            temporal = temporal_active,
            cross_encoder = cross_used,
            "Recall complete"
        );

        Ok(RecallResponse {
            results,
            entities,
            trace,
        })
    }

    /// Spawn the four strategy tasks and join them. Panicked tasks
    /// degrade to empty reports with the failure recorded.
    async fn run_strategies(
        &self,
        bank_id: &BankId,
        plan: &Arc<QueryPlan>,
        deadline: Instant,
        walk_budget: usize,
    ) -> Vec<StrategyReport> {
        let store_deadline = self.config.store_call_deadline;

        let semantic = tokio::spawn(run_semantic(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            store_deadline,
            deadline,
            bank_id.clone(),
            Arc::clone(plan),
        ));
        let lexical = tokio::spawn(run_lexical(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            store_deadline,
            deadline,
            bank_id.clone(),
            Arc::clone(plan),
        ));
        let graph = tokio::spawn(run_activation_walk(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            store_deadline,
            deadline,
            bank_id.clone(),
            Arc::clone(plan),
            walk_budget,
            StrategyKind::Graph,
        ));
        let temporal = tokio::spawn(run_activation_walk(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            store_deadline,
            deadline,
            bank_id.clone(),
            Arc::clone(plan),
            walk_budget,
            StrategyKind::TemporalGraph,
        ));

        let (semantic, lexical, graph, temporal) =
            tokio::join!(semantic, lexical, graph, temporal);

        let settle = |kind: StrategyKind,
                      joined: std::result::Result<StrategyReport, tokio::task::JoinError>|
         -> StrategyReport {
            match joined {
                Ok(report) => report,
                Err(join_err) => {
                    let mut report = StrategyReport::empty(kind);
                    report.error = Some(format!("TASK_FAILED: {join_err}"));
                    metrics::STRATEGY_ERRORS
                        .with_label_values(&[kind.as_str()])
                        .inc();
                    report
                }
            }
        };

        vec![
            settle(StrategyKind::Semantic, semantic),
            settle(StrategyKind::Lexical, lexical),
            settle(StrategyKind::Graph, graph),
            settle(StrategyKind::TemporalGraph, temporal),
        ]
    }

    async fn hydrate_facts(
        &self,
        bank_id: &BankId,
        ids: &[FactId],
    ) -> Result<HashMap<FactId, SharedFact>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let fetched = with_store_deadline(
            self.config.store_call_deadline,
            "fetch_facts",
            bank_id,
            self.store.fetch_facts(bank_id, ids),
        )
        .await
        .map_err(|err| store_failure(bank_id, err))?;

        let mut facts = HashMap::with_capacity(fetched.len());
        for fact in fetched {
            // Bank isolation is the store's contract; a violating row
            // is dropped loudly rather than returned.
            if fact.bank_id != *bank_id {
                tracing::error!(
                    fact = %fact.id,
                    fact_bank = %fact.bank_id,
                    "Store returned a fact from another bank; dropping"
                );
                continue;
            }
            facts.insert(fact.id, fact);
        }
        Ok(facts)
    }

    /// Per-bank entity mention counts rolled up to the facts that
    /// reference them; feeds the reranker's frequency component.
    async fn roll_up_mentions(
        &self,
        bank_id: &BankId,
        fused: &[FusedCandidate],
        facts: &HashMap<FactId, SharedFact>,
    ) -> Result<HashMap<FactId, u64>> {
        let mut entity_ids: BTreeSet<EntityId> = BTreeSet::new();
        for candidate in fused {
            if let Some(fact) = facts.get(&candidate.fact_id) {
                entity_ids.extend(fact.entity_refs.iter().copied());
            }
        }

        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<EntityId> = entity_ids.into_iter().collect();
        let entities = with_store_deadline(
            self.config.store_call_deadline,
            "fetch_entities",
            bank_id,
            self.store.fetch_entities(bank_id, &ids),
        )
        .await
        .map_err(|err| store_failure(bank_id, err))?;

        let counts: HashMap<EntityId, u64> = entities
            .into_iter()
            .map(|e| (e.id, e.mention_count))
            .collect();

        Ok(fused
            .iter()
            .filter_map(|candidate| {
                let fact = facts.get(&candidate.fact_id)?;
                let total = fact
                    .entity_refs
                    .iter()
                    .filter_map(|id| counts.get(id))
                    .sum::<u64>();
                Some((candidate.fact_id, total))
            })
            .collect())
    }

    async fn entity_sidecar(
        &self,
        bank_id: &BankId,
        results: &[RecallResult],
    ) -> Result<Vec<types::EntityObservation>> {
        let mut seen = BTreeSet::new();
        let mut ids = Vec::new();
        for result in results {
            for entity_id in &result.entity_refs {
                if seen.insert(*entity_id) {
                    ids.push(*entity_id);
                }
            }
        }

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        with_store_deadline(
            self.config.store_call_deadline,
            "entity_observations",
            bank_id,
            self.store
                .entity_observations(bank_id, &ids, ENTITY_OBSERVATION_TOKEN_CAP),
        )
        .await
        .map_err(|err| store_failure(bank_id, err))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_trace(
        &self,
        plan: &QueryPlan,
        reports: &[StrategyReport],
        fused: &[FusedCandidate],
        reranked: &[rerank::RerankedCandidate],
        facts: &HashMap<FactId, SharedFact>,
        options: &RecallOptions,
        results_returned: usize,
        total_duration_seconds: f64,
    ) -> Trace {
        let text_of = |id: &FactId| facts.get(id).map(|f| f.text.clone());

        let retrieval_results = reports
            .iter()
            .map(|report| strategy_entry(report, text_of))
            .collect();

        let rrf_merged = fused
            .iter()
            .enumerate()
            .map(|(idx, candidate)| RrfTraceEntry {
                final_rrf_rank: idx + 1,
                fact_id: candidate.fact_id,
                text: text_of(&candidate.fact_id).unwrap_or_default(),
                rrf_score: candidate.rrf_score,
                source_ranks: candidate.source_ranks.clone(),
            })
            .collect();

        let visits = reports
            .iter()
            .filter(|r| {
                matches!(
                    r.kind,
                    StrategyKind::Graph | StrategyKind::TemporalGraph
                )
            })
            .flat_map(|r| r.visits.iter().cloned())
            .collect();

        let total_nodes_visited: usize = reports.iter().map(|r| r.nodes_visited).sum();
        let entry_points_found: usize = reports.iter().map(|r| r.entry_points).sum();
        let budget = options.budget.nodes();

        Trace {
            query: TraceQuery {
                query_text: plan.query_text.clone(),
                temporal_range: plan.temporal_range,
                embedding_present: true,
            },
            retrieval_results,
            rrf_merged,
            reranked: rerank_entries(reranked),
            visits,
            summary: TraceSummary {
                total_nodes_visited,
                entry_points_found,
                budget_used: total_nodes_visited,
                budget_remaining: budget.saturating_sub(total_nodes_visited),
                results_returned,
                total_duration_seconds,
            },
        }
    }
}

/// Store failures outside the strategy fan-out are request failures:
/// the recoverable per-call deadline only applies inside strategies.
fn store_failure(bank_id: &BankId, err: EngineError) -> EngineError {
    match err {
        EngineError::StoreDeadline { operation } => EngineError::StoreUnavailable {
            bank_id: bank_id.to_string(),
            detail: format!("store call '{operation}' timed out"),
        },
        other => other,
    }
}
