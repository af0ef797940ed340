//! Graph-aware retrieval using spreading activation
//!
//! Surfaces facts indirectly connected to strong semantic hits through
//! entities and typed links. Entry points come from the semantic top-k;
//! activation then spreads outward through a budgeted, priority-driven
//! frontier expansion:
//!
//! ```text
//! a' = A[u] * decay(link_type) * weight
//! A[v] = max(A[v], a')
//! ```
//!
//! The walk is iterative over an explicit max-priority queue; the
//! visited set plus max-accumulation make cycles safe without explicit
//! detection. Causal links carry a boosted decay (> 1.0) so activation
//! may grow along causal chains; final activations are clamped to
//! [0, ACTIVATION_CEILING].
//!
//! The temporal variant runs the same walk with time-filtered entry
//! points, and traverses a link only when the target fact's occurrence
//! lies inside the query's temporal range.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use tokio::time::Instant;

use crate::constants::{ACTIVATION_CEILING, GRAPH_ENTRY_POINTS, TAU_ENTRY, TAU_GRAPH};

use super::query_parser::QueryPlan;
use super::retrieval::{
    elapsed_seconds, record_strategy_error, store_slack, CandidateList, StrategyKind,
    StrategyReport,
};
use super::storage::{with_store_deadline, FactStore, VectorFilters};
use super::types::{BankId, Clock, FactId, LinkType, SharedFact};

/// One visited node in the activation walk, with the path that first
/// produced its best activation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeVisit {
    pub node_id: FactId,
    /// Fact ids from the entry point to this node, inclusive.
    pub activation_path: Vec<FactId>,
    /// Link weights along the path; empty for entry points.
    pub weights: Vec<f32>,
}

/// Max-heap entry: highest activation pops first, ties resolve to the
/// smallest fact id.
struct QueueEntry {
    activation: OrderedFloat<f32>,
    fact_id: FactId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.activation == other.activation && self.fact_id == other.fact_id
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.activation
            .cmp(&other.activation)
            .then_with(|| other.fact_id.cmp(&self.fact_id))
    }
}

/// Spreading-activation walk shared by the graph and temporal-graph
/// strategies.
///
/// `kind` selects the temporal variant: entry points are time-filtered
/// and links only propagate into facts whose occurrence lies inside the
/// plan's temporal range. Callers must not invoke the temporal variant
/// without a range in the plan.
#[allow(clippy::too_many_arguments)]
pub async fn run_activation_walk(
    store: Arc<dyn FactStore>,
    clock: Arc<dyn Clock>,
    store_deadline: Duration,
    deadline: Instant,
    bank: BankId,
    plan: Arc<QueryPlan>,
    budget_nodes: usize,
    kind: StrategyKind,
) -> StrategyReport {
    let started = clock.now();
    let mut report = StrategyReport::empty(kind);

    let temporal_range = match kind {
        StrategyKind::TemporalGraph => match plan.temporal_range {
            Some(range) => Some(range),
            None => {
                // Inactive without a temporal range; still traced
                report.duration_seconds = elapsed_seconds(started, clock.now());
                return report;
            }
        },
        _ => None,
    };

    // Entry points: semantic top-e per fact-type partition, above the
    // entry threshold, time-filtered for the temporal variant.
    let entry_filters = VectorFilters {
        occurred_range: temporal_range,
        min_similarity: Some(TAU_ENTRY),
        fallback_to_mentioned: plan.temporal_fallback,
    };

    let mut entries: Vec<(FactId, f32)> = Vec::new();
    for fact_type in &plan.fact_types {
        let slack = store_slack(deadline, store_deadline);
        if slack.is_zero() {
            break;
        }
        let result = with_store_deadline(
            slack,
            "vector_topk",
            &bank,
            store.vector_topk(
                &bank,
                &[*fact_type],
                &plan.query_vec,
                GRAPH_ENTRY_POINTS,
                &entry_filters,
            ),
        )
        .await;
        match result {
            Ok(scored) => entries.extend(scored),
            Err(err) => {
                record_strategy_error(&mut report, err);
                report.duration_seconds = elapsed_seconds(started, clock.now());
                return report;
            }
        }
    }

    report.entry_points = entries.len();
    if entries.is_empty() {
        report.duration_seconds = elapsed_seconds(started, clock.now());
        return report;
    }

    // Task-local walk state; nothing here is shared across requests.
    let mut activation: HashMap<FactId, f32> = HashMap::new();
    let mut parent: HashMap<FactId, (FactId, f32)> = HashMap::new();
    let mut visited: HashSet<FactId> = HashSet::new();
    let mut visit_order: Vec<FactId> = Vec::new();
    let mut heap: BinaryHeap<QueueEntry> = BinaryHeap::new();
    let mut facts: HashMap<FactId, SharedFact> = HashMap::new();

    let entry_ids: Vec<FactId> = entries.iter().map(|(id, _)| *id).collect();
    match hydrate(
        &store,
        store_deadline,
        deadline,
        &bank,
        &entry_ids,
        &mut facts,
    )
    .await
    {
        Ok(()) => {}
        Err(err) => {
            record_strategy_error(&mut report, err);
            report.duration_seconds = elapsed_seconds(started, clock.now());
            return report;
        }
    }

    for (fact_id, similarity) in entries {
        let current = activation.entry(fact_id).or_insert(similarity);
        *current = current.max(similarity);
        heap.push(QueueEntry {
            activation: OrderedFloat(*current),
            fact_id,
        });
    }

    // Budgeted frontier expansion
    while let Some(entry) = heap.pop() {
        let fact_id = entry.fact_id;
        if visited.contains(&fact_id) {
            continue;
        }
        visited.insert(fact_id);
        visit_order.push(fact_id);

        if visited.len() >= budget_nodes {
            break;
        }
        if deadline.saturating_duration_since(Instant::now()).is_zero() {
            // Deadline hit mid-walk: keep the partial frontier
            break;
        }

        let slack = store_slack(deadline, store_deadline);
        let links = match with_store_deadline(
            slack,
            "links_from",
            &bank,
            store.links_from(&bank, &fact_id, &LinkType::ALL),
        )
        .await
        {
            Ok(links) => links,
            Err(err) => {
                record_strategy_error(&mut report, err);
                break;
            }
        };

        if links.is_empty() {
            continue;
        }

        let unknown: Vec<FactId> = links
            .iter()
            .map(|l| l.target_id)
            .filter(|id| !facts.contains_key(id))
            .collect();
        if !unknown.is_empty() {
            if let Err(err) = hydrate(
                &store,
                store_deadline,
                deadline,
                &bank,
                &unknown,
                &mut facts,
            )
            .await
            {
                record_strategy_error(&mut report, err);
                break;
            }
        }

        let source_activation = *activation.get(&fact_id).unwrap_or(&0.0);

        for link in links {
            let target = link.target_id;
            let Some(target_fact) = facts.get(&target) else {
                // Dangling link; the target was deleted under us
                continue;
            };

            if let Some((range_start, range_end)) = temporal_range {
                match target_fact.occurrence(plan.temporal_fallback) {
                    Some(at) if at >= range_start && at <= range_end => {}
                    // Facts outside the range never receive activation
                    _ => continue,
                }
            }

            let propagated = source_activation * link.link_type.decay() * link.weight;
            let current = activation.get(&target).copied().unwrap_or(0.0);
            if propagated > current {
                activation.insert(target, propagated);
                if !visited.contains(&target) {
                    parent.insert(target, (fact_id, link.weight));
                    heap.push(QueueEntry {
                        activation: OrderedFloat(propagated),
                        fact_id: target,
                    });
                }
            }
        }
    }

    report.nodes_visited = visited.len();

    // Final activations clamp to [0, ceiling]
    for value in activation.values_mut() {
        *value = value.clamp(0.0, ACTIVATION_CEILING);
    }

    // Visit trace with activation paths, in visit order
    report.visits = visit_order
        .iter()
        .map(|id| build_visit(*id, &parent))
        .collect();

    // A recorded store failure degrades the whole strategy to an empty
    // candidate list; only plain deadline expiry keeps partials.
    if report.error.is_some() {
        report.duration_seconds = elapsed_seconds(started, clock.now());
        return report;
    }

    // Candidates: visited facts above the activation floor, sorted by
    // activation desc, then mentioned_at desc, then fact id.
    let mut survivors: Vec<(FactId, f32, DateTime<Utc>)> = visit_order
        .iter()
        .filter_map(|id| {
            let act = *activation.get(id)?;
            if act < TAU_GRAPH {
                return None;
            }
            let fact = facts.get(id)?;
            Some((*id, act, fact.mentioned_at))
        })
        .collect();

    survivors.sort_by(|a, b| {
        OrderedFloat(b.1)
            .cmp(&OrderedFloat(a.1))
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| a.0.cmp(&b.0))
    });

    // Partition into per-type lists, preserving the global ordering
    for fact_type in &plan.fact_types {
        let scored: Vec<(FactId, f32)> = survivors
            .iter()
            .filter(|(id, _, _)| {
                facts
                    .get(id)
                    .map(|f| f.fact_type == *fact_type)
                    .unwrap_or(false)
            })
            .map(|(id, act, _)| (*id, *act))
            .collect();
        if !scored.is_empty() {
            report
                .lists
                .push(CandidateList::from_scored(kind, *fact_type, scored));
        }
    }

    report.duration_seconds = elapsed_seconds(started, clock.now());
    report
}

async fn hydrate(
    store: &Arc<dyn FactStore>,
    store_deadline: Duration,
    deadline: Instant,
    bank: &BankId,
    ids: &[FactId],
    facts: &mut HashMap<FactId, SharedFact>,
) -> Result<(), crate::errors::EngineError> {
    let slack = store_slack(deadline, store_deadline);
    let fetched = with_store_deadline(
        slack,
        "fetch_facts",
        bank,
        store.fetch_facts(bank, ids),
    )
    .await?;
    for fact in fetched {
        facts.insert(fact.id, fact);
    }
    Ok(())
}

fn build_visit(node_id: FactId, parent: &HashMap<FactId, (FactId, f32)>) -> NodeVisit {
    let mut path = vec![node_id];
    let mut weights = Vec::new();
    let mut cursor = node_id;
    // Parent edges always point at earlier-visited nodes, so this
    // terminates; the length guard covers store inconsistencies.
    while let Some((prev, weight)) = parent.get(&cursor) {
        path.push(*prev);
        weights.push(*weight);
        cursor = *prev;
        if path.len() > parent.len() + 1 {
            break;
        }
    }
    path.reverse();
    weights.reverse();
    NodeVisit {
        node_id,
        activation_path: path,
        weights,
    }
}
