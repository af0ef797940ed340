//! Cross-encoder reranking under a token budget
//!
//! The fused candidate list is rescored with a cross-encoder over
//! `(query, decorated_fact_text)` pairs, blended with the normalized
//! RRF score, recency, and entity frequency. The cross-encoder model
//! is a process-wide singleton behind a bounded inference queue; when
//! it is unavailable or out of time the reranker degrades to the
//! non-encoder components and records the downgrade.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::warn;

use crate::constants::{
    CROSS_ENCODER_WAIT_EMA_ALPHA, RECENCY_TIME_CONSTANT_DAYS, W_CROSS_ENCODER, W_FREQUENCY,
    W_RECENCY, W_RRF_NORM,
};
use crate::metrics;

use super::fusion::FusedCandidate;
use super::types::{seeded_tiebreak, Fact, FactId, SharedFact};

/// Pair-scoring model interface. Any implementation suffices; the
/// engine never assumes a specific model.
pub trait CrossEncoder: Send + Sync {
    /// Score (query, document) pairs; higher is more relevant.
    fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>>;
}

/// Process-wide inference queue with bounded concurrency.
///
/// Inference runs on the blocking pool; the semaphore bounds parallel
/// model invocations while the depth counter and wait-time EMA feed
/// the backpressure estimate.
pub struct InferenceQueue {
    encoder: Arc<dyn CrossEncoder>,
    semaphore: Arc<Semaphore>,
    depth: AtomicUsize,
    wait_ema_ms: Mutex<f64>,
    depth_threshold: usize,
}

impl InferenceQueue {
    pub fn new(encoder: Arc<dyn CrossEncoder>, concurrency: usize, depth_threshold: usize) -> Self {
        Self {
            encoder,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            depth: AtomicUsize::new(0),
            wait_ema_ms: Mutex::new(0.0),
            depth_threshold,
        }
    }

    /// In-flight plus waiting inferences.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Estimated queue wait for a newly arriving request.
    pub fn estimated_wait(&self) -> Duration {
        let per_item_ms = *self.wait_ema_ms.lock();
        Duration::from_secs_f64((self.depth() as f64 * per_item_ms / 1000.0).max(0.0))
    }

    /// Whether a request with the given deadline slack should be shed.
    pub fn would_overload(&self, slack: Duration) -> bool {
        self.depth() > self.depth_threshold && slack < self.estimated_wait()
    }

    /// Score pairs through the bounded queue.
    ///
    /// Cancellation-safe: the depth counter unwinds via a drop guard
    /// even when the caller's deadline drops this future mid-wait.
    pub async fn score_pairs(&self, pairs: Vec<(String, String)>) -> Result<Vec<f32>> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        metrics::CROSS_ENCODER_QUEUE_DEPTH.inc();
        let _guard = DepthGuard(&self.depth);

        let queued_at = std::time::Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("inference queue closed")?;

        let waited = queued_at.elapsed();
        metrics::CROSS_ENCODER_WAIT.observe(waited.as_secs_f64());
        {
            let mut ema = self.wait_ema_ms.lock();
            *ema = (1.0 - CROSS_ENCODER_WAIT_EMA_ALPHA) * *ema
                + CROSS_ENCODER_WAIT_EMA_ALPHA * waited.as_secs_f64() * 1000.0;
        }

        let encoder = Arc::clone(&self.encoder);
        let scores = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            encoder.score_pairs(&pairs)
        })
        .await
        .context("inference task panicked")??;
        Ok(scores)
    }
}

struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
        metrics::CROSS_ENCODER_QUEUE_DEPTH.dec();
    }
}

/// Per-fact score breakdown, stored verbatim in the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComponents {
    /// `None` when the reranker degraded without the cross-encoder.
    pub cross_encoder: Option<f32>,
    pub rrf_norm: f32,
    pub recency: f32,
    pub frequency: f32,
}

/// A fused candidate after reranking.
#[derive(Debug, Clone)]
pub struct RerankedCandidate {
    pub fact: SharedFact,
    /// 1-based rank in the fused list.
    pub rrf_rank: usize,
    /// 1-based rank after reranking.
    pub rerank_rank: usize,
    pub rrf_score: f32,
    pub source_ranks: BTreeMap<String, usize>,
    pub final_score: f32,
    pub components: ScoreComponents,
}

/// Decorate fact text for the cross-encoder.
///
/// The date prefix applies only when the fact is dated AND the query
/// carried a temporal range; context is always appended when present.
pub fn decorate_fact(fact: &Fact, had_temporal_range: bool) -> String {
    let mut decorated = String::new();

    if had_temporal_range {
        if let Some(occurred) = fact.occurred_start {
            decorated.push_str(&format!("[Date: {}] ", occurred.format("%B %-d, %Y")));
        }
    }

    decorated.push_str(&fact.text);

    if let Some(context) = &fact.context {
        if !context.is_empty() {
            decorated.push_str(&format!(" [Context: {context}]"));
        }
    }

    decorated
}

/// Rerank the fused list.
///
/// Returns candidates sorted by final score descending with dense
/// `rerank_rank`s, plus whether the cross-encoder contributed (false
/// means the degraded blend was used and recorded as such).
#[allow(clippy::too_many_arguments)]
pub async fn rerank(
    queue: &InferenceQueue,
    query: &str,
    fused: Vec<FusedCandidate>,
    facts: &HashMap<FactId, SharedFact>,
    mentions: &HashMap<FactId, u64>,
    now: DateTime<Utc>,
    had_temporal_range: bool,
    time_left: Duration,
    seed: u64,
) -> (Vec<RerankedCandidate>, bool) {
    // Hydration misses (facts deleted mid-request) drop out here;
    // ranks keep their fused positions.
    let batch: Vec<(usize, FusedCandidate, SharedFact)> = fused
        .into_iter()
        .enumerate()
        .filter_map(|(idx, candidate)| {
            facts
                .get(&candidate.fact_id)
                .cloned()
                .map(|fact| (idx + 1, candidate, fact))
        })
        .collect();

    if batch.is_empty() {
        return (Vec::new(), false);
    }

    let rrf_max = batch
        .iter()
        .map(|(_, c, _)| c.rrf_score)
        .fold(0.0_f32, f32::max);
    let max_mentions = batch
        .iter()
        .map(|(_, c, _)| mentions.get(&c.fact_id).copied().unwrap_or(0))
        .max()
        .unwrap_or(0);

    let pairs: Vec<(String, String)> = batch
        .iter()
        .map(|(_, _, fact)| (query.to_string(), decorate_fact(fact, had_temporal_range)))
        .collect();

    let cross_scores: Option<Vec<f32>> = if time_left.is_zero() {
        warn!("No deadline slack left for cross-encoder; degrading to fused components");
        None
    } else {
        match tokio::time::timeout(time_left, queue.score_pairs(pairs)).await {
            Ok(Ok(scores)) if scores.len() == batch.len() => Some(scores),
            Ok(Ok(scores)) => {
                warn!(
                    expected = batch.len(),
                    got = scores.len(),
                    "Cross-encoder returned a short batch; degrading"
                );
                None
            }
            Ok(Err(err)) => {
                warn!("Cross-encoder failed ({err}); degrading to fused components");
                None
            }
            Err(_) => {
                warn!("Cross-encoder timed out; degrading to fused components");
                None
            }
        }
    };

    let cross_used = cross_scores.is_some();

    let mut reranked: Vec<RerankedCandidate> = batch
        .into_iter()
        .enumerate()
        .map(|(idx, (rrf_rank, candidate, fact))| {
            let rrf_norm = if rrf_max > 0.0 {
                candidate.rrf_score / rrf_max
            } else {
                0.0
            };

            let age_days = (now - fact.mentioned_at).num_seconds().max(0) as f64 / 86_400.0;
            let recency = (-age_days / RECENCY_TIME_CONSTANT_DAYS).exp() as f32;

            let fact_mentions = mentions.get(&candidate.fact_id).copied().unwrap_or(0);
            let frequency = if max_mentions > 0 {
                ((1.0 + fact_mentions as f64).ln() / (1.0 + max_mentions as f64).ln()) as f32
            } else {
                0.0
            };

            let cross = cross_scores.as_ref().map(|scores| scores[idx]);

            let final_score = match cross {
                Some(ce) => {
                    W_CROSS_ENCODER * ce
                        + W_RRF_NORM * rrf_norm
                        + W_RECENCY * recency
                        + W_FREQUENCY * frequency
                }
                None => W_RRF_NORM * rrf_norm + W_RECENCY * recency + W_FREQUENCY * frequency,
            };

            RerankedCandidate {
                fact,
                rrf_rank,
                rerank_rank: 0,
                rrf_score: candidate.rrf_score,
                source_ranks: candidate.source_ranks,
                final_score,
                components: ScoreComponents {
                    cross_encoder: cross,
                    rrf_norm,
                    recency,
                    frequency,
                },
            }
        })
        .collect();

    reranked.sort_by(|a, b| {
        OrderedFloat(b.final_score)
            .cmp(&OrderedFloat(a.final_score))
            .then_with(|| {
                seeded_tiebreak(seed, &a.fact.id).cmp(&seeded_tiebreak(seed, &b.fact.id))
            })
            .then_with(|| a.fact.id.cmp(&b.fact.id))
    });

    for (idx, candidate) in reranked.iter_mut().enumerate() {
        candidate.rerank_rank = idx + 1;
    }

    (reranked, cross_used)
}

/// Token-budgeted assembly: take the reranked prefix that fits within
/// `max_tokens`, capped at `top_k`. The top candidate is always
/// included whenever any candidate exists, even when it alone exceeds
/// the budget or `top_k` is zero.
pub fn assemble_within_budget(
    reranked: &[RerankedCandidate],
    max_tokens: usize,
    top_k: usize,
) -> Vec<RerankedCandidate> {
    let mut assembled = Vec::new();
    let mut spent = 0usize;

    for candidate in reranked.iter().take(top_k.max(1)) {
        let cost = candidate.fact.token_cost();
        if assembled.is_empty() {
            assembled.push(candidate.clone());
            spent = cost;
            continue;
        }
        if spent + cost > max_tokens {
            break;
        }
        spent += cost;
        assembled.push(candidate.clone());
    }

    assembled
}
