//! Documented constants for the retrieval engine
//!
//! All tunable parameters live here with the formula or contract they
//! feed. Centralizing constants prevents magic numbers and makes tuning
//! easier.

use std::time::Duration;

// =============================================================================
// SEMANTIC STRATEGY
// =============================================================================

/// Maximum candidates returned by the semantic strategy per fact-type
/// partition.
pub const K_SEMANTIC: usize = 50;

/// Minimum cosine similarity for a semantic candidate.
///
/// Below 0.4 the nearest-neighbour list degrades into topical noise;
/// candidates under the threshold are dropped rather than ranked.
pub const TAU_SEMANTIC: f32 = 0.4;

// =============================================================================
// LEXICAL STRATEGY
// =============================================================================

/// Maximum candidates returned by the lexical (BM25) strategy per
/// fact-type partition.
pub const K_LEXICAL: usize = 50;

// =============================================================================
// GRAPH SPREADING ACTIVATION
//
// Propagation formula per traversed link (u -> v, type, w):
//   a' = A[u] * decay(type) * w
//   A[v] = max(A[v], a')
// Final activations are clamped to [0, ACTIVATION_CEILING].
// =============================================================================

/// Entry points taken from the semantic top-k per fact-type partition.
pub const GRAPH_ENTRY_POINTS: usize = 10;

/// Minimum similarity for a fact to seed the activation walk.
pub const TAU_ENTRY: f32 = 0.4;

/// Minimum final activation for a visited fact to become a candidate.
pub const TAU_GRAPH: f32 = 0.05;

/// Per-hop decay for entity links.
pub const DECAY_ENTITY: f32 = 0.8;

/// Per-hop decay for semantic links.
pub const DECAY_SEMANTIC: f32 = 0.7;

/// Per-hop decay for temporal links.
pub const DECAY_TEMPORAL: f32 = 0.6;

/// Base per-hop decay for causal links, before the causal boost.
pub const DECAY_CAUSAL_BASE: f32 = 0.9;

/// Multiplier applied on top of [`DECAY_CAUSAL_BASE`].
///
/// Causal chains are the strongest recall signal in the graph; the
/// boosted factor (0.9 * 2.0 = 1.8) deliberately lets activation grow
/// along them. [`ACTIVATION_CEILING`] bounds the growth.
pub const CAUSAL_BOOST: f32 = 2.0;

/// Upper clamp for propagated activation.
pub const ACTIVATION_CEILING: f32 = 2.0;

/// Node budgets for the activation walk, selected by `Budget`.
pub const BUDGET_LOW_NODES: usize = 100;
pub const BUDGET_MID_NODES: usize = 300;
pub const BUDGET_HIGH_NODES: usize = 600;

// =============================================================================
// RANK FUSION
//
// rrf(f) = sum over contributing lists of 1 / (RRF_K + rank)
// =============================================================================

/// RRF rank constant. Higher values flatten the contribution curve
/// across ranks; 60 is the standard from the original RRF paper.
pub const RRF_K: f32 = 60.0;

/// Cap on the fused candidate list handed to the reranker.
pub const K_FUSE: usize = 100;

// =============================================================================
// RERANKER
//
// final = W_CROSS * cross_encoder + W_RRF * rrf_norm
//       + W_RECENCY * recency + W_FREQUENCY * frequency
// =============================================================================

/// Weight of the cross-encoder score in the final blend.
pub const W_CROSS_ENCODER: f32 = 0.6;

/// Weight of the batch-normalized RRF score.
pub const W_RRF_NORM: f32 = 0.25;

/// Weight of the recency component.
pub const W_RECENCY: f32 = 0.10;

/// Weight of the entity-frequency component.
pub const W_FREQUENCY: f32 = 0.05;

/// Time constant (days) for the recency component:
/// recency = exp(-age_days / RECENCY_TIME_CONSTANT_DAYS).
pub const RECENCY_TIME_CONSTANT_DAYS: f64 = 180.0;

/// Characters per token for the approximate token cost:
/// tokens(fact) = ceil(chars(text) / 4) + ceil(chars(context) / 4).
pub const CHARS_PER_TOKEN: usize = 4;

/// Default token budget for assembled results.
pub const DEFAULT_MAX_TOKENS: usize = 4096;

/// Default post-rerank result cap.
pub const DEFAULT_TOP_K: usize = 10;

/// Token cap for the optional entity-observation sidecar payload.
pub const ENTITY_OBSERVATION_TOKEN_CAP: usize = 1024;

// =============================================================================
// DEADLINES & BACKPRESSURE
// =============================================================================

/// Default end-to-end request deadline.
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(2);

/// Hard per-call deadline for store adapter operations. Expiry surfaces
/// as a recoverable `StoreDeadline`, not a request failure.
pub const STORE_CALL_DEADLINE: Duration = Duration::from_millis(500);

/// Upper bound on concurrent cross-encoder inferences. The effective
/// value is min(CPU cores, this).
pub const CROSS_ENCODER_MAX_CONCURRENCY: usize = 4;

/// Queue depth above which the inference queue starts shedding requests
/// whose deadline slack is below the measured wait estimate.
pub const CROSS_ENCODER_QUEUE_THRESHOLD: usize = 32;

/// Smoothing factor for the exponential moving average of per-inference
/// wait time, used by the backpressure estimate.
pub const CROSS_ENCODER_WAIT_EMA_ALPHA: f64 = 0.2;

// =============================================================================
// EMBEDDING CACHE
// =============================================================================

/// Maximum entries in the per-process embedding cache. The cache is
/// keyed by exact query text; on overflow it is cleared wholesale.
pub const EMBED_CACHE_MAX_ENTRIES: usize = 10_000;
