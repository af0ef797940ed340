//! Type definitions for the retrieval engine

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::{
    BUDGET_HIGH_NODES, BUDGET_LOW_NODES, BUDGET_MID_NODES, CHARS_PER_TOKEN,
    DEFAULT_MAX_TOKENS, DEFAULT_REQUEST_DEADLINE, DEFAULT_TOP_K,
};

/// Unique identifier for facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)] // Serialize as plain UUID string, not array
pub struct FactId(pub Uuid);

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bank identifier - the isolation boundary for every read
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BankId(pub String);

impl BankId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BankId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BankId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kinds of facts a bank can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactType {
    /// Objective claim about the world
    World,
    /// Action the bank itself took
    Bank,
    /// Belief held with a confidence in [0, 1]
    Opinion,
    /// Synthesized summary produced by background jobs
    Observation,
    /// Recorded event
    Experience,
}

impl FactType {
    /// All fact types, in canonical order.
    pub const ALL: [FactType; 5] = [
        FactType::World,
        FactType::Bank,
        FactType::Opinion,
        FactType::Observation,
        FactType::Experience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::World => "world",
            FactType::Bank => "bank",
            FactType::Opinion => "opinion",
            FactType::Observation => "observation",
            FactType::Experience => "experience",
        }
    }
}

/// Typed directed edge between two facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Temporal,
    Semantic,
    Entity,
    Causal,
}

impl LinkType {
    pub const ALL: [LinkType; 4] = [
        LinkType::Temporal,
        LinkType::Semantic,
        LinkType::Entity,
        LinkType::Causal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Temporal => "temporal",
            LinkType::Semantic => "semantic",
            LinkType::Entity => "entity",
            LinkType::Causal => "causal",
        }
    }

    /// Per-hop activation decay for this link type, causal boost
    /// included. Causal propagation may exceed 1.0 pre-clamp.
    pub fn decay(&self) -> f32 {
        use crate::constants::{
            CAUSAL_BOOST, DECAY_CAUSAL_BASE, DECAY_ENTITY, DECAY_SEMANTIC, DECAY_TEMPORAL,
        };
        match self {
            LinkType::Entity => DECAY_ENTITY,
            LinkType::Semantic => DECAY_SEMANTIC,
            LinkType::Temporal => DECAY_TEMPORAL,
            LinkType::Causal => DECAY_CAUSAL_BASE * CAUSAL_BOOST,
        }
    }
}

/// Directed link between two facts in the same bank
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub source_id: FactId,
    pub target_id: FactId,
    pub link_type: LinkType,
    /// Weight in (0, 1]
    pub weight: f32,
}

/// An immutable memory unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub bank_id: BankId,
    pub fact_type: FactType,

    /// Natural-language statement
    pub text: String,

    /// Optional free-text context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Dense embedding; dimension is uniform within a bank.
    /// Never serialized out to callers.
    #[serde(skip)]
    pub embedding: Vec<f32>,

    /// When the described event occurred (start; may equal end for
    /// point events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_start: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_end: Option<DateTime<Utc>>,

    /// Ingestion timestamp
    pub mentioned_at: DateTime<Utc>,

    /// Provenance, opaque to retrieval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,

    /// Entities mentioned by this fact
    #[serde(default)]
    pub entity_refs: Vec<EntityId>,

    /// Confidence in [0, 1]; populated for opinions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Shared fact reference for zero-copy fan-out across strategy tasks.
pub type SharedFact = Arc<Fact>;

impl Fact {
    /// The timestamp used for temporal filtering: `occurred_start`,
    /// optionally falling back to `mentioned_at`.
    pub fn occurrence(&self, fallback_to_mentioned: bool) -> Option<DateTime<Utc>> {
        self.occurred_start.or(if fallback_to_mentioned {
            Some(self.mentioned_at)
        } else {
            None
        })
    }

    /// Approximate token cost: ceil(chars/4) over text and context.
    pub fn token_cost(&self) -> usize {
        let text_chars = self.text.chars().count();
        let context_chars = self
            .context
            .as_ref()
            .map(|c| c.chars().count())
            .unwrap_or(0);
        text_chars.div_ceil(CHARS_PER_TOKEN) + context_chars.div_ceil(CHARS_PER_TOKEN)
    }
}

/// A canonical referent shared across facts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub bank_id: BankId,
    pub canonical_name: String,
    /// Per-bank mention count; rolls up into the reranker's frequency
    /// signal
    pub mention_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Sidecar payload summarizing what the bank has observed about an
/// entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityObservation {
    pub entity_id: EntityId,
    pub canonical_name: String,
    pub mention_count: u64,
    /// Observation texts, most recent first, truncated to the token cap
    pub observations: Vec<String>,
}

/// Node budget for the graph strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Budget {
    Low,
    Mid,
    High,
}

impl Budget {
    /// Maximum facts visited by an activation walk.
    pub fn nodes(&self) -> usize {
        match self {
            Budget::Low => BUDGET_LOW_NODES,
            Budget::Mid => BUDGET_MID_NODES,
            Budget::High => BUDGET_HIGH_NODES,
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Budget::Mid
    }
}

/// Per-request recall options
#[derive(Debug, Clone)]
pub struct RecallOptions {
    /// Fact types to retrieve; `None` means all.
    pub fact_types: Option<Vec<FactType>>,

    /// Node budget for the graph strategies.
    pub budget: Budget,

    /// Post-rerank result cap.
    pub top_k: usize,

    /// Token budget for assembled results.
    pub max_tokens: usize,

    /// Whether to attach the full trace to the response.
    pub trace: bool,

    /// Reference time for temporal resolution and recency scoring.
    /// Defaults to the engine clock.
    pub now: Option<DateTime<Utc>>,

    /// End-to-end request deadline.
    pub deadline: Duration,

    /// Tie-break seed. Defaults to a digest of `(bank_id, query)`.
    pub seed: Option<u64>,

    /// Attach entity observation sidecars for entities referenced by
    /// the results.
    pub include_entities: bool,

    /// Override for the engine-level temporal fallback setting: when
    /// set, facts without `occurred_start` use `mentioned_at` for
    /// temporal filtering iff true.
    pub temporal_fallback_to_mentioned: Option<bool>,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            fact_types: None,
            budget: Budget::default(),
            top_k: DEFAULT_TOP_K,
            max_tokens: DEFAULT_MAX_TOKENS,
            trace: false,
            now: None,
            deadline: DEFAULT_REQUEST_DEADLINE,
            seed: None,
            include_entities: false,
            temporal_fallback_to_mentioned: None,
        }
    }
}

/// One ranked fact in a recall response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallResult {
    pub fact_id: FactId,
    pub text: String,
    pub fact_type: FactType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_start: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_end: Option<DateTime<Utc>>,

    pub mentioned_at: DateTime<Utc>,
    pub entity_refs: Vec<EntityId>,
    pub final_score: f32,
}

/// Recall response: ranked results plus optional sidecars
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallResponse {
    pub results: Vec<RecallResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntityObservation>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<super::trace::Trace>,
}

/// Injectable clock so tests can pin `now` and trace durations.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used outside tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Derive the default tie-break seed from `(bank_id, query_text)`.
///
/// First eight bytes of SHA-256(bank_id || 0x1f || query).
pub fn derive_seed(bank_id: &BankId, query: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(bank_id.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(query.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// Deterministic per-fact tie-break value under a seed.
pub fn seeded_tiebreak(seed: u64, fact_id: &FactId) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_be_bytes());
    hasher.update(fact_id.0.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}
