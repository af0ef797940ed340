//! Shared fixtures for the integration tests
//!
//! Deterministic stand-ins for the external collaborators: a
//! vocabulary-overlap embedder, a token-overlap cross-encoder, a fixed
//! clock, and store wrappers that inject latency or failures.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use engram_memory::embeddings::Embedder;
use engram_memory::memory::rerank::CrossEncoder;
use engram_memory::memory::{
    BankId, Clock, Entity, EntityId, EntityObservation, Fact, FactId, FactStore, FactType,
    InMemoryStore, Link, LinkType, SharedFact, VectorFilters,
};

/// Embedder whose vectors are keyword-presence indicators over a fixed
/// vocabulary. Texts sharing vocabulary words land close in cosine
/// space; deterministic by construction.
pub struct KeywordEmbedder {
    vocab: Vec<&'static str>,
}

impl KeywordEmbedder {
    pub fn new(vocab: Vec<&'static str>) -> Self {
        Self { vocab }
    }
}

impl Embedder for KeywordEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(self
            .vocab
            .iter()
            .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.vocab.len()
    }
}

/// Cross-encoder stub scoring word overlap between query and document.
pub struct OverlapEncoder;

impl CrossEncoder for OverlapEncoder {
    fn score_pairs(&self, pairs: &[(String, String)]) -> Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|(query, doc)| {
                let q: Vec<String> = query
                    .to_lowercase()
                    .split_whitespace()
                    .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
                    .filter(|w| !w.is_empty())
                    .collect();
                if q.is_empty() {
                    return 0.0;
                }
                let doc_lower = doc.to_lowercase();
                let hits = q.iter().filter(|w| doc_lower.contains(w.as_str())).count();
                hits as f32 / q.len() as f32
            })
            .collect())
    }
}

/// Cross-encoder that always fails, for degradation tests.
pub struct BrokenEncoder;

impl CrossEncoder for BrokenEncoder {
    fn score_pairs(&self, _pairs: &[(String, String)]) -> Result<Vec<f32>> {
        anyhow::bail!("cross-encoder unavailable")
    }
}

/// Clock pinned to a fixed instant for byte-identical traces.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

/// Deterministic fact ids so fixtures are reproducible run to run.
pub fn fact_id(n: u128) -> FactId {
    FactId(Uuid::from_u128(n))
}

pub fn entity_id(n: u128) -> EntityId {
    EntityId(Uuid::from_u128(0xE000_0000 + n))
}

pub struct FactSpec {
    pub id: FactId,
    pub fact_type: FactType,
    pub text: String,
    pub context: Option<String>,
    pub occurred: Option<DateTime<Utc>>,
    pub mentioned_at: DateTime<Utc>,
    pub entity_refs: Vec<EntityId>,
    pub embedding: Option<Vec<f32>>,
}

impl FactSpec {
    pub fn new(id: u128, text: &str) -> Self {
        Self {
            id: fact_id(id),
            fact_type: FactType::World,
            text: text.to_string(),
            context: None,
            occurred: None,
            mentioned_at: at(2024, 6, 1),
            entity_refs: Vec::new(),
            embedding: None,
        }
    }

    /// Bypass the embedder with an explicit vector.
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn fact_type(mut self, fact_type: FactType) -> Self {
        self.fact_type = fact_type;
        self
    }

    pub fn occurred(mut self, when: DateTime<Utc>) -> Self {
        self.occurred = Some(when);
        self
    }

    pub fn mentioned(mut self, when: DateTime<Utc>) -> Self {
        self.mentioned_at = when;
        self
    }

    pub fn context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }

    pub fn entities(mut self, refs: Vec<EntityId>) -> Self {
        self.entity_refs = refs;
        self
    }

    pub fn build(self, bank: &BankId, embedder: &dyn Embedder) -> Fact {
        let embedding = match &self.embedding {
            Some(explicit) => explicit.clone(),
            None => embedder.encode(&self.text).expect("stub embedder"),
        };
        Fact {
            id: self.id,
            bank_id: bank.clone(),
            fact_type: self.fact_type,
            text: self.text,
            context: self.context,
            embedding,
            occurred_start: self.occurred,
            occurred_end: self.occurred,
            mentioned_at: self.mentioned_at,
            document_id: None,
            chunk_id: None,
            entity_refs: self.entity_refs,
            confidence: None,
            tags: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }
}

pub fn make_entity(bank: &BankId, id: EntityId, name: &str, mentions: u64) -> Entity {
    Entity {
        id,
        bank_id: bank.clone(),
        canonical_name: name.to_string(),
        mention_count: mentions,
        first_seen: at(2024, 1, 1),
        last_seen: at(2024, 6, 1),
    }
}

pub fn link(source: FactId, target: FactId, link_type: LinkType, weight: f32) -> Link {
    Link {
        source_id: source,
        target_id: target,
        link_type,
        weight,
    }
}

/// Store wrapper that sleeps before every call, for deadline tests.
pub struct SlowStore {
    pub inner: InMemoryStore,
    pub delay: Duration,
}

#[async_trait]
impl FactStore for SlowStore {
    async fn bank_exists(&self, bank: &BankId) -> Result<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.bank_exists(bank).await
    }

    async fn vector_topk(
        &self,
        bank: &BankId,
        fact_types: &[FactType],
        query_vec: &[f32],
        k: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<(FactId, f32)>> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .vector_topk(bank, fact_types, query_vec, k, filters)
            .await
    }

    async fn bm25_topk(
        &self,
        bank: &BankId,
        fact_types: &[FactType],
        query_text: &str,
        k: usize,
    ) -> Result<Vec<(FactId, f32)>> {
        tokio::time::sleep(self.delay).await;
        self.inner.bm25_topk(bank, fact_types, query_text, k).await
    }

    async fn links_from(
        &self,
        bank: &BankId,
        fact_id: &FactId,
        link_types: &[LinkType],
    ) -> Result<Vec<Link>> {
        tokio::time::sleep(self.delay).await;
        self.inner.links_from(bank, fact_id, link_types).await
    }

    async fn fetch_facts(&self, bank: &BankId, ids: &[FactId]) -> Result<Vec<SharedFact>> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_facts(bank, ids).await
    }

    async fn fetch_entities(&self, bank: &BankId, ids: &[EntityId]) -> Result<Vec<Entity>> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_entities(bank, ids).await
    }

    async fn entity_observations(
        &self,
        bank: &BankId,
        entity_ids: &[EntityId],
        token_cap: usize,
    ) -> Result<Vec<EntityObservation>> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .entity_observations(bank, entity_ids, token_cap)
            .await
    }
}

/// Store wrapper that fails the lexical index only, for graceful
/// degradation tests.
pub struct FailingBm25Store {
    pub inner: InMemoryStore,
}

#[async_trait]
impl FactStore for FailingBm25Store {
    async fn bank_exists(&self, bank: &BankId) -> Result<bool> {
        self.inner.bank_exists(bank).await
    }

    async fn vector_topk(
        &self,
        bank: &BankId,
        fact_types: &[FactType],
        query_vec: &[f32],
        k: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<(FactId, f32)>> {
        self.inner
            .vector_topk(bank, fact_types, query_vec, k, filters)
            .await
    }

    async fn bm25_topk(
        &self,
        _bank: &BankId,
        _fact_types: &[FactType],
        _query_text: &str,
        _k: usize,
    ) -> Result<Vec<(FactId, f32)>> {
        anyhow::bail!("inverted index unavailable")
    }

    async fn links_from(
        &self,
        bank: &BankId,
        fact_id: &FactId,
        link_types: &[LinkType],
    ) -> Result<Vec<Link>> {
        self.inner.links_from(bank, fact_id, link_types).await
    }

    async fn fetch_facts(&self, bank: &BankId, ids: &[FactId]) -> Result<Vec<SharedFact>> {
        self.inner.fetch_facts(bank, ids).await
    }

    async fn fetch_entities(&self, bank: &BankId, ids: &[EntityId]) -> Result<Vec<Entity>> {
        self.inner.fetch_entities(bank, ids).await
    }

    async fn entity_observations(
        &self,
        bank: &BankId,
        entity_ids: &[EntityId],
        token_cap: usize,
    ) -> Result<Vec<EntityObservation>> {
        self.inner
            .entity_observations(bank, entity_ids, token_cap)
            .await
    }
}
