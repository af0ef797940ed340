//! Store adapter: typed read interface over the persisted graph
//!
//! [`FactStore`] is the only seam between the engine and persistence.
//! Every operation is read-only, scoped by bank, and must honor the
//! per-call deadline enforced by [`with_store_deadline`]. Adapters
//! provide point-in-time consistency for a single request.
//!
//! [`InMemoryStore`] is the bundled reference implementation: facts,
//! links, and entities in shard maps plus a tantivy RAM index for the
//! inverted text search. It backs the test suite and embedded
//! deployments; production adapters wrap a relational store with
//! vector-capable indices.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term};
use tracing::debug;

use crate::errors::EngineError;
use crate::similarity::cosine_similarity;

use super::types::{
    BankId, Entity, EntityId, EntityObservation, Fact, FactId, FactType, Link, LinkType,
    SharedFact,
};

/// Filters applied by `vector_topk`.
#[derive(Debug, Clone, Default)]
pub struct VectorFilters {
    /// Restrict to facts whose occurrence lies in this inclusive range.
    pub occurred_range: Option<(DateTime<Utc>, DateTime<Utc>)>,

    /// Drop candidates below this cosine similarity.
    pub min_similarity: Option<f32>,

    /// Whether facts without `occurred_start` fall back to
    /// `mentioned_at` when the range filter is active.
    pub fallback_to_mentioned: bool,
}

/// Typed read operations over the persisted graph and its indices.
///
/// All operations are bank-scoped; cross-bank reads must fail or return
/// nothing. Implementations must be `Send + Sync`: the engine shares a
/// single handle across concurrent strategy tasks.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Whether the bank exists.
    async fn bank_exists(&self, bank: &BankId) -> Result<bool>;

    /// Cosine kNN over the bank's facts of the given types.
    async fn vector_topk(
        &self,
        bank: &BankId,
        fact_types: &[FactType],
        query_vec: &[f32],
        k: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<(FactId, f32)>>;

    /// Lexical retrieval over the maintained inverted index on
    /// `text ∪ context`.
    async fn bm25_topk(
        &self,
        bank: &BankId,
        fact_types: &[FactType],
        query_text: &str,
        k: usize,
    ) -> Result<Vec<(FactId, f32)>>;

    /// Outgoing links of the selected types.
    async fn links_from(
        &self,
        bank: &BankId,
        fact_id: &FactId,
        link_types: &[LinkType],
    ) -> Result<Vec<Link>>;

    /// Batch hydration preserving input order; unknown ids are skipped.
    async fn fetch_facts(&self, bank: &BankId, ids: &[FactId]) -> Result<Vec<SharedFact>>;

    /// Batch entity hydration preserving input order.
    async fn fetch_entities(&self, bank: &BankId, ids: &[EntityId]) -> Result<Vec<Entity>>;

    /// Optional sidecar payload: observation texts per entity,
    /// truncated to the shared token cap.
    async fn entity_observations(
        &self,
        bank: &BankId,
        entity_ids: &[EntityId],
        token_cap: usize,
    ) -> Result<Vec<EntityObservation>>;
}

/// Run a store call under the hard per-call deadline.
///
/// Expiry surfaces as the recoverable `StoreDeadline`; other failures
/// become `StoreUnavailable`.
pub async fn with_store_deadline<T, F>(
    deadline: Duration,
    operation: &'static str,
    bank: &BankId,
    fut: F,
) -> Result<T, EngineError>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(EngineError::StoreUnavailable {
            bank_id: bank.to_string(),
            detail: err.to_string(),
        }),
        Err(_) => Err(EngineError::StoreDeadline { operation }),
    }
}

/// Per-bank shard of the in-memory store.
#[derive(Default)]
struct BankShard {
    facts: HashMap<FactId, SharedFact>,
    links: HashMap<FactId, Vec<Link>>,
    entities: HashMap<EntityId, Entity>,
    /// Embedding dimension, fixed by the first inserted fact.
    dimension: Option<usize>,
}

/// Indexing heap for the RAM-resident writer; commits are frequent and
/// per-bank corpora are small, so this stays well under segment-merge
/// pressure.
const WRITER_HEAP_BYTES: usize = 64 * 1024 * 1024;

/// Inverted index over fact text and context, shared across banks with
/// a bank filter term per query.
struct TextIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    id_field: Field,
    bank_field: Field,
    type_field: Field,
    text_field: Field,
    context_field: Field,
}

impl TextIndex {
    fn new() -> Result<Self> {
        let mut schema_builder = Schema::builder();

        // Fact ID (stored, not tokenized)
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        // Bank and fact type as raw filter terms
        let bank_field = schema_builder.add_text_field("bank", STRING);
        let type_field = schema_builder.add_text_field("fact_type", STRING);
        // Tokenized body fields
        let text_field = schema_builder.add_text_field("text", TEXT);
        let context_field = schema_builder.add_text_field("context", TEXT);

        let schema = schema_builder.build();
        let index = Index::create_in_ram(schema);

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")?;

        let reader = index
            .reader_builder()
            .reload_policy(tantivy::ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("Failed to create index reader")?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            id_field,
            bank_field,
            type_field,
            text_field,
            context_field,
        })
    }

    fn upsert(&self, fact: &Fact) -> Result<()> {
        let writer = self.writer.read();

        let id_term = Term::from_field_text(self.id_field, &fact.id.to_string());
        writer.delete_term(id_term);

        let mut doc = TantivyDocument::new();
        doc.add_text(self.id_field, fact.id.to_string());
        doc.add_text(self.bank_field, fact.bank_id.as_str());
        doc.add_text(self.type_field, fact.fact_type.as_str());
        doc.add_text(self.text_field, &fact.text);
        if let Some(context) = &fact.context {
            doc.add_text(self.context_field, context);
        }

        writer.add_document(doc)?;
        Ok(())
    }

    fn delete(&self, fact_id: &FactId) -> Result<()> {
        let writer = self.writer.read();
        let id_term = Term::from_field_text(self.id_field, &fact_id.to_string());
        writer.delete_term(id_term);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut writer = self.writer.write();
        writer.commit().context("Failed to commit text index")?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    fn search(
        &self,
        bank: &BankId,
        fact_types: &[FactType],
        query: &str,
        limit: usize,
    ) -> Result<Vec<(FactId, f32)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Callers send natural language, not tantivy query syntax.
        // Reduce the input to bare alphanumeric terms up front so
        // punctuation and operator characters can never reach the
        // parser in the first place.
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|word| word.chars().filter(|c| c.is_alphanumeric()).collect())
            .filter(|term: &String| !term.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser =
            QueryParser::for_index(&self.index, vec![self.text_field, self.context_field]);

        let parsed_query = match query_parser.parse_query(&terms.join(" ")) {
            Ok(q) => q,
            Err(e) => {
                debug!("Unparseable term query '{}': {}", terms.join(" "), e);
                return Ok(Vec::new());
            }
        };

        let bank_term: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.bank_field, bank.as_str()),
            IndexRecordOption::Basic,
        ));

        let mut clauses: Vec<(Occur, Box<dyn Query>)> =
            vec![(Occur::Must, bank_term), (Occur::Must, parsed_query)];

        if fact_types.len() < FactType::ALL.len() {
            let type_clauses: Vec<(Occur, Box<dyn Query>)> = fact_types
                .iter()
                .map(|t| {
                    let q: Box<dyn Query> = Box::new(TermQuery::new(
                        Term::from_field_text(self.type_field, t.as_str()),
                        IndexRecordOption::Basic,
                    ));
                    (Occur::Should, q)
                })
                .collect();
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(type_clauses))));
        }

        let scoped = BooleanQuery::new(clauses);

        let top_docs = searcher
            .search(&scoped, &TopDocs::with_limit(limit))
            .context("BM25 search failed")?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            if let Ok(doc) = searcher.doc::<TantivyDocument>(doc_address) {
                if let Some(id_value) = doc.get_first(self.id_field) {
                    if let Some(id_str) = id_value.as_str() {
                        if let Ok(uuid) = uuid::Uuid::parse_str(id_str) {
                            results.push((FactId(uuid), score));
                        }
                    }
                }
            }
        }

        // Stable order regardless of index segment layout
        results.sort_by(|a, b| {
            OrderedFloat(b.1)
                .cmp(&OrderedFloat(a.1))
                .then_with(|| a.0.cmp(&b.0))
        });

        Ok(results)
    }
}

/// In-memory reference store.
///
/// The write surface (`create_bank`, `insert_*`, `commit`) belongs to
/// the ingestion side and enforces the data-model invariants; the
/// engine itself only ever touches the read trait.
pub struct InMemoryStore {
    banks: RwLock<HashMap<BankId, BankShard>>,
    text_index: TextIndex,
}

impl InMemoryStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            banks: RwLock::new(HashMap::new()),
            text_index: TextIndex::new()?,
        })
    }

    pub fn create_bank(&self, bank: &BankId) {
        self.banks.write().entry(bank.clone()).or_default();
    }

    pub fn insert_entity(&self, entity: Entity) -> Result<()> {
        let mut banks = self.banks.write();
        let shard = banks
            .get_mut(&entity.bank_id)
            .ok_or_else(|| anyhow!("unknown bank '{}'", entity.bank_id))?;
        shard.entities.insert(entity.id, entity);
        Ok(())
    }

    pub fn insert_fact(&self, fact: Fact) -> Result<()> {
        if let (Some(start), Some(end)) = (fact.occurred_start, fact.occurred_end) {
            if start > end {
                return Err(anyhow!("occurred_start after occurred_end"));
            }
        }
        if let Some(confidence) = fact.confidence {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(anyhow!("confidence outside [0, 1]"));
            }
        }

        let mut banks = self.banks.write();
        let shard = banks
            .get_mut(&fact.bank_id)
            .ok_or_else(|| anyhow!("unknown bank '{}'", fact.bank_id))?;

        match shard.dimension {
            Some(dim) if dim != fact.embedding.len() => {
                return Err(anyhow!(
                    "embedding dimension {} does not match bank dimension {}",
                    fact.embedding.len(),
                    dim
                ));
            }
            None => shard.dimension = Some(fact.embedding.len()),
            _ => {}
        }

        for entity_id in &fact.entity_refs {
            if !shard.entities.contains_key(entity_id) {
                return Err(anyhow!("entity {} not in bank '{}'", entity_id, fact.bank_id));
            }
        }

        self.text_index.upsert(&fact)?;
        shard.facts.insert(fact.id, Arc::new(fact));
        Ok(())
    }

    pub fn insert_link(&self, bank: &BankId, link: Link) -> Result<()> {
        if !link.weight.is_finite() || link.weight <= 0.0 || link.weight > 1.0 {
            return Err(anyhow!("link weight outside (0, 1]"));
        }

        let mut banks = self.banks.write();
        let shard = banks
            .get_mut(bank)
            .ok_or_else(|| anyhow!("unknown bank '{}'", bank))?;

        if !shard.facts.contains_key(&link.source_id) || !shard.facts.contains_key(&link.target_id)
        {
            return Err(anyhow!("link endpoints must exist in bank '{}'", bank));
        }

        shard.links.entry(link.source_id).or_default().push(link);
        Ok(())
    }

    pub fn delete_fact(&self, bank: &BankId, fact_id: &FactId) -> Result<()> {
        let mut banks = self.banks.write();
        let shard = banks
            .get_mut(bank)
            .ok_or_else(|| anyhow!("unknown bank '{}'", bank))?;
        shard.facts.remove(fact_id);
        shard.links.remove(fact_id);
        for links in shard.links.values_mut() {
            links.retain(|l| l.target_id != *fact_id);
        }
        self.text_index.delete(fact_id)
    }

    /// Make pending text-index writes visible to searches.
    pub fn commit(&self) -> Result<()> {
        self.text_index.commit()
    }
}

#[async_trait]
impl FactStore for InMemoryStore {
    async fn bank_exists(&self, bank: &BankId) -> Result<bool> {
        Ok(self.banks.read().contains_key(bank))
    }

    async fn vector_topk(
        &self,
        bank: &BankId,
        fact_types: &[FactType],
        query_vec: &[f32],
        k: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<(FactId, f32)>> {
        let banks = self.banks.read();
        let shard = banks
            .get(bank)
            .ok_or_else(|| anyhow!("unknown bank '{}'", bank))?;

        let mut scored: Vec<(OrderedFloat<f32>, FactId)> = Vec::new();
        for fact in shard.facts.values() {
            if !fact_types.contains(&fact.fact_type) {
                continue;
            }
            if let Some((start, end)) = filters.occurred_range {
                match fact.occurrence(filters.fallback_to_mentioned) {
                    Some(at) if at >= start && at <= end => {}
                    _ => continue,
                }
            }
            let similarity = cosine_similarity(query_vec, &fact.embedding);
            if let Some(min) = filters.min_similarity {
                if similarity < min {
                    continue;
                }
            }
            scored.push((OrderedFloat(similarity), fact.id));
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored.into_iter().map(|(s, id)| (id, s.0)).collect())
    }

    async fn bm25_topk(
        &self,
        bank: &BankId,
        fact_types: &[FactType],
        query_text: &str,
        k: usize,
    ) -> Result<Vec<(FactId, f32)>> {
        self.text_index.search(bank, fact_types, query_text, k)
    }

    async fn links_from(
        &self,
        bank: &BankId,
        fact_id: &FactId,
        link_types: &[LinkType],
    ) -> Result<Vec<Link>> {
        let banks = self.banks.read();
        let shard = banks
            .get(bank)
            .ok_or_else(|| anyhow!("unknown bank '{}'", bank))?;

        Ok(shard
            .links
            .get(fact_id)
            .map(|links| {
                links
                    .iter()
                    .filter(|l| link_types.contains(&l.link_type))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_facts(&self, bank: &BankId, ids: &[FactId]) -> Result<Vec<SharedFact>> {
        let banks = self.banks.read();
        let shard = banks
            .get(bank)
            .ok_or_else(|| anyhow!("unknown bank '{}'", bank))?;

        Ok(ids
            .iter()
            .filter_map(|id| shard.facts.get(id).cloned())
            .collect())
    }

    async fn fetch_entities(&self, bank: &BankId, ids: &[EntityId]) -> Result<Vec<Entity>> {
        let banks = self.banks.read();
        let shard = banks
            .get(bank)
            .ok_or_else(|| anyhow!("unknown bank '{}'", bank))?;

        Ok(ids
            .iter()
            .filter_map(|id| shard.entities.get(id).cloned())
            .collect())
    }

    async fn entity_observations(
        &self,
        bank: &BankId,
        entity_ids: &[EntityId],
        token_cap: usize,
    ) -> Result<Vec<EntityObservation>> {
        let banks = self.banks.read();
        let shard = banks
            .get(bank)
            .ok_or_else(|| anyhow!("unknown bank '{}'", bank))?;

        let mut budget = token_cap;
        let mut payload = Vec::new();

        for entity_id in entity_ids {
            let Some(entity) = shard.entities.get(entity_id) else {
                continue;
            };

            let mut observed: Vec<&SharedFact> = shard
                .facts
                .values()
                .filter(|f| {
                    f.fact_type == FactType::Observation && f.entity_refs.contains(entity_id)
                })
                .collect();
            // Most recent first
            observed.sort_by(|a, b| {
                b.mentioned_at
                    .cmp(&a.mentioned_at)
                    .then_with(|| a.id.cmp(&b.id))
            });

            let mut observations = Vec::new();
            for fact in observed {
                let cost = fact.token_cost();
                if cost > budget {
                    break;
                }
                budget -= cost;
                observations.push(fact.text.clone());
            }

            payload.push(EntityObservation {
                entity_id: *entity_id,
                canonical_name: entity.canonical_name.clone(),
                mention_count: entity.mention_count,
                observations,
            });
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn bank() -> BankId {
        BankId::from("test-bank")
    }

    fn make_fact(bank: &BankId, text: &str, embedding: Vec<f32>) -> Fact {
        Fact {
            id: FactId(Uuid::new_v4()),
            bank_id: bank.clone(),
            fact_type: FactType::World,
            text: text.to_string(),
            context: None,
            embedding,
            occurred_start: None,
            occurred_end: None,
            mentioned_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            document_id: None,
            chunk_id: None,
            entity_refs: Vec::new(),
            confidence: None,
            tags: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_vector_topk_orders_by_similarity() {
        let store = InMemoryStore::new().unwrap();
        let b = bank();
        store.create_bank(&b);

        let close = make_fact(&b, "close", vec![1.0, 0.0]);
        let far = make_fact(&b, "far", vec![0.0, 1.0]);
        let close_id = close.id;
        store.insert_fact(close).unwrap();
        store.insert_fact(far).unwrap();

        let hits = store
            .vector_topk(
                &b,
                &FactType::ALL,
                &[1.0, 0.0],
                10,
                &VectorFilters::default(),
            )
            .await
            .unwrap();

        assert_eq!(hits[0].0, close_id);
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn test_vector_topk_respects_min_similarity() {
        let store = InMemoryStore::new().unwrap();
        let b = bank();
        store.create_bank(&b);

        store
            .insert_fact(make_fact(&b, "orthogonal", vec![0.0, 1.0]))
            .unwrap();

        let filters = VectorFilters {
            min_similarity: Some(0.4),
            ..Default::default()
        };
        let hits = store
            .vector_topk(&b, &FactType::ALL, &[1.0, 0.0], 10, &filters)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_bm25_scoped_by_bank() {
        let store = InMemoryStore::new().unwrap();
        let bank_a = BankId::from("bank-a");
        let bank_b = BankId::from("bank-b");
        store.create_bank(&bank_a);
        store.create_bank(&bank_b);

        let fact_a = make_fact(&bank_a, "Rust powers the retrieval engine", vec![1.0]);
        let a_id = fact_a.id;
        store.insert_fact(fact_a).unwrap();
        store
            .insert_fact(make_fact(&bank_b, "Rust powers the other bank", vec![1.0]))
            .unwrap();
        store.commit().unwrap();

        let hits = store
            .bm25_topk(&bank_a, &FactType::ALL, "Rust retrieval", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, a_id);
    }

    #[tokio::test]
    async fn test_bm25_sanitizes_query_syntax() {
        let store = InMemoryStore::new().unwrap();
        let b = bank();
        store.create_bank(&b);

        let fact = make_fact(&b, "Alice works at Google", vec![1.0]);
        let id = fact.id;
        store.insert_fact(fact).unwrap();
        store.commit().unwrap();

        // Operator characters must not derail or redefine the search
        let hits = store
            .bm25_topk(&b, &FactType::ALL, "alice? (works: +google!)", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, id);

        // Pure punctuation carries no terms at all
        let hits = store
            .bm25_topk(&b, &FactType::ALL, "?! ()", 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_insert_rejects_mismatched_dimension() {
        let store = InMemoryStore::new().unwrap();
        let b = bank();
        store.create_bank(&b);

        store
            .insert_fact(make_fact(&b, "first", vec![1.0, 0.0]))
            .unwrap();
        let err = store
            .insert_fact(make_fact(&b, "second", vec![1.0, 0.0, 0.0]))
            .unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[tokio::test]
    async fn test_insert_rejects_inverted_occurrence() {
        let store = InMemoryStore::new().unwrap();
        let b = bank();
        store.create_bank(&b);

        let mut fact = make_fact(&b, "inverted", vec![1.0]);
        fact.occurred_start = Some(Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
        fact.occurred_end = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert!(store.insert_fact(fact).is_err());
    }

    #[tokio::test]
    async fn test_link_weight_validation() {
        let store = InMemoryStore::new().unwrap();
        let b = bank();
        store.create_bank(&b);

        let f1 = make_fact(&b, "one", vec![1.0]);
        let f2 = make_fact(&b, "two", vec![1.0]);
        let (id1, id2) = (f1.id, f2.id);
        store.insert_fact(f1).unwrap();
        store.insert_fact(f2).unwrap();

        assert!(store
            .insert_link(
                &b,
                Link {
                    source_id: id1,
                    target_id: id2,
                    link_type: LinkType::Entity,
                    weight: 0.0,
                }
            )
            .is_err());

        assert!(store
            .insert_link(
                &b,
                Link {
                    source_id: id1,
                    target_id: id2,
                    link_type: LinkType::Entity,
                    weight: 0.8,
                }
            )
            .is_ok());
    }

    #[tokio::test]
    async fn test_fetch_facts_preserves_order_and_skips_unknown() {
        let store = InMemoryStore::new().unwrap();
        let b = bank();
        store.create_bank(&b);

        let f1 = make_fact(&b, "one", vec![1.0]);
        let f2 = make_fact(&b, "two", vec![1.0]);
        let (id1, id2) = (f1.id, f2.id);
        store.insert_fact(f1).unwrap();
        store.insert_fact(f2).unwrap();

        let unknown = FactId(Uuid::new_v4());
        let fetched = store
            .fetch_facts(&b, &[id2, unknown, id1])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].id, id2);
        assert_eq!(fetched[1].id, id1);
    }

    #[tokio::test]
    async fn test_store_deadline_wrapper() {
        let b = bank();
        let result: Result<(), EngineError> = with_store_deadline(
            Duration::from_millis(10),
            "vector_topk",
            &b,
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            },
        )
        .await;

        match result {
            Err(EngineError::StoreDeadline { operation }) => {
                assert_eq!(operation, "vector_topk")
            }
            other => panic!("expected StoreDeadline, got {other:?}"),
        }
    }
}
