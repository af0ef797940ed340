//! Embedding integration
//!
//! The engine never depends on a specific embedding model: callers hand
//! in any [`Embedder`] implementation and the engine wraps it in a
//! per-process cache keyed by exact text. Implementations must be
//! deterministic for identical input.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::constants::EMBED_CACHE_MAX_ENTRIES;

/// Trait for embedding generation.
pub trait Embedder: Send + Sync {
    /// Generate an embedding for text.
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Get embedding dimension.
    fn dimension(&self) -> usize;

    /// Batch encode multiple texts.
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }
}

/// Process-wide caching wrapper around an [`Embedder`].
///
/// The cache is keyed by exact text. Vectors are shared as `Arc` so
/// repeated queries never re-clone the embedding.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<HashMap<String, Arc<Vec<f32>>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Encode text, consulting the cache first.
    pub fn encode(&self, text: &str) -> Result<Arc<Vec<f32>>> {
        if let Some(cached) = self.cache.lock().get(text) {
            return Ok(Arc::clone(cached));
        }

        let vec = Arc::new(self.inner.encode(text)?);

        let mut cache = self.cache.lock();
        // Unbounded growth would leak on adversarial query streams;
        // wholesale clearing keeps the hot path allocation-free.
        if cache.len() >= EMBED_CACHE_MAX_ENTRIES {
            cache.clear();
        }
        cache.insert(text.to_string(), Arc::clone(&vec));

        Ok(vec)
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    /// Number of cached embeddings.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}
