//! Engram-Memory Library
//!
//! Retrieval engine for long-term AI-agent memory banks.
//! Facts live in a typed graph (entity, semantic, temporal, and causal
//! links) alongside vector and inverted indices; recall fans out over
//! four strategies and fuses their rankings.
//!
//! # Key Features
//! - Four parallel retrieval strategies (semantic, lexical/BM25, graph
//!   spreading activation, temporal graph)
//! - Reciprocal-rank fusion across strategies and fact-type partitions
//! - Cross-encoder reranking under a token budget
//! - Reproducible trace of every ranking decision
//!
//! # Integration Points
//! - Embedding and cross-encoder models are trait objects; the engine
//!   never depends on a specific model
//! - The persistent store is behind the [`memory::FactStore`] trait; an
//!   in-memory reference implementation ships with the crate

pub mod config;
pub mod constants;
pub mod embeddings;
pub mod errors;
pub mod memory;
pub mod metrics;
pub mod similarity;
pub mod tracing_setup;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use parking_lot;
pub use uuid;
