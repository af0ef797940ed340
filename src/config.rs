//! Configuration management for the retrieval engine
//!
//! Sensible defaults, overridable through `ENGRAM_*` environment
//! variables for production tuning.

use std::env;
use std::time::Duration;

use tracing::info;

use crate::constants::{
    CROSS_ENCODER_MAX_CONCURRENCY, CROSS_ENCODER_QUEUE_THRESHOLD, DEFAULT_MAX_TOKENS,
    DEFAULT_REQUEST_DEADLINE, DEFAULT_TOP_K, STORE_CALL_DEADLINE,
};
use crate::memory::types::Budget;

/// Runtime configuration for a [`crate::memory::RecallEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Node budget used when the caller does not specify one.
    pub default_budget: Budget,

    /// End-to-end request deadline used when the caller does not
    /// specify one.
    pub default_deadline: Duration,

    /// Hard per-call deadline for store adapter operations.
    pub store_call_deadline: Duration,

    /// Default token budget for assembled results.
    pub default_max_tokens: usize,

    /// Default post-rerank result cap.
    pub default_top_k: usize,

    /// Concurrent cross-encoder inferences. Defaults to
    /// min(CPU cores, 4).
    pub cross_encoder_concurrency: usize,

    /// Inference queue depth above which backpressure kicks in.
    pub queue_depth_threshold: usize,

    /// Whether facts without `occurred_start` fall back to
    /// `mentioned_at` for temporal filtering. Per-request override via
    /// `RecallOptions`.
    pub temporal_fallback_to_mentioned: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            default_budget: Budget::Mid,
            default_deadline: DEFAULT_REQUEST_DEADLINE,
            store_call_deadline: STORE_CALL_DEADLINE,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            default_top_k: DEFAULT_TOP_K,
            cross_encoder_concurrency: cores.min(CROSS_ENCODER_MAX_CONCURRENCY),
            queue_depth_threshold: CROSS_ENCODER_QUEUE_THRESHOLD,
            temporal_fallback_to_mentioned: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Recognized variables:
    /// - `ENGRAM_DEFAULT_BUDGET`: low | mid | high
    /// - `ENGRAM_DEADLINE_MS`: request deadline in milliseconds
    /// - `ENGRAM_STORE_DEADLINE_MS`: per-call store deadline
    /// - `ENGRAM_MAX_TOKENS`: default token budget
    /// - `ENGRAM_TOP_K`: default result cap
    /// - `ENGRAM_CROSS_ENCODER_CONCURRENCY`: inference parallelism
    /// - `ENGRAM_QUEUE_DEPTH_THRESHOLD`: backpressure threshold
    /// - `ENGRAM_TEMPORAL_FALLBACK`: true | false
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("ENGRAM_DEFAULT_BUDGET") {
            match val.to_lowercase().as_str() {
                "low" => config.default_budget = Budget::Low,
                "mid" => config.default_budget = Budget::Mid,
                "high" => config.default_budget = Budget::High,
                other => {
                    tracing::warn!("Unknown ENGRAM_DEFAULT_BUDGET '{}', keeping default", other)
                }
            }
        }

        if let Some(ms) = parse_env_u64("ENGRAM_DEADLINE_MS") {
            config.default_deadline = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_env_u64("ENGRAM_STORE_DEADLINE_MS") {
            config.store_call_deadline = Duration::from_millis(ms);
        }

        if let Some(n) = parse_env_u64("ENGRAM_MAX_TOKENS") {
            config.default_max_tokens = n as usize;
        }

        if let Some(n) = parse_env_u64("ENGRAM_TOP_K") {
            config.default_top_k = n as usize;
        }

        if let Some(n) = parse_env_u64("ENGRAM_CROSS_ENCODER_CONCURRENCY") {
            config.cross_encoder_concurrency = (n as usize).max(1);
        }

        if let Some(n) = parse_env_u64("ENGRAM_QUEUE_DEPTH_THRESHOLD") {
            config.queue_depth_threshold = n as usize;
        }

        if let Ok(val) = env::var("ENGRAM_TEMPORAL_FALLBACK") {
            config.temporal_fallback_to_mentioned = val.to_lowercase() == "true" || val == "1";
        }

        info!(
            budget = ?config.default_budget,
            deadline_ms = config.default_deadline.as_millis() as u64,
            store_deadline_ms = config.store_call_deadline.as_millis() as u64,
            cross_encoder_concurrency = config.cross_encoder_concurrency,
            "Engine configuration loaded"
        );

        config
    }
}

fn parse_env_u64(name: &str) -> Option<u64> {
    match env::var(name) {
        Ok(val) => match val.parse() {
            Ok(n) => Some(n),
            Err(_) => {
                tracing::warn!("Ignoring non-numeric {}={}", name, val);
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_budget, Budget::Mid);
        assert_eq!(config.default_deadline, Duration::from_secs(2));
        assert_eq!(config.store_call_deadline, Duration::from_millis(500));
        assert_eq!(config.default_max_tokens, 4096);
        assert_eq!(config.default_top_k, 10);
        assert!(config.cross_encoder_concurrency >= 1);
        assert!(config.cross_encoder_concurrency <= 4);
        assert!(config.temporal_fallback_to_mentioned);
    }
}
