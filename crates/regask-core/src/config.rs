//! Configuration types for the registry pipeline.
//!
//! This module provides the configuration structures used by the pipeline:
//! - [`PipelineConfig`]: top-level configuration, loadable from a YAML file
//! - [`RetrievalConfig`]: hybrid-retrieval tuning
//! - [`ExecutorConfig`]: query-execution limits
//! - [`LlmConfig`]: language-model endpoint and timeouts
//!
//! Missing files fall back to defaults; [`PipelineConfig::validate`] returns
//! soft warnings for questionable values and hard errors for unusable ones.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{RegaskError, RegaskResult};

// ============================================================================
// Defaults
// ============================================================================

/// Default number of candidates kept by hybrid retrieval.
pub const DEFAULT_TOP_K: usize = 10;

/// Default candidate threshold below which the semantic leg is consulted.
pub const DEFAULT_SEMANTIC_MIN_CANDIDATES: usize = 3;

/// Default number of neighbors returned by similarity search.
pub const DEFAULT_SEMANTIC_TOP_K: usize = 10;

/// Default hard row limit per query.
pub const DEFAULT_ROW_LIMIT: usize = 50;

/// Default per-query timeout in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 2000;

/// Default per-model-call timeout in milliseconds.
pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 8000;

/// Default chat model name.
pub const DEFAULT_LLM_MODEL: &str = "gemma2-9b-it";

/// Default environment variable holding the model API key.
pub const DEFAULT_API_KEY_ENV: &str = "REGASK_API_KEY";

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_semantic_min_candidates() -> usize {
    DEFAULT_SEMANTIC_MIN_CANDIDATES
}

fn default_semantic_top_k() -> usize {
    DEFAULT_SEMANTIC_TOP_K
}

fn default_row_limit() -> usize {
    DEFAULT_ROW_LIMIT
}

fn default_query_timeout_ms() -> u64 {
    DEFAULT_QUERY_TIMEOUT_MS
}

fn default_llm_timeout_ms() -> u64 {
    DEFAULT_LLM_TIMEOUT_MS
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

// ============================================================================
// Sections
// ============================================================================

/// Hybrid-retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalConfig {
    /// Candidates kept after merging, best first.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// When exact+lexical produce fewer candidates than this, the semantic
    /// leg is consulted.
    #[serde(default = "default_semantic_min_candidates")]
    pub semantic_min_candidates: usize,

    /// Neighbors returned by activity-similarity search.
    #[serde(default = "default_semantic_top_k")]
    pub semantic_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            semantic_min_candidates: default_semantic_min_candidates(),
            semantic_top_k: default_semantic_top_k(),
        }
    }
}

/// Query-execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Hard row limit per query.
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,

    /// Per-query timeout in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            row_limit: default_row_limit(),
            timeout_ms: default_query_timeout_ms(),
        }
    }
}

/// Language-model endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// OpenAI-compatible base URL, e.g. `https://api.groq.com/openai/v1`.
    /// `None` means no model is configured; the pipeline runs offline.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Chat model name.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-call timeout in milliseconds.
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_llm_timeout_ms(),
        }
    }
}

// ============================================================================
// PipelineConfig
// ============================================================================

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Hybrid-retrieval tuning.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Query-execution limits.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Language-model endpoint.
    #[serde(default)]
    pub llm: LlmConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file; a missing file yields defaults.
    pub fn from_path(path: impl AsRef<Path>) -> RegaskResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Returns soft warnings for questionable values; unusable values are
    /// hard errors.
    pub fn validate(&self) -> RegaskResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.retrieval.top_k == 0 {
            return Err(RegaskError::invalid_configuration(
                "retrieval.topK is 0",
                "Set topK to at least 1",
            ));
        }
        if self.executor.row_limit == 0 {
            return Err(RegaskError::invalid_configuration(
                "executor.rowLimit is 0",
                "Set rowLimit to at least 1",
            ));
        }
        if self.executor.timeout_ms == 0 {
            return Err(RegaskError::invalid_configuration(
                "executor.timeoutMs is 0",
                "Set timeoutMs to a positive duration",
            ));
        }

        if self.retrieval.top_k > 100 {
            warnings.push(format!(
                "retrieval.topK = {} is unusually large; answers use only the leading candidates",
                self.retrieval.top_k
            ));
        }
        if self.executor.row_limit > regask_db::MAX_REQUEST_LIMIT {
            warnings.push(format!(
                "executor.rowLimit = {} exceeds the storage cap of {} and will be clamped",
                self.executor.row_limit,
                regask_db::MAX_REQUEST_LIMIT
            ));
        }
        if self.llm.endpoint.is_none() {
            warnings.push(
                "llm.endpoint is not set; classification and summarization run on heuristics only"
                    .to_string(),
            );
        }

        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = PipelineConfig::from_path("/nonexistent/regask.yaml").unwrap();
        assert_eq!(config.retrieval.top_k, DEFAULT_TOP_K);
        assert_eq!(config.executor.row_limit, DEFAULT_ROW_LIMIT);
        assert!(config.llm.endpoint.is_none());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: PipelineConfig =
            serde_yaml::from_str("retrieval:\n  topK: 5\n").unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(
            config.retrieval.semantic_min_candidates,
            DEFAULT_SEMANTIC_MIN_CANDIDATES
        );
        assert_eq!(config.executor.timeout_ms, DEFAULT_QUERY_TIMEOUT_MS);
    }

    #[test]
    fn test_zero_row_limit_is_a_hard_error() {
        let mut config = PipelineConfig::default();
        config.executor.row_limit = 0;
        assert!(matches!(
            config.validate(),
            Err(RegaskError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_missing_endpoint_is_only_a_warning() {
        let config = PipelineConfig::default();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("llm.endpoint")));
    }
}
