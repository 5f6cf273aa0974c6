//! Language-model seam.
//!
//! The pipeline talks to a language model at exactly two points: intent
//! classification and answer summarization. Both go through the
//! [`LanguageModel`] trait so the transport lives outside this crate and
//! tests can script responses. Model failures are advisory: classification
//! falls back to heuristics and summarization falls back to deterministic
//! rendering, so a dead model never takes the pipeline down.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use regask_db::Row;

/// Failure modes of a language-model call.
#[derive(Debug, Error)]
pub enum LlmCallError {
    /// The call did not complete within its deadline.
    #[error("Model call timed out after {timeout_ms} ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Transport-level failure (connection refused, TLS, HTTP 5xx).
    #[error("Model transport error: {0}")]
    Transport(String),

    /// The model replied but the reply could not be parsed.
    #[error("Malformed model response: {0}")]
    Malformed(String),

    /// No model is configured or reachable.
    #[error("Language model unavailable: {0}")]
    Unavailable(String),
}

/// Raw classification output from the model: an intent label plus any
/// company/location spans it identified in the question.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentGuess {
    /// Intent label; must parse into a known intent to be used.
    pub intent: String,
    /// Company name or identifier mentioned in the question, if any.
    #[serde(default)]
    pub company: Option<String>,
    /// Location mentioned in the question, if any.
    #[serde(default)]
    pub location: Option<String>,
}

/// The two model-backed operations of the pipeline.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Classify a question into an intent and extract entity spans.
    async fn classify(&self, question: &str) -> Result<IntentGuess, LlmCallError>;

    /// Summarize result rows into a short natural-language answer.
    ///
    /// Implementations must instruct the model to state only facts present
    /// in `rows`; the caller still checks the output for groundedness.
    async fn summarize(&self, question: &str, rows: &[Row]) -> Result<String, LlmCallError>;
}

/// A model that is never available.
///
/// Used in offline mode: classification falls back to heuristics and answers
/// render deterministically.
#[derive(Debug, Default)]
pub struct UnavailableModel;

#[async_trait]
impl LanguageModel for UnavailableModel {
    async fn classify(&self, _question: &str) -> Result<IntentGuess, LlmCallError> {
        Err(LlmCallError::Unavailable("offline mode".to_string()))
    }

    async fn summarize(&self, _question: &str, _rows: &[Row]) -> Result<String, LlmCallError> {
        Err(LlmCallError::Unavailable("offline mode".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_model_always_fails() {
        let model = UnavailableModel;
        assert!(matches!(
            model.classify("where is petrobras").await,
            Err(LlmCallError::Unavailable(_))
        ));
        assert!(matches!(
            model.summarize("q", &[]).await,
            Err(LlmCallError::Unavailable(_))
        ));
    }

    #[test]
    fn test_intent_guess_deserializes_with_missing_spans() {
        let guess: IntentGuess = serde_json::from_str(r#"{"intent":"locate_company"}"#).unwrap();
        assert_eq!(guess.intent, "locate_company");
        assert!(guess.company.is_none());
        assert!(guess.location.is_none());
    }
}
