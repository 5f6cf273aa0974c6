//! OpenAI-compatible chat client.
//!
//! Works against any OpenAI-compatible API (OpenAI, Groq, Ollama with /v1,
//! local servers); providers differ only by endpoint URL and API key. The
//! client implements the pipeline's [`LanguageModel`] seam: classification
//! asks for strict JSON within the fixed intent set, summarization receives
//! result rows as JSON and is instructed to state only facts found in them.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use regask_core::{IntentGuess, LanguageModel, LlmCallError};
use regask_db::Row;

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify questions about a national company \
registry. Reply with strict JSON only, no prose and no code fences: \
{\"intent\": \"...\", \"company\": \"...\" or null, \"location\": \"...\" or null}. \
The intent must be exactly one of: lookup_by_name, lookup_by_location, list_branches, \
find_similar, unsupported. \"company\" is the company name or registry identifier \
mentioned in the question, copied verbatim. Use \"unsupported\" for anything the \
registry cannot answer.";

const SUMMARIZE_SYSTEM_PROMPT: &str = "You summarize company-registry query results. \
You will receive result rows as JSON. Write one short paragraph answering the \
question using ONLY values present in the rows. Do not add names, numbers, dates, \
or facts that are not in the rows. If the rows do not answer the question, say so.";

/// Chat client for any OpenAI-compatible endpoint.
pub struct OpenAiChatModel {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout_ms: u64,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    /// Create a client.
    ///
    /// `base_url` is the API root (e.g. `https://api.groq.com/openai/v1`);
    /// `api_key` of `None` sends unauthenticated requests (local servers).
    /// The timeout applies per request.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LlmCallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmCallError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            timeout_ms: timeout.as_millis() as u64,
            client,
        })
    }

    /// Read the API key from an environment variable; absent means none.
    pub fn api_key_from_env(var: &str) -> Option<String> {
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, LlmCallError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmCallError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                LlmCallError::Transport(format!("connection to {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!("Chat endpoint returned {}: {}", status, text);
            return Err(LlmCallError::Transport(format!(
                "chat endpoint returned HTTP {}",
                status
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmCallError::Malformed(e.to_string()))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LlmCallError::Malformed("response carries no message content".to_string())
            })?;
        Ok(content.to_string())
    }
}

/// Strip Markdown code fences some models wrap JSON in.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim_end_matches('`').trim()
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn classify(&self, question: &str) -> Result<IntentGuess, LlmCallError> {
        let reply = self.chat(CLASSIFY_SYSTEM_PROMPT, question).await?;
        let cleaned = strip_code_fences(&reply);
        serde_json::from_str(cleaned).map_err(|e| {
            LlmCallError::Malformed(format!("classification is not valid JSON: {}", e))
        })
    }

    async fn summarize(&self, question: &str, rows: &[Row]) -> Result<String, LlmCallError> {
        let rows_json = serde_json::to_string(rows)
            .map_err(|e| LlmCallError::Malformed(e.to_string()))?;
        let user = format!("Question: {}\nResult rows: {}", question, rows_json);
        let reply = self.chat(SUMMARIZE_SYSTEM_PROMPT, &user).await?;
        Ok(reply.trim().to_string())
    }
}
