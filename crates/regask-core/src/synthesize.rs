//! Answer synthesis.
//!
//! Turns (question, intent, result rows) into the final [`Answer`]. Two
//! modes: `structured` for single-entity lookups (top row plus a short
//! sentence) and `text` for summarization-style questions. Narrative text
//! may come from the language model, but only result rows are handed to it
//! and the output is post-checked for groundedness: a summary whose proper
//! nouns or numbers cannot be traced back to a field value is discarded in
//! favor of a deterministic rendering. Empty result sets produce a fixed
//! "not found" response naming the searched term, never an invented company.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use regask_db::Row;

use crate::classify::Intent;
use crate::llm::LanguageModel;

// ============================================================================
// Answer
// ============================================================================

/// Presentation mode of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// Structured payload: top row plus a short sentence.
    Structured,
    /// Natural-language paragraph.
    Text,
}

/// Payload of an answer, shaped by its mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerPayload {
    /// Single-entity lookup result.
    #[serde(rename_all = "camelCase")]
    Structured {
        /// The best-matching row.
        row: Row,
        /// One-sentence rendering of the row.
        sentence: String,
    },
    /// Narrative result.
    #[serde(rename_all = "camelCase")]
    Text {
        /// The answer paragraph.
        text: String,
    },
}

/// The pipeline's final response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    /// Presentation mode.
    pub mode: AnswerMode,
    /// Mode-shaped payload.
    pub payload: AnswerPayload,
    /// Row identifiers the answer is based on. Empty for answers that carry
    /// no registry facts (not-found, clarification, failure).
    pub sources: Vec<String>,
    /// Whether classification used the heuristic fallback. Informational.
    pub used_fallback: bool,
}

impl Answer {
    /// A plain text answer with no sources.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            mode: AnswerMode::Text,
            payload: AnswerPayload::Text { text: text.into() },
            sources: Vec::new(),
            used_fallback: false,
        }
    }

    /// Record whether classification fell back to heuristics.
    pub fn with_fallback(mut self, used_fallback: bool) -> Self {
        self.used_fallback = used_fallback;
        self
    }

    /// The answer text, whichever payload shape carries it.
    pub fn display_text(&self) -> &str {
        match &self.payload {
            AnswerPayload::Structured { sentence, .. } => sentence,
            AnswerPayload::Text { text } => text,
        }
    }
}

// ============================================================================
// AnswerSynthesizer
// ============================================================================

/// Words allowed to appear capitalized in a summary without tracing back to
/// a row value (sentence starters and function words).
const GROUNDING_ALLOWLIST: &[&str] = &[
    "the", "these", "there", "this", "those", "all", "both", "among", "its",
    "it", "they", "based", "according", "company", "companies", "branch",
    "branches", "headquarters", "establishment", "establishments", "one",
    "two", "three", "none", "and",
];

/// Synthesizes final answers from result rows.
pub struct AnswerSynthesizer {
    summarize_timeout: Duration,
}

impl AnswerSynthesizer {
    /// Create a synthesizer with the given model-summarization timeout.
    pub fn new(summarize_timeout: Duration) -> Self {
        Self { summarize_timeout }
    }

    /// Fixed response for questions with no structured handling.
    pub fn unsupported(&self) -> Answer {
        Answer::text(
            "This question has no structured handling in the registry pipeline. \
             Ask about a company's location, its branches, or similar companies.",
        )
    }

    /// Fixed "not found" response naming the searched term.
    pub fn not_found(&self, term: &str) -> Answer {
        Answer::text(format!(
            "No company matching \"{}\" was found in the registry.",
            term
        ))
    }

    /// Clarification response listing ambiguous candidates.
    pub fn clarification(&self, term: &str, names: &[(String, String)]) -> Answer {
        let mut text = format!(
            "Several companies match \"{}\" equally well. Which one did you mean?",
            term
        );
        for (id, name) in names.iter().take(3) {
            text.push_str(&format!("\n- {} ({})", name, id));
        }
        Answer::text(text)
    }

    /// Degraded-coverage response: reduced search, not "does not exist".
    pub fn degraded(&self, term: &str) -> Answer {
        Answer::text(format!(
            "No match for \"{}\" was found, but part of the search index was \
             unavailable, so coverage was reduced. The company may still exist \
             in the registry.",
            term
        ))
    }

    /// Generic failure response; details stay in the logs.
    pub fn failure(&self) -> Answer {
        Answer::text(
            "The registry query could not be completed. Please try again.",
        )
    }

    /// Clarification response for a plan that failed validation.
    pub fn needs_clarification(&self, hint: &str) -> Answer {
        Answer::text(format!(
            "The question could not be turned into a registry query. {}.",
            hint
        ))
    }

    /// Synthesize the answer for a non-empty result set.
    pub async fn synthesize(
        &self,
        model: &dyn LanguageModel,
        question: &str,
        intent: Intent,
        rows: &[Row],
    ) -> Answer {
        let sources = collect_sources(rows);
        match intent {
            Intent::LookupByName | Intent::LookupByLocation => {
                let row = rows[0].clone();
                let sentence = render_structured_sentence(intent, &row);
                Answer {
                    mode: AnswerMode::Structured,
                    payload: AnswerPayload::Structured { row, sentence },
                    sources,
                    used_fallback: false,
                }
            }
            Intent::ListBranches | Intent::FindSimilar => {
                let text = self.narrative(model, question, intent, rows).await;
                Answer {
                    mode: AnswerMode::Text,
                    payload: AnswerPayload::Text { text },
                    sources,
                    used_fallback: false,
                }
            }
            Intent::Unsupported => self.unsupported(),
        }
    }

    /// Narrative text: model summary when available and grounded, otherwise
    /// the deterministic rendering.
    async fn narrative(
        &self,
        model: &dyn LanguageModel,
        question: &str,
        intent: Intent,
        rows: &[Row],
    ) -> String {
        let summary =
            tokio::time::timeout(self.summarize_timeout, model.summarize(question, rows)).await;

        match summary {
            Ok(Ok(text)) if summary_is_grounded(&text, rows) => text,
            Ok(Ok(text)) => {
                warn!("Model summary failed the groundedness check, rendering deterministically");
                debug!("Rejected summary: {}", text);
                render_narrative(intent, rows)
            }
            Ok(Err(err)) => {
                debug!("Model summarization failed ({}), rendering deterministically", err);
                render_narrative(intent, rows)
            }
            Err(_) => {
                debug!(
                    "Model summarization timed out after {} ms, rendering deterministically",
                    self.summarize_timeout.as_millis()
                );
                render_narrative(intent, rows)
            }
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn field_str<'a>(row: &'a Row, field: &str) -> Option<&'a str> {
    row.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// One-sentence rendering of a single-entity lookup row.
fn render_structured_sentence(intent: Intent, row: &Row) -> String {
    match intent {
        Intent::LookupByLocation => {
            let mut parts: Vec<&str> = Vec::new();
            for field in ["street", "city", "state", "postal_code"] {
                if let Some(value) = field_str(row, field) {
                    parts.push(value);
                }
            }
            if parts.is_empty() {
                "The headquarters is registered without address details.".to_string()
            } else {
                format!("The headquarters is located at {}.", parts.join(", "))
            }
        }
        _ => {
            let name = field_str(row, "legal_name").unwrap_or("The company");
            let mut sentence = name.to_string();
            if let Some(status) = field_str(row, "status") {
                sentence.push_str(&format!(" ({})", status));
            }
            if let (Some(city), Some(state)) = (field_str(row, "city"), field_str(row, "state")) {
                sentence.push_str(&format!(" is registered in {}, {}", city, state));
            }
            if let Some(activity) = field_str(row, "activity_code") {
                sentence.push_str(&format!(" with primary activity code {}", activity));
            }
            sentence.push('.');
            sentence
        }
    }
}

/// Deterministic narrative rendering, used when no grounded model summary
/// is available.
fn render_narrative(intent: Intent, rows: &[Row]) -> String {
    match intent {
        Intent::ListBranches => {
            let headquarters = rows
                .iter()
                .filter(|r| field_str(r, "branch_flag") == Some("1"))
                .count();
            let branches = rows.len() - headquarters;
            let mut text = format!(
                "The company has {} establishment(s): {} headquarters and {} branch(es).",
                rows.len(),
                headquarters,
                branches
            );
            let cities: Vec<&str> = rows
                .iter()
                .filter_map(|r| field_str(r, "city"))
                .collect();
            if !cities.is_empty() {
                text.push_str(&format!(" Locations: {}.", cities.join(", ")));
            }
            text
        }
        Intent::FindSimilar => {
            let names: Vec<String> = rows
                .iter()
                .filter_map(|r| {
                    let name = field_str(r, "legal_name")?;
                    Some(match field_str(r, "activity_code") {
                        Some(code) => format!("{} (activity {})", name, code),
                        None => name.to_string(),
                    })
                })
                .collect();
            format!(
                "Companies with a similar activity profile: {}.",
                names.join("; ")
            )
        }
        _ => {
            // Fallback shape for intents that normally render structured.
            format!("{} row(s) matched the query.", rows.len())
        }
    }
}

/// Identifiers of the rows an answer is based on.
fn collect_sources(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| {
            if let Some(id) = field_str(row, "cnpj_root") {
                Some(id.to_string())
            } else if let Some(company) = field_str(row, "company_id") {
                match field_str(row, "unit_id") {
                    Some(unit) => Some(format!("{}/{}", company, unit)),
                    None => Some(company.to_string()),
                }
            } else {
                None
            }
        })
        .collect()
}

// ============================================================================
// Groundedness
// ============================================================================

/// Check that every proper noun and number in a summary traces back to a
/// field value in the rows.
///
/// Conservative by design: a rejected-but-honest summary costs a
/// deterministic rendering, an accepted-but-fabricated one costs a wrong
/// answer.
pub fn summary_is_grounded(summary: &str, rows: &[Row]) -> bool {
    let haystack = rows_haystack(rows);

    for token in summary.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }
        let is_number = token.chars().all(|c| c.is_ascii_digit()) && token.len() >= 2;
        let is_proper = token.chars().next().is_some_and(char::is_uppercase) && token.len() >= 3;
        if !is_number && !is_proper {
            continue;
        }
        let lowered = token.to_lowercase();
        if GROUNDING_ALLOWLIST.contains(&lowered.as_str()) {
            continue;
        }
        if !haystack.contains(&lowered) {
            debug!("Ungrounded summary token: {}", token);
            return false;
        }
    }
    true
}

fn rows_haystack(rows: &[Row]) -> String {
    let mut haystack = String::new();
    for row in rows {
        for value in row.values() {
            match value {
                Value::String(s) => {
                    haystack.push_str(&s.to_lowercase());
                    haystack.push(' ');
                }
                Value::Number(n) => {
                    haystack.push_str(&n.to_string());
                    haystack.push(' ');
                }
                _ => {}
            }
        }
    }
    haystack
}
