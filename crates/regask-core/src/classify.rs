//! Question classification.
//!
//! Maps raw question text to one of a fixed set of intents plus extracted
//! entity spans. The language model is consulted first as a best-effort
//! classifier; when the call fails, times out, or returns a label outside
//! the intent set, a deterministic keyword table takes over. A model failure
//! never propagates as a pipeline failure; the answer only records that the
//! fallback path was used.

use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::LanguageModel;

// ============================================================================
// Intent
// ============================================================================

/// The fixed category describing what kind of question was asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// General information about a company identified by name.
    LookupByName,
    /// Where a company (its headquarters) is located.
    LookupByLocation,
    /// List or count the branches of a company.
    ListBranches,
    /// Companies similar to a given company (by economic activity).
    FindSimilar,
    /// No structured handling exists; terminal.
    Unsupported,
}

impl Intent {
    /// Label as it appears in model prompts and serialized answers.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LookupByName => "lookup_by_name",
            Self::LookupByLocation => "lookup_by_location",
            Self::ListBranches => "list_branches",
            Self::FindSimilar => "find_similar",
            Self::Unsupported => "unsupported",
        }
    }

    /// All intents the model may choose from.
    pub fn all() -> &'static [Intent] {
        &[
            Self::LookupByName,
            Self::LookupByLocation,
            Self::ListBranches,
            Self::FindSimilar,
            Self::Unsupported,
        ]
    }

    /// Whether this intent needs a grounded company before planning.
    pub fn requires_company(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lookup_by_name" => Ok(Self::LookupByName),
            "lookup_by_location" => Ok(Self::LookupByLocation),
            "list_branches" => Ok(Self::ListBranches),
            "find_similar" => Ok(Self::FindSimilar),
            "unsupported" => Ok(Self::Unsupported),
            other => Err(format!("Unknown intent label: '{}'", other)),
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Output of the classification stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// The classified intent.
    pub intent: Intent,
    /// Company name/identifier span extracted from the question, if any.
    pub company_span: Option<String>,
    /// Location span extracted from the question, if any.
    pub location_span: Option<String>,
    /// Whether the deterministic fallback produced this classification.
    pub used_fallback: bool,
}

// ============================================================================
// QuestionClassifier
// ============================================================================

/// Keyword patterns for the deterministic fallback, checked in order.
/// First match wins, so the more specific intents come first.
const INTENT_PATTERNS: &[(Intent, &[&str])] = &[
    (
        Intent::FindSimilar,
        &["similar", "semelhante", "parecida", "parecido", "like "],
    ),
    (
        Intent::ListBranches,
        &["filia", "branch", "unidade", "estabelecimento", "quantas", "how many"],
    ),
    (
        Intent::LookupByLocation,
        &[
            "onde", "endereco", "endereço", "address", "where", "fica", "located",
            "sede", "headquarter", "localiza",
        ],
    ),
];

/// Words that start questions and must not be mistaken for company names.
const SPAN_STOPWORDS: &[&str] = &[
    "onde", "fica", "qual", "quais", "quantas", "quantos", "quem", "como",
    "where", "what", "which", "who", "how", "is", "are", "the", "does", "do",
    "empresa", "company", "sede", "da", "de", "do", "a", "o",
];

fn capitalized_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Runs of capitalized words (with optional connectives and dots), or
    // digit runs long enough to be registry identifiers.
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\p{Lu}[\p{L}\.&]*(?:\s+(?:\p{Lu}[\p{L}\.&]*|da|de|do|dos|das|e))*|\d{8,14})\b")
            .expect("capitalized-run pattern is valid")
    })
}

/// Classifies questions into intents, with a model-first strategy and a
/// deterministic heuristic fallback.
pub struct QuestionClassifier {
    timeout: Duration,
}

impl QuestionClassifier {
    /// Create a classifier with the given per-call model timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Classify a question.
    ///
    /// Never fails: any model problem routes to the heuristic table and is
    /// recorded in `used_fallback`.
    pub async fn classify(
        &self,
        model: &dyn LanguageModel,
        question: &str,
    ) -> Classification {
        let model_result =
            tokio::time::timeout(self.timeout, model.classify(question)).await;

        match model_result {
            Ok(Ok(guess)) => match Intent::from_str(&guess.intent) {
                Ok(intent) => {
                    let company_span = guess
                        .company
                        .filter(|s| !s.trim().is_empty())
                        .or_else(|| extract_company_span(question));
                    return Classification {
                        intent,
                        company_span,
                        location_span: guess.location.filter(|s| !s.trim().is_empty()),
                        used_fallback: false,
                    };
                }
                Err(reason) => {
                    debug!("Model intent outside the fixed set ({}), falling back", reason);
                }
            },
            Ok(Err(err)) => {
                debug!("Model classification failed ({}), falling back", err);
            }
            Err(_) => {
                debug!(
                    "Model classification timed out after {} ms, falling back",
                    self.timeout.as_millis()
                );
            }
        }

        self.classify_heuristic(question)
    }

    /// Deterministic keyword classification.
    pub fn classify_heuristic(&self, question: &str) -> Classification {
        let lowered = question.to_lowercase();
        let company_span = extract_company_span(question);

        let mut intent = None;
        for (candidate, keywords) in INTENT_PATTERNS {
            if keywords.iter().any(|kw| lowered.contains(kw)) {
                intent = Some(*candidate);
                break;
            }
        }

        // A recognizable company mention with no matched pattern still reads
        // as a name lookup; otherwise the question is out of scope.
        let intent = intent.unwrap_or(if company_span.is_some() {
            Intent::LookupByName
        } else {
            Intent::Unsupported
        });

        Classification {
            intent,
            company_span,
            location_span: None,
            used_fallback: true,
        }
    }
}

/// Extract the most plausible company span from the question text.
///
/// Picks the longest capitalized run (or registry-identifier digit run) that
/// is not a question stopword.
pub fn extract_company_span(question: &str) -> Option<String> {
    capitalized_run_regex()
        .find_iter(question)
        .map(|m| m.as_str().trim().to_string())
        .filter(|span| {
            let lowered = span.to_lowercase();
            !SPAN_STOPWORDS.contains(&lowered.as_str())
        })
        .max_by_key(|span| span.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::UnavailableModel;

    fn classifier() -> QuestionClassifier {
        QuestionClassifier::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_falls_back_when_model_unavailable() {
        let result = classifier()
            .classify(&UnavailableModel, "Onde fica a sede da Petrobras?")
            .await;
        assert!(result.used_fallback);
        assert_eq!(result.intent, Intent::LookupByLocation);
        assert_eq!(result.company_span.as_deref(), Some("Petrobras"));
    }

    #[test]
    fn test_heuristic_branch_questions() {
        let result = classifier().classify_heuristic("Quantas filiais tem a Vale?");
        assert_eq!(result.intent, Intent::ListBranches);
        assert_eq!(result.company_span.as_deref(), Some("Vale"));
    }

    #[test]
    fn test_heuristic_similar_questions() {
        let result =
            classifier().classify_heuristic("Quais empresas são similares à Petrobras?");
        assert_eq!(result.intent, Intent::FindSimilar);
    }

    #[test]
    fn test_heuristic_plain_name_is_lookup_by_name() {
        let result = classifier().classify_heuristic("me fale sobre a Ambev");
        assert_eq!(result.intent, Intent::LookupByName);
        assert_eq!(result.company_span.as_deref(), Some("Ambev"));
    }

    #[test]
    fn test_heuristic_unrecognized_question_is_unsupported() {
        let result = classifier().classify_heuristic("qual a previsão do tempo amanhã?");
        assert_eq!(result.intent, Intent::Unsupported);
        assert!(result.company_span.is_none());
    }

    #[test]
    fn test_span_extraction_prefers_longest_run() {
        let span = extract_company_span("Onde fica a Viação São João em Porto?");
        assert_eq!(span.as_deref(), Some("Viação São João"));
    }

    #[test]
    fn test_span_extraction_finds_registry_identifier() {
        let span = extract_company_span("qual a situação de 33000167000101?");
        assert_eq!(span.as_deref(), Some("33000167000101"));
    }

    #[test]
    fn test_intent_round_trip() {
        for intent in Intent::all() {
            assert_eq!(Intent::from_str(intent.label()).unwrap(), *intent);
        }
        assert!(Intent::from_str("drop_tables").is_err());
    }
}
