//! # regask-core
//!
//! Core question-answering pipeline over a national company registry.
//!
//! Raw natural-language questions go through five stages, each stage's
//! output feeding the next:
//!
//! ```text
//! question
//!   → QuestionClassifier   (intent + entity spans)
//!   → HybridRetriever      (ground spans to registry identifiers)
//!   → QueryComposer        (fill and validate a fixed plan template)
//!   → QueryExecutor        (run the plan read-only, limited and timed)
//!   → AnswerSynthesizer    (structured or narrative Answer)
//! ```
//!
//! Two design rules hold throughout:
//!
//! - **No free text becomes query content.** Plans are fixed per-intent
//!   templates; the only variable parts are catalog-validated field names
//!   and parameter-bound literals.
//! - **The model is advisory.** Classification falls back to heuristics,
//!   summaries are groundedness-checked, and a dead model never turns into
//!   a pipeline failure.
//!
//! ## Modules
//!
//! - `catalog`: the curated schema catalog plans are validated against
//! - `classify`: intent classification with deterministic fallback
//! - `retrieve`: hybrid exact/lexical/semantic name resolution
//! - `plan`: plan templates and validation
//! - `execute`: limited, read-only plan execution
//! - `synthesize`: answer construction and groundedness checking
//! - `pipeline`: the assembled end-to-end pipeline
//! - `config`: YAML-backed configuration
//! - `llm`: the language-model seam

pub mod catalog;
pub mod classify;
pub mod config;
pub mod errors;
pub mod execute;
pub mod llm;
pub mod pipeline;
pub mod plan;
pub mod retrieve;
pub mod synthesize;

pub use catalog::{EntityKind, FieldDescriptor, FieldType, SchemaCatalog, Searchable};
pub use classify::{extract_company_span, Classification, Intent, QuestionClassifier};
pub use config::{ExecutorConfig, LlmConfig, PipelineConfig, RetrievalConfig};
pub use errors::{RegaskError, RegaskResult};
pub use execute::QueryExecutor;
pub use llm::{IntentGuess, LanguageModel, LlmCallError, UnavailableModel};
pub use pipeline::RegistryPipeline;
pub use plan::{
    Predicate, PredicateOp, PredicateValue, ProposedFilter, QueryComposer, QueryPlan,
};
pub use retrieve::{
    merge_candidates, HybridRetriever, MatchMethod, Resolution, RetrievalCandidate,
};
pub use synthesize::{
    summary_is_grounded, Answer, AnswerMode, AnswerPayload, AnswerSynthesizer,
};
