//! The question pipeline.
//!
//! Orchestrates the five stages: Classifier → Retriever → Composer →
//! Executor → Synthesizer. Each stage's output is the next stage's sole
//! input. The pipeline is fail-soft after startup: stage failures become
//! well-formed degraded answers, and only an unusable catalog or
//! configuration aborts construction. A pipeline value holds no per-request
//! mutable state, so one instance can serve concurrent callers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use regask_db::{RegistryStore, VectorIndex};

use crate::catalog::SchemaCatalog;
use crate::classify::{Intent, QuestionClassifier};
use crate::config::PipelineConfig;
use crate::errors::{RegaskError, RegaskResult};
use crate::llm::LanguageModel;
use crate::plan::QueryComposer;
use crate::execute::QueryExecutor;
use crate::retrieve::HybridRetriever;
use crate::synthesize::{Answer, AnswerSynthesizer};

/// The assembled question-answering pipeline.
pub struct RegistryPipeline {
    store: Arc<RegistryStore>,
    name_index: Option<VectorIndex>,
    activity_index: Option<VectorIndex>,
    model: Arc<dyn LanguageModel>,
    config: PipelineConfig,
    catalog: &'static SchemaCatalog,
    classifier: QuestionClassifier,
    synthesizer: AnswerSynthesizer,
    executor: QueryExecutor,
}

impl RegistryPipeline {
    /// Assemble a pipeline.
    ///
    /// Validates the schema catalog against the storage layer and the
    /// configuration; both are fatal here, since a pipeline that cannot trust
    /// its catalog must not serve questions. Configuration warnings are
    /// logged and tolerated. Missing vector indexes are tolerated too; the
    /// affected retrieval legs degrade per request.
    pub fn new(
        store: Arc<RegistryStore>,
        name_index: Option<VectorIndex>,
        activity_index: Option<VectorIndex>,
        model: Arc<dyn LanguageModel>,
        config: PipelineConfig,
    ) -> RegaskResult<Self> {
        let catalog = SchemaCatalog::shared();
        catalog.validate()?;

        for warning in config.validate()? {
            warn!("Configuration: {}", warning);
        }

        let llm_timeout = Duration::from_millis(config.llm.timeout_ms);
        let classifier = QuestionClassifier::new(llm_timeout);
        let synthesizer = AnswerSynthesizer::new(llm_timeout);
        let executor = QueryExecutor::new(
            config.executor.row_limit,
            Duration::from_millis(config.executor.timeout_ms),
        );

        if name_index.is_none() {
            warn!("Name-vector index not loaded; semantic name resolution is disabled");
        }
        if activity_index.is_none() {
            warn!("Activity-vector index not loaded; similarity search is disabled");
        }

        Ok(Self {
            store,
            name_index,
            activity_index,
            model,
            config,
            catalog,
            classifier,
            synthesizer,
            executor,
        })
    }

    fn retriever(&self) -> HybridRetriever<'_> {
        HybridRetriever::new(
            &self.store,
            self.name_index.as_ref(),
            self.activity_index.as_ref(),
            self.config.retrieval.top_k,
            self.config.retrieval.semantic_min_candidates,
        )
    }

    /// Answer a natural-language question about the registry.
    ///
    /// Fails only on an empty question; every downstream problem renders as
    /// a degraded but well-formed [`Answer`].
    pub async fn answer_question(&self, question: &str) -> RegaskResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RegaskError::InvalidArgument(
                "question must not be empty".to_string(),
            ));
        }

        let started = Instant::now();

        // Stage 1: classification. Never fails.
        let classification = self.classifier.classify(self.model.as_ref(), question).await;
        debug!(
            "Classified as `{}` (fallback: {}) in {} ms",
            classification.intent,
            classification.used_fallback,
            started.elapsed().as_millis()
        );
        let used_fallback = classification.used_fallback;

        if classification.intent == Intent::Unsupported {
            return Ok(self.synthesizer.unsupported().with_fallback(used_fallback));
        }

        let Some(span) = classification.company_span.clone() else {
            return Ok(self
                .synthesizer
                .needs_clarification("Name a specific company in the question")
                .with_fallback(used_fallback));
        };

        // Stage 2: retrieval. Ground the span to registry identifiers.
        let retrieval_started = Instant::now();
        let resolution = match self.retriever().resolve_company(&span) {
            Ok(resolution) => resolution,
            Err(RegaskError::RetrievalUnavailable { reason }) => {
                warn!("Retrieval unavailable: {}", reason);
                return Ok(self.synthesizer.degraded(&span).with_fallback(used_fallback));
            }
            Err(err) => {
                warn!("Retrieval failed: {}", err);
                return Ok(self.synthesizer.failure().with_fallback(used_fallback));
            }
        };
        debug!(
            "Retrieved {} candidate(s) in {} ms (degraded: {})",
            resolution.candidates.len(),
            retrieval_started.elapsed().as_millis(),
            resolution.is_degraded()
        );

        if resolution.candidates.is_empty() {
            // Reduced coverage must not read as nonexistence.
            let answer = if resolution.is_degraded() {
                self.synthesizer.degraded(&span)
            } else {
                self.synthesizer.not_found(&span)
            };
            return Ok(answer.with_fallback(used_fallback));
        }

        // Ambiguity: several candidates tied at the top score. Every intent
        // anchors exactly one company, similarity search included, so ask
        // instead of guessing.
        let leaders = resolution.tied_leaders();
        if leaders.len() > 1 {
            let ids: Vec<String> = leaders.iter().map(|c| c.company_id.clone()).collect();
            let names = match self.store.company_names(&ids) {
                Ok(names) => names,
                Err(err) => {
                    warn!("Candidate name lookup failed: {}", err);
                    return Ok(self.synthesizer.failure().with_fallback(used_fallback));
                }
            };
            return Ok(self
                .synthesizer
                .clarification(&span, &names)
                .with_fallback(used_fallback));
        }

        let best_id = resolution.candidates[0].company_id.clone();

        // Stage 3: planning.
        let company_ids = match classification.intent {
            Intent::FindSimilar => {
                match self
                    .retriever()
                    .similar_companies(&best_id, self.config.retrieval.semantic_top_k)
                {
                    Ok(neighbors) if neighbors.is_empty() => {
                        return Ok(Answer::text(
                            "No companies with a similar activity profile were found.",
                        )
                        .with_fallback(used_fallback));
                    }
                    Ok(neighbors) => {
                        neighbors.into_iter().map(|c| c.company_id).collect()
                    }
                    Err(RegaskError::RetrievalUnavailable { reason }) => {
                        warn!("Similarity search unavailable: {}", reason);
                        return Ok(self
                            .synthesizer
                            .degraded(&span)
                            .with_fallback(used_fallback));
                    }
                    Err(err) => {
                        warn!("Similarity search failed: {}", err);
                        return Ok(self.synthesizer.failure().with_fallback(used_fallback));
                    }
                }
            }
            _ => vec![best_id],
        };

        let composer = QueryComposer::new(self.catalog, self.config.executor.row_limit);
        let plan = match composer.compose(classification.intent, &company_ids, &[]) {
            Ok(plan) => plan,
            Err(RegaskError::PlanValidation { message, hint }) => {
                warn!("Plan rejected: {}", message);
                return Ok(self
                    .synthesizer
                    .needs_clarification(&hint)
                    .with_fallback(used_fallback));
            }
            Err(err) => return Err(err),
        };

        // Stage 4: execution.
        let rows = match self.executor.run(&self.store, &plan) {
            Ok(rows) => rows,
            Err(RegaskError::Execution { entity, predicates }) => {
                warn!("Execution failed for `{}` ({})", entity, predicates);
                return Ok(self.synthesizer.failure().with_fallback(used_fallback));
            }
            Err(err) => return Err(err),
        };

        if rows.is_empty() {
            return Ok(self.synthesizer.not_found(&span).with_fallback(used_fallback));
        }

        // Stage 5: synthesis.
        let answer = self
            .synthesizer
            .synthesize(self.model.as_ref(), question, classification.intent, &rows)
            .await;

        info!(
            "Answered `{}` question in {} ms ({} source row(s))",
            classification.intent,
            started.elapsed().as_millis(),
            answer.sources.len()
        );
        Ok(answer.with_fallback(used_fallback))
    }
}
