//! End-to-end pipeline tests over an in-memory registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use regask_core::{
    Answer, AnswerMode, IntentGuess, LanguageModel, LlmCallError, PipelineConfig,
    RegaskError, RegistryPipeline, UnavailableModel,
};
use regask_db::{
    index_company_activities, index_company_names, BranchFlag, Company, Establishment,
    RegistryStore, Row, VectorIndex, ACTIVITY_VECTOR_DIM, NAME_VECTOR_DIM,
};

// ============================================================================
// Fixtures
// ============================================================================

/// A model that always answers with the scripted classification and summary.
struct ScriptedModel {
    intent: &'static str,
    company: Option<&'static str>,
    summary: Result<&'static str, ()>,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn classify(&self, _question: &str) -> Result<IntentGuess, LlmCallError> {
        Ok(IntentGuess {
            intent: self.intent.to_string(),
            company: self.company.map(str::to_string),
            location: None,
        })
    }

    async fn summarize(&self, _question: &str, _rows: &[Row]) -> Result<String, LlmCallError> {
        match self.summary {
            Ok(text) => Ok(text.to_string()),
            Err(()) => Err(LlmCallError::Unavailable("scripted".to_string())),
        }
    }
}

/// Wraps a model and counts how often each operation is invoked.
struct CountingModel {
    inner: ScriptedModel,
    classify_calls: AtomicUsize,
    summarize_calls: AtomicUsize,
}

impl CountingModel {
    fn new(inner: ScriptedModel) -> Self {
        Self {
            inner,
            classify_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for CountingModel {
    async fn classify(&self, question: &str) -> Result<IntentGuess, LlmCallError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.classify(question).await
    }

    async fn summarize(&self, question: &str, rows: &[Row]) -> Result<String, LlmCallError> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.summarize(question, rows).await
    }
}

fn company(id: &str, legal_name: &str, activity: &str, secondary: Option<&str>) -> Company {
    Company {
        cnpj_root: id.to_string(),
        legal_name: legal_name.to_string(),
        trade_name: None,
        status: "active".to_string(),
        activity_code: activity.to_string(),
        secondary_activity_codes: secondary.map(str::to_string),
        street: None,
        city: Some("Rio de Janeiro".to_string()),
        state: Some("RJ".to_string()),
        postal_code: None,
        registered_on: Some("1999-01-04".to_string()),
    }
}

fn establishment(company_id: &str, unit_id: &str, flag: BranchFlag, city: &str) -> Establishment {
    Establishment {
        company_id: company_id.to_string(),
        unit_id: unit_id.to_string(),
        branch_flag: flag,
        street: Some("Av. República do Chile, 65".to_string()),
        city: Some(city.to_string()),
        state: Some("RJ".to_string()),
        postal_code: Some("20031-912".to_string()),
        activity_code: Some("06000".to_string()),
        status: Some("active".to_string()),
    }
}

fn seeded_store() -> Arc<RegistryStore> {
    let store = RegistryStore::open_in_memory().unwrap();
    store.apply_schema().unwrap();

    store
        .insert_company(&company(
            "33000167",
            "PETROLEO BRASILEIRO S.A. PETROBRAS",
            "06000",
            Some("19217,35115"),
        ))
        .unwrap();
    store
        .insert_company(&company("33592510", "VALE S.A.", "07250", Some("06000")))
        .unwrap();
    store
        .insert_company(&company("60872504", "AMBEV S.A.", "11122", None))
        .unwrap();

    store
        .insert_establishment(&establishment(
            "33000167",
            "0001",
            BranchFlag::Headquarters,
            "Rio de Janeiro",
        ))
        .unwrap();
    store
        .insert_establishment(&establishment(
            "33000167",
            "0002",
            BranchFlag::Branch,
            "Santos",
        ))
        .unwrap();
    store
        .insert_establishment(&establishment(
            "33000167",
            "0003",
            BranchFlag::Branch,
            "Macaé",
        ))
        .unwrap();

    store.build_lexical_index().unwrap();
    Arc::new(store)
}

fn full_pipeline(model: Arc<dyn LanguageModel>) -> RegistryPipeline {
    let store = seeded_store();
    let names = VectorIndex::in_memory(NAME_VECTOR_DIM);
    let activities = VectorIndex::in_memory(ACTIVITY_VECTOR_DIM);
    index_company_names(&store, &names).unwrap();
    index_company_activities(&store, &activities).unwrap();
    RegistryPipeline::new(store, Some(names), Some(activities), model, PipelineConfig::default())
        .unwrap()
}

async fn ask(pipeline: &RegistryPipeline, question: &str) -> Answer {
    pipeline.answer_question(question).await.unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let pipeline = full_pipeline(Arc::new(UnavailableModel));
    let err = pipeline.answer_question("   ").await.unwrap_err();
    assert!(matches!(err, RegaskError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_unsupported_short_circuits() {
    // The store is gutted after the pipeline is built: any retrieval or
    // execution attempt would fail the query and change the answer text.
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("registry.db");
    let store = RegistryStore::open(&db_path).unwrap();
    store.apply_schema().unwrap();
    let raw = rusqlite::Connection::open(&db_path).unwrap();
    raw.execute_batch("DROP TABLE establishments; DROP TABLE companies;")
        .unwrap();

    let model = Arc::new(CountingModel::new(ScriptedModel {
        intent: "unsupported",
        company: None,
        summary: Err(()),
    }));
    let pipeline = RegistryPipeline::new(
        Arc::new(store),
        None,
        None,
        model.clone(),
        PipelineConfig::default(),
    )
    .unwrap();

    let answer = ask(&pipeline, "qual a previsão do tempo?").await;
    assert_eq!(answer.mode, AnswerMode::Text);
    assert!(answer.sources.is_empty());
    assert!(answer.display_text().contains("no structured handling"));
    assert_eq!(model.classify_calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.summarize_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_headquarters_lookup_returns_structured_answer() {
    let model = ScriptedModel {
        intent: "lookup_by_location",
        company: Some("Petrobras"),
        summary: Err(()),
    };
    let pipeline = full_pipeline(Arc::new(model));
    let answer = ask(&pipeline, "Onde fica a sede da Petrobras?").await;

    assert_eq!(answer.mode, AnswerMode::Structured);
    assert!(answer.display_text().contains("Rio de Janeiro"));
    assert_eq!(answer.sources, vec!["33000167/0001".to_string()]);
    assert!(!answer.used_fallback);
}

#[tokio::test]
async fn test_offline_heuristics_answer_the_same_question() {
    let pipeline = full_pipeline(Arc::new(UnavailableModel));
    let answer = ask(&pipeline, "Onde fica a sede da Petrobras?").await;

    assert_eq!(answer.mode, AnswerMode::Structured);
    assert!(answer.display_text().contains("Rio de Janeiro"));
    assert!(answer.used_fallback);
}

#[tokio::test]
async fn test_branch_listing_counts_establishments() {
    let model = ScriptedModel {
        intent: "list_branches",
        company: Some("Petrobras"),
        summary: Err(()),
    };
    let pipeline = full_pipeline(Arc::new(model));
    let answer = ask(&pipeline, "Quantas filiais tem a Petrobras?").await;

    assert_eq!(answer.mode, AnswerMode::Text);
    let text = answer.display_text();
    assert!(text.contains("3 establishment(s)"));
    assert!(text.contains("1 headquarters"));
    assert!(text.contains("2 branch(es)"));
    assert_eq!(answer.sources.len(), 3);
}

#[tokio::test]
async fn test_find_similar_excludes_the_company_itself() {
    let model = ScriptedModel {
        intent: "find_similar",
        company: Some("VALE S.A."),
        summary: Err(()),
    };
    let pipeline = full_pipeline(Arc::new(model));
    let answer = ask(&pipeline, "empresas similares à Vale").await;

    assert_eq!(answer.mode, AnswerMode::Text);
    // Vale's profile overlaps Petrobras (shared activity 06000), not Ambev.
    assert!(answer.sources.contains(&"33000167".to_string()));
    assert!(!answer.sources.contains(&"33592510".to_string()));
}

#[tokio::test]
async fn test_unknown_company_is_not_found() {
    let model = ScriptedModel {
        intent: "lookup_by_name",
        company: Some("Quantum Zeppelin Holdings"),
        summary: Err(()),
    };
    let pipeline = full_pipeline(Arc::new(model));
    let answer = ask(&pipeline, "me fale sobre a Quantum Zeppelin Holdings").await;

    assert!(answer.display_text().contains("Quantum Zeppelin Holdings"));
    assert!(answer.display_text().contains("No company matching"));
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn test_missing_semantic_index_degrades_instead_of_denying() {
    // No vector indexes at all: exact+lexical miss, semantic unavailable.
    let model = ScriptedModel {
        intent: "lookup_by_name",
        company: Some("Petrolio Brasileire"),
        summary: Err(()),
    };
    let pipeline = RegistryPipeline::new(
        seeded_store(),
        None,
        None,
        Arc::new(model),
        PipelineConfig::default(),
    )
    .unwrap();
    let answer = ask(&pipeline, "me fale sobre a Petrolio Brasileire").await;

    let text = answer.display_text();
    assert!(text.contains("coverage was reduced"));
    assert!(!text.contains("No company matching"));
}

#[tokio::test]
async fn test_ambiguous_exact_matches_ask_for_clarification() {
    let store = RegistryStore::open_in_memory().unwrap();
    store.apply_schema().unwrap();
    // Same legal name under two registry identifiers.
    store
        .insert_company(&company("11111111", "COMERCIAL SANTA FE LTDA", "47113", None))
        .unwrap();
    store
        .insert_company(&company("22222222", "Comercial Santa Fé Ltda", "47113", None))
        .unwrap();
    store.build_lexical_index().unwrap();

    let model = ScriptedModel {
        intent: "lookup_by_name",
        company: Some("Comercial Santa Fé Ltda"),
        summary: Err(()),
    };
    let pipeline = RegistryPipeline::new(
        Arc::new(store),
        None,
        None,
        Arc::new(model),
        PipelineConfig::default(),
    )
    .unwrap();
    let answer = ask(&pipeline, "Comercial Santa Fé Ltda").await;

    let text = answer.display_text();
    assert!(text.contains("Which one did you mean?"));
    assert!(text.contains("11111111"));
    assert!(text.contains("22222222"));
}

#[tokio::test]
async fn test_ambiguous_similarity_anchor_asks_for_clarification() {
    // Similarity search also anchors exactly one company; an ambiguous
    // anchor is clarified rather than silently resolved to one candidate.
    let store = RegistryStore::open_in_memory().unwrap();
    store.apply_schema().unwrap();
    store
        .insert_company(&company("11111111", "COMERCIAL SANTA FE LTDA", "47113", None))
        .unwrap();
    store
        .insert_company(&company("22222222", "Comercial Santa Fé Ltda", "47113", None))
        .unwrap();
    store.build_lexical_index().unwrap();
    let store = Arc::new(store);
    let activities = VectorIndex::in_memory(ACTIVITY_VECTOR_DIM);
    index_company_activities(&store, &activities).unwrap();

    let model = ScriptedModel {
        intent: "find_similar",
        company: Some("Comercial Santa Fé Ltda"),
        summary: Err(()),
    };
    let pipeline = RegistryPipeline::new(
        store,
        None,
        Some(activities),
        Arc::new(model),
        PipelineConfig::default(),
    )
    .unwrap();
    let answer = ask(&pipeline, "Quais empresas são similares à Comercial Santa Fé Ltda?").await;

    let text = answer.display_text();
    assert!(text.contains("Which one did you mean?"));
    assert!(text.contains("11111111"));
    assert!(text.contains("22222222"));
}

#[tokio::test]
async fn test_store_failure_during_clarification_yields_failure_answer() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("registry.db");
    let store = RegistryStore::open(&db_path).unwrap();
    store.apply_schema().unwrap();
    store
        .insert_company(&company("11111111", "COMERCIAL SANTA FE LTDA", "47113", None))
        .unwrap();
    store
        .insert_company(&company("22222222", "Comercial Santa Fé Ltda", "47113", None))
        .unwrap();

    // Knock out the column the clarification name lookup reads. Exact
    // retrieval only touches the normalized columns, so both candidates are
    // still found and the store fails inside the clarification branch.
    let raw = rusqlite::Connection::open(&db_path).unwrap();
    raw.execute_batch("ALTER TABLE companies DROP COLUMN legal_name")
        .unwrap();

    let model = ScriptedModel {
        intent: "lookup_by_name",
        company: Some("Comercial Santa Fé Ltda"),
        summary: Err(()),
    };
    let pipeline = RegistryPipeline::new(
        Arc::new(store),
        None,
        None,
        Arc::new(model),
        PipelineConfig::default(),
    )
    .unwrap();

    // The store error must render as an answer, never escape as an error.
    let answer = pipeline
        .answer_question("Comercial Santa Fé Ltda")
        .await
        .unwrap();
    assert_eq!(answer.mode, AnswerMode::Text);
    assert!(answer.display_text().contains("could not be completed"));
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn test_answers_are_idempotent() {
    let pipeline = full_pipeline(Arc::new(UnavailableModel));
    let first = ask(&pipeline, "Quantas filiais tem a Petrobras?").await;
    let second = ask(&pipeline, "Quantas filiais tem a Petrobras?").await;
    assert_eq!(first.display_text(), second.display_text());
    assert_eq!(first.sources, second.sources);
}

#[tokio::test]
async fn test_fabricated_summary_is_replaced_by_deterministic_rendering() {
    let model = ScriptedModel {
        intent: "list_branches",
        company: Some("Petrobras"),
        // Mentions a company absent from the rows.
        summary: Ok("Petrobras and Shell operate 3 establishments together."),
    };
    let pipeline = full_pipeline(Arc::new(model));
    let answer = ask(&pipeline, "Quantas filiais tem a Petrobras?").await;

    let text = answer.display_text();
    assert!(!text.contains("Shell"));
    assert!(text.contains("3 establishment(s)"));
}

#[tokio::test]
async fn test_answer_serializes_camel_case() {
    let pipeline = full_pipeline(Arc::new(UnavailableModel));
    let answer = ask(&pipeline, "Onde fica a sede da Petrobras?").await;
    let json = serde_json::to_value(&answer).unwrap();
    assert!(json.get("usedFallback").is_some());
    assert!(json.get("sources").is_some());
}

#[tokio::test]
async fn test_pipeline_is_shareable_across_tasks() {
    let pipeline = Arc::new(full_pipeline(Arc::new(UnavailableModel)));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            ask(&pipeline, "Onde fica a sede da Petrobras?").await
        }));
    }
    for handle in handles {
        let answer = handle.await.unwrap();
        assert!(answer.display_text().contains("Rio de Janeiro"));
    }
}

#[tokio::test]
async fn test_slow_model_falls_back_within_budget() {
    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn classify(&self, _q: &str) -> Result<IntentGuess, LlmCallError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("the classifier deadline fires first")
        }

        async fn summarize(&self, _q: &str, _rows: &[Row]) -> Result<String, LlmCallError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("the summarizer deadline fires first")
        }
    }

    let store = seeded_store();
    let mut config = PipelineConfig::default();
    config.llm.timeout_ms = 50;
    let pipeline =
        RegistryPipeline::new(store, None, None, Arc::new(SlowModel), config).unwrap();

    let answer = ask(&pipeline, "Onde fica a sede da Petrobras?").await;
    assert!(answer.used_fallback);
    assert!(answer.display_text().contains("Rio de Janeiro"));
}
