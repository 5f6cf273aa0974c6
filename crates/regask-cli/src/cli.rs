//! CLI definition and command dispatch.
//!
//! This module defines the command-line interface using `clap` and provides
//! the `run()` function that dispatches commands to the pipeline.
//!
//! ## Data directory layout
//!
//! All commands operate on a data directory (default `.`, overridable via
//! `--data-dir` or `REGASK_DATA_DIR`):
//!
//! - `registry.db`: the SQLite registry database
//! - `name_vectors.jsonl`: name-vector index (built by `regask index`)
//! - `activity_vectors.jsonl`: activity-vector index (built by `regask index`)
//! - `config.yaml`: optional pipeline configuration

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use regask_core::{
    Answer, LanguageModel, PipelineConfig, RegistryPipeline, UnavailableModel,
};
use regask_db::{
    index_company_activities, index_company_names, RegistryStore, VectorIndex,
    ACTIVITY_VECTOR_DIM, NAME_VECTOR_DIM,
};
use regask_llm::OpenAiChatModel;

const REGISTRY_DB: &str = "registry.db";
const NAME_VECTORS: &str = "name_vectors.jsonl";
const ACTIVITY_VECTORS: &str = "activity_vectors.jsonl";
const CONFIG_FILE: &str = "config.yaml";

// ============================================================================
// CLI Definition
// ============================================================================

/// Natural-language questions over a national company registry
#[derive(Parser, Debug)]
#[command(name = "regask")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "REGASK_VERBOSE")]
    pub verbose: bool,

    /// Suppress informational messages
    #[arg(short, long, global = true, env = "REGASK_QUIET")]
    pub quiet: bool,

    /// Data directory holding registry.db and the index files
    #[arg(long, global = true, env = "REGASK_DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Path to configuration file (default: <data-dir>/config.yaml)
    #[arg(long, global = true, env = "REGASK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask a question about the registry
    #[command(after_help = r#"EXAMPLES:
    # Where is a company headquartered?
    regask ask "Onde fica a sede da Petrobras?"

    # Machine-readable answer, no language model
    regask ask --offline --json "Quantas filiais tem a Vale?"
"#)]
    Ask {
        /// The question to answer
        question: String,

        /// Print the full answer as JSON
        #[arg(long)]
        json: bool,

        /// Skip the language model; heuristics and deterministic rendering only
        #[arg(long)]
        offline: bool,
    },

    /// Rebuild the lexical and vector indexes from the registry database
    Index,

    /// Show registry and index status
    Status {
        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse arguments, initialize logging, dispatch. Returns the process exit
/// code; errors print to stderr.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_filter = if quiet {
        "regask=error"
    } else if verbose {
        "regask=debug,regask_core=debug,regask_db=debug,regask_llm=debug"
    } else {
        "regask=info,regask_core=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Ask {
            question,
            json,
            offline,
        } => cmd_ask(cli, question, *json, *offline),
        Command::Index => cmd_index(cli),
        Command::Status { json } => cmd_status(cli, *json),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn open_store(data_dir: &Path) -> Result<RegistryStore> {
    let db_path = data_dir.join(REGISTRY_DB);
    if !db_path.exists() {
        bail!(
            "registry database not found at {} (load the registry first)",
            db_path.display()
        );
    }
    RegistryStore::open(&db_path).context("failed to open the registry database")
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.data_dir.join(CONFIG_FILE));
    PipelineConfig::from_path(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Open a vector index if its file exists; missing means the corresponding
/// retrieval leg degrades.
fn open_index(path: PathBuf, dimension: usize) -> Result<Option<VectorIndex>> {
    match VectorIndex::open(&path, dimension) {
        Ok(index) => Ok(Some(index)),
        Err(err) if err.is_index_missing() => {
            tracing::warn!("Vector index missing at {}", path.display());
            Ok(None)
        }
        Err(err) => Err(err).context("failed to load vector index"),
    }
}

fn build_model(
    config: &PipelineConfig,
    offline: bool,
) -> Result<Arc<dyn LanguageModel>> {
    if offline {
        return Ok(Arc::new(UnavailableModel));
    }
    match &config.llm.endpoint {
        Some(endpoint) => {
            let api_key = OpenAiChatModel::api_key_from_env(&config.llm.api_key_env);
            let model = OpenAiChatModel::new(
                endpoint.clone(),
                config.llm.model.clone(),
                api_key,
                Duration::from_millis(config.llm.timeout_ms),
            )
            .map_err(|e| anyhow::anyhow!("failed to build the model client: {}", e))?;
            Ok(Arc::new(model))
        }
        None => {
            tracing::warn!("No model endpoint configured; running offline");
            Ok(Arc::new(UnavailableModel))
        }
    }
}

fn cmd_ask(cli: &Cli, question: &str, json: bool, offline: bool) -> Result<()> {
    let store = Arc::new(open_store(&cli.data_dir)?);
    let config = load_config(cli)?;
    let name_index = open_index(cli.data_dir.join(NAME_VECTORS), NAME_VECTOR_DIM)?;
    let activity_index =
        open_index(cli.data_dir.join(ACTIVITY_VECTORS), ACTIVITY_VECTOR_DIM)?;
    let model = build_model(&config, offline)?;

    let pipeline = RegistryPipeline::new(store, name_index, activity_index, model, config)
        .context("failed to assemble the pipeline")?;

    let runtime = tokio::runtime::Runtime::new()?;
    let answer = runtime.block_on(pipeline.answer_question(question))?;

    print_answer(&answer, json)
}

fn print_answer(answer: &Answer, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }
    println!("{}", answer.display_text());
    if !answer.sources.is_empty() {
        println!("sources: {}", answer.sources.join(", "));
    }
    if answer.used_fallback {
        println!("(classified without the language model)");
    }
    Ok(())
}

fn cmd_index(cli: &Cli) -> Result<()> {
    let store = open_store(&cli.data_dir)?;

    store
        .build_lexical_index()
        .context("failed to build the lexical index")?;

    let names =
        VectorIndex::open_or_create(cli.data_dir.join(NAME_VECTORS), NAME_VECTOR_DIM)?;
    let indexed = index_company_names(&store, &names)?;
    names.flush()?;

    let activities = VectorIndex::open_or_create(
        cli.data_dir.join(ACTIVITY_VECTORS),
        ACTIVITY_VECTOR_DIM,
    )?;
    index_company_activities(&store, &activities)?;
    activities.flush()?;

    println!("Indexed {} companies (lexical + name + activity).", indexed);
    Ok(())
}

fn cmd_status(cli: &Cli, json: bool) -> Result<()> {
    let store = open_store(&cli.data_dir)?;
    let config = load_config(cli)?;

    let companies = store.company_count()?;
    let establishments = store.establishment_count()?;
    let lexical_ready = store.lexical_index_ready()?;
    let name_index = open_index(cli.data_dir.join(NAME_VECTORS), NAME_VECTOR_DIM)?;
    let activity_index =
        open_index(cli.data_dir.join(ACTIVITY_VECTORS), ACTIVITY_VECTOR_DIM)?;
    let warnings = config.validate()?;

    if json {
        let status = serde_json::json!({
            "generatedAt": chrono::Utc::now().to_rfc3339(),
            "companies": companies,
            "establishments": establishments,
            "lexicalIndex": lexical_ready,
            "nameVectors": name_index.as_ref().map(|i| i.len().unwrap_or(0)),
            "activityVectors": activity_index.as_ref().map(|i| i.len().unwrap_or(0)),
            "configWarnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("companies:          {}", companies);
    println!("establishments:     {}", establishments);
    println!(
        "lexical index:      {}",
        if lexical_ready { "ready" } else { "missing" }
    );
    match &name_index {
        Some(index) => println!("name vectors:       {}", index.len()?),
        None => println!("name vectors:       missing"),
    }
    match &activity_index {
        Some(index) => println!("activity vectors:   {}", index.len()?),
        None => println!("activity vectors:   missing"),
    }
    for warning in warnings {
        println!("warning: {}", warning);
    }
    Ok(())
}
