//! morphont binary.
//!
//! Reads `morphont.toml` (or the path given with `--config`), opens the
//! SQLite search cache and dispatches one subcommand:
//!
//! - `run`: drive the retrieval-merge pipeline for a target class
//! - `inspect`: print cached searches for a keyword or one search id
//! - `extract`: draft one snapshot item from a cached search
//! - `validate`: check a concept snapshot batch and persist it
//! - `generate`: ask the model for a whole batch, then validate and persist it
//! - `export`: build an ontology tree from cached extractions

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use morphont_cli::{
  Settings, SnapshotReport, class_descriptions, generate_snapshot, persist_snapshot,
};
use morphont_core::{cache::SearchCache, snapshot::build_tree};
use morphont_pipeline::{
  Collaborators, ExtractionRequest, IterationController, IterationState, run_extraction,
};
use morphont_providers::{ChatModel, LiteratureClient, Source};
use morphont_store_sqlite::SqliteCache;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Pathology ontology builder")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "morphont.toml")]
  config: PathBuf,

  /// Override the cache database path.
  #[arg(long, global = true)]
  cache: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Iterate plan/search/extract/merge until enough concepts are found.
  Run(RunArgs),
  /// Print cached searches as JSON.
  Inspect(InspectArgs),
  /// Draft a snapshot item from a cached search and record it.
  Extract(ExtractArgs),
  /// Validate a concept batch and persist it under the data root.
  Validate(ValidateArgs),
  /// Generate a concept batch for a dataset's classes and persist it.
  Generate(GenerateArgs),
  /// Build an ontology tree from cached extractions.
  Export(ExportArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
  /// Class the ontology is built for, e.g. "breast carcinoma lymph node
  /// metastasis".
  #[arg(long)]
  target: String,

  #[arg(long)]
  min_concepts: Option<usize>,

  #[arg(long)]
  max_iters: Option<u32>,

  /// Results requested per query.
  #[arg(long)]
  result_cap: Option<usize>,

  #[arg(long)]
  source: Option<Source>,

  #[arg(long)]
  output_dir: Option<PathBuf>,

  #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
  api_key: String,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Lookup {
  /// All searches recorded for this keyword, grouped by source.
  #[arg(long)]
  keyword: Option<String>,

  #[arg(long)]
  search_id: Option<i64>,
}

#[derive(Args, Debug)]
struct InspectArgs {
  #[command(flatten)]
  lookup: Lookup,

  /// Restrict a keyword lookup to one source.
  #[arg(long, requires = "keyword")]
  source: Option<String>,

  #[arg(long, requires = "search_id")]
  no_results: bool,

  #[arg(long, requires = "search_id")]
  no_extractions: bool,
}

#[derive(Args, Debug)]
struct ExtractArgs {
  #[arg(long)]
  keyword: String,

  /// Only consider searches from this source.
  #[arg(long)]
  source: Option<String>,

  /// Use this search instead of the latest one for the keyword.
  #[arg(long)]
  search_id: Option<i64>,

  /// Cached results shown to the model.
  #[arg(long, default_value_t = morphont_pipeline::extraction::DEFAULT_MAX_CONTEXT)]
  max_context: usize,

  #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
  api_key: String,
}

#[derive(Args, Debug)]
struct ValidateArgs {
  /// JSON array of concept items.
  #[arg(long)]
  input: PathBuf,

  /// Dataset name; its slug becomes the id namespace.
  #[arg(long)]
  dataset: String,

  /// Override `data_root` from the settings.
  #[arg(long)]
  data_root: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
  #[arg(long)]
  dataset: String,

  /// File with the dataset's class descriptions, ideally a JSON object of
  /// class name to description.
  #[arg(long)]
  classes: PathBuf,

  /// Number of high-level classes, when it differs from the entries in
  /// `--classes`.
  #[arg(long)]
  num_classes: Option<usize>,

  #[arg(long)]
  data_root: Option<PathBuf>,

  #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
  api_key: String,
}

#[derive(Args, Debug)]
struct ExportArgs {
  #[arg(long)]
  search_id: Option<i64>,

  #[arg(long)]
  keyword: Option<String>,

  /// Leave out the Tumor/Normal base classes.
  #[arg(long)]
  no_base: bool,

  /// Write here instead of stdout.
  #[arg(long)]
  out: Option<PathBuf>,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let mut settings = Settings::load(&cli.config)?;
  if let Some(cache) = cli.cache {
    settings.cache_path = morphont_cli::expand_tilde(&cache);
  }

  match cli.command {
    Command::Run(args) => run(settings, args).await,
    Command::Inspect(args) => inspect(&settings, args).await,
    Command::Extract(args) => extract(&settings, args).await,
    Command::Validate(args) => validate(&settings, args),
    Command::Generate(args) => generate(&settings, args).await,
    Command::Export(args) => export(&settings, args).await,
  }
}

async fn open_cache(path: &Path) -> anyhow::Result<SqliteCache> {
  SqliteCache::open(path)
    .await
    .with_context(|| format!("failed to open cache at {}", path.display()))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn data_root(settings: &Settings, flag: Option<PathBuf>) -> PathBuf {
  flag
    .map(|dir| morphont_cli::expand_tilde(&dir))
    .unwrap_or_else(|| settings.data_root.clone())
}

fn report_snapshot(report: SnapshotReport) -> anyhow::Result<()> {
  print_json(&report)?;
  if let SnapshotReport::Invalid { errors } = report {
    anyhow::bail!("concept batch rejected with {} error(s)", errors.len());
  }
  Ok(())
}

// ─── Subcommands ─────────────────────────────────────────────────────────────

async fn run(mut settings: Settings, args: RunArgs) -> anyhow::Result<()> {
  if let Some(n) = args.min_concepts {
    settings.pipeline.min_concepts = n;
  }
  if let Some(n) = args.max_iters {
    settings.pipeline.max_iters = n;
  }
  if let Some(n) = args.result_cap {
    settings.pipeline.result_cap = n;
  }
  if let Some(source) = args.source {
    settings.retrieval.source = source;
  }
  let output_dir = args
    .output_dir
    .map(|dir| morphont_cli::expand_tilde(&dir))
    .unwrap_or(settings.output_dir);

  let cache = open_cache(&settings.cache_path).await?;
  let retrieval = LiteratureClient::from_config(&settings.retrieval)
    .context("failed to build retrieval client")?;
  let model =
    ChatModel::new(&settings.model, args.api_key).context("failed to build chat model")?;

  let collab = Collaborators {
    retrieval,
    planner: model.clone(),
    summarizer: model.clone(),
    extractor: model,
  };

  let cancel = Arc::new(AtomicBool::new(false));
  let flag = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupt received; stopping at the next stage boundary");
      flag.store(true, Ordering::SeqCst);
    }
  });

  let controller = IterationController::new(cache, collab, settings.pipeline.clone())
    .with_cancel_flag(cancel);
  let mut state =
    IterationState::new(&args.target, output_dir, settings.pipeline.result_cap);

  let outcome = controller.run(&mut state).await.context("run failed")?;

  print_json(&serde_json::json!({
    "run_id": outcome.run_id,
    "iterations": outcome.iterations,
    "stop_reason": outcome.stop_reason,
    "concepts": outcome.ontology.len(),
    "tried_queries": outcome.tried_queries,
    "final_snapshot": outcome.final_snapshot,
  }))
}

async fn inspect(settings: &Settings, args: InspectArgs) -> anyhow::Result<()> {
  let cache = open_cache(&settings.cache_path).await?;

  if let Some(keyword) = args.lookup.keyword {
    let bundle = cache.fetch_by_keyword(&keyword, args.source.as_deref()).await?;
    if bundle.is_empty() {
      tracing::info!(keyword, "no cached searches");
    }
    return print_json(&bundle);
  }

  let Some(search_id) = args.lookup.search_id else {
    anyhow::bail!("either --keyword or --search-id is required");
  };
  let bundle = cache
    .fetch_by_search_id(search_id, !args.no_results, !args.no_extractions)
    .await?
    .with_context(|| format!("no search with id {search_id}"))?;
  print_json(&bundle)
}

async fn extract(settings: &Settings, args: ExtractArgs) -> anyhow::Result<()> {
  let cache = open_cache(&settings.cache_path).await?;
  let model =
    ChatModel::new(&settings.model, args.api_key).context("failed to build chat model")?;

  let request = ExtractionRequest {
    keyword:     args.keyword,
    source:      args.source,
    search_id:   args.search_id,
    max_context: args.max_context,
  };
  let report = run_extraction(&cache, &model, &request)
    .await
    .context("extraction failed")?;
  print_json(&report)
}

fn validate(settings: &Settings, args: ValidateArgs) -> anyhow::Result<()> {
  let raw = std::fs::read_to_string(&args.input)
    .with_context(|| format!("failed to read {}", args.input.display()))?;
  let data_root = data_root(settings, args.data_root);

  report_snapshot(persist_snapshot(&data_root, &args.dataset, &raw)?)
}

async fn generate(settings: &Settings, args: GenerateArgs) -> anyhow::Result<()> {
  let text = std::fs::read_to_string(&args.classes)
    .with_context(|| format!("failed to read {}", args.classes.display()))?;
  let classes = class_descriptions(&text);
  let data_root = data_root(settings, args.data_root);
  let model =
    ChatModel::new(&settings.model, args.api_key).context("failed to build chat model")?;

  let report =
    generate_snapshot(&model, &data_root, &args.dataset, &classes, args.num_classes).await?;
  report_snapshot(report)
}

async fn export(settings: &Settings, args: ExportArgs) -> anyhow::Result<()> {
  let cache = open_cache(&settings.cache_path).await?;
  let extractions = cache
    .list_extractions(args.search_id, args.keyword.as_deref())
    .await?;
  let tree = build_tree(!args.no_base, &extractions)?;
  tracing::info!(extractions = extractions.len(), nodes = tree.len(), "built ontology tree");

  match args.out {
    Some(path) => {
      let body = serde_json::to_string_pretty(&tree)?;
      if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
      {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::write(&path, body)
        .with_context(|| format!("failed to write {}", path.display()))
    }
    None => print_json(&tree),
  }
}
