//! raspberry CLI - chain-of-thought training data from arXiv papers.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use raspberry::criteria::{COT_QUALITY, COT_VOICING, PROFILE};
use raspberry::pipeline::prepare_training_data;
use raspberry::stages::{
    CotExtractor, CotQualityAssessor, CotVoicer, CotVoicingAssessor, PaperProfiler, ScoreRunner,
    StageRunner,
};
use raspberry::{
    ArtifactStore, BatchOptions, BatchReport, CancellationToken, CatalogFetcher, Config, LlmClient,
    LlmTemplateRunner, PaperStore, PaperTextSource, PdftotextExtractor, PipelineDriver,
    PipelineError, RateLimiter, SelectionStrategy, StageContext, TrainingDataGenerator, run_stage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "raspberry")]
#[command(version)]
#[command(about = "Chain-of-thought training data from arXiv papers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "raspberry.toml")]
    config: PathBuf,

    /// SQLite database (overrides paths.database)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Inference artifacts directory (overrides paths.inference_artifacts_dir)
    #[arg(long, global = true)]
    inference_dir: Option<PathBuf>,

    /// Training artifacts directory (overrides paths.training_artifacts_dir)
    #[arg(long, global = true)]
    training_dir: Option<PathBuf>,

    /// PDF and extracted text cache (overrides paths.pdf_cache_dir)
    #[arg(long, global = true)]
    pdf_cache_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Args, Clone, Copy)]
struct BatchArgs {
    /// Process at most this many papers
    #[arg(short, long)]
    limit: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest arXiv listings into the database
    Fetch {
        /// Category to fetch (repeatable; defaults to arxiv.categories)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// First day of the window (defaults to arxiv.begin_date)
        #[arg(long)]
        begin: Option<NaiveDate>,

        /// Last day of the window (defaults to arxiv.end_date)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Offset of the first listing entry requested per category
        #[arg(long, default_value_t = 0)]
        start_index: u64,
    },

    /// Profile downloaded papers
    Profile {
        #[command(flatten)]
        batch: BatchArgs,

        /// Paper selection: sequential, random or category_balanced
        #[arg(long, default_value = "sequential")]
        strategy: SelectionStrategy,
    },

    /// Score profiled papers
    ScoreProfile {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Extract, critique and refine a chain of thought
    ExtractCot {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Assess refined chains of thought
    AssessQuality {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Score quality assessments
    ScoreQuality {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Rewrite chains of thought in first-person voice
    Voice {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Assess voiced chains of thought
    AssessVoicing {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Score voicing assessments
    ScoreVoicing {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Build the consolidated training corpus
    GenerateTraining,

    /// Convert the corpus to chat format and split train/validation
    PrepareTraining {
        /// Input corpus (defaults to the consolidated training file)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output directory (defaults to the training artifacts directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Share of examples held out for validation
        #[arg(long)]
        validation_ratio: Option<f64>,

        /// Shuffle seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run every stage once, then generate training data
    Pipeline {
        #[command(flatten)]
        batch: BatchArgs,

        /// Paper selection for profiling
        #[arg(long, default_value = "sequential")]
        strategy: SelectionStrategy,
    },

    /// Show paper counts per status
    Stats,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(debug: bool) -> Result<()> {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# raspberry configuration file

[llm]
# API key (can also use OPENROUTER_API_KEY env var, or "${VAR}" here)
# api_key = "sk-..."
api_key_env = "OPENROUTER_API_KEY"
base_url = "https://openrouter.ai/api/v1"
timeout_secs = 300
max_retries = 3

[presets.default]
id = "anthropic/claude-3.5-sonnet"
label = "Claude 3.5 Sonnet"
max_tokens = 8192
temperature = 0.0
input_price_per_1m = 3.0
output_price_per_1m = 15.0

[templates]
directory = "templates"
default_preset = "default"

[arxiv]
base_url = "https://export.arxiv.org"
categories = ["cs.AI", "math.CO", "quant-ph"]
begin_date = "1970-01-01"
end_date = "2021-01-01"
max_results = 1000
fallback_max_results = 100
max_empty_attempts = 10
max_retries = 10
min_backoff_secs = 4
max_backoff_secs = 60

[paths]
database = "papers.db"
pdf_cache_dir = "pdf_cache"
inference_artifacts_dir = "inference_artifacts"
training_artifacts_dir = "training_artifacts"

[thresholds]
profile = 8
quality = 14
voicing = 9

[stages]
# Each step names a template and may pin a preset
profiling = { template = "raspberry-paper-profiler" }
extraction = { template = "raspberry-cot-extraction" }
critique = { template = "raspberry-cot-critique" }
refinement = { template = "raspberry-cot-refinement" }
quality_assessment = { template = "raspberry-cot-quality-assessor" }
voicing = { template = "raspberry-cot-voicing" }
voicing_assessment = { template = "raspberry-cot-voicing-assessor" }

[output]
training_file = "consolidated-training-data.jsonl"
validation_ratio = 0.2
split_seed = 42
"#;
    println!("{example}");
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    if let Some(path) = &cli.database {
        config.paths.database = path.clone();
    }
    if let Some(path) = &cli.inference_dir {
        config.paths.inference_artifacts_dir = path.clone();
    }
    if let Some(path) = &cli.training_dir {
        config.paths.training_artifacts_dir = path.clone();
    }
    if let Some(path) = &cli.pdf_cache_dir {
        config.paths.pdf_cache_dir = path.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_store(config: &Config) -> Result<PaperStore> {
    PaperStore::open(&config.paths.database)
        .with_context(|| format!("Failed to open database {:?}", config.paths.database))
}

fn artifact_store(config: &Config) -> Result<ArtifactStore> {
    ArtifactStore::new(
        &config.paths.inference_artifacts_dir,
        &config.paths.training_artifacts_dir,
    )
    .context("Failed to prepare artifact directories")
}

/// Wire the LLM-backed collaborators shared by every stage.
fn stage_context(config: Arc<Config>) -> Result<(StageContext, Arc<LlmTemplateRunner>)> {
    let client = LlmClient::from_config(&config, Arc::new(RateLimiter::new()))
        .context("Failed to create LLM client")?;
    let templates = Arc::new(LlmTemplateRunner::new(&config, client));
    let texts = PaperTextSource::new(
        &config.paths.pdf_cache_dir,
        Arc::new(PdftotextExtractor::default()),
    )
    .context("Failed to prepare PDF cache")?;

    let ctx = StageContext {
        artifacts: artifact_store(&config)?,
        texts: Arc::new(texts),
        templates: templates.clone(),
        config,
    };
    Ok((ctx, templates))
}

/// Ctrl-C stops the run after the paper in flight.
fn install_interrupt_handler(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current paper");
            cancel.cancel();
        }
    });
}

fn print_batch_report(report: &BatchReport) {
    println!("\n=== {} ===", report.stage);
    println!("Processed:   {}", report.processed);
    println!("Advanced:    {}", report.advanced);
    println!("Skipped:     {}", report.skipped);
    println!("Failed:      {}", report.failed);
    if report.cancelled {
        println!("Interrupted");
    }
}

fn print_llm_usage(templates: &LlmTemplateRunner) {
    let (input, output) = templates.client().total_tokens();
    println!("Tokens:      {input} in / {output} out");
    println!("Cost:        ${:.4}", templates.client().total_cost_usd());
}

async fn run_llm_stage<R, F>(config: Config, batch: BatchOptions, build: F) -> Result<()>
where
    R: StageRunner,
    F: FnOnce(StageContext) -> R,
{
    let config = Arc::new(config);
    let store = open_store(&config)?;
    let (ctx, templates) = stage_context(config)?;
    let cancel = CancellationToken::new();
    install_interrupt_handler(&cancel);

    let report = run_stage(&build(ctx), &store, &cancel, &batch).await?;
    print_batch_report(&report);
    print_llm_usage(&templates);
    Ok(())
}

async fn run_scorer(config: Config, runner: ScoreRunner, batch: BatchOptions) -> Result<()> {
    let store = open_store(&config)?;
    let cancel = CancellationToken::new();
    install_interrupt_handler(&cancel);

    let report = run_stage(&runner, &store, &cancel, &batch).await?;
    print_batch_report(&report);
    Ok(())
}

fn batch_options(batch: BatchArgs) -> BatchOptions {
    BatchOptions {
        limit: batch.limit,
        strategy: SelectionStrategy::Sequential,
        show_progress: true,
    }
}

/// An interrupt is a clean stop, not a failure.
fn unless_interrupted<T>(result: raspberry::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(PipelineError::Cancelled) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.debug)?;

    if let Commands::Example = cli.command {
        print_example_config();
        return Ok(());
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Example => {}

        Commands::Validate => {
            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Presets: {}", config.presets.len());
            info!("  Templates: {}", config.templates.directory.display());
            info!("  Categories: {}", config.arxiv.categories.len());
            info!(
                "  Thresholds: profile {}, quality {}, voicing {}",
                config.thresholds.profile, config.thresholds.quality, config.thresholds.voicing
            );
        }

        Commands::Fetch {
            categories,
            begin,
            end,
            start_index,
        } => {
            let store = open_store(&config)?;
            let cancel = CancellationToken::new();
            install_interrupt_handler(&cancel);

            let categories = if categories.is_empty() {
                config.arxiv.categories.clone()
            } else {
                categories
            };
            let begin = begin.unwrap_or(config.arxiv.begin_date);
            let end = end.unwrap_or(config.arxiv.end_date);

            let fetcher = CatalogFetcher::new(config.arxiv.clone(), cancel)?;
            let fetched = fetcher
                .fetch_categories(&store, categories.as_slice(), begin, end, start_index)
                .await;
            let Some(summary) = unless_interrupted(fetched)? else {
                warn!("Fetch interrupted; the unfinished category was not saved");
                return Ok(());
            };

            println!("\n=== Fetch Complete ===");
            println!("Fetched:     {}", summary.categories_fetched);
            println!("Skipped:     {}", summary.categories_skipped);
            println!("Papers:      {}", summary.papers);
        }

        Commands::Profile { batch, strategy } => {
            let options = BatchOptions {
                strategy,
                ..batch_options(batch)
            };
            run_llm_stage(config, options, PaperProfiler::new).await?;
        }

        Commands::ScoreProfile { batch } => {
            run_scorer(config, ScoreRunner::new(&PROFILE), batch_options(batch)).await?;
        }

        Commands::ExtractCot { batch } => {
            run_llm_stage(config, batch_options(batch), CotExtractor::new).await?;
        }

        Commands::AssessQuality { batch } => {
            run_llm_stage(config, batch_options(batch), CotQualityAssessor::new).await?;
        }

        Commands::ScoreQuality { batch } => {
            run_scorer(config, ScoreRunner::new(&COT_QUALITY), batch_options(batch)).await?;
        }

        Commands::Voice { batch } => {
            run_llm_stage(config, batch_options(batch), CotVoicer::new).await?;
        }

        Commands::AssessVoicing { batch } => {
            run_llm_stage(config, batch_options(batch), CotVoicingAssessor::new).await?;
        }

        Commands::ScoreVoicing { batch } => {
            run_scorer(config, ScoreRunner::new(&COT_VOICING), batch_options(batch)).await?;
        }

        Commands::GenerateTraining => {
            let store = open_store(&config)?;
            let cancel = CancellationToken::new();
            install_interrupt_handler(&cancel);

            let artifacts = artifact_store(&config)?;
            let generator = TrainingDataGenerator::new(Arc::new(config), artifacts);
            let stats = generator.run(&store, &cancel)?;

            println!("\n=== Training Data Complete ===");
            println!("Written:     {}", stats.written);
            println!("Below:       {}", stats.below_threshold);
            println!("Missing:     {}", stats.missing_artifact);
            println!("Output:      {:?}", generator.corpus_path());
        }

        Commands::PrepareTraining {
            input,
            output_dir,
            validation_ratio,
            seed,
        } => {
            let training_dir = &config.paths.training_artifacts_dir;
            let input = input.unwrap_or_else(|| training_dir.join(&config.output.training_file));
            let output_dir = output_dir.unwrap_or_else(|| training_dir.clone());

            let summary = prepare_training_data(
                &input,
                &output_dir,
                validation_ratio.unwrap_or(config.output.validation_ratio),
                seed.unwrap_or(config.output.split_seed),
            )
            .with_context(|| format!("Failed to prepare {input:?}"))?;

            println!("\n=== Training Split Complete ===");
            println!("Training:    {} -> {:?}", summary.training, summary.training_path);
            println!("Validation:  {} -> {:?}", summary.validation, summary.validation_path);
        }

        Commands::Pipeline { batch, strategy } => {
            let config = Arc::new(config);
            let store = open_store(&config)?;
            let (ctx, templates) = stage_context(config)?;
            let cancel = CancellationToken::new();
            install_interrupt_handler(&cancel);

            let options = BatchOptions {
                strategy,
                ..batch_options(batch)
            };
            let report = PipelineDriver::new(ctx).run(&store, &cancel, &options).await?;

            for stage in &report.stages {
                print_batch_report(stage);
            }
            if let Some(training) = &report.training {
                println!("\n=== training ===");
                println!("Written:     {}", training.written);
                println!("Skipped:     {}", training.skipped());
            }
            print_llm_usage(&templates);
            println!("Runtime:     {:.1}s", report.runtime_secs);
            if report.cancelled {
                println!("Interrupted");
            }
        }

        Commands::Stats => {
            let store = open_store(&config)?;
            println!("\n=== Papers: {} ===", store.count()?);
            for (status, count) in store.status_counts()? {
                println!("{:<32} {count}", status.as_str());
            }
        }
    }

    Ok(())
}
