//! Ingestion pipeline binary entry point.
//!
//! This binary ingests paper metadata, downloads and chunks source documents,
//! embeds the chunks into the vector index, and optionally runs the
//! summarization and repository discovery passes.
//!
//! # Examples
//!
//! Ingest a batch of papers:
//! ```bash
//! ingestion --input papers.json
//! ```
//!
//! Ingest one paper by id, then summarize:
//! ```bash
//! ingestion --arxiv 2308.04079 --summarize
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use research_base::{
    config::Config,
    embedding::{DynamicEmbeddingProvider, EmbeddingProvider, RetryingEmbedder},
    index::VectorIndexManager,
    ingestion::{CrawlSummary, IngestOptions, IngestionPipeline},
    models::PaperStatus,
    processing::DocumentProcessor,
    provider::{download::PdfDownloader, json::JsonFileSource, PaperSource},
    repos::{pwc::PapersWithCodeSource, RepoDiscovery},
    storage::sqlite::SqliteStorage,
    summarize::{llm::ChatCompletionsBackend, Summarizer},
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Pipeline = IngestionPipeline<RetryingEmbedder<DynamicEmbeddingProvider>, SqliteStorage>;

/// Ingestion pipeline CLI for building and updating the research base
#[derive(Parser, Debug)]
#[command(
    name = "ingestion",
    version,
    about = "Ingest research papers into the research base",
    long_about = "Ingestion pipeline for downloading, chunking and embedding research papers, with optional LLM summarization and code repository discovery.

EXAMPLES:
  Ingest a JSON batch of paper metadata:
    ingestion --input papers.json

  Ingest a single paper (metadata looked up in --input if given):
    ingestion --arxiv 2308.04079

  Chunk only, no downloads or embeddings:
    ingestion --input papers.json --no-download --no-embed

  Summarize and discover repositories for already indexed papers:
    ingestion --summarize --discover-repos --limit 20"
)]
struct IngestionArgs {
    /// Configuration file (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Input JSON file containing paper metadata
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Ingest a single paper by arXiv id
    #[arg(long, value_name = "ID")]
    arxiv: Option<String>,

    /// Do not embed chunks (papers end at `chunked`)
    #[arg(long)]
    no_embed: bool,

    /// Do not download source documents
    #[arg(long)]
    no_download: bool,

    /// Log what would be ingested without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Summarize indexed papers after ingestion
    #[arg(long)]
    summarize: bool,

    /// Discover code repositories for indexed papers after ingestion
    #[arg(long)]
    discover_repos: bool,

    /// Maximum papers for the summarize and discovery passes
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level")?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Create the ingestion pipeline from configuration
async fn create_pipeline(config: &Config, args: &IngestionArgs) -> Result<Pipeline> {
    let embedder = DynamicEmbeddingProvider::retrying_from_settings(&config.embedding)
        .context("Failed to create embedding provider")?;
    info!(
        model = embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedding provider ready"
    );

    let storage = SqliteStorage::new(config.db_path());
    info!(path = %config.db_path().display(), "Database");

    let index = VectorIndexManager::load(
        config.index_path(),
        config.id_map_path(),
        config.embedding.dimensions,
    )
    .context("Failed to load vector index")?;

    let processor =
        DocumentProcessor::new(config.chunking.max_tokens, config.chunking.overlap_tokens)
            .context("Failed to create document processor")?;

    let options = IngestOptions {
        download: !args.no_download,
        embed: !args.no_embed,
        dry_run: args.dry_run,
    };
    debug!(?options, "Ingestion options");

    let downloader = PdfDownloader::new(config.pdf_dir(), config.ingestion.min_pdf_bytes)
        .context("Failed to create document downloader")?;

    let pipeline = IngestionPipeline::connect(embedder, storage, index, processor, options)
        .await
        .context("Failed to connect to the research base")?
        .with_downloader(downloader)
        .with_polite_delay(Duration::from_millis(config.ingestion.polite_delay_ms));
    Ok(pipeline)
}

/// Create a progress bar for tracking ingestion
fn create_progress_bar(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} papers {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

fn print_crawl_summary(summary: &CrawlSummary, elapsed: Duration) {
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Ingestion Completed               ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Papers found:         {:>16} ║", summary.total_found);
    println!("║ New papers:           {:>16} ║", summary.new);
    println!("║ Ingested:             {:>16} ║", summary.ingested);
    println!("║ Chunks:               {:>16} ║", summary.chunks);
    println!("║ Embedded:             {:>16} ║", summary.embedded);
    println!("║ Errors:               {:>16} ║", summary.errors);
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");
}

async fn run_batch(pipeline: &mut Pipeline, source: &JsonFileSource) -> Result<()> {
    let papers = source
        .fetch_papers()
        .await
        .context("Failed to read paper metadata")?;
    info!(papers = papers.len(), source = source.name(), "Loaded paper metadata");

    if papers.is_empty() {
        warn!("No papers found in input file");
        return Ok(());
    }

    let start_time = Instant::now();
    let progress = create_progress_bar(papers.len())?;
    let summary = pipeline
        .crawl_and_ingest_with_progress(&papers, |done, total| {
            progress.set_length(total as u64);
            progress.set_position(done as u64);
        })
        .await
        .context("Failed to ingest papers")?;
    progress.finish_and_clear();

    print_crawl_summary(&summary, start_time.elapsed());
    if summary.errors > 0 {
        warn!(
            errors = summary.errors,
            "Some papers failed to ingest - check logs for details"
        );
    }
    Ok(())
}

async fn run_single(
    pipeline: &mut Pipeline,
    source: &JsonFileSource,
    arxiv_id: &str,
) -> Result<()> {
    let outcome = pipeline
        .ingest_single(source, arxiv_id)
        .await
        .with_context(|| format!("Failed to ingest {}", arxiv_id))?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_summarize(config: &Config, limit: Option<usize>) -> Result<()> {
    let backend = ChatCompletionsBackend::from_settings(&config.summarize)
        .context("Failed to create summarization backend")?;
    let mut summarizer = Summarizer::new(backend, SqliteStorage::new(config.db_path()))
        .with_rate_limit(Duration::from_millis(config.summarize.rate_limit_ms))
        .with_max_text_chars(config.summarize.max_text_chars);

    let stats = summarizer
        .summarize_all(PaperStatus::Indexed, false, limit)
        .await
        .context("Summarization failed")?;
    println!("Summarized: {} ok, {} failed, {} total", stats.success, stats.failed, stats.total);
    Ok(())
}

async fn run_discover_repos(config: &Config, limit: Option<usize>) -> Result<()> {
    let source = PapersWithCodeSource::from_settings(&config.repos)
        .context("Failed to create repository source")?;
    let discovery = RepoDiscovery::new(source, SqliteStorage::new(config.db_path()))
        .context("Failed to create repository discovery")?
        .with_chunks_scanned(config.repos.chunks_scanned)
        .with_delay(Duration::from_millis(config.repos.delay_ms));

    let stats = discovery
        .discover_repos_all(PaperStatus::Indexed, limit.unwrap_or(200))
        .await
        .context("Repository discovery failed")?;
    println!(
        "Repositories: {} found across {} of {} papers",
        stats.repos, stats.found, stats.total
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = IngestionArgs::parse();
    init_logging(&args.log_level).context("Failed to initialize logging")?;
    debug!("CLI arguments: {:?}", args);

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    if args.input.is_none() && args.arxiv.is_none() && !args.summarize && !args.discover_repos {
        anyhow::bail!("Nothing to do: pass --input, --arxiv, --summarize or --discover-repos");
    }

    if args.input.is_some() || args.arxiv.is_some() {
        let source = match &args.input {
            Some(path) => JsonFileSource::from_file(path)
                .await
                .with_context(|| format!("Failed to load papers from {:?}", path))?,
            None => JsonFileSource::from_papers(Vec::new()),
        };

        let mut pipeline = create_pipeline(&config, &args).await?;
        match &args.arxiv {
            Some(arxiv_id) => run_single(&mut pipeline, &source, arxiv_id).await?,
            None => run_batch(&mut pipeline, &source).await?,
        }
    }

    if args.dry_run {
        info!("Dry run: skipping summarization and repository discovery");
        return Ok(());
    }
    if args.summarize {
        run_summarize(&config, args.limit).await?;
    }
    if args.discover_repos {
        run_discover_repos(&config, args.limit).await?;
    }

    info!("Ingestion completed");
    Ok(())
}
