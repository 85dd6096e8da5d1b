//! Search binary entry point.
//!
//! This binary provides a command-line interface for semantic search over the
//! indexed paper chunks. It supports both single-query and interactive REPL
//! modes, with table or JSON output, and can print store statistics.
//!
//! # Examples
//!
//! Single query with default settings:
//! ```bash
//! search --query "gaussian splatting"
//! ```
//!
//! JSON output:
//! ```bash
//! search --query "diffusion policies" --format json --top-k 5
//! ```
//!
//! Interactive mode:
//! ```bash
//! search --interactive
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use research_base::{
    config::Config,
    embedding::{DynamicEmbeddingProvider, EmbeddingProvider},
    index::VectorIndexManager,
    models::{truncate_chars, RelevanceLevel, SearchResult},
    query::{IndexSearchEngine, SearchEngine, SearchQuery},
    storage::{sqlite::SqliteStorage, PaperStorage},
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const HELP: &str = "Commands:
  <query>          - Search for papers
  /top N           - Set number of results to N
  /format table    - Use table output format
  /format json     - Use JSON output format
  /detail N        - Show the full hit for result rank N
  /help            - Show this help
  Ctrl+D or Ctrl+C - Exit";

/// Output format for search results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table with colored relevance levels
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Search binary CLI for querying the research base
#[derive(Parser, Debug)]
#[command(
    name = "search",
    version,
    about = "Search indexed papers using semantic similarity",
    long_about = "Query the research base using semantic search over paper chunks. Each paper \
                  appears at most once, represented by its best matching chunk.

EXAMPLES:
  Single query:
    search --query \"gaussian splatting\"

  JSON output:
    search --query \"diffusion policies\" --format json

  Interactive mode:
    search --interactive

  Database statistics:
    search --stats"
)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Search query (required for single-query mode, omitted in interactive mode)
    #[arg(long, value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Number of results to return
    #[arg(long, value_name = "N", default_value = "10")]
    top_k: usize,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Print database and index statistics
    #[arg(long)]
    stats: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

type Engine = IndexSearchEngine<
    research_base::embedding::RetryingEmbedder<DynamicEmbeddingProvider>,
    SqliteStorage,
>;

/// Setup logging with the specified level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("Invalid log level")?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}

/// Execute a search query and return results
async fn execute_search(
    engine: &Engine,
    query_text: &str,
    top_k: usize,
) -> Result<Vec<SearchResult>> {
    debug!(query = query_text, top_k, "Executing search");
    let query = SearchQuery::new(query_text, Some(top_k));
    engine
        .search(&query)
        .await
        .with_context(|| format!("Failed to execute search for query: '{}'", query_text))
}

fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", truncate_chars(text, max_chars.saturating_sub(3)))
    } else {
        text.to_string()
    }
}

/// Format results as a pretty table
fn format_results_table(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("arXiv").add_attribute(Attribute::Bold),
        Cell::new("Section").add_attribute(Attribute::Bold),
        Cell::new("Relevance").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ]);

    for (idx, result) in results.iter().enumerate() {
        // Color-code relevance
        let (relevance_str, color) = match result.relevance {
            RelevanceLevel::Identical => ("IDENTICAL", Color::Green),
            RelevanceLevel::HighlySimilar => ("HIGHLY_SIMILAR", Color::Cyan),
            RelevanceLevel::Similar => ("SIMILAR", Color::Yellow),
            RelevanceLevel::Relevant => ("RELEVANT", Color::White),
        };

        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(ellipsize(&result.paper_title, 60)),
            Cell::new(&result.arxiv_id),
            Cell::new(&result.section),
            Cell::new(relevance_str).fg(color),
            Cell::new(format!("{:.4}", result.score)),
        ]);
    }

    table.to_string()
}

/// Format results as JSON
fn format_results_json(results: &[SearchResult]) -> Result<String> {
    serde_json::to_string_pretty(results).context("Failed to serialize results to JSON")
}

/// Display detailed view of a single result
fn display_result_detail(result: &SearchResult, rank: usize) {
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", rank);
    println!("Title: {}", result.paper_title);
    println!("arXiv: {}", result.arxiv_id);
    println!("Authors: {}", result.authors.join(", "));
    println!("Section: {} (chunk {})", result.section, result.chunk_index);
    println!("Relevance: {:?}", result.relevance);
    println!("Score: {:.4}", result.score);
    println!("\n{}", result.text);
    println!("{}", "═".repeat(80));
}

fn print_results(results: &[SearchResult], format: OutputFormat, elapsed_secs: f64) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", format_results_table(results));
            println!("\nFound {} results in {:.2}s", results.len(), elapsed_secs);
        }
        OutputFormat::Json => println!("{}", format_results_json(results)?),
    }
    Ok(())
}

async fn print_stats(storage: &SqliteStorage, index: &VectorIndexManager) -> Result<()> {
    let stats = storage.stats().await.context("Failed to read database statistics")?;
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Research Base                     ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Papers:               {:>16} ║", stats.papers);
    println!("║ Chunks:               {:>16} ║", stats.chunks);
    println!("║ Indexed chunks:       {:>16} ║", stats.indexed_chunks);
    println!("║ Index vectors:        {:>16} ║", index.len());
    println!("║ Techniques:           {:>16} ║", stats.techniques);
    println!("║ Benchmarks:           {:>16} ║", stats.benchmarks);
    println!("║ Repositories:         {:>16} ║", stats.repos);
    println!("╚════════════════════════════════════════╝");
    Ok(())
}

/// Run interactive REPL mode
async fn run_interactive(engine: Engine, mut top_k: usize, mut format: OutputFormat) -> Result<()> {
    println!("Interactive Paper Search");
    println!("{}", HELP);
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let mut last_results: Vec<SearchResult> = Vec::new();

    loop {
        match rl.readline("Search> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line).ok();

                if line.starts_with('/') {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    match (parts[0], parts.get(1)) {
                        ("/help", _) => println!("{}", HELP),
                        ("/top", Some(n)) => match n.parse::<usize>() {
                            Ok(n) if n > 0 => {
                                top_k = n;
                                println!("Set top-k to {}", top_k);
                            }
                            _ => eprintln!("Invalid number: must be a positive integer"),
                        },
                        ("/format", Some(&"table")) => {
                            format = OutputFormat::Table;
                            println!("Set output format to table");
                        }
                        ("/format", Some(&"json")) => {
                            format = OutputFormat::Json;
                            println!("Set output format to JSON");
                        }
                        ("/detail", Some(n)) => match n.parse::<usize>() {
                            Ok(rank) if rank > 0 && rank <= last_results.len() => {
                                display_result_detail(&last_results[rank - 1], rank);
                            }
                            Ok(rank) if rank > last_results.len() => {
                                eprintln!(
                                    "Rank {} out of range (last search had {} results)",
                                    rank,
                                    last_results.len()
                                );
                            }
                            _ => eprintln!("Invalid rank: must be a positive integer"),
                        },
                        ("/top", None) => eprintln!("Usage: /top N"),
                        ("/format", _) => eprintln!("Usage: /format [table|json]"),
                        ("/detail", None) => eprintln!("Usage: /detail N"),
                        (other, _) => eprintln!(
                            "Unknown command: {}. Type /help for available commands.",
                            other
                        ),
                    }
                } else {
                    let start = Instant::now();
                    match execute_search(&engine, line, top_k).await {
                        Ok(results) => {
                            let elapsed = start.elapsed().as_secs_f64();
                            if let Err(e) = print_results(&results, format, elapsed) {
                                eprintln!("Error formatting results: {}", e);
                            }
                            last_results = results;
                        }
                        Err(e) => eprintln!("Search failed: {:#}", e),
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    if !args.interactive && args.query.is_none() && !args.stats {
        anyhow::bail!(
            "Either --query, --interactive or --stats must be specified.\n\
             Use --help for usage information."
        );
    }

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let db_path = config.db_path();
    if !db_path.exists() {
        anyhow::bail!(
            "Database file not found: {}\n\
             Please run the ingestion binary first to create the database.",
            db_path.display()
        );
    }
    info!("Loading database from: {}", db_path.display());

    let storage = SqliteStorage::new(db_path);
    let index = VectorIndexManager::load(
        config.index_path(),
        config.id_map_path(),
        config.embedding.dimensions,
    )
    .context("Failed to load vector index")?;

    if args.stats {
        print_stats(&storage, &index).await?;
        if !args.interactive && args.query.is_none() {
            return Ok(());
        }
    }

    // The index only makes sense with the model it was built with
    if let Some(stored) = storage
        .get_config()
        .await
        .context("Failed to retrieve embedding configuration from database")?
    {
        if stored.model_name != config.embedding.model_id
            || stored.dimension != config.embedding.dimensions
        {
            anyhow::bail!(
                "Database was built with {} ({} dimensions) but {} ({} dimensions) is configured",
                stored.model_name,
                stored.dimension,
                config.embedding.model_id,
                config.embedding.dimensions
            );
        }
    }

    let embedder = DynamicEmbeddingProvider::retrying_from_settings(&config.embedding)
        .context("Failed to create embedding provider")?;
    info!(
        "Using embedding model: {} (dimension: {})",
        embedder.model_name(),
        embedder.dimension()
    );

    let engine = IndexSearchEngine::new(embedder, storage, index)
        .with_retrieve_k(config.search.top_k_retrieve)
        .with_display_chars(config.search.display_chars);

    match args.query {
        Some(query) => {
            let start = Instant::now();
            let results = execute_search(&engine, &query, args.top_k).await?;
            print_results(&results, args.format, start.elapsed().as_secs_f64())?;
        }
        None => run_interactive(engine, args.top_k, args.format).await?,
    }

    Ok(())
}
