//! ResearchBase - a local knowledge base of research papers.
//!
//! This library ingests papers (metadata, source documents, text chunks),
//! embeds their chunks into an exact inner-product vector index, and serves
//! semantic search with one result per paper. Optional passes summarize papers
//! with an LLM and discover their code repositories.
//!
//! # Architecture
//!
//! - **models**: Core records (Paper, Chunk, Technique, Repo, SearchResult, ...)
//! - **config**: JSON configuration with defaults
//! - **storage**: Relational persistence (SQLite-based), the source of every id
//! - **processing**: Text extraction, section detection and chunking
//! - **embedding**: Embedding providers with retry and normalization
//! - **index**: Exact inner-product vector index and its chunk id mapping
//! - **provider**: Paper metadata sources and document download
//! - **ingestion**: The ingestion orchestrator
//! - **query**: Semantic search with per-paper deduplication
//! - **summarize**: Structured LLM summaries, techniques and benchmarks
//! - **repos**: Code repository discovery
//!
//! # Workflow
//!
//! ## Ingestion
//!
//! 1. Upsert paper metadata by external id
//! 2. Download and extract the source document
//! 3. Split into sections and overlapping chunks (abstract as fallback)
//! 4. Embed chunks and append them to the vector index
//! 5. Persist the index once per batch
//!
//! ## Search
//!
//! 1. Embed the query
//! 2. Over-fetch candidates from the index
//! 3. Join with chunk and paper rows, dropping stale entries
//! 4. Keep the best chunk per paper and return the top-k
//!
//! # Example
//!
//! ```ignore
//! use research_base::{
//!     embedding::openai::OpenAIEmbedding,
//!     index::VectorIndexManager,
//!     query::{IndexSearchEngine, SearchEngine, SearchQuery},
//!     storage::sqlite::SqliteStorage,
//!     Config,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(&Config::default_path())?;
//!     let embedding = OpenAIEmbedding::new(
//!         &config.embedding.endpoint,
//!         std::env::var(&config.embedding.api_key_env).ok(),
//!         &config.embedding.model_id,
//!         config.embedding.dimensions,
//!     )?;
//!     let storage = SqliteStorage::new(config.db_path());
//!     let index = VectorIndexManager::load(
//!         config.index_path(),
//!         config.id_map_path(),
//!         config.embedding.dimensions,
//!     )?;
//!     let engine = IndexSearchEngine::new(embedding, storage, index);
//!
//!     let results = engine.search(&SearchQuery::new("gaussian splatting", Some(5))).await?;
//!     for result in results {
//!         println!("{} [{}]: {:.3}", result.paper_title, result.section, result.score);
//!     }
//!     Ok(())
//! }
//! ```

// Public modules
pub mod config;
pub mod embedding;
pub mod index;
pub mod ingestion;
pub mod models;
pub mod processing;
pub mod provider;
pub mod query;
pub mod repos;
pub mod storage;
pub mod summarize;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use embedding::EmbeddingProvider;
pub use models::{Chunk, EmbeddingConfig, Paper, PaperStatus, RelevanceLevel, SearchResult};
pub use query::{SearchEngine, SearchQuery};
pub use storage::{PaperFilter, PaperStorage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
