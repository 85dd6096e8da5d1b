//! Storage layer abstraction and implementations.
//!
//! This module defines the interface for persisting and retrieving papers,
//! chunks, techniques, benchmarks and repositories. The relational store is the
//! single source of truth for every identifier in the system; the vector index
//! only ever refers back to chunk ids issued here.
//!
//! List-valued attributes cross this boundary as native `Vec`s. Their on-disk
//! encoding is private to each backend.

pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    Benchmark, Chunk, ChunkHit, EmbeddingConfig, NewChunk, NewPaper, NewTechnique, Paper,
    PaperStatus, PaperSummary, Repo, RepoRecord, StoreStats, Technique,
};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error
    #[error("Query execution failed: {0}")]
    QueryError(String),

    /// Data serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Schema or migration error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Other unexpected errors
    #[error("Unexpected storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Metadata filter for paper listings.
///
/// All conditions are combined with AND; unset conditions match everything.
#[derive(Debug, Clone)]
pub struct PaperFilter {
    /// Case-insensitive substring of title or abstract
    pub text: Option<String>,

    /// Exact category, e.g. "cs.CV"
    pub category: Option<String>,

    pub status: Option<PaperStatus>,

    pub limit: usize,
}

impl Default for PaperFilter {
    fn default() -> Self {
        Self {
            text: None,
            category: None,
            status: None,
            limit: 20,
        }
    }
}

/// Trait for research paper storage backends.
///
/// Every write commits immediately; no implementation holds a write
/// transaction open across calls. Readers must never block indefinitely
/// behind a writer.
#[async_trait]
pub trait PaperStorage: Send + Sync {
    /// Initialize the storage (create tables, indexes, etc.).
    ///
    /// This should be idempotent and safe to call multiple times.
    async fn initialize(&self) -> StorageResult<()>;

    /// Store the embedding configuration, replacing any previous value.
    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()>;

    /// Retrieve the embedding configuration, or `None` if not set.
    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>>;

    /// Insert a paper unless its external id already exists.
    ///
    /// # Returns
    /// The paper's id. For an existing external id this is the stored id and
    /// nothing about the stored row changes.
    async fn insert_paper(&self, paper: &NewPaper) -> StorageResult<i64>;

    /// Fetch a paper by its external id.
    async fn get_paper(&self, arxiv_id: &str) -> StorageResult<Option<Paper>>;

    /// Fetch a paper by database id.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if the paper doesn't exist
    async fn get_paper_by_id(&self, id: i64) -> StorageResult<Paper>;

    /// List papers matching a metadata filter, newest first.
    async fn search_papers(&self, filter: &PaperFilter) -> StorageResult<Vec<Paper>>;

    /// List papers in any of `statuses`.
    ///
    /// With `only_unsummarized`, papers that already carry a summary are skipped.
    async fn papers_with_status(
        &self,
        statuses: &[PaperStatus],
        only_unsummarized: bool,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Paper>>;

    async fn set_paper_status(&self, paper_id: i64, status: PaperStatus) -> StorageResult<()>;

    async fn set_pdf_path(&self, paper_id: i64, pdf_path: &str) -> StorageResult<()>;

    /// Persist a structured summary and move the paper to `summarized`.
    async fn store_summary(&self, paper_id: i64, summary: &PaperSummary) -> StorageResult<()>;

    /// Replace all chunks of a paper with `chunks`, atomically.
    ///
    /// # Returns
    /// The new chunk ids, in the same order as `chunks`
    async fn replace_chunks(&self, paper_id: i64, chunks: &[NewChunk]) -> StorageResult<Vec<i64>>;

    /// Record index positions for chunks: `(chunk_id, position)` pairs.
    async fn mark_chunks_indexed(
        &self,
        assignments: &[(i64, i64)],
        embedding_model: &str,
    ) -> StorageResult<()>;

    /// All chunks of a paper, ordered by `chunk_index`.
    async fn get_chunks_for_paper(&self, paper_id: i64) -> StorageResult<Vec<Chunk>>;

    /// Chunks for the given ids, joined with their paper. Unknown ids are absent.
    async fn get_chunks_by_ids(&self, chunk_ids: &[i64]) -> StorageResult<Vec<ChunkHit>>;

    /// Insert a technique unless one with the exact same name exists.
    async fn insert_technique(&self, technique: &NewTechnique) -> StorageResult<i64>;

    async fn get_technique(&self, name: &str) -> StorageResult<Option<Technique>>;

    /// Link a paper to a technique. Linking twice is a no-op.
    async fn link_paper_technique(&self, paper_id: i64, technique_id: i64) -> StorageResult<()>;

    /// Mark techniques as state of the art.
    async fn promote_techniques_to_sota(&self, technique_ids: &[i64]) -> StorageResult<()>;

    async fn insert_benchmark(&self, benchmark: &Benchmark) -> StorageResult<i64>;

    async fn benchmarks_for_paper(&self, paper_id: i64) -> StorageResult<Vec<Benchmark>>;

    /// Insert a repository unless its URL exists; on rediscovery the star
    /// count only ever increases.
    async fn upsert_repo(&self, paper_id: i64, repo: &RepoRecord) -> StorageResult<i64>;

    /// Repositories with their paper, most-starred first.
    async fn list_repos(&self, limit: usize) -> StorageResult<Vec<Repo>>;

    /// Row counts of every table.
    async fn stats(&self) -> StorageResult<StoreStats>;
}
