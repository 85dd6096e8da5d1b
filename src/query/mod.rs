//! Query processing and ranking module.
//!
//! This module handles semantic search over indexed chunks. It embeds the
//! query, over-fetches candidates from the vector index, joins them with their
//! chunk and paper rows, and returns at most one result per paper.
//!
//! # Usage
//!
//! ```ignore
//! use research_base::query::{IndexSearchEngine, SearchEngine, SearchQuery};
//!
//! let engine = IndexSearchEngine::new(embedder, storage, index)
//!     .with_retrieve_k(50)
//!     .with_display_chars(500);
//!
//! let results = engine.search(&SearchQuery::new("gaussian splatting", Some(5))).await?;
//! for result in results {
//!     println!("{} [{}] {:.3}", result.paper_title, result.section, result.score);
//! }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndexManager;
use crate::models::{ChunkHit, SearchResult};
use crate::storage::PaperStorage;

/// Default number of results returned to the caller.
pub const DEFAULT_TOP_K: usize = 10;

/// Default size of the over-fetched candidate set.
pub const DEFAULT_RETRIEVE_K: usize = 50;

/// Default character budget for displayed chunk text.
pub const DEFAULT_DISPLAY_CHARS: usize = 500;

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// Storage access failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Vector index lookup failed
    #[error("Index error: {0}")]
    IndexError(String),

    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Other unexpected errors
    #[error("Unexpected query error: {0}")]
    Other(String),
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Search query parameters.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// The search query text
    pub query: String,

    /// Maximum number of results (papers) to return
    pub top_k: usize,
}

impl SearchQuery {
    /// Create a new search query.
    ///
    /// # Arguments
    /// * `query` - The search query text
    /// * `top_k` - Maximum number of results to return (default: 10)
    pub fn new(query: impl Into<String>, top_k: Option<usize>) -> Self {
        Self {
            query: query.into(),
            top_k: top_k.unwrap_or(DEFAULT_TOP_K),
        }
    }
}

/// Trait for search and ranking engines.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Execute a search query and return ranked results.
    ///
    /// # Returns
    /// At most `query.top_k` results, one per paper, highest score first
    ///
    /// # Errors
    /// Returns `QueryError` if the search fails
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<SearchResult>>;
}

/// Keep the best-scoring hit of every paper, best first.
///
/// Ties keep the hit seen first.
pub fn best_per_paper(hits: Vec<(ChunkHit, f32)>) -> Vec<(ChunkHit, f32)> {
    let mut best: HashMap<i64, (ChunkHit, f32)> = HashMap::new();
    for (hit, score) in hits {
        match best.get(&hit.chunk.paper_id) {
            Some((_, kept)) if *kept >= score => {}
            _ => {
                best.insert(hit.chunk.paper_id, (hit, score));
            }
        }
    }

    let mut ranked: Vec<(ChunkHit, f32)> = best.into_values().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

/// Search engine over the exact inner-product chunk index.
///
/// Reads only: it never mutates the index or the store.
pub struct IndexSearchEngine<E, S>
where
    E: EmbeddingProvider,
    S: PaperStorage,
{
    embedding_provider: E,
    storage: S,
    index: VectorIndexManager,
    retrieve_k: usize,
    display_chars: usize,
}

impl<E, S> IndexSearchEngine<E, S>
where
    E: EmbeddingProvider,
    S: PaperStorage,
{
    /// Create a new search engine.
    ///
    /// # Arguments
    /// * `embedding_provider` - Provider for query embeddings; must match the index model
    /// * `storage` - Store holding the chunks the index refers to
    /// * `index` - Loaded vector index
    pub fn new(embedding_provider: E, storage: S, index: VectorIndexManager) -> Self {
        Self {
            embedding_provider,
            storage,
            index,
            retrieve_k: DEFAULT_RETRIEVE_K,
            display_chars: DEFAULT_DISPLAY_CHARS,
        }
    }

    /// Number of candidates pulled from the index before deduplication.
    pub fn with_retrieve_k(mut self, retrieve_k: usize) -> Self {
        self.retrieve_k = retrieve_k;
        self
    }

    pub fn with_display_chars(mut self, display_chars: usize) -> Self {
        self.display_chars = display_chars;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn index(&self) -> &VectorIndexManager {
        &self.index
    }
}

#[async_trait]
impl<E, S> SearchEngine for IndexSearchEngine<E, S>
where
    E: EmbeddingProvider,
    S: PaperStorage,
{
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<SearchResult>> {
        let text = query.query.trim();
        if text.is_empty() {
            return Err(QueryError::InvalidQuery("query text is empty".to_string()));
        }
        if query.top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        // 1. Embed the query
        let query_embedding = self
            .embedding_provider
            .embed(text)
            .await
            .map_err(|e| QueryError::EmbeddingError(e.to_string()))?;

        // 2. Over-fetch candidates so per-paper dedup still leaves top_k
        let retrieve_k = self.retrieve_k.max(query.top_k);
        let candidates = self
            .index
            .search(&query_embedding, retrieve_k)
            .map_err(|e| QueryError::IndexError(e.to_string()))?;

        // 3. Join with chunk and paper rows in one round trip
        let chunk_ids: Vec<i64> = candidates.iter().map(|c| c.chunk_id).collect();
        let rows = self
            .storage
            .get_chunks_by_ids(&chunk_ids)
            .await
            .map_err(|e| QueryError::StorageError(e.to_string()))?;
        let mut by_id: HashMap<i64, ChunkHit> =
            rows.into_iter().map(|row| (row.chunk.id, row)).collect();

        // 4. Drop stale index entries
        let mut hits = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match by_id.remove(&candidate.chunk_id) {
                Some(row) => hits.push((row, candidate.score)),
                None => {
                    warn!(
                        chunk_id = candidate.chunk_id,
                        position = candidate.position,
                        "Indexed chunk missing from store, skipping"
                    );
                }
            }
        }

        // 5-6. One chunk per paper, best first, then truncate
        let mut ranked = best_per_paper(hits);
        ranked.truncate(query.top_k);

        debug!(
            candidates = candidates.len(),
            results = ranked.len(),
            "Search finished"
        );

        Ok(ranked
            .into_iter()
            .map(|(hit, score)| SearchResult::from_hit(hit, score, self.display_chars))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingResult};
    use crate::models::{NewChunk, NewPaper, PaperMetadata, PaperStatus, RelevanceLevel};
    use crate::storage::sqlite::SqliteStorage;
    use tempfile::TempDir;

    const DIM: usize = 3;

    /// Mock embedding provider that always returns the same query vector.
    struct MockEmbeddingProvider {
        vector: Vec<f32>,
        should_fail: bool,
    }

    impl MockEmbeddingProvider {
        fn new(vector: Vec<f32>) -> Self {
            Self {
                vector,
                should_fail: false,
            }
        }

        fn with_failure() -> Self {
            Self {
                vector: vec![0.0; DIM],
                should_fail: true,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, _text: &str) -> EmbeddingResult<Vec<f32>> {
            if self.should_fail {
                return Err(EmbeddingError::ApiError("Mock embedding failure".to_string()));
            }
            Ok(self.vector.clone())
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            let mut results = Vec::new();
            for text in texts {
                results.push(self.embed(text).await?);
            }
            Ok(results)
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    /// Unit vector whose inner product with `[1, 0, 0]` is `score`.
    fn vector_with_score(score: f32) -> Vec<f32> {
        vec![score, (1.0 - score * score).sqrt(), 0.0]
    }

    struct Fixture {
        _dir: TempDir,
        storage: SqliteStorage,
        index: VectorIndexManager,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = SqliteStorage::new(dir.path().join("test.db"));
            storage.initialize().await.unwrap();
            let index = VectorIndexManager::new(
                dir.path().join("test.index"),
                dir.path().join("test.json"),
                DIM,
            );
            Self {
                _dir: dir,
                storage,
                index,
            }
        }

        /// Store a paper with one chunk per score and index each chunk.
        async fn add_paper(&mut self, arxiv_id: &str, scores: &[f32]) -> Vec<i64> {
            let meta = PaperMetadata {
                arxiv_id: arxiv_id.to_string(),
                title: format!("Title {}", arxiv_id),
                authors: vec!["Alice".to_string()],
                ..Default::default()
            };
            let paper_id = self
                .storage
                .insert_paper(&NewPaper::from_metadata(&meta, PaperStatus::Indexed))
                .await
                .unwrap();
            let chunks: Vec<NewChunk> = scores
                .iter()
                .enumerate()
                .map(|(i, _)| NewChunk {
                    section: "Method".to_string(),
                    chunk_index: i,
                    text: format!("chunk {} of {} with some longer body text", i, arxiv_id),
                    token_count: 8,
                })
                .collect();
            let ids = self.storage.replace_chunks(paper_id, &chunks).await.unwrap();
            let vectors: Vec<Vec<f32>> = scores.iter().map(|s| vector_with_score(*s)).collect();
            self.index.add(&vectors, &ids).unwrap();
            ids
        }

        fn engine(
            self,
            embedder: MockEmbeddingProvider,
        ) -> (TempDir, IndexSearchEngine<MockEmbeddingProvider, SqliteStorage>) {
            (self._dir, IndexSearchEngine::new(embedder, self.storage, self.index))
        }
    }

    fn query_embedder() -> MockEmbeddingProvider {
        MockEmbeddingProvider::new(vec![1.0, 0.0, 0.0])
    }

    #[test]
    fn test_search_query_defaults() {
        let query = SearchQuery::new("test query", None);
        assert_eq!(query.top_k, DEFAULT_TOP_K);
    }

    #[tokio::test]
    async fn test_one_result_per_paper_with_best_score() {
        let mut fixture = Fixture::new().await;
        let ids = fixture.add_paper("2401.00001", &[0.7, 0.9]).await;
        fixture.add_paper("2401.00002", &[0.8]).await;
        let (_dir, engine) = fixture.engine(query_embedder());

        let results = engine
            .search(&SearchQuery::new("splatting", Some(10)))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].arxiv_id, "2401.00001");
        assert!((results[0].score - 0.9).abs() < 1e-5);
        assert_eq!(results[0].chunk_id, ids[1]);
        assert_eq!(results[0].relevance, RelevanceLevel::HighlySimilar);
        assert_eq!(results[1].arxiv_id, "2401.00002");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_top_k_larger_than_index() {
        let mut fixture = Fixture::new().await;
        fixture.add_paper("2401.00001", &[0.5]).await;
        let (_dir, engine) = fixture.engine(query_embedder());

        let results = engine.search(&SearchQuery::new("q", Some(3))).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_top_k_truncation() {
        let mut fixture = Fixture::new().await;
        for (i, score) in [0.9, 0.8, 0.7, 0.6, 0.5].iter().enumerate() {
            fixture.add_paper(&format!("2401.0000{}", i), &[*score]).await;
        }
        let (_dir, engine) = fixture.engine(query_embedder());

        let results = engine.search(&SearchQuery::new("q", Some(2))).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].arxiv_id, "2401.00000");
        assert_eq!(results[1].arxiv_id, "2401.00001");
    }

    #[tokio::test]
    async fn test_stale_index_entries_are_dropped() {
        let mut fixture = Fixture::new().await;
        fixture.add_paper("2401.00001", &[0.6]).await;
        fixture
            .index
            .add(&[vector_with_score(0.99)], &[999_999])
            .unwrap();
        let (_dir, engine) = fixture.engine(query_embedder());

        let results = engine.search(&SearchQuery::new("q", Some(5))).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].arxiv_id, "2401.00001");
    }

    #[tokio::test]
    async fn test_display_text_is_truncated() {
        let mut fixture = Fixture::new().await;
        fixture.add_paper("2401.00001", &[0.9]).await;
        let (_dir, engine) = fixture.engine(query_embedder());
        let engine = engine.with_display_chars(10);

        let results = engine.search(&SearchQuery::new("q", None)).await.unwrap();
        assert_eq!(results[0].text.chars().count(), 10);
        assert_eq!(results[0].authors, vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_small_retrieve_k_still_fills_top_k_candidates() {
        let mut fixture = Fixture::new().await;
        fixture.add_paper("2401.00001", &[0.9]).await;
        fixture.add_paper("2401.00002", &[0.8]).await;
        let (_dir, engine) = fixture.engine(query_embedder());
        let engine = engine.with_retrieve_k(1);

        let results = engine.search(&SearchQuery::new("q", Some(2))).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let fixture = Fixture::new().await;
        let (_dir, engine) = fixture.engine(MockEmbeddingProvider::with_failure());

        let results = engine.search(&SearchQuery::new("q", None)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected() {
        let fixture = Fixture::new().await;
        let (_dir, engine) = fixture.engine(query_embedder());

        let result = engine.search(&SearchQuery::new("   ", None)).await;
        assert!(matches!(result, Err(QueryError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_embedding_error_propagation() {
        let mut fixture = Fixture::new().await;
        fixture.add_paper("2401.00001", &[0.9]).await;
        let (_dir, engine) = fixture.engine(MockEmbeddingProvider::with_failure());

        let result = engine.search(&SearchQuery::new("q", None)).await;
        assert!(matches!(result, Err(QueryError::EmbeddingError(_))));
    }
}
