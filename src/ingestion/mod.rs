//! Ingestion pipeline module.
//!
//! This module turns upstream paper metadata into stored, chunked and indexed
//! papers. Each paper moves through
//! `new → ingesting → {metadata_only | chunked | indexed}`:
//!
//! 1. Upsert the paper row (the identity anchor; failure aborts this paper)
//! 2. Download the source document if needed (failure is tolerated)
//! 3. Extract and chunk it, falling back to the abstract as a single chunk
//! 4. Persist the chunks (failure aborts this paper)
//! 5. Embed the chunks and append them to the vector index (failure is
//!    recorded and leaves the paper at `chunked`)
//! 6. Record the final status
//!
//! # Usage
//!
//! ```ignore
//! use research_base::ingestion::{IngestionPipeline, IngestOptions};
//! use research_base::index::VectorIndexManager;
//! use research_base::processing::DocumentProcessor;
//! use research_base::storage::sqlite::SqliteStorage;
//!
//! let storage = SqliteStorage::new(config.db_path());
//! let index = VectorIndexManager::load(config.index_path(), config.id_map_path(), 1024)?;
//! let processor = DocumentProcessor::new(800, 100)?;
//! let mut pipeline =
//!     IngestionPipeline::connect(embedder, storage, index, processor, IngestOptions::default()).await?;
//!
//! let summary = pipeline.crawl_and_ingest(&papers).await?;
//! println!("{} new, {} embedded chunks", summary.new, summary.embedded);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndexManager;
use crate::models::{EmbeddingConfig, NewChunk, NewPaper, PaperMetadata, PaperStatus};
use crate::processing::DocumentProcessor;
use crate::provider::download::PdfDownloader;
use crate::provider::{canonical_paper_id, PaperSource, ProviderError};
use crate::storage::PaperStorage;

/// Label of the synthetic chunk built from a paper's abstract.
pub const ABSTRACT_SECTION: &str = "Abstract";

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Vector index operation failed
    #[error("Index error: {0}")]
    IndexError(String),

    /// Provider operation failed
    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    /// Invalid input data or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Other unexpected errors
    #[error("Ingestion error: {0}")]
    Other(String),
}

/// Result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Switches for one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Download source documents that are not already local
    pub download: bool,
    /// Embed chunks and add them to the vector index
    pub embed: bool,
    /// Log what would happen and write nothing
    pub dry_run: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            download: true,
            embed: true,
            dry_run: false,
        }
    }
}

/// Result of ingesting one paper.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub arxiv_id: String,
    pub chunks: usize,
    pub embedded: usize,
    pub status: PaperStatus,
    /// Set when embedding or recording index positions failed; the paper
    /// stays at `chunked` and the index keeps none of its vectors
    pub embedding_error: Option<String>,
}

/// Counters for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    /// Papers handed to the batch
    pub total_found: usize,
    /// Papers not already chunked or indexed
    pub new: usize,
    pub ingested: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub errors: usize,
}

/// Ingestion pipeline coordinator.
///
/// Owns the embedding client, the store handle and the in-memory vector
/// index for the lifetime of a run. It is the only writer to the index.
pub struct IngestionPipeline<E, S>
where
    E: EmbeddingProvider,
    S: PaperStorage,
{
    embedding_provider: E,
    storage: S,
    index: VectorIndexManager,
    processor: DocumentProcessor,
    downloader: Option<PdfDownloader>,
    options: IngestOptions,
    polite_delay: Duration,
}

impl<E, S> IngestionPipeline<E, S>
where
    E: EmbeddingProvider,
    S: PaperStorage,
{
    /// Extract embedding configuration from a provider.
    fn extract_config(provider: &E) -> EmbeddingConfig {
        EmbeddingConfig {
            model_name: provider.model_name().to_string(),
            dimension: provider.dimension(),
        }
    }

    /// Prepare storage and build a pipeline.
    ///
    /// This method:
    /// 1. Initializes the storage schema (idempotent)
    /// 2. Records the provider's embedding configuration if the store has none
    /// 3. Validates that the provider and the index match the stored configuration
    ///
    /// # Errors
    /// Returns `IngestionError::InvalidInput` if the provider's model or
    /// dimension differs from the stored configuration, or the index was built
    /// for a different dimension. Returns `IngestionError::StorageError` for
    /// storage failures.
    pub async fn connect(
        embedding_provider: E,
        storage: S,
        index: VectorIndexManager,
        processor: DocumentProcessor,
        options: IngestOptions,
    ) -> IngestionResult<Self> {
        storage
            .initialize()
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?;

        let provider_config = Self::extract_config(&embedding_provider);
        let stored_config = storage
            .get_config()
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?;

        match stored_config {
            Some(stored) => {
                if provider_config.model_name != stored.model_name {
                    return Err(IngestionError::InvalidInput(format!(
                        "Embedding model mismatch: provider uses '{}' but storage has '{}'",
                        provider_config.model_name, stored.model_name
                    )));
                }
                if provider_config.dimension != stored.dimension {
                    return Err(IngestionError::InvalidInput(format!(
                        "Embedding dimension mismatch: provider has {} but storage has {}",
                        provider_config.dimension, stored.dimension
                    )));
                }
            }
            None => {
                info!(
                    model = %provider_config.model_name,
                    dimension = provider_config.dimension,
                    "Recording embedding configuration"
                );
                storage
                    .store_config(&provider_config)
                    .await
                    .map_err(|e| IngestionError::StorageError(e.to_string()))?;
            }
        }

        if index.dimension() != provider_config.dimension {
            return Err(IngestionError::InvalidInput(format!(
                "Index dimension {} does not match embedding dimension {}",
                index.dimension(),
                provider_config.dimension
            )));
        }

        Ok(Self {
            embedding_provider,
            storage,
            index,
            processor,
            downloader: None,
            options,
            polite_delay: Duration::from_secs(1),
        })
    }

    /// Enable document downloads through `downloader`.
    pub fn with_downloader(mut self, downloader: PdfDownloader) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Pause inserted between papers of a batch.
    pub fn with_polite_delay(mut self, delay: Duration) -> Self {
        self.polite_delay = delay;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn index(&self) -> &VectorIndexManager {
        &self.index
    }

    pub fn options(&self) -> IngestOptions {
        self.options
    }

    /// Persist the vector index.
    pub fn save_index(&self) -> IngestionResult<()> {
        self.index
            .save()
            .map_err(|e| IngestionError::IndexError(e.to_string()))
    }

    /// Ingest one paper.
    ///
    /// Only failures to write the paper row, its chunks or its final status
    /// are returned as errors. Download, extraction and embedding failures
    /// degrade the outcome instead.
    pub async fn ingest_paper(&mut self, meta: &PaperMetadata) -> IngestionResult<IngestOutcome> {
        let arxiv_id = meta.arxiv_id.clone();

        if self.options.dry_run {
            info!(arxiv_id = %arxiv_id, title = %meta.title, "[dry run] Would ingest paper");
            return Ok(IngestOutcome {
                arxiv_id,
                chunks: 0,
                embedded: 0,
                status: PaperStatus::New,
                embedding_error: None,
            });
        }

        let paper_id = self
            .storage
            .insert_paper(&NewPaper::from_metadata(meta, PaperStatus::Ingesting))
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?;
        self.storage
            .set_paper_status(paper_id, PaperStatus::Ingesting)
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?;

        let document = self.fetch_document(paper_id, meta).await;

        let mut chunks = match &document {
            Some(path) => self.processor.process_document(path).await,
            None => Vec::new(),
        };
        if chunks.is_empty() {
            if let Some(abstract_text) = meta.non_empty_abstract() {
                debug!(arxiv_id = %arxiv_id, "Falling back to abstract chunk");
                chunks.push(NewChunk {
                    section: ABSTRACT_SECTION.to_string(),
                    chunk_index: 0,
                    text: abstract_text.to_string(),
                    token_count: abstract_text.split_whitespace().count(),
                });
            }
        }

        let chunk_ids = self
            .storage
            .replace_chunks(paper_id, &chunks)
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?;

        let mut embedded = 0;
        let mut embedding_error = None;
        if self.options.embed && !chunks.is_empty() {
            match self.embed_and_index(&chunks, &chunk_ids).await {
                Ok(n) => embedded = n,
                Err(e) => {
                    warn!(arxiv_id = %arxiv_id, error = %e, "Indexing failed, keeping chunks unindexed");
                    embedding_error = Some(e.to_string());
                }
            }
        }

        let status = if embedded > 0 {
            PaperStatus::Indexed
        } else if !chunk_ids.is_empty() {
            PaperStatus::Chunked
        } else {
            PaperStatus::MetadataOnly
        };
        self.storage
            .set_paper_status(paper_id, status)
            .await
            .map_err(|e| IngestionError::StorageError(e.to_string()))?;

        info!(
            arxiv_id = %arxiv_id,
            chunks = chunk_ids.len(),
            embedded,
            status = %status,
            "Ingested paper"
        );

        Ok(IngestOutcome {
            arxiv_id,
            chunks: chunk_ids.len(),
            embedded,
            status,
            embedding_error,
        })
    }

    /// Local document for the paper, downloading it if allowed.
    async fn fetch_document(&self, paper_id: i64, meta: &PaperMetadata) -> Option<PathBuf> {
        if let Some(path) = &meta.pdf_path {
            return Some(PathBuf::from(path));
        }
        if !self.options.download {
            return None;
        }
        let downloader = self.downloader.as_ref()?;

        match downloader
            .download(&meta.arxiv_id, meta.pdf_url.as_deref())
            .await
        {
            Ok(Some(path)) => {
                if let Err(e) = self
                    .storage
                    .set_pdf_path(paper_id, &path.to_string_lossy())
                    .await
                {
                    warn!(arxiv_id = %meta.arxiv_id, error = %e, "Could not record document path");
                }
                Some(path)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(arxiv_id = %meta.arxiv_id, error = %e, "Document download failed");
                None
            }
        }
    }

    /// Embed chunk texts, append them to the index and record their positions.
    async fn embed_and_index(
        &mut self,
        chunks: &[NewChunk],
        chunk_ids: &[i64],
    ) -> IngestionResult<usize> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self
            .embedding_provider
            .embed_batch(&texts)
            .await
            .map_err(|e| IngestionError::EmbeddingError(e.to_string()))?;

        let positions = self
            .index
            .add(&vectors, chunk_ids)
            .map_err(|e| IngestionError::IndexError(e.to_string()))?;

        let start = positions.start;
        let assignments: Vec<(i64, i64)> = chunk_ids
            .iter()
            .zip(positions)
            .map(|(&chunk_id, position)| (chunk_id, position as i64))
            .collect();
        if let Err(e) = self
            .storage
            .mark_chunks_indexed(&assignments, self.embedding_provider.model_name())
            .await
        {
            // Vectors the store cannot point at must not stay searchable
            self.index.truncate_to(start);
            return Err(IngestionError::StorageError(e.to_string()));
        }

        Ok(assignments.len())
    }

    /// Ingest a batch of papers.
    ///
    /// See [`Self::crawl_and_ingest_with_progress`].
    pub async fn crawl_and_ingest(
        &mut self,
        papers: &[PaperMetadata],
    ) -> IngestionResult<CrawlSummary> {
        self.crawl_and_ingest_with_progress(papers, |_, _| {}).await
    }

    /// Ingest a batch of papers, reporting progress after each one.
    ///
    /// Papers already `chunked`, `indexed` or `summarized` are skipped before any work
    /// starts. A failing paper is counted and the batch moves on. The index
    /// is saved once at the end if anything was embedded.
    ///
    /// # Arguments
    /// * `papers` - Metadata records with canonical ids
    /// * `on_progress` - Called with `(done, total_new)` after each paper
    ///
    /// # Errors
    /// Returns `IngestionError` only if the dedup lookup or the final index
    /// save fails
    pub async fn crawl_and_ingest_with_progress<F>(
        &mut self,
        papers: &[PaperMetadata],
        mut on_progress: F,
    ) -> IngestionResult<CrawlSummary>
    where
        F: FnMut(usize, usize),
    {
        let mut new_papers = Vec::new();
        for paper in papers {
            let existing = self
                .storage
                .get_paper(&paper.arxiv_id)
                .await
                .map_err(|e| IngestionError::StorageError(e.to_string()))?;
            match existing {
                Some(stored) if stored.status.is_ingested() => {
                    debug!(arxiv_id = %paper.arxiv_id, status = %stored.status, "Already ingested, skipping");
                }
                _ => new_papers.push(paper),
            }
        }

        info!(
            new = new_papers.len(),
            found = papers.len(),
            "Starting batch ingestion"
        );

        let mut summary = CrawlSummary {
            total_found: papers.len(),
            new: new_papers.len(),
            ..Default::default()
        };

        for (i, paper) in new_papers.iter().enumerate() {
            match self.ingest_paper(paper).await {
                Ok(outcome) => {
                    summary.ingested += 1;
                    summary.chunks += outcome.chunks;
                    summary.embedded += outcome.embedded;
                }
                Err(e) => {
                    warn!(arxiv_id = %paper.arxiv_id, error = %e, "Paper ingestion failed");
                    summary.errors += 1;
                }
            }
            on_progress(i + 1, new_papers.len());

            if i + 1 < new_papers.len() && !self.polite_delay.is_zero() {
                tokio::time::sleep(self.polite_delay).await;
            }
        }

        if !self.options.dry_run && summary.embedded > 0 {
            self.save_index()?;
        }

        info!(
            ingested = summary.ingested,
            chunks = summary.chunks,
            embedded = summary.embedded,
            errors = summary.errors,
            "Batch ingestion finished"
        );
        Ok(summary)
    }

    /// Ingest one paper by id, looking its metadata up in `source`.
    ///
    /// If the source does not know the paper (or fails), a placeholder record
    /// titled `Paper <id>` without an abstract is ingested instead.
    pub async fn ingest_single<P>(
        &mut self,
        source: &P,
        arxiv_id: &str,
    ) -> IngestionResult<IngestOutcome>
    where
        P: PaperSource + ?Sized,
    {
        let arxiv_id = canonical_paper_id(arxiv_id);
        let meta = match source.fetch_paper(&arxiv_id).await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                warn!(arxiv_id = %arxiv_id, source = source.name(), "Paper not found in source, using placeholder");
                placeholder_metadata(&arxiv_id)
            }
            Err(e) => {
                warn!(arxiv_id = %arxiv_id, error = %e, "Source lookup failed, using placeholder");
                placeholder_metadata(&arxiv_id)
            }
        };

        let outcome = self.ingest_paper(&meta).await?;
        if !self.options.dry_run && outcome.embedded > 0 {
            self.save_index()?;
        }
        Ok(outcome)
    }
}

fn placeholder_metadata(arxiv_id: &str) -> PaperMetadata {
    PaperMetadata {
        arxiv_id: arxiv_id.to_string(),
        title: format!("Paper {}", arxiv_id),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingResult};
    use crate::provider::ProviderResult;
    use crate::storage::sqlite::SqliteStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const DIM: usize = 4;

    /// Mock embedding provider for testing.
    ///
    /// Produces a deterministic unit vector from the text and can be told to fail.
    #[derive(Clone, Default)]
    struct MockEmbeddingProvider {
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl MockEmbeddingProvider {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::RetriesExhausted {
                    attempts: 10,
                    last: "service unavailable".to_string(),
                });
            }
            let len = text.len() as f32;
            let mut v = vec![1.0, len, (len % 7.0) + 1.0, 0.5];
            crate::embedding::l2_normalize(&mut v);
            Ok(v)
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    struct MockPaperSource {
        papers: Vec<PaperMetadata>,
    }

    #[async_trait]
    impl PaperSource for MockPaperSource {
        async fn fetch_papers(&self) -> ProviderResult<Vec<PaperMetadata>> {
            Ok(self.papers.clone())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn create_test_paper(arxiv_id: &str, abstract_text: Option<&str>) -> PaperMetadata {
        PaperMetadata {
            arxiv_id: arxiv_id.to_string(),
            title: format!("Paper about {}", arxiv_id),
            authors: vec!["Alice".to_string(), "Bob".to_string()],
            abstract_text: abstract_text.map(str::to_string),
            categories: vec!["cs.CV".to_string()],
            ..Default::default()
        }
    }

    async fn create_pipeline(
        dir: &TempDir,
        embedder: MockEmbeddingProvider,
        options: IngestOptions,
    ) -> IngestionPipeline<MockEmbeddingProvider, SqliteStorage> {
        let storage = SqliteStorage::new(dir.path().join("test.db"));
        let index = VectorIndexManager::load(
            dir.path().join("faiss/researchbase.index"),
            dir.path().join("faiss/id_map.json"),
            DIM,
        )
        .unwrap();
        let processor = DocumentProcessor::new(100, 20).unwrap();
        IngestionPipeline::connect(embedder, storage, index, processor, options)
            .await
            .unwrap()
            .with_polite_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_abstract_only_paper_gets_one_indexed_chunk() {
        let dir = TempDir::new().unwrap();
        let mut pipeline =
            create_pipeline(&dir, MockEmbeddingProvider::default(), IngestOptions::default()).await;

        let outcome = pipeline
            .ingest_paper(&create_test_paper("2401.00001", Some("We splat gaussians.")))
            .await
            .unwrap();

        assert_eq!(outcome.chunks, 1);
        assert_eq!(outcome.embedded, 1);
        assert_eq!(outcome.status, PaperStatus::Indexed);
        assert_eq!(pipeline.index().len(), 1);

        let paper = pipeline.storage().get_paper("2401.00001").await.unwrap().unwrap();
        assert_eq!(paper.status, PaperStatus::Indexed);
        let chunks = pipeline.storage().get_chunks_for_paper(paper.id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section, ABSTRACT_SECTION);
        assert_eq!(chunks[0].token_count, 3);
        assert_eq!(chunks[0].faiss_id, Some(0));
        assert_eq!(chunks[0].embedding_model.as_deref(), Some("mock-model"));
        assert_eq!(pipeline.index().id_map(), &[chunks[0].id]);
    }

    #[tokio::test]
    async fn test_paper_without_text_is_metadata_only() {
        let dir = TempDir::new().unwrap();
        let mut pipeline =
            create_pipeline(&dir, MockEmbeddingProvider::default(), IngestOptions::default()).await;

        let outcome = pipeline
            .ingest_paper(&create_test_paper("2401.00002", None))
            .await
            .unwrap();
        assert_eq!(outcome.chunks, 0);
        assert_eq!(outcome.status, PaperStatus::MetadataOnly);
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_paper_chunked() {
        let dir = TempDir::new().unwrap();
        let mut pipeline =
            create_pipeline(&dir, MockEmbeddingProvider::failing(), IngestOptions::default()).await;

        let outcome = pipeline
            .ingest_paper(&create_test_paper("2401.00003", Some("Some abstract text.")))
            .await
            .unwrap();

        assert_eq!(outcome.status, PaperStatus::Chunked);
        assert_eq!(outcome.embedded, 0);
        assert!(outcome
            .embedding_error
            .as_deref()
            .is_some_and(|e| e.contains("service unavailable")));
        assert!(pipeline.index().is_empty());
    }

    #[tokio::test]
    async fn test_failed_position_update_rolls_back_index() {
        let dir = TempDir::new().unwrap();
        let mut pipeline =
            create_pipeline(&dir, MockEmbeddingProvider::default(), IngestOptions::default()).await;
        pipeline
            .ingest_paper(&create_test_paper("2401.00010", Some("Already indexed.")))
            .await
            .unwrap();
        assert_eq!(pipeline.index().len(), 1);

        let conn = rusqlite::Connection::open(dir.path().join("test.db")).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_positions BEFORE UPDATE OF faiss_id ON chunks
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();
        drop(conn);

        let outcome = pipeline
            .ingest_paper(&create_test_paper("2401.00011", Some("Some abstract text.")))
            .await
            .unwrap();

        assert_eq!(outcome.status, PaperStatus::Chunked);
        assert_eq!(outcome.embedded, 0);
        assert!(outcome
            .embedding_error
            .as_deref()
            .is_some_and(|e| e.contains("disk full")));
        assert_eq!(pipeline.index().len(), 1);
        assert_eq!(pipeline.index().id_map().len(), 1);

        let paper = pipeline.storage().get_paper("2401.00011").await.unwrap().unwrap();
        assert_eq!(paper.status, PaperStatus::Chunked);
        let chunks = pipeline.storage().get_chunks_for_paper(paper.id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].faiss_id, None);
        assert!(!pipeline.index().id_map().contains(&chunks[0].id));
    }

    #[tokio::test]
    async fn test_crawl_skips_summarized_papers() {
        let dir = TempDir::new().unwrap();
        let embedder = MockEmbeddingProvider::default();
        let calls = embedder.calls.clone();
        let mut pipeline = create_pipeline(&dir, embedder, IngestOptions::default()).await;

        let paper = create_test_paper("2401.00012", Some("Summarized already."));
        pipeline.ingest_paper(&paper).await.unwrap();
        let stored = pipeline.storage().get_paper("2401.00012").await.unwrap().unwrap();
        pipeline
            .storage()
            .set_paper_status(stored.id, PaperStatus::Summarized)
            .await
            .unwrap();
        let calls_before = calls.load(Ordering::SeqCst);

        let summary = pipeline.crawl_and_ingest(&[paper]).await.unwrap();
        assert_eq!(summary.total_found, 1);
        assert_eq!(summary.new, 0);
        assert_eq!(calls.load(Ordering::SeqCst), calls_before);
        assert_eq!(pipeline.index().len(), 1);

        let stored = pipeline.storage().get_paper("2401.00012").await.unwrap().unwrap();
        assert_eq!(stored.status, PaperStatus::Summarized);
    }

    #[tokio::test]
    async fn test_embedding_disabled_leaves_paper_chunked() {
        let dir = TempDir::new().unwrap();
        let embedder = MockEmbeddingProvider::default();
        let calls = embedder.calls.clone();
        let options = IngestOptions {
            embed: false,
            ..Default::default()
        };
        let mut pipeline = create_pipeline(&dir, embedder, options).await;

        let outcome = pipeline
            .ingest_paper(&create_test_paper("2401.00004", Some("Abstract.")))
            .await
            .unwrap();
        assert_eq!(outcome.status, PaperStatus::Chunked);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_document_is_chunked_by_section() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("paper.txt");
        let body = (0..120).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        std::fs::write(
            &doc,
            format!("Introduction\n{}\nReferences\n[1] Someone.", body),
        )
        .unwrap();

        let mut pipeline =
            create_pipeline(&dir, MockEmbeddingProvider::default(), IngestOptions::default()).await;
        let mut meta = create_test_paper("2401.00005", Some("Unused abstract."));
        meta.pdf_path = Some(doc.to_string_lossy().to_string());

        let outcome = pipeline.ingest_paper(&meta).await.unwrap();
        // 120 words in 75-word windows with stride 60
        assert_eq!(outcome.chunks, 2);
        assert_eq!(outcome.embedded, 2);

        let paper = pipeline.storage().get_paper("2401.00005").await.unwrap().unwrap();
        let chunks = pipeline.storage().get_chunks_for_paper(paper.id).await.unwrap();
        assert!(chunks.iter().all(|c| c.section == "Introduction"));
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[tokio::test]
    async fn test_rerun_skips_ingested_papers() {
        let dir = TempDir::new().unwrap();
        let mut pipeline =
            create_pipeline(&dir, MockEmbeddingProvider::default(), IngestOptions::default()).await;
        let papers = vec![
            create_test_paper("2401.00010", Some("First abstract.")),
            create_test_paper("2401.00011", Some("Second abstract.")),
            create_test_paper("2401.00012", None),
        ];

        let first = pipeline.crawl_and_ingest(&papers).await.unwrap();
        assert_eq!(
            first,
            CrawlSummary {
                total_found: 3,
                new: 3,
                ingested: 3,
                chunks: 2,
                embedded: 2,
                errors: 0,
            }
        );
        assert!(dir.path().join("faiss/researchbase.index").exists());

        let second = pipeline.crawl_and_ingest(&papers).await.unwrap();
        // Only the metadata-only paper is retried
        assert_eq!(second.total_found, 3);
        assert_eq!(second.new, 1);
        assert_eq!(second.chunks, 0);

        let stats = pipeline.storage().stats().await.unwrap();
        assert_eq!(stats.papers, 3);
        assert_eq!(stats.chunks, 2);
        assert_eq!(pipeline.index().len(), 2);
    }

    #[tokio::test]
    async fn test_progress_is_reported_per_paper() {
        let dir = TempDir::new().unwrap();
        let mut pipeline =
            create_pipeline(&dir, MockEmbeddingProvider::default(), IngestOptions::default()).await;
        let papers = vec![
            create_test_paper("a.1", Some("One.")),
            create_test_paper("a.2", Some("Two.")),
        ];

        let mut seen = Vec::new();
        pipeline
            .crawl_and_ingest_with_progress(&papers, |done, total| seen.push((done, total)))
            .await
            .unwrap();
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let options = IngestOptions {
            dry_run: true,
            ..Default::default()
        };
        let mut pipeline = create_pipeline(&dir, MockEmbeddingProvider::default(), options).await;

        let summary = pipeline
            .crawl_and_ingest(&[create_test_paper("2401.00020", Some("Abstract."))])
            .await
            .unwrap();
        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.chunks, 0);
        assert_eq!(pipeline.storage().stats().await.unwrap().papers, 0);
        assert!(!dir.path().join("faiss/researchbase.index").exists());
    }

    #[tokio::test]
    async fn test_ingest_single_uses_placeholder_for_unknown_paper() {
        let dir = TempDir::new().unwrap();
        let mut pipeline =
            create_pipeline(&dir, MockEmbeddingProvider::default(), IngestOptions::default()).await;
        let source = MockPaperSource { papers: vec![] };

        let outcome = pipeline.ingest_single(&source, "2401.00030v2").await.unwrap();
        assert_eq!(outcome.arxiv_id, "2401.00030");
        assert_eq!(outcome.status, PaperStatus::MetadataOnly);

        let paper = pipeline.storage().get_paper("2401.00030").await.unwrap().unwrap();
        assert_eq!(paper.title, "Paper 2401.00030");
    }

    #[tokio::test]
    async fn test_ingest_single_saves_index() {
        let dir = TempDir::new().unwrap();
        let mut pipeline =
            create_pipeline(&dir, MockEmbeddingProvider::default(), IngestOptions::default()).await;
        let source = MockPaperSource {
            papers: vec![create_test_paper("2401.00031", Some("Known abstract."))],
        };

        let outcome = pipeline.ingest_single(&source, "2401.00031").await.unwrap();
        assert_eq!(outcome.status, PaperStatus::Indexed);
        assert!(dir.path().join("faiss/id_map.json").exists());
    }

    #[tokio::test]
    async fn test_connect_rejects_other_embedding_model() {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::new(dir.path().join("test.db"));
        storage.initialize().await.unwrap();
        storage
            .store_config(&EmbeddingConfig {
                model_name: "another-model".to_string(),
                dimension: DIM,
            })
            .await
            .unwrap();

        let index = VectorIndexManager::new(
            dir.path().join("i.index"),
            dir.path().join("i.json"),
            DIM,
        );
        let result = IngestionPipeline::connect(
            MockEmbeddingProvider::default(),
            storage,
            index,
            DocumentProcessor::new(800, 100).unwrap(),
            IngestOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(IngestionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_index_of_other_dimension() {
        let dir = TempDir::new().unwrap();
        let index = VectorIndexManager::new(
            dir.path().join("i.index"),
            dir.path().join("i.json"),
            DIM + 1,
        );
        let result = IngestionPipeline::connect(
            MockEmbeddingProvider::default(),
            SqliteStorage::new(dir.path().join("test.db")),
            index,
            DocumentProcessor::new(800, 100).unwrap(),
            IngestOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(IngestionError::InvalidInput(_))));
    }
}
