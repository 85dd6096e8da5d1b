//! Paper source module.
//!
//! This module defines the interface for sourcing paper metadata and documents
//! from upstream providers, and includes a JSON file source and a PDF
//! downloader.
//!
//! The `PaperSource` trait abstracts where metadata comes from, allowing the
//! ingestion pipeline to work with different backends (JSON dumps, the arXiv
//! API, ...) without coupling to specific implementations.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::PaperMetadata;

pub mod download;
pub mod json;

/// Errors that can occur when fetching papers from a source.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Failed to read from the data source
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the data format
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Network or connection error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Other source-specific errors
    #[error("Provider error: {0}")]
    Other(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Trait for sourcing paper metadata.
///
/// # Design Notes
///
/// - Sources return metadata only; chunking and embedding belong to the
///   ingestion pipeline
/// - Identifiers must already be canonical (see [`canonical_paper_id`])
/// - Records don't need to be deduplicated; the pipeline upserts by id
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Fetch all available papers from this source.
    ///
    /// # Errors
    /// Returns `ProviderError` if papers cannot be fetched or parsed
    async fn fetch_papers(&self) -> ProviderResult<Vec<PaperMetadata>>;

    /// Fetch a single paper by canonical id.
    ///
    /// # Returns
    /// `None` if the source does not know the paper
    async fn fetch_paper(&self, arxiv_id: &str) -> ProviderResult<Option<PaperMetadata>> {
        let wanted = canonical_paper_id(arxiv_id);
        let papers = self.fetch_papers().await?;
        Ok(papers.into_iter().find(|p| p.arxiv_id == wanted))
    }

    /// Fetch at most `limit` papers.
    async fn fetch_papers_limit(&self, limit: usize) -> ProviderResult<Vec<PaperMetadata>> {
        let all_papers = self.fetch_papers().await?;
        Ok(all_papers.into_iter().take(limit).collect())
    }

    /// Human-readable name of this source, for logging.
    fn name(&self) -> &str;
}

/// Canonical form of an arXiv identifier.
///
/// Strips an `.../abs/` URL prefix and a trailing version suffix:
/// `http://arxiv.org/abs/2401.12345v2` becomes `2401.12345`.
pub fn canonical_paper_id(raw: &str) -> String {
    let raw = raw.trim();
    let id = match raw.rfind("/abs/") {
        Some(pos) => &raw[pos + "/abs/".len()..],
        None => raw,
    };

    if let Some(v_pos) = id.rfind('v') {
        let suffix = &id[v_pos + 1..];
        if v_pos > 0 && !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return id[..v_pos].to_string();
        }
    }
    id.to_string()
}
