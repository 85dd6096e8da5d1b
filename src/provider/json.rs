//! JSON file paper source.
//!
//! Reads a JSON array of paper metadata records, e.g. a dump of an arXiv
//! search. Each record needs at least `arxiv_id` and `title`; `abstract`,
//! `authors`, `categories`, `published`, `updated`, `pdf_url` and `pdf_path`
//! are optional.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{canonical_paper_id, PaperSource, ProviderError, ProviderResult};
use crate::models::PaperMetadata;

/// Paper source backed by a JSON file loaded into memory.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    papers: Vec<PaperMetadata>,
}

impl JsonFileSource {
    /// Load and parse a JSON file.
    ///
    /// Identifiers are canonicalized on load.
    ///
    /// # Errors
    /// Returns `ProviderError::IoError` if the file cannot be read and
    /// `ProviderError::ParseError` if it is not an array of records
    pub async fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let mut papers: Vec<PaperMetadata> = serde_json::from_str(&raw)
            .map_err(|e| ProviderError::ParseError(format!("{}: {}", path.display(), e)))?;

        for paper in &mut papers {
            paper.arxiv_id = canonical_paper_id(&paper.arxiv_id);
        }
        debug!(path = %path.display(), papers = papers.len(), "Loaded paper metadata");

        Ok(Self {
            path: path.to_path_buf(),
            papers,
        })
    }

    /// A source over records already in memory, canonicalized like a file.
    pub fn from_papers(mut papers: Vec<PaperMetadata>) -> Self {
        for paper in &mut papers {
            paper.arxiv_id = canonical_paper_id(&paper.arxiv_id);
        }
        Self {
            path: PathBuf::from("<memory>"),
            papers,
        }
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }
}

#[async_trait]
impl PaperSource for JsonFileSource {
    async fn fetch_papers(&self) -> ProviderResult<Vec<PaperMetadata>> {
        Ok(self.papers.clone())
    }

    fn name(&self) -> &str {
        self.path.to_str().unwrap_or("json file")
    }
}
