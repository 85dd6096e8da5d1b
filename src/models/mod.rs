//! Core data models for the research base.
//!
//! This module contains the records that flow through the ingestion and
//! retrieval pipeline: paper metadata, text chunks, extracted techniques and
//! benchmarks, discovered repositories, LLM summaries and search results.
//!
//! All list-valued attributes are plain `Vec`s here. How they are encoded on
//! disk is a storage concern and never leaks into these types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a paper.
///
/// `New → Ingesting → (MetadataOnly | Chunked | Indexed) → Summarized`.
/// Only the ingestion pipeline and the summarizer write this field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaperStatus {
    New,
    Ingesting,
    MetadataOnly,
    Chunked,
    Indexed,
    Summarized,
}

impl PaperStatus {
    /// Database representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperStatus::New => "new",
            PaperStatus::Ingesting => "ingesting",
            PaperStatus::MetadataOnly => "metadata_only",
            PaperStatus::Chunked => "chunked",
            PaperStatus::Indexed => "indexed",
            PaperStatus::Summarized => "summarized",
        }
    }

    /// Whether a paper in this status already has its chunks persisted.
    ///
    /// Batch crawls skip such papers instead of re-ingesting them.
    /// `summarized` comes after `indexed`, so it counts too.
    pub fn is_ingested(&self) -> bool {
        matches!(
            self,
            PaperStatus::Chunked | PaperStatus::Indexed | PaperStatus::Summarized
        )
    }
}

impl fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaperStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(PaperStatus::New),
            "ingesting" => Ok(PaperStatus::Ingesting),
            "metadata_only" => Ok(PaperStatus::MetadataOnly),
            "chunked" => Ok(PaperStatus::Chunked),
            "indexed" => Ok(PaperStatus::Indexed),
            "summarized" => Ok(PaperStatus::Summarized),
            other => Err(format!("unknown paper status '{}'", other)),
        }
    }
}

/// Paper metadata as delivered by an upstream source (arXiv search, JSON dump).
///
/// This is the input record of the ingestion pipeline. `arxiv_id` is expected
/// to be canonical already (see [`crate::provider::canonical_paper_id`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaperMetadata {
    /// Canonical external identifier, version suffix stripped
    pub arxiv_id: String,

    pub title: String,

    /// Authors in publication order
    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,

    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub published: Option<String>,

    #[serde(default)]
    pub updated: Option<String>,

    /// Remote location of the source document
    #[serde(default)]
    pub pdf_url: Option<String>,

    /// Local path of an already-downloaded source document
    #[serde(default)]
    pub pdf_path: Option<String>,
}

impl PaperMetadata {
    /// Abstract text if present and not blank.
    pub fn non_empty_abstract(&self) -> Option<&str> {
        self.abstract_text
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// Insert payload for a paper row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaper {
    pub arxiv_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub abstract_text: Option<String>,
    pub categories: Vec<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub pdf_path: Option<String>,
    pub status: PaperStatus,
}

impl NewPaper {
    /// Build an insert payload from upstream metadata with the given initial status.
    pub fn from_metadata(meta: &PaperMetadata, status: PaperStatus) -> Self {
        Self {
            arxiv_id: meta.arxiv_id.clone(),
            title: meta.title.clone(),
            authors: meta.authors.clone(),
            abstract_text: meta.abstract_text.clone(),
            categories: meta.categories.clone(),
            published: meta.published.clone(),
            updated: meta.updated.clone(),
            pdf_path: meta.pdf_path.clone(),
            status,
        }
    }
}

/// A stored research paper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paper {
    /// Database primary key
    pub id: i64,

    /// Canonical external identifier (unique)
    pub arxiv_id: String,

    pub title: String,

    /// Authors in publication order
    pub authors: Vec<String>,

    pub abstract_text: Option<String>,

    pub categories: Vec<String>,

    pub published: Option<String>,

    pub updated: Option<String>,

    /// Local path of the downloaded source document
    pub pdf_path: Option<String>,

    pub full_text_path: Option<String>,

    /// Raw JSON of the structured LLM summary, if summarized
    pub summary: Option<String>,

    pub status: PaperStatus,

    pub created_at: String,

    pub updated_at: String,
}

impl Paper {
    /// Parse the stored summary, if any.
    pub fn parsed_summary(&self) -> Option<PaperSummary> {
        self.summary
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// A chunk produced by the document processor, before it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewChunk {
    /// Section label, e.g. "Introduction" or "Full"
    pub section: String,

    /// Zero-based position within the paper, monotonic across sections
    pub chunk_index: usize,

    pub text: String,

    /// Estimated token count (word count scaled by a fixed factor)
    pub token_count: usize,
}

/// A persisted text chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub paper_id: i64,
    pub section: String,
    pub chunk_index: i64,
    pub text: String,
    pub token_count: i64,

    /// Position in the vector index; `None` means not yet indexed
    pub faiss_id: Option<i64>,

    /// Embedding model used to produce the indexed vector
    pub embedding_model: Option<String>,
}

impl Chunk {
    pub fn is_indexed(&self) -> bool {
        self.faiss_id.is_some()
    }
}

/// A chunk joined with the identifying fields of its paper.
///
/// Every read path that surfaces chunks for display returns this shape so the
/// caller never needs a second round trip to show a hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkHit {
    pub chunk: Chunk,
    pub arxiv_id: String,
    pub paper_title: String,
    pub authors: Vec<String>,
}

/// Status of an extracted technique.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TechniqueStatus {
    Promising,
    Sota,
    Deprecated,
    Superseded,
}

impl TechniqueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TechniqueStatus::Promising => "promising",
            TechniqueStatus::Sota => "sota",
            TechniqueStatus::Deprecated => "deprecated",
            TechniqueStatus::Superseded => "superseded",
        }
    }
}

impl FromStr for TechniqueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promising" => Ok(TechniqueStatus::Promising),
            "sota" => Ok(TechniqueStatus::Sota),
            "deprecated" => Ok(TechniqueStatus::Deprecated),
            "superseded" => Ok(TechniqueStatus::Superseded),
            other => Err(format!("unknown technique status '{}'", other)),
        }
    }
}

/// A named method extracted from paper summaries. Unique by exact name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Technique {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub first_paper_id: Option<i64>,
    pub status: TechniqueStatus,
}

/// Insert payload for a technique.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTechnique {
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub first_paper_id: Option<i64>,
    pub status: TechniqueStatus,
}

impl NewTechnique {
    /// A freshly discovered technique, marked promising.
    pub fn discovered(name: impl Into<String>, first_paper_id: i64) -> Self {
        Self {
            name: name.into(),
            category: None,
            description: None,
            first_paper_id: Some(first_paper_id),
            status: TechniqueStatus::Promising,
        }
    }
}

/// One quantitative result: (paper, technique, dataset, metric) → value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Benchmark {
    pub paper_id: i64,
    pub technique_id: i64,
    pub dataset: String,
    pub metric: String,
    pub value: f64,
    pub notes: Option<String>,
}

/// How a repository was found.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Discovered,
    Official,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Discovered => "discovered",
            RepoStatus::Official => "official",
        }
    }
}

impl FromStr for RepoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(RepoStatus::Discovered),
            "official" => Ok(RepoStatus::Official),
            other => Err(format!("unknown repo status '{}'", other)),
        }
    }
}

/// A repository record returned by a discovery source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoRecord {
    pub url: String,
    #[serde(default)]
    pub stars: i64,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub is_official: bool,
}

/// A stored code repository, joined with its paper for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repo {
    pub id: i64,
    pub url: String,
    pub paper_id: i64,
    pub stars: i64,
    pub frameworks: Vec<String>,
    pub status: RepoStatus,
    pub arxiv_id: String,
    pub paper_title: String,
}

/// Structured summary returned by the summarization backend.
///
/// Every field has a default so a partial response still parses; see
/// [`crate::summarize::parse_summary`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaperSummary {
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub key_insight: String,
    #[serde(default)]
    pub results: String,
    #[serde(default)]
    pub limitations: String,
    #[serde(default)]
    pub techniques: Vec<String>,
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Relevance classification for search results.
///
/// Papers are categorized by their semantic similarity to the query,
/// allowing clients to understand the quality of matches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLevel {
    /// Extremely high similarity (cosine similarity > 0.95)
    Identical,

    /// Very high similarity (cosine similarity > 0.85)
    HighlySimilar,

    /// Moderate similarity (cosine similarity > 0.70)
    Similar,

    /// Anything lower
    Relevant,
}

impl RelevanceLevel {
    /// Determine relevance level from a cosine similarity score.
    pub fn from_score(score: f32) -> Self {
        if score > 0.95 {
            RelevanceLevel::Identical
        } else if score > 0.85 {
            RelevanceLevel::HighlySimilar
        } else if score > 0.70 {
            RelevanceLevel::Similar
        } else {
            RelevanceLevel::Relevant
        }
    }
}

/// A single retrieval hit: the best chunk of one paper plus display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Raw inner-product similarity, in [-1, 1]
    pub score: f32,

    pub relevance: RelevanceLevel,

    pub arxiv_id: String,

    pub paper_title: String,

    pub authors: Vec<String>,

    pub section: String,

    pub chunk_index: i64,

    /// Chunk text, truncated to the display budget
    pub text: String,

    pub chunk_id: i64,

    pub paper_id: i64,
}

impl SearchResult {
    /// Build a result from a joined chunk hit and its similarity score.
    pub fn from_hit(hit: ChunkHit, score: f32, display_chars: usize) -> Self {
        let text = truncate_chars(&hit.chunk.text, display_chars);
        Self {
            score,
            relevance: RelevanceLevel::from_score(score),
            arxiv_id: hit.arxiv_id,
            paper_title: hit.paper_title,
            authors: hit.authors,
            section: hit.chunk.section,
            chunk_index: hit.chunk.chunk_index,
            text,
            chunk_id: hit.chunk.id,
            paper_id: hit.chunk.paper_id,
        }
    }
}

/// Embedding model identity recorded alongside the database.
///
/// Ingestion refuses to mix vectors from a different model or dimension into
/// an existing store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Name/identifier of the embedding model
    pub model_name: String,

    /// Dimension of the embedding vectors
    pub dimension: usize,
}

/// Row counts of every table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub papers: usize,
    pub chunks: usize,
    pub indexed_chunks: usize,
    pub techniques: usize,
    pub benchmarks: usize,
    pub repos: usize,
}

/// Take at most `max_chars` characters, respecting UTF-8 boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
