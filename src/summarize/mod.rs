//! Structured paper summarization.
//!
//! A [`Summarizer`] reassembles a paper's text from its stored chunks, sends it
//! to a [`SummaryBackend`] (an LLM behind a chat-completions endpoint) and
//! parses the reply into a [`PaperSummary`]. Named techniques, benchmark
//! numbers and state-of-the-art claims found in the summary are written back
//! to the store.
//!
//! Backend replies are treated as untrusted: code fences are stripped, missing
//! fields are filled with empty values and non-numeric metrics are dropped.

pub mod llm;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::models::{
    truncate_chars, Benchmark, Chunk, NewTechnique, Paper, PaperStatus, PaperSummary,
};
use crate::storage::PaperStorage;

/// Instructions sent as the system message of every summarization request.
pub const SUMMARY_PROMPT: &str = r#"You are a research paper analyst. Given the full text of an academic paper, produce a structured JSON summary.

Return ONLY a valid JSON object with exactly these fields:
{
  "problem": "What problem does this paper address? (1-2 sentences)",
  "approach": "Key method/technique (2-3 sentences)",
  "key_insight": "The novel contribution in 1 sentence",
  "results": "Main quantitative results + datasets used",
  "limitations": "Known weaknesses or gaps",
  "techniques": ["technique1", "technique2"],
  "datasets": ["dataset1", "dataset2"],
  "metrics": {"metric_name": value, ...}
}

Rules:
- "techniques" should be specific method names (e.g., "3D Gaussian Splatting", "NeRF", "PPO"), not generic terms
- "datasets" should be specific benchmark datasets (e.g., "ShapeNet", "ScanNet", "KITTI")
- "metrics" should map metric names to numeric values when available (e.g., {"PSNR": 30.5, "SSIM": 0.95})
- If a field has no relevant info, use an empty string, empty list, or empty object as appropriate
- Return ONLY the JSON, no markdown fences, no explanation"#;

/// Appended to paper text cut at the character budget.
pub const TRUNCATION_MARKER: &str = "\n\n[... truncated ...]";

/// Dataset name used for benchmarks when the summary lists none.
pub const UNKNOWN_DATASET: &str = "unknown";

const SOTA_INDICATORS: [&str; 5] = ["state-of-the-art", "sota", "best", "outperform", "surpass"];

const TECHNIQUE_NAME_CHARS: std::ops::RangeInclusive<usize> = 2..=200;

/// Errors that can occur during summarization.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// The backend call failed (transport, status, rate limit)
    #[error("Backend error: {0}")]
    BackendError(String),

    /// The backend reply was not a JSON object
    #[error("Failed to parse summary: {0}")]
    ParseError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    /// The paper is not in the store
    #[error("Paper not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for summarization operations.
pub type SummarizeResult<T> = Result<T, SummarizeError>;

/// A chat-style text completion service.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Complete a conversation of one system and one user message.
    ///
    /// # Returns
    /// The raw text of the assistant reply
    async fn complete(&self, system: &str, user: &str) -> SummarizeResult<String>;

    fn model_name(&self) -> &str;
}

/// Minimum spacing between consecutive backend calls.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    /// Sleep until `min_interval` has passed since the previous call, then
    /// record this call.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                debug!(wait_ms = remaining.as_millis() as u64, "Rate limiting");
                tokio::time::sleep(remaining).await;
            }
        }
        self.last_call = Some(Instant::now());
    }
}

/// Remove a surrounding Markdown code fence, with or without a language tag.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn string_field(object: &serde_json::Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn list_field(object: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    match object.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn metrics_field(object: &serde_json::Map<String, Value>) -> BTreeMap<String, f64> {
    let Some(Value::Object(metrics)) = object.get("metrics") else {
        return BTreeMap::new();
    };
    metrics
        .iter()
        .filter_map(|(name, value)| {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number.map(|n| (name.clone(), n))
        })
        .collect()
}

/// Parse a backend reply into a summary.
///
/// Missing or mistyped fields become empty values. Metric values given as
/// numeric strings are converted; other non-numeric values are dropped.
///
/// # Errors
/// Returns `SummarizeError::ParseError` if the reply is not a JSON object
pub fn parse_summary(raw: &str) -> SummarizeResult<PaperSummary> {
    let content = strip_code_fences(raw);
    let value: Value = serde_json::from_str(content).map_err(|e| {
        SummarizeError::ParseError(format!("{}: {}", e, truncate_chars(content, 200)))
    })?;
    let Value::Object(object) = value else {
        return Err(SummarizeError::ParseError(
            "expected a JSON object".to_string(),
        ));
    };

    Ok(PaperSummary {
        problem: string_field(&object, "problem"),
        approach: string_field(&object, "approach"),
        key_insight: string_field(&object, "key_insight"),
        results: string_field(&object, "results"),
        limitations: string_field(&object, "limitations"),
        techniques: list_field(&object, "techniques"),
        datasets: list_field(&object, "datasets"),
        metrics: metrics_field(&object),
    })
}

/// Rebuild a paper's text for summarization.
///
/// Chunks are joined in `chunk_index` order with a `## <section>` header at
/// every section change. Without chunks the abstract is used; with neither the
/// result is empty.
pub fn assemble_paper_text(paper: &Paper, chunks: &[Chunk]) -> String {
    if chunks.is_empty() {
        return match paper.abstract_text.as_deref().map(str::trim) {
            Some(abstract_text) if !abstract_text.is_empty() => {
                format!("Abstract:\n{}", abstract_text)
            }
            _ => String::new(),
        };
    }

    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.chunk_index);

    let mut parts = Vec::with_capacity(ordered.len() * 2);
    let mut current_section: Option<&str> = None;
    for chunk in ordered {
        if current_section != Some(chunk.section.as_str()) {
            parts.push(format!("\n## {}\n", chunk.section));
            current_section = Some(chunk.section.as_str());
        }
        parts.push(chunk.text.clone());
    }
    parts.join("\n")
}

/// Cut text to `max_chars`, marking the cut.
pub fn truncate_for_backend(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    format!("{}{}", truncate_chars(text, max_chars), TRUNCATION_MARKER)
}

/// Whether a results sentence claims state-of-the-art performance.
pub fn claims_sota(results: &str) -> bool {
    let lower = results.to_lowercase();
    SOTA_INDICATORS.iter().any(|indicator| lower.contains(indicator))
}

/// What was written to the store for one summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionReport {
    pub techniques: usize,
    pub benchmarks: usize,
    pub promoted: bool,
}

/// Record a summary's techniques and benchmarks for a paper.
///
/// Technique names are trimmed and kept if 2 to 200 characters long. Every
/// metric becomes a benchmark of the first technique on the first dataset.
/// If the results claim state of the art, the paper's techniques are promoted.
pub async fn extract_techniques_and_benchmarks<S>(
    storage: &S,
    paper_id: i64,
    summary: &PaperSummary,
) -> SummarizeResult<ExtractionReport>
where
    S: PaperStorage + ?Sized,
{
    let mut technique_ids = Vec::new();
    for name in &summary.techniques {
        let name = name.trim();
        if !TECHNIQUE_NAME_CHARS.contains(&name.chars().count()) {
            continue;
        }
        let technique_id = storage
            .insert_technique(&NewTechnique::discovered(name, paper_id))
            .await
            .map_err(|e| SummarizeError::StorageError(e.to_string()))?;
        storage
            .link_paper_technique(paper_id, technique_id)
            .await
            .map_err(|e| SummarizeError::StorageError(e.to_string()))?;
        technique_ids.push(technique_id);
    }

    let mut benchmarks = 0;
    if let Some(&primary) = technique_ids.first() {
        let dataset = summary
            .datasets
            .first()
            .cloned()
            .unwrap_or_else(|| UNKNOWN_DATASET.to_string());
        for (metric, value) in &summary.metrics {
            storage
                .insert_benchmark(&Benchmark {
                    paper_id,
                    technique_id: primary,
                    dataset: dataset.clone(),
                    metric: metric.clone(),
                    value: *value,
                    notes: None,
                })
                .await
                .map_err(|e| SummarizeError::StorageError(e.to_string()))?;
            benchmarks += 1;
        }
    }

    let promoted = !technique_ids.is_empty() && claims_sota(&summary.results);
    if promoted {
        storage
            .promote_techniques_to_sota(&technique_ids)
            .await
            .map_err(|e| SummarizeError::StorageError(e.to_string()))?;
    }

    Ok(ExtractionReport {
        techniques: technique_ids.len(),
        benchmarks,
        promoted,
    })
}

/// Counters for a summarization batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummarizeStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

/// Summarizes stored papers through a backend.
pub struct Summarizer<B, S>
where
    B: SummaryBackend,
    S: PaperStorage,
{
    backend: B,
    storage: S,
    rate_limiter: RateLimiter,
    max_text_chars: usize,
}

impl<B, S> Summarizer<B, S>
where
    B: SummaryBackend,
    S: PaperStorage,
{
    /// Create a summarizer with a 2 s call interval and a 60 000 character budget.
    pub fn new(backend: B, storage: S) -> Self {
        Self {
            backend,
            storage,
            rate_limiter: RateLimiter::new(Duration::from_secs(2)),
            max_text_chars: 60_000,
        }
    }

    pub fn with_rate_limit(mut self, min_interval: Duration) -> Self {
        self.rate_limiter = RateLimiter::new(min_interval);
        self
    }

    pub fn with_max_text_chars(mut self, max_text_chars: usize) -> Self {
        self.max_text_chars = max_text_chars;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Summarize one paper.
    ///
    /// A paper that already has a summary is returned as stored unless
    /// `force` is set.
    ///
    /// # Returns
    /// The summary, or `None` if the paper has neither chunks nor an abstract
    ///
    /// # Errors
    /// Returns `SummarizeError::NotFound` for an unknown paper and backend,
    /// parse or storage errors otherwise
    pub async fn summarize_paper(
        &mut self,
        arxiv_id: &str,
        force: bool,
    ) -> SummarizeResult<Option<PaperSummary>> {
        let paper = self
            .storage
            .get_paper(arxiv_id)
            .await
            .map_err(|e| SummarizeError::StorageError(e.to_string()))?
            .ok_or_else(|| SummarizeError::NotFound(arxiv_id.to_string()))?;

        if !force {
            if let Some(existing) = paper.parsed_summary() {
                debug!(arxiv_id, "Already summarized, skipping");
                return Ok(Some(existing));
            }
        }

        let chunks = self
            .storage
            .get_chunks_for_paper(paper.id)
            .await
            .map_err(|e| SummarizeError::StorageError(e.to_string()))?;
        let text = assemble_paper_text(&paper, &chunks);
        if text.is_empty() {
            warn!(arxiv_id, "No text available to summarize");
            return Ok(None);
        }

        let text = truncate_for_backend(&text, self.max_text_chars);
        let user_message = format!("Paper title: {}\n\nFull text:\n{}", paper.title, text);
        info!(
            arxiv_id,
            chars = text.chars().count(),
            model = self.backend.model_name(),
            "Summarizing paper"
        );

        self.rate_limiter.wait().await;
        let reply = self.backend.complete(SUMMARY_PROMPT, &user_message).await?;
        let summary = parse_summary(&reply)?;

        self.storage
            .store_summary(paper.id, &summary)
            .await
            .map_err(|e| SummarizeError::StorageError(e.to_string()))?;
        let report = extract_techniques_and_benchmarks(&self.storage, paper.id, &summary).await?;

        info!(
            arxiv_id,
            techniques = report.techniques,
            benchmarks = report.benchmarks,
            promoted = report.promoted,
            "Summarized paper"
        );
        Ok(Some(summary))
    }

    /// Summarize every paper in `status`.
    ///
    /// Without `force`, papers that already carry a summary are not selected.
    /// Per-paper failures are logged and counted.
    pub async fn summarize_all(
        &mut self,
        status: PaperStatus,
        force: bool,
        limit: Option<usize>,
    ) -> SummarizeResult<SummarizeStats> {
        let papers = self
            .storage
            .papers_with_status(&[status], !force, limit)
            .await
            .map_err(|e| SummarizeError::StorageError(e.to_string()))?;

        let mut stats = SummarizeStats {
            total: papers.len(),
            ..Default::default()
        };
        if papers.is_empty() {
            info!(status = %status, "No papers to summarize");
            return Ok(stats);
        }

        for (i, paper) in papers.iter().enumerate() {
            debug!(arxiv_id = %paper.arxiv_id, n = i + 1, total = papers.len(), "Summarizing");
            match self.summarize_paper(&paper.arxiv_id, force).await {
                Ok(Some(_)) => stats.success += 1,
                Ok(None) => stats.failed += 1,
                Err(e) => {
                    warn!(arxiv_id = %paper.arxiv_id, error = %e, "Summarization failed");
                    stats.failed += 1;
                }
            }
        }

        info!(
            total = stats.total,
            success = stats.success,
            failed = stats.failed,
            "Summarization finished"
        );
        Ok(stats)
    }
}
