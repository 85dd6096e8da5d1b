//! Code repository discovery.
//!
//! Repositories for a paper come from two places: a discovery service that
//! knows about papers (see [`pwc::PapersWithCodeSource`]) and GitHub links
//! found in the paper's abstract and first chunks.

pub mod pwc;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{PaperStatus, RepoRecord};
use crate::storage::PaperStorage;

const GITHUB_URL_PATTERN: &str = r"github\.com/([\w.-]+/[\w.-]+)";

/// Errors that can occur during repository discovery.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The discovery service failed
    #[error("Source error: {0}")]
    SourceError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Paper not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// A service that lists code repositories for a paper.
#[async_trait]
pub trait RepoSource: Send + Sync {
    /// Repositories known for a paper.
    ///
    /// Not knowing the paper is an empty list, not an error.
    async fn repositories(&self, arxiv_id: &str) -> RepoResult<Vec<RepoRecord>>;

    fn name(&self) -> &str;
}

/// Finds GitHub repository links in free text.
#[derive(Debug, Clone)]
pub struct GithubUrlExtractor {
    pattern: Regex,
}

impl GithubUrlExtractor {
    pub fn new() -> RepoResult<Self> {
        let pattern = Regex::new(GITHUB_URL_PATTERN)
            .map_err(|e| RepoError::ConfigError(format!("GitHub URL pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Canonical `https://github.com/<owner>/<repo>` URLs in order of first
    /// appearance, without duplicates. Trailing dots and slashes are dropped.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| format!("https://github.com/{}", m.as_str().trim_end_matches(['.', '/'])))
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }
}

/// Where a discovered repository came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Service,
    Text,
}

/// A repository recorded for a paper during discovery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredRepo {
    pub url: String,
    pub stars: i64,
    pub source: DiscoverySource,
}

/// Counters for a discovery batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    /// Papers examined
    pub total: usize,
    /// Papers with at least one repository
    pub found: usize,
    /// Repositories recorded
    pub repos: usize,
}

/// Discovers and records repositories for stored papers.
pub struct RepoDiscovery<R, S>
where
    R: RepoSource,
    S: PaperStorage,
{
    source: R,
    storage: S,
    extractor: GithubUrlExtractor,
    chunks_scanned: usize,
    delay: Duration,
}

impl<R, S> RepoDiscovery<R, S>
where
    R: RepoSource,
    S: PaperStorage,
{
    /// Create a discovery run scanning the first 5 chunks, 1 s between papers.
    pub fn new(source: R, storage: S) -> RepoResult<Self> {
        Ok(Self {
            source,
            storage,
            extractor: GithubUrlExtractor::new()?,
            chunks_scanned: 5,
            delay: Duration::from_secs(1),
        })
    }

    pub fn with_chunks_scanned(mut self, chunks_scanned: usize) -> Self {
        self.chunks_scanned = chunks_scanned;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Find and record repositories for one paper.
    ///
    /// Service results come first; links found in the text are added if the
    /// service did not already report them. A failing service is logged and
    /// the text scan still runs.
    pub async fn discover_repos_for_paper(
        &self,
        arxiv_id: &str,
    ) -> RepoResult<Vec<DiscoveredRepo>> {
        let paper = self
            .storage
            .get_paper(arxiv_id)
            .await
            .map_err(|e| RepoError::StorageError(e.to_string()))?
            .ok_or_else(|| RepoError::NotFound(arxiv_id.to_string()))?;

        let mut discovered: Vec<DiscoveredRepo> = Vec::new();

        let records = match self.source.repositories(arxiv_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(arxiv_id, source = self.source.name(), error = %e, "Repository lookup failed");
                Vec::new()
            }
        };
        for record in records {
            self.storage
                .upsert_repo(paper.id, &record)
                .await
                .map_err(|e| RepoError::StorageError(e.to_string()))?;
            discovered.push(DiscoveredRepo {
                url: record.url,
                stars: record.stars,
                source: DiscoverySource::Service,
            });
        }

        let chunks = self
            .storage
            .get_chunks_for_paper(paper.id)
            .await
            .map_err(|e| RepoError::StorageError(e.to_string()))?;
        let texts = paper
            .abstract_text
            .iter()
            .map(String::as_str)
            .chain(chunks.iter().take(self.chunks_scanned).map(|c| c.text.as_str()));

        for text in texts {
            for url in self.extractor.extract(text) {
                if discovered.iter().any(|d| d.url == url) {
                    continue;
                }
                let record = RepoRecord {
                    url: url.clone(),
                    stars: 0,
                    framework: None,
                    is_official: false,
                };
                self.storage
                    .upsert_repo(paper.id, &record)
                    .await
                    .map_err(|e| RepoError::StorageError(e.to_string()))?;
                discovered.push(DiscoveredRepo {
                    url,
                    stars: 0,
                    source: DiscoverySource::Text,
                });
            }
        }

        if !discovered.is_empty() {
            info!(arxiv_id, repos = discovered.len(), "Found repositories");
        }
        Ok(discovered)
    }

    /// Discover repositories for papers in `status` or already summarized.
    ///
    /// Per-paper failures are logged and skipped.
    pub async fn discover_repos_all(
        &self,
        status: PaperStatus,
        limit: usize,
    ) -> RepoResult<DiscoveryStats> {
        let mut statuses = vec![status];
        if status != PaperStatus::Summarized {
            statuses.push(PaperStatus::Summarized);
        }
        let papers = self
            .storage
            .papers_with_status(&statuses, false, Some(limit))
            .await
            .map_err(|e| RepoError::StorageError(e.to_string()))?;

        let mut stats = DiscoveryStats {
            total: papers.len(),
            ..Default::default()
        };
        for (i, paper) in papers.iter().enumerate() {
            debug!(arxiv_id = %paper.arxiv_id, n = i + 1, total = papers.len(), "Discovering repositories");
            match self.discover_repos_for_paper(&paper.arxiv_id).await {
                Ok(repos) if !repos.is_empty() => {
                    stats.found += 1;
                    stats.repos += repos.len();
                }
                Ok(_) => {}
                Err(e) => warn!(arxiv_id = %paper.arxiv_id, error = %e, "Discovery failed"),
            }
            if i + 1 < papers.len() && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        info!(
            total = stats.total,
            found = stats.found,
            repos = stats.repos,
            "Repository discovery finished"
        );
        Ok(stats)
    }
}
