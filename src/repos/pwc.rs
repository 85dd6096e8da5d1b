//! Papers With Code repository source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{RepoError, RepoResult, RepoSource};
use crate::config::RepoSettings;
use crate::models::RepoRecord;

#[derive(Debug, Deserialize)]
struct PwcRepository {
    #[serde(default)]
    url: String,
    #[serde(default)]
    stars: Option<i64>,
    #[serde(default)]
    framework: Option<String>,
    #[serde(default)]
    is_official: bool,
}

/// The API answers with either a bare list or a paginated object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PwcResponse {
    List(Vec<PwcRepository>),
    Page { results: Vec<PwcRepository> },
}

impl PwcResponse {
    fn into_records(self) -> Vec<RepoRecord> {
        let repos = match self {
            PwcResponse::List(repos) => repos,
            PwcResponse::Page { results } => results,
        };
        repos
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| RepoRecord {
                url: r.url,
                stars: r.stars.unwrap_or(0),
                framework: r.framework.filter(|f| !f.is_empty() && f != "none"),
                is_official: r.is_official,
            })
            .collect()
    }
}

/// Repository lookups against the Papers With Code API.
///
/// Redirects are not followed: the service redirects unknown papers to an
/// unrelated site, which counts as "no repositories".
#[derive(Debug, Clone)]
pub struct PapersWithCodeSource {
    client: reqwest::Client,
    endpoint: String,
}

impl PapersWithCodeSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> RepoResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RepoError::ConfigError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &RepoSettings) -> RepoResult<Self> {
        Self::new(&settings.endpoint, Duration::from_secs(settings.timeout_secs))
    }

    fn repositories_url(&self, arxiv_id: &str) -> String {
        format!("{}/papers/{}/repositories/", self.endpoint, arxiv_id)
    }
}

#[async_trait]
impl RepoSource for PapersWithCodeSource {
    async fn repositories(&self, arxiv_id: &str) -> RepoResult<Vec<RepoRecord>> {
        let url = self.repositories_url(arxiv_id);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RepoError::SourceError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status.is_redirection() {
            debug!(arxiv_id, %status, "Paper unknown to Papers With Code");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(RepoError::SourceError(format!("{} returned {}", url, status)));
        }

        let parsed: PwcResponse = response
            .json()
            .await
            .map_err(|e| RepoError::SourceError(format!("Malformed response: {}", e)))?;
        Ok(parsed.into_records())
    }

    fn name(&self) -> &str {
        "paperswithcode"
    }
}
