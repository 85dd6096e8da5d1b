//! Source document download.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ProviderError, ProviderResult};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Downloads paper PDFs into a local directory.
///
/// Files are named after the paper id with `/` replaced by `_`. A file
/// smaller than `min_bytes` is never kept: it is usually an error page.
#[derive(Debug, Clone)]
pub struct PdfDownloader {
    client: reqwest::Client,
    pdf_dir: PathBuf,
    min_bytes: u64,
}

impl PdfDownloader {
    pub fn new(pdf_dir: impl Into<PathBuf>, min_bytes: u64) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::ConfigError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            pdf_dir: pdf_dir.into(),
            min_bytes,
        })
    }

    /// Where the document for `arxiv_id` is stored.
    pub fn local_path(&self, arxiv_id: &str) -> PathBuf {
        self.pdf_dir.join(format!("{}.pdf", arxiv_id.replace('/', "_")))
    }

    fn default_url(arxiv_id: &str) -> String {
        format!("https://arxiv.org/pdf/{}.pdf", arxiv_id)
    }

    async fn existing_size(path: &Path) -> Option<u64> {
        tokio::fs::metadata(path).await.ok().map(|m| m.len())
    }

    /// Fetch the document, reusing an earlier download when present.
    ///
    /// # Arguments
    /// * `arxiv_id` - Canonical paper id
    /// * `pdf_url` - Direct URL; defaults to the arXiv PDF URL for the id
    ///
    /// # Returns
    /// The local path, or `None` if the download was too small to be a document
    ///
    /// # Errors
    /// Returns `ProviderError` on transport or I/O failure
    pub async fn download(
        &self,
        arxiv_id: &str,
        pdf_url: Option<&str>,
    ) -> ProviderResult<Option<PathBuf>> {
        let path = self.local_path(arxiv_id);

        if let Some(size) = Self::existing_size(&path).await {
            if size >= self.min_bytes {
                debug!(path = %path.display(), "Document already downloaded");
                return Ok(Some(path));
            }
            tokio::fs::remove_file(&path).await?;
        }

        let url = pdf_url
            .map(str::to_string)
            .unwrap_or_else(|| Self::default_url(arxiv_id));
        info!(%url, "Downloading document");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::NetworkError(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if (bytes.len() as u64) < self.min_bytes {
            warn!(
                %url,
                size = bytes.len(),
                "Downloaded document too small, discarding"
            );
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.pdf_dir).await?;
        tokio::fs::write(&path, &bytes).await?;
        info!(path = %path.display(), kb = bytes.len() / 1024, "Downloaded document");
        Ok(Some(path))
    }
}
