//! Runtime configuration.
//!
//! Configuration lives in a single JSON file. Every section and every field
//! has a default, so a missing file or a partial file is fine; only a file
//! that exists but does not parse is an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible HTTP endpoint
    OpenAI,
    /// Local fastembed model
    FastEmbed,
}

/// Embedding client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model_id: String,
    pub dimensions: usize,
    /// Base URL of the OpenAI-compatible endpoint
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Input longer than this many characters is truncated before submission
    pub max_input_chars: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Model cache directory for the local backend
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::OpenAI,
            model_id: "text-embedding-3-small".to_string(),
            dimensions: 1024,
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_input_chars: 8192,
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_tokens: 800,
            overlap_tokens: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Over-fetch size for the vector index, independent of the caller's top-k
    pub top_k_retrieve: usize,
    /// Character budget of the chunk text shown in a result
    pub display_chars: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k_retrieve: 50,
            display_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    /// Pause between papers of one batch
    pub polite_delay_ms: u64,
    /// Downloads smaller than this are discarded as failed
    pub min_pdf_bytes: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            polite_delay_ms: 1000,
            min_pdf_bytes: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizeSettings {
    /// Base URL of an OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub model: String,
    pub api_key_env: Option<String>,
    /// Paper text longer than this is truncated before submission
    pub max_text_chars: usize,
    pub rate_limit_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for SummarizeSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4000/v1".to_string(),
            model: "claude-sonnet-4-6".to_string(),
            api_key_env: None,
            max_text_chars: 60_000,
            rate_limit_ms: 2000,
            temperature: 0.1,
            max_tokens: 2000,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoSettings {
    pub endpoint: String,
    pub delay_ms: u64,
    /// How many leading chunks are scanned for GitHub links
    pub chunks_scanned: usize,
    pub timeout_secs: u64,
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://paperswithcode.com/api/v1".to_string(),
            delay_ms: 1000,
            chunks_scanned: 5,
            timeout_secs: 15,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Database file; defaults to `<data_dir>/researchbase.db`
    pub db_path: Option<PathBuf>,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub search: SearchSettings,
    pub ingestion: IngestionSettings,
    pub summarize: SummarizeSettings,
    pub repos: RepoSettings,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|home| home.join(".researchbase"))
            .unwrap_or_else(|| PathBuf::from(".researchbase"));
        Self {
            data_dir,
            db_path: None,
            embedding: EmbeddingSettings::default(),
            chunking: ChunkingSettings::default(),
            search: SearchSettings::default(),
            ingestion: IngestionSettings::default(),
            summarize: SummarizeSettings::default(),
            repos: RepoSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), data_dir = %config.data_dir.display(), "Loaded config");
        Ok(config)
    }

    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("researchbase").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("researchbase.db"))
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.data_dir.join("pdfs")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("faiss")
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir().join("researchbase.index")
    }

    pub fn id_map_path(&self) -> PathBuf {
        self.index_dir().join("id_map.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.chunking.max_tokens, 800);
        assert_eq!(config.search.top_k_retrieve, 50);
        assert_eq!(config.embedding.max_attempts, 10);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"data_dir": "/tmp/rb", "chunking": {"max_tokens": 400}}"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/rb"));
        assert_eq!(config.chunking.max_tokens, 400);
        assert_eq!(config.chunking.overlap_tokens, 100);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/rb/researchbase.db"));
        assert_eq!(config.id_map_path(), PathBuf::from("/tmp/rb/faiss/id_map.json"));
    }

    #[test]
    fn test_caps_are_independent() {
        let config = Config::default();
        assert_eq!(config.embedding.max_input_chars, 8192);
        assert_eq!(config.summarize.max_text_chars, 60_000);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_backend_parses_lowercase() {
        let settings: EmbeddingSettings =
            serde_json::from_str(r#"{"backend": "fastembed", "dimensions": 384}"#).unwrap();
        assert_eq!(settings.backend, EmbeddingBackend::FastEmbed);
        assert_eq!(settings.dimensions, 384);
    }
}
