//! FastEmbed embedding provider implementation.
//!
//! This module provides an implementation of the `EmbeddingProvider` trait
//! using the fastembed library for local embedding generation. No network is
//! needed once the model files are cached.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;
use tracing::info;

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

/// Models selectable by name from configuration, with their output dimension.
const KNOWN_MODELS: [(&str, &str, EmbeddingModel, usize); 6] = [
    ("AllMiniLML6V2", "sentence-transformers/all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384),
    ("BGESmallENV15", "BAAI/bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
    ("BGEBaseENV15", "BAAI/bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768),
    ("BGELargeENV15", "BAAI/bge-large-en-v1.5", EmbeddingModel::BGELargeENV15, 1024),
    ("NomicEmbedTextV15", "nomic-ai/nomic-embed-text-v1.5", EmbeddingModel::NomicEmbedTextV15, 768),
    (
        "ParaphraseMLMiniLML12V2",
        "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2",
        EmbeddingModel::ParaphraseMLMiniLML12V2,
        384,
    ),
];

/// Resolve a configured model name to a fastembed model and its dimension.
///
/// Accepts either the enum-style name ("BGESmallENV15") or the Hugging Face
/// id ("BAAI/bge-small-en-v1.5"), case-insensitively.
pub fn resolve_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    KNOWN_MODELS
        .iter()
        .find(|(short, hf, _, _)| short.eq_ignore_ascii_case(name) || hf.eq_ignore_ascii_case(name))
        .map(|(_, _, model, dim)| (model.clone(), *dim))
}

/// FastEmbed embedding provider.
#[derive(Clone)]
pub struct FastEmbedProvider {
    /// The embedding model instance (wrapped in Arc<Mutex> for thread-safety)
    model: Arc<Mutex<TextEmbedding>>,

    /// Model identifier as configured
    model_name: String,

    /// Expected dimension of the embedding vectors
    embedding_dimension: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed embedding provider.
    ///
    /// # Arguments
    /// * `model_name` - Configured model name, see [`resolve_model`]
    /// * `cache_dir` - Optional cache directory for model files
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` for an unknown model or if model
    /// initialization fails
    pub fn new(model_name: &str, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let (model_type, embedding_dimension) = resolve_model(model_name).ok_or_else(|| {
            EmbeddingError::ConfigError(format!("Unknown fastembed model '{}'", model_name))
        })?;

        let mut init_options = InitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        info!(model = model_name, "Loading local embedding model");
        let text_embedding = TextEmbedding::try_new(init_options).map_err(|e| {
            EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {}", e))
        })?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name: model_name.to_string(),
            embedding_dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }

        let mut model = self.model.lock().await;
        let embeddings = model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EmbeddingError::Other(format!("Embedding generation failed: {}", e)))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "All texts must be non-empty".to_string(),
            ));
        }

        let mut model = self.model.lock().await;
        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        model
            .embed(text_strings, None)
            .map_err(|e| EmbeddingError::Other(format!("Batch embedding generation failed: {}", e)))
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// TextEmbedding does not implement Debug
impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}
