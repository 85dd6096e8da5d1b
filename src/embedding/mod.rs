//! Embedding provider abstraction and implementations.
//!
//! This module defines the interface for text embedding generation and provides
//! implementations for an OpenAI-compatible HTTP service and a local fastembed
//! model.
//!
//! Backends are wrapped in [`RetryingEmbedder`], which owns the retry
//! discipline: input truncation, exponential backoff on transient failures
//! and L2 normalization of every returned vector.

pub mod fastembed;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::{EmbeddingBackend, EmbeddingSettings};
use crate::models::truncate_chars;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Network or API communication error
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Invalid input text (e.g., empty)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., missing API key)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The backend returned a vector of the wrong length
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Every attempt failed; carries the last underlying cause
    #[error("Embedding failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Other unexpected errors
    #[error("Unexpected error: {0}")]
    Other(String),
}

impl EmbeddingError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::ApiError(_) | EmbeddingError::Other(_))
    }
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Implementors of this trait can generate vector embeddings from text inputs.
/// The trait is async to support API-based embedding services.
///
/// # Example Usage
/// ```ignore
/// let backend = OpenAIEmbedding::new(endpoint, api_key, model, 1024)?;
/// let provider = RetryingEmbedder::new(backend, RetryPolicy::default(), 8192);
/// let embedding = provider.embed("Research paper abstract").await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Arguments
    /// * `text` - The input text to embed
    ///
    /// # Returns
    /// A vector of f32 values representing the embedding
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the embedding generation fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts.
    ///
    /// # Arguments
    /// * `texts` - Slice of text inputs to embed
    ///
    /// # Returns
    /// A vector of embedding vectors, in the same order as the input texts
    ///
    /// # Errors
    /// Returns `EmbeddingError` if any embedding generation fails
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Get the dimension of embeddings produced by this provider.
    fn dimension(&self) -> usize;

    /// Get the model name/identifier for this provider.
    ///
    /// # Returns
    /// A string identifying the embedding model (e.g., "text-embedding-3-small")
    fn model_name(&self) -> &str;
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Retry schedule for embedding calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap on any single wait
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Wraps a backend with truncation, retries and normalization.
///
/// Batches are embedded one text at a time through the single-item path, so
/// a batch costs exactly as many backend calls as it has texts.
#[derive(Debug, Clone)]
pub struct RetryingEmbedder<P> {
    inner: P,
    policy: RetryPolicy,
    max_input_chars: usize,
}

impl<P: EmbeddingProvider> RetryingEmbedder<P> {
    pub fn new(inner: P, policy: RetryPolicy, max_input_chars: usize) -> Self {
        Self {
            inner,
            policy,
            max_input_chars,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    async fn embed_with_retry(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let text = truncate_chars(text, self.max_input_chars);
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.inner.embed(&text).await {
                Ok(mut vector) => {
                    let expected = self.inner.dimension();
                    if vector.len() != expected {
                        return Err(EmbeddingError::DimensionMismatch {
                            expected,
                            actual: vector.len(),
                        });
                    }
                    l2_normalize(&mut vector);
                    return Ok(vector);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt < attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            attempt,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Embedding attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let last = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        error!(attempts, error = %last, "All embedding attempts failed");
        Err(EmbeddingError::RetriesExhausted { attempts, last })
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for RetryingEmbedder<P> {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_with_retry(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_with_retry(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Wrapper enum for embedding providers to allow choosing the backend at runtime.
pub enum DynamicEmbeddingProvider {
    FastEmbed(fastembed::FastEmbedProvider),
    OpenAI(openai::OpenAIEmbedding),
}

impl DynamicEmbeddingProvider {
    /// Construct the configured backend, without the retry wrapper.
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` for an unknown local model or a
    /// local model whose dimension differs from `settings.dimensions`
    pub fn from_settings(settings: &EmbeddingSettings) -> EmbeddingResult<Self> {
        match settings.backend {
            EmbeddingBackend::FastEmbed => {
                let provider = fastembed::FastEmbedProvider::new(
                    &settings.model_id,
                    settings.cache_dir.clone(),
                )?;
                if provider.dimension() != settings.dimensions {
                    return Err(EmbeddingError::ConfigError(format!(
                        "Model '{}' produces {} dimensions but {} are configured",
                        settings.model_id,
                        provider.dimension(),
                        settings.dimensions
                    )));
                }
                Ok(DynamicEmbeddingProvider::FastEmbed(provider))
            }
            EmbeddingBackend::OpenAI => {
                let api_key = std::env::var(&settings.api_key_env).ok();
                if api_key.is_none() {
                    warn!(
                        var = %settings.api_key_env,
                        "Embedding API key not set, sending unauthenticated requests"
                    );
                }
                let provider = openai::OpenAIEmbedding::new(
                    &settings.endpoint,
                    api_key,
                    &settings.model_id,
                    settings.dimensions,
                )?;
                Ok(DynamicEmbeddingProvider::OpenAI(provider))
            }
        }
    }

    /// The configured backend wrapped with the configured retry policy.
    pub fn retrying_from_settings(
        settings: &EmbeddingSettings,
    ) -> EmbeddingResult<RetryingEmbedder<Self>> {
        let policy = RetryPolicy {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        };
        Ok(RetryingEmbedder::new(
            Self::from_settings(settings)?,
            policy,
            settings.max_input_chars,
        ))
    }
}

#[async_trait]
impl EmbeddingProvider for DynamicEmbeddingProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            DynamicEmbeddingProvider::FastEmbed(p) => p.embed(text).await,
            DynamicEmbeddingProvider::OpenAI(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            DynamicEmbeddingProvider::FastEmbed(p) => p.embed_batch(texts).await,
            DynamicEmbeddingProvider::OpenAI(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            DynamicEmbeddingProvider::FastEmbed(p) => p.dimension(),
            DynamicEmbeddingProvider::OpenAI(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            DynamicEmbeddingProvider::FastEmbed(p) => p.model_name(),
            DynamicEmbeddingProvider::OpenAI(p) => p.model_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails `failures` times, then returns a fixed unnormalized vector.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
        seen: Mutex<Vec<String>>,
    }

    impl FlakyProvider {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
            self.seen.lock().unwrap().push(text.to_string());
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(EmbeddingError::ApiError(format!("throttled #{}", call)));
            }
            Ok(vec![3.0, 4.0])
        }

        async fn embed_batch(&self, _texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            unreachable!("the retrying wrapper never batches")
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(7), Duration::from_secs(60));
        assert_eq!(policy.delay_for(40), Duration::from_secs(60));
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let embedder = RetryingEmbedder::new(FlakyProvider::new(3), instant_policy(10), 8192);
        let vector = embedder.embed("hello").await.unwrap();

        assert_eq!(embedder.inner().calls.load(Ordering::SeqCst), 4);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_exhaustion_carries_last_cause() {
        let embedder = RetryingEmbedder::new(FlakyProvider::new(100), instant_policy(5), 8192);
        let err = embedder.embed("hello").await.unwrap_err();

        match err {
            EmbeddingError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(last.contains("throttled #5"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(embedder.inner().calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_long_input_is_truncated() {
        let embedder = RetryingEmbedder::new(FlakyProvider::new(0), instant_policy(1), 10);
        embedder.embed(&"x".repeat(50)).await.unwrap();
        let seen = embedder.inner().seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["x".repeat(10)]);
    }

    #[tokio::test]
    async fn test_batch_calls_single_path_per_text() {
        let embedder = RetryingEmbedder::new(FlakyProvider::new(0), instant_policy(1), 8192);
        let vectors = embedder.embed_batch(&["a", "b", "c"]).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(embedder.inner().calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *embedder.inner().seen.lock().unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    struct WrongSizeProvider;

    #[async_trait]
    impl EmbeddingProvider for WrongSizeProvider {
        async fn embed(&self, _text: &str) -> EmbeddingResult<Vec<f32>> {
            Ok(vec![1.0; 3])
        }

        async fn embed_batch(&self, _texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            Ok(vec![])
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "wrong"
        }
    }

    #[test]
    fn test_settings_build_openai_backend() {
        let settings = EmbeddingSettings {
            api_key_env: "RESEARCH_BASE_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let embedder = DynamicEmbeddingProvider::retrying_from_settings(&settings).unwrap();
        assert!(matches!(embedder.inner(), DynamicEmbeddingProvider::OpenAI(_)));
        assert_eq!(embedder.dimension(), 1024);
        assert_eq!(embedder.model_name(), "text-embedding-3-small");
    }

    #[test]
    fn test_unknown_local_model_is_config_error() {
        let settings = EmbeddingSettings {
            backend: EmbeddingBackend::FastEmbed,
            model_id: "no-such-model".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            DynamicEmbeddingProvider::from_settings(&settings),
            Err(EmbeddingError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_not_retried() {
        let embedder = RetryingEmbedder::new(WrongSizeProvider, instant_policy(10), 8192);
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }
}
