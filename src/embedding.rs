//! Embedding provider abstraction and batched execution.
//!
//! Providers turn text into fixed-dimension vectors. They are pluggable
//! ([`EmbeddingProvider`]) and may be unavailable; that condition is a
//! typed [`ProviderError::Unavailable`] value which callers branch on
//! rather than an error they must string-match.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use rayon::prelude::*;

/// Default number of texts sent to the backend per call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default number of simultaneous backend calls.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// A fixed-length embedding tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub model_id: Arc<str>,
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(model_id: Arc<str>, values: Vec<f32>) -> Self {
        Self { model_id, values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The backend could not be reached, timed out, or refused the request.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something that violates the contract.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Converts text into embedding vectors.
///
/// Implementations must be deterministic: the same text and the same
/// [`model_id`](EmbeddingProvider::model_id) yield the same vector.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identity of the model; vectors from different IDs never mix.
    fn model_id(&self) -> &str;

    /// Length of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Embed `texts`, returning one vector per input in input order.
    fn embed(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, ProviderError>;
}

/// Check that a provider response honors the contract for `expected`
/// inputs.
pub fn validate_response(
    provider: &dyn EmbeddingProvider,
    expected: usize,
    vectors: &[EmbeddingVector],
) -> Result<(), ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {expected} vectors, got {}",
            vectors.len()
        )));
    }
    let dimension = provider.dimension();
    if let Some(bad) = vectors.iter().find(|v| {
        v.dimension() != dimension || &*v.model_id != provider.model_id()
    }) {
        return Err(ProviderError::InvalidResponse(format!(
            "vector from {}/d{} does not match {}/d{dimension}",
            bad.model_id,
            bad.dimension(),
            provider.model_id()
        )));
    }
    Ok(())
}

/// Runs large embedding jobs as bounded-size batches with bounded
/// concurrency.
///
/// Batches are executed on a dedicated thread pool with `max_in_flight`
/// workers; batches beyond that wait their turn. Once any batch reports
/// [`ProviderError::Unavailable`], batches not yet started are skipped.
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    pool: rayon::ThreadPool,
}

impl BatchEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_in_flight: usize,
    ) -> crate::error::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_in_flight.max(1))
            .thread_name(|i| format!("docscope-embed-{i}"))
            .build()
            .map_err(|e| {
                crate::error::Error::Config(format!(
                    "failed to start embedding pool: {e}"
                ))
            })?;

        Ok(Self {
            provider,
            batch_size: batch_size.max(1),
            pool,
        })
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_in_flight(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Embed all `texts`, preserving order.
    pub fn embed_all(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let tripped = AtomicBool::new(false);
        let provider = self.provider.as_ref();

        let batches: Vec<BatchOutcome> = self.pool.install(|| {
            texts
                .par_chunks(self.batch_size)
                .map(|batch| {
                    if tripped.load(Ordering::Acquire) {
                        return BatchOutcome::Skipped;
                    }
                    let result = provider.embed(batch).and_then(|v| {
                        validate_response(provider, batch.len(), &v)
                            .map(|()| v)
                    });
                    match result {
                        Ok(vectors) => BatchOutcome::Done(vectors),
                        Err(e) => {
                            if matches!(e, ProviderError::Unavailable(_)) {
                                tripped.store(true, Ordering::Release);
                            }
                            BatchOutcome::Failed(e)
                        }
                    }
                })
                .collect()
        });

        let mut out = Vec::with_capacity(texts.len());
        for batch in batches {
            match batch {
                BatchOutcome::Done(vectors) => out.extend(vectors),
                BatchOutcome::Failed(e) => return Err(e),
                BatchOutcome::Skipped => {}
            }
        }
        // Skipped batches only exist alongside a failure.
        debug_assert_eq!(out.len(), texts.len());
        Ok(out)
    }
}

enum BatchOutcome {
    Done(Vec<EmbeddingVector>),
    Failed(ProviderError),
    Skipped,
}

impl std::fmt::Debug for BatchEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEmbedder")
            .field("model_id", &self.provider.model_id())
            .field("batch_size", &self.batch_size)
            .field("max_in_flight", &self.pool.current_num_threads())
            .finish()
    }
}

/// Cosine distance (`1 - cosine similarity`) in `[0, 2]`.
///
/// Zero vectors are maximally distant from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (&x, &y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    (1.0 - similarity).clamp(0.0, 2.0)
}
