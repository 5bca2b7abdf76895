use std::sync::Arc;

use crate::{
    embedding::{BatchEmbedder, EmbeddingProvider},
    error::Result,
    hashing_embedder::HashingEmbedder,
    http_embedder::HttpEmbedder,
    settings::{ProviderKind, Settings},
};

/// Construct the embedding backend selected by `settings`.
///
/// Construction never contacts the backend; an unreachable HTTP server is
/// only noticed on the first embed call.
pub fn build_provider(
    settings: &Settings,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match settings.provider {
        ProviderKind::Hashing => {
            Arc::new(HashingEmbedder::new(settings.dimension))
        }
        ProviderKind::Http => Arc::new(HttpEmbedder::new(
            &settings.endpoint,
            &settings.model,
            settings.dimension,
            settings.timeout(),
        )?),
    };

    tracing::debug!(
        model_id = provider.model_id(),
        dimension = provider.dimension(),
        "embedding provider ready"
    );
    Ok(provider)
}

/// Wrap `provider` with the batching limits from `settings`.
pub fn build_batcher(
    provider: Arc<dyn EmbeddingProvider>,
    settings: &Settings,
) -> Result<BatchEmbedder> {
    BatchEmbedder::new(provider, settings.batch_size, settings.max_in_flight)
}
