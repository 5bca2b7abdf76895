//! Local embedding backend based on signed feature hashing.
//!
//! Each token and each adjacent token pair is hashed with blake3 into one
//! of `dimension` buckets with a sign taken from another hash bit, and the
//! resulting vector is L2-normalized. Texts sharing vocabulary land close
//! in cosine distance. The output depends only on the text and the
//! dimension, so it is identical across runs, machines and builds.

use std::sync::Arc;

use crate::{
    embedding::{EmbeddingProvider, EmbeddingVector, ProviderError},
    text_util::tokenize,
};

/// Weight of a token pair relative to a single token.
const BIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model_id: Arc<str>,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            model_id: Arc::from(format!("hashing-v1/d{dimension}")),
            dimension,
        }
    }

    /// Embed a single text.
    ///
    /// Text without any token embeds to the zero vector.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);

        for token in &tokens {
            self.accumulate(&mut values, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let joined = format!("{}\u{1f}{}", pair[0], pair[1]);
            self.accumulate(&mut values, joined.as_bytes(), BIGRAM_WEIGHT);
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }

    fn accumulate(&self, values: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&bytes[..8]);
        let index =
            (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        values[index] += sign * weight;
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, ProviderError> {
        Ok(texts
            .iter()
            .map(|text| {
                let values = self.embed_one(text);
                EmbeddingVector::new(self.model_id.clone(), values)
            })
            .collect())
    }
}
