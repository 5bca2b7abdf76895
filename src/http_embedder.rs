//! Remote embedding backend speaking the Ollama `/api/embed` protocol.
//!
//! Request: `{"model": "<name>", "input": ["text", ...]}`.
//! Response: `{"embeddings": [[f32, ...], ...]}`, one row per input.

use std::{sync::Arc, time::Duration};

use reqwest::{StatusCode, blocking::Client};
use serde::{Deserialize, Serialize};

use crate::{
    embedding::{EmbeddingProvider, EmbeddingVector, ProviderError},
    error::{Error, Result},
};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct HttpEmbedder {
    client: Client,
    url: String,
    model: String,
    model_id: Arc<str>,
    dimension: usize,
}

impl HttpEmbedder {
    /// Create a client for `endpoint` (scheme, host and port) serving
    /// `model`, whose vectors are expected to have `dimension` entries.
    ///
    /// Every request is bounded by `timeout`; an expired timeout reports the
    /// backend as unavailable.
    pub fn new(
        endpoint: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::Config(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            url: format!("{}/api/embed", endpoint.trim_end_matches('/')),
            model: model.to_string(),
            model_id: Arc::from(format!("http/{model}")),
            dimension,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EmbeddingProvider for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<EmbeddingVector>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|e| transport_error(&self.url, &e))?;

        let status = response.status();
        if is_unavailable_status(status) {
            return Err(ProviderError::Unavailable(format!(
                "{} answered {status}",
                self.url
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::InvalidResponse(format!(
                "{} answered {status}",
                self.url
            )));
        }

        let body: EmbedResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                transport_error(&self.url, &e)
            } else {
                ProviderError::InvalidResponse(format!(
                    "malformed body from {}: {e}",
                    self.url
                ))
            }
        })?;

        tracing::debug!(
            url = %self.url,
            inputs = texts.len(),
            "embedded batch"
        );

        Ok(body
            .embeddings
            .into_iter()
            .map(|values| EmbeddingVector::new(self.model_id.clone(), values))
            .collect())
    }
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

fn is_unavailable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn transport_error(url: &str, err: &reqwest::Error) -> ProviderError {
    let what = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "refused the connection"
    } else {
        "failed"
    };
    ProviderError::Unavailable(format!("request to {url} {what}: {err}"))
}
