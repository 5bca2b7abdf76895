use std::sync::Arc;

use serde::Serialize;

use crate::{
    doc_id::DocumentId,
    embedding::{EmbeddingProvider, ProviderError, validate_response},
    error::{Error, Result},
    lexical,
    ranking::{self, Candidate},
    scope::{Scope, ScopeSelector},
    store::{self, CollectionStore},
    text_util::{DEFAULT_SNIPPET_MAX_CHARS, extract_snippet},
};

/// Largest `k` a search accepts.
pub const MAX_RESULTS: usize = 100;

/// How a result was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// Nearest-neighbor search over embeddings.
    Embedding,
    /// Token-overlap search, used while the provider is unavailable.
    Fallback,
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ResultSource::Embedding => "embedding",
            ResultSource::Fallback => "fallback",
        })
    }
}

/// One ranked document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// 1-based position in the result list.
    pub rank: usize,
    pub document_id: DocumentId,
    pub scope: Scope,
    pub title: String,
    /// Index of the best-matching passage within the document.
    pub passage_index: usize,
    pub snippet: String,
    /// Lower is better: cosine distance for embedding results,
    /// `1 - overlap` for fallback results.
    pub distance: f32,
    pub source: ResultSource,
}

/// Answers scoped queries against a [`CollectionStore`].
pub struct SearchEngine {
    store: CollectionStore,
    provider: Arc<dyn EmbeddingProvider>,
    max_distance: Option<f32>,
}

impl SearchEngine {
    pub fn new(
        store: CollectionStore,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            provider,
            max_distance: None,
        }
    }

    /// Drop results farther than `max_distance`. `None` keeps everything.
    pub fn with_max_distance(mut self, max_distance: Option<f32>) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn store(&self) -> &CollectionStore {
        &self.store
    }

    /// Return up to `k` documents relevant to `query` within `selector`.
    ///
    /// 1. Validate the query and `k` (no side effects on failure)
    /// 2. Resolve the selector to collection snapshots, failing fast on a
    ///    corrupt one; scopes never built contribute nothing
    /// 3. Embed the query and rank by cosine distance, or fall back to
    ///    token overlap if the provider is unavailable
    /// 4. Apply the optional distance cutoff
    ///
    /// An empty list is a valid answer.
    pub fn search(
        &self,
        query: &str,
        selector: ScopeSelector,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        validate(query, k)?;

        let collections = self.store.snapshots(&selector.scopes())?;
        if collections.iter().all(|c| c.is_empty()) {
            tracing::debug!(%selector, "nothing indexed in scope");
            return Ok(Vec::new());
        }

        let (candidates, source) =
            match self.provider.embed(&[query.to_string()]) {
                Ok(mut vectors) => {
                    validate_response(self.provider.as_ref(), 1, &vectors)?;
                    let vector = vectors.remove(0);
                    let ranked =
                        store::query_collections(&collections, &vector, k)?;
                    (ranked, ResultSource::Embedding)
                }
                Err(ProviderError::Unavailable(reason)) => {
                    tracing::warn!(
                        %reason,
                        "embedding provider unavailable, using lexical fallback"
                    );
                    let ranked = lexical::search(&collections, query, k);
                    (ranked, ResultSource::Fallback)
                }
                Err(e) => return Err(e.into()),
            };

        let candidates = ranking::apply_cutoff(candidates, self.max_distance);
        tracing::debug!(
            %selector,
            %source,
            results = candidates.len(),
            "search complete"
        );

        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| to_result(i + 1, candidate, query, source))
            .collect())
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("store", &self.store)
            .field("model_id", &self.provider.model_id())
            .field("max_distance", &self.max_distance)
            .finish()
    }
}

fn validate(query: &str, k: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::InvalidQuery("query is empty".into()));
    }
    if k == 0 || k > MAX_RESULTS {
        return Err(Error::InvalidQuery(format!(
            "result count must be between 1 and {MAX_RESULTS}, got {k}"
        )));
    }
    Ok(())
}

fn to_result(
    rank: usize,
    candidate: Candidate,
    query: &str,
    source: ResultSource,
) -> SearchResult {
    let Candidate { distance, passage } = candidate;
    SearchResult {
        rank,
        snippet: extract_snippet(
            &passage.text,
            query,
            DEFAULT_SNIPPET_MAX_CHARS,
        ),
        document_id: passage.document_id,
        scope: passage.scope,
        title: passage.title,
        passage_index: passage.index,
        distance,
        source,
    }
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in results {
        println!(
            "{:>3}. [{:.3}] #{} {}{}",
            r.rank,
            r.distance,
            r.document_id.short(6),
            r.document_id,
            if r.source == ResultSource::Fallback {
                " (lexical)"
            } else {
                ""
            }
        );
        if !r.title.is_empty() {
            println!("     {}", r.title);
        }
        if !r.snippet.is_empty() {
            println!("     {}", r.snippet);
        }
    }
    println!("\n{} result(s)", results.len());
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    scope: String,
    result_count: usize,
    results: &'a [SearchResult],
}

/// Format results as JSON output.
pub fn format_json(
    results: &[SearchResult],
    query: &str,
    selector: ScopeSelector,
) -> Result<()> {
    let output = JsonOutput {
        query,
        scope: selector.to_string(),
        result_count: results.len(),
        results,
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
