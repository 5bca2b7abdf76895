//! Rebuild orchestration: sources in, committed collections out.
//!
//! A rebuild stages a fresh generation for every target scope and only
//! commits once all of them staged cleanly. A provider outage or a
//! cancellation drops the open stagings, so the active collections stay
//! exactly as they were.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;

use crate::{
    chunking::ChunkingConfig,
    config_db::ConfigDb,
    doc_id::DocumentId,
    embedding::BatchEmbedder,
    error::{Error, Result},
    ingestion::{Ingestor, Passage},
    scope::{Scope, ScopeSelector},
    store::{CollectionStore, StagingHandle},
};

/// Cooperative cancellation for a running rebuild.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A document that was skipped, and why.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildError {
    pub document_id: DocumentId,
    pub reason: String,
}

/// Outcome of rebuilding one scope.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeReport {
    pub scope: Scope,
    pub documents_processed: usize,
    pub documents_skipped: usize,
    pub passages_indexed: usize,
    pub generation: u64,
    pub digest: String,
}

/// Outcome of a whole rebuild.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub documents_processed: usize,
    pub documents_skipped: usize,
    pub passages_indexed: usize,
    pub errors: Vec<RebuildError>,
    pub scopes: Vec<ScopeReport>,
}

/// Staged but not yet committed work for one scope.
struct Staged {
    handle: StagingHandle,
    documents_processed: usize,
    documents_skipped: usize,
}

/// Re-ingests and re-embeds the sources of one or more scopes.
pub struct Rebuilder {
    store: CollectionStore,
    batcher: BatchEmbedder,
    chunking: ChunkingConfig,
    sources: BTreeMap<Scope, Vec<PathBuf>>,
}

impl Rebuilder {
    pub fn new(
        store: CollectionStore,
        batcher: BatchEmbedder,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            batcher,
            chunking,
            sources: BTreeMap::new(),
        }
    }

    /// Register `location` (a file or directory) as a source of `scope`.
    pub fn with_source(mut self, scope: Scope, location: PathBuf) -> Self {
        self.sources.entry(scope).or_default().push(location);
        self
    }

    /// Register every source recorded in `config_db`.
    pub fn with_sources_from(mut self, config_db: &ConfigDb) -> Result<Self> {
        for (location, scope) in config_db.list_sources()? {
            self.sources.entry(scope).or_default().push(location);
        }
        Ok(self)
    }

    pub fn store(&self) -> &CollectionStore {
        &self.store
    }

    /// Rebuild every scope in `selector` from its sources.
    ///
    /// Documents that cannot be ingested are skipped and listed in the
    /// report. A scope without sources rebuilds to an empty collection.
    /// Nothing is committed unless every scope staged successfully; on
    /// [`Error::ProviderUnavailable`], [`Error::Cancelled`] or any other
    /// failure before the commit phase, the previous collections remain
    /// active.
    pub fn rebuild(
        &self,
        selector: ScopeSelector,
        cancel: &CancelToken,
    ) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();
        let mut staged = Vec::new();

        for scope in selector.scopes() {
            cancel.check()?;
            let handle = self.store.begin_rebuild(scope)?;
            staged.push(self.stage_scope(handle, cancel, &mut report)?);
        }

        cancel.check()?;
        for Staged {
            handle,
            documents_processed,
            documents_skipped,
        } in staged
        {
            let manifest = self.store.commit_rebuild(handle)?;
            report.documents_processed += documents_processed;
            report.documents_skipped += documents_skipped;
            report.passages_indexed += manifest.passage_count;
            report.scopes.push(ScopeReport {
                scope: manifest.scope,
                documents_processed,
                documents_skipped,
                passages_indexed: manifest.passage_count,
                generation: manifest.generation,
                digest: manifest.digest,
            });
        }

        tracing::info!(
            %selector,
            documents = report.documents_processed,
            skipped = report.documents_skipped,
            passages = report.passages_indexed,
            "rebuild complete"
        );
        Ok(report)
    }

    fn stage_scope(
        &self,
        mut handle: StagingHandle,
        cancel: &CancelToken,
        report: &mut RebuildReport,
    ) -> Result<Staged> {
        let scope = handle.scope();
        let sources = self.sources.get(&scope).cloned().unwrap_or_default();
        if sources.is_empty() {
            tracing::info!(%scope, "no sources, rebuilding empty");
        }

        let ingestor = Ingestor::new(scope, sources, self.chunking);
        let flush_at = self.batcher.batch_size() * self.batcher.max_in_flight();
        let mut pending: Vec<Passage> = Vec::new();
        let mut processed = 0;
        let mut skipped = 0;

        for result in ingestor.documents() {
            cancel.check()?;
            match result {
                Ok(doc) => {
                    processed += 1;
                    pending.extend(doc.passages);
                }
                Err(failure) => {
                    tracing::warn!(
                        document = %failure.document_id,
                        error = %failure.error,
                        "skipping document"
                    );
                    skipped += 1;
                    report.errors.push(RebuildError {
                        document_id: failure.document_id,
                        reason: failure.error.to_string(),
                    });
                }
            }

            if pending.len() >= flush_at {
                self.flush(&mut handle, std::mem::take(&mut pending))?;
            }
        }
        cancel.check()?;
        self.flush(&mut handle, pending)?;

        tracing::debug!(
            %scope,
            processed,
            skipped,
            passages = handle.staged(),
            "scope staged"
        );
        Ok(Staged {
            handle,
            documents_processed: processed,
            documents_skipped: skipped,
        })
    }

    fn flush(
        &self,
        handle: &mut StagingHandle,
        passages: Vec<Passage>,
    ) -> Result<()> {
        if passages.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> =
            passages.iter().map(|p| p.text.clone()).collect();
        let vectors = self.batcher.embed_all(&texts)?;
        handle.stage(passages.into_iter().zip(vectors).collect())
    }
}

impl std::fmt::Debug for Rebuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rebuilder")
            .field("store", &self.store)
            .field("batcher", &self.batcher)
            .field("sources", &self.sources)
            .finish()
    }
}
