//! Document ingestion: source locations in, passages out.
//!
//! An [`Ingestor`] is bound to one scope and a list of source locations.
//! [`Ingestor::documents`] walks them lazily, one file at a time, so a
//! rebuild never holds more than the current document in memory. Calling
//! it again restarts from the first source.

use std::{
    collections::{HashSet, VecDeque},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    chunking::{self, ChunkingConfig},
    doc_id::DocumentId,
    scope::Scope,
    walker::{self, DiscoveredFile},
};

/// Why a single document could not be ingested.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    Encoding { path: PathBuf },

    #[error("{path} has no text content")]
    Empty { path: PathBuf },

    #[error("{path} duplicates an already ingested document ID")]
    Duplicate { path: PathBuf },

    #[error("cannot list source {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },
}

/// A failed document together with the ID it would have had.
#[derive(Debug)]
pub struct IngestFailure {
    pub document_id: DocumentId,
    pub error: IngestError,
}

/// A source document, read in full.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub scope: Scope,
    pub title: String,
    pub raw_text: String,
    /// blake3 hex digest of the raw bytes.
    pub checksum: String,
}

/// A bounded chunk of one document: the unit that is embedded and indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub document_id: DocumentId,
    pub scope: Scope,
    /// Position of this passage within its document.
    pub index: usize,
    pub text: String,
    /// Checksum of the parent document.
    pub checksum: String,
    /// Title of the parent document.
    pub title: String,
}

/// A document and the passages cut from it.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub document: Document,
    pub passages: Vec<Passage>,
}

/// Produces passages for one scope from a set of source locations.
#[derive(Debug, Clone)]
pub struct Ingestor {
    scope: Scope,
    sources: Vec<PathBuf>,
    chunking: ChunkingConfig,
}

impl Ingestor {
    pub fn new(
        scope: Scope,
        sources: Vec<PathBuf>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            scope,
            sources,
            chunking,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Lazily iterate the documents of every source, in source order and
    /// then path order within each source.
    pub fn documents(&self) -> Documents<'_> {
        Documents {
            ingestor: self,
            next_source: 0,
            pending: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Lazily iterate passages, flattening [`Ingestor::documents`].
    pub fn passages(
        &self,
    ) -> impl Iterator<Item = Result<Passage, IngestFailure>> + '_ {
        self.documents().flat_map(|result| match result {
            Ok(doc) => doc.passages.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(failure) => vec![Err(failure)],
        })
    }

    fn load(
        &self,
        id: DocumentId,
        file: &DiscoveredFile,
    ) -> Result<IngestedDocument, IngestFailure> {
        let fail = |error| IngestFailure {
            document_id: id.clone(),
            error,
        };
        let path = &file.absolute_path;

        let bytes = std::fs::read(path).map_err(|source| {
            fail(IngestError::Unreadable {
                path: path.clone(),
                source,
            })
        })?;
        let checksum = blake3::hash(&bytes).to_hex().to_string();
        let raw_text = String::from_utf8(bytes)
            .map_err(|_| fail(IngestError::Encoding { path: path.clone() }))?;

        let max_chars = self.chunking.max_passage_chars;
        let chunks = chunking::split_passages(&raw_text, max_chars);
        if chunks.is_empty() {
            return Err(fail(IngestError::Empty { path: path.clone() }));
        }

        let title = extract_title(&raw_text, &file.relative_path);
        let passages = chunks
            .into_iter()
            .map(|chunk| Passage {
                document_id: id.clone(),
                scope: self.scope,
                index: chunk.index,
                text: chunk.text,
                checksum: checksum.clone(),
                title: title.clone(),
            })
            .collect();

        Ok(IngestedDocument {
            document: Document {
                id,
                scope: self.scope,
                title,
                raw_text,
                checksum,
            },
            passages,
        })
    }
}

/// Iterator returned by [`Ingestor::documents`].
pub struct Documents<'a> {
    ingestor: &'a Ingestor,
    next_source: usize,
    pending: VecDeque<(PathBuf, DiscoveredFile)>,
    seen: HashSet<DocumentId>,
}

impl Iterator for Documents<'_> {
    type Item = Result<IngestedDocument, IngestFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((prefix, file)) = self.pending.pop_front() {
                let relative = prefix.join(&file.relative_path);
                let id = DocumentId::new(
                    self.ingestor.scope,
                    &relative.to_string_lossy(),
                );
                if !self.seen.insert(id.clone()) {
                    return Some(Err(IngestFailure {
                        document_id: id,
                        error: IngestError::Duplicate {
                            path: file.absolute_path,
                        },
                    }));
                }
                return Some(self.ingestor.load(id, &file));
            }

            let location = self.ingestor.sources.get(self.next_source)?;
            self.next_source += 1;

            match walker::discover_source(location) {
                Ok(files) => {
                    let prefix = source_prefix(location);
                    self.pending
                        .extend(files.into_iter().map(|f| (prefix.clone(), f)));
                }
                Err(e) => {
                    return Some(Err(IngestFailure {
                        document_id: DocumentId::new(
                            self.ingestor.scope,
                            &location.to_string_lossy(),
                        ),
                        error: IngestError::Discovery {
                            path: location.clone(),
                            reason: e.to_string(),
                        },
                    }));
                }
            }
        }
    }
}

/// Directory sources contribute their own name to document IDs so two roots
/// with the same inner layout do not collide. File sources contribute
/// nothing beyond the file name.
fn source_prefix(location: &Path) -> PathBuf {
    if location.is_dir() {
        location
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(PathBuf::from))
            .unwrap_or_default()
    } else {
        PathBuf::new()
    }
}

/// Extract a title from file content.
///
/// Looks for the first markdown heading (line starting with `# `).
/// Falls back to the filename without extension.
fn extract_title(content: &str, file_path: &Path) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}
