//! Ordering and merging of ranked passages.
//!
//! Every ranked list in the crate (per collection, merged across scopes,
//! lexical fallback) uses the same total order: ascending distance, then
//! the lexicographically smaller document ID, then the lower passage index.
//! A result list holds at most one passage per document.

use std::{cmp::Ordering, collections::HashMap};

use crate::{doc_id::DocumentId, ingestion::Passage};

/// A passage and its distance from a query. Lower is better.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub distance: f32,
    pub passage: Passage,
}

impl Candidate {
    pub fn new(distance: f32, passage: Passage) -> Self {
        Self { distance, passage }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.passage.document_id
    }
}

/// The ranking order shared by every result list.
pub fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.passage.document_id.cmp(&b.passage.document_id))
        .then_with(|| a.passage.index.cmp(&b.passage.index))
}

/// Keep only the best passage of each document, sorted by [`rank_order`].
pub fn best_per_document(
    candidates: impl IntoIterator<Item = Candidate>,
) -> Vec<Candidate> {
    let mut best: HashMap<DocumentId, Candidate> = HashMap::new();
    for candidate in candidates {
        match best.get_mut(candidate.document_id()) {
            Some(current) => {
                if rank_order(&candidate, current) == Ordering::Less {
                    *current = candidate;
                }
            }
            None => {
                best.insert(candidate.document_id().clone(), candidate);
            }
        }
    }

    let mut ranked: Vec<Candidate> = best.into_values().collect();
    ranked.sort_by(rank_order);
    ranked
}

/// Merge per-collection lists into one list of at most `k` documents.
///
/// # Examples
///
/// ```
/// use docscope::{
///     DocumentId,
///     ingestion::Passage,
///     ranking::{Candidate, merge},
///     scope::Scope,
/// };
///
/// let passage = |doc: &str| Passage {
///     document_id: DocumentId::new(Scope::Notes, doc),
///     scope: Scope::Notes,
///     index: 0,
///     text: String::new(),
///     checksum: String::new(),
///     title: String::new(),
/// };
///
/// let merged = merge(
///     vec![
///         vec![Candidate::new(0.4, passage("b.md"))],
///         vec![Candidate::new(0.4, passage("a.md"))],
///     ],
///     10,
/// );
/// let ids: Vec<_> = merged.iter().map(|c| c.document_id().as_str()).collect();
/// assert_eq!(ids, vec!["notes/a.md", "notes/b.md"]);
/// ```
pub fn merge(lists: Vec<Vec<Candidate>>, k: usize) -> Vec<Candidate> {
    let mut ranked = best_per_document(lists.into_iter().flatten());
    ranked.truncate(k);
    ranked
}

/// Drop candidates farther than `max_distance`, if one is set.
pub fn apply_cutoff(
    candidates: Vec<Candidate>,
    max_distance: Option<f32>,
) -> Vec<Candidate> {
    match max_distance {
        Some(limit) => candidates
            .into_iter()
            .filter(|c| c.distance <= limit)
            .collect(),
        None => candidates,
    }
}
