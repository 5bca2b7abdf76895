//! Degraded-mode search by token overlap.
//!
//! Used when the embedding provider is unavailable. A passage scores the
//! fraction of distinct query tokens it contains; passages sharing no token
//! with the query are not results. Scores are reported as distances
//! (`1 - score`) so fallback results sort the same way as embedding
//! results.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use rayon::prelude::*;

use crate::{
    doc_id::DocumentId,
    ranking::{self, Candidate},
    store::Collection,
    text_util::{token_set, tokenize},
};

/// Fraction of the distinct `query_tokens` present in `text`.
pub fn overlap_score(query_tokens: &BTreeSet<String>, text: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let mut found = HashSet::new();
    for token in tokenize(text) {
        if query_tokens.contains(&token) {
            found.insert(token);
        }
    }
    found.len() as f32 / query_tokens.len() as f32
}

/// The `k` best documents for `query` across `collections`, one passage
/// each.
pub fn search(
    collections: &[Arc<Collection>],
    query: &str,
    k: usize,
) -> Vec<Candidate> {
    let query_tokens = token_set(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }

    let lists = collections
        .iter()
        .map(|collection| {
            // Score passages in parallel, keeping ordinals only.
            let scored: Vec<(usize, f32)> = collection
                .passages()
                .par_iter()
                .enumerate()
                .filter_map(|(i, passage)| {
                    let score = overlap_score(&query_tokens, &passage.text);
                    (score > 0.0).then_some((i, 1.0 - score))
                })
                .collect();

            let mut best: HashMap<&DocumentId, (usize, f32)> = HashMap::new();
            for (i, distance) in scored {
                let id = &collection.passages()[i].document_id;
                best.entry(id)
                    .and_modify(|current| {
                        if distance < current.1 {
                            *current = (i, distance);
                        }
                    })
                    .or_insert((i, distance));
            }

            best.into_values()
                .map(|(i, distance)| {
                    Candidate::new(distance, collection.passages()[i].clone())
                })
                .collect()
        })
        .collect();

    let merged = ranking::merge(lists, k);
    tracing::debug!(
        query_tokens = query_tokens.len(),
        results = merged.len(),
        "lexical fallback search"
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::EmbeddingVector,
        ingestion::Passage,
        scope::Scope,
        store::CollectionStore,
    };

    fn passage(scope: Scope, doc: &str, index: usize, text: &str) -> Passage {
        Passage {
            document_id: DocumentId::new(scope, doc),
            scope,
            index,
            text: text.to_string(),
            checksum: String::new(),
            title: doc.to_string(),
        }
    }

    fn collection(
        store: &CollectionStore,
        scope: Scope,
        passages: Vec<Passage>,
    ) -> Arc<Collection> {
        let mut handle = store.begin_rebuild(scope).unwrap();
        let pairs = passages
            .into_iter()
            .map(|p| (p, EmbeddingVector::new(Arc::from("m"), vec![1.0])))
            .collect();
        handle.stage(pairs).unwrap();
        store.commit_rebuild(handle).unwrap();
        store.snapshot(scope).unwrap().unwrap()
    }

    #[test]
    fn overlap_counts_distinct_query_tokens() {
        let query = token_set("rust rust toolchain");
        assert_eq!(overlap_score(&query, "the Rust compiler"), 0.5);
        assert_eq!(overlap_score(&query, "rust toolchain rust"), 1.0);
        assert_eq!(overlap_score(&query, "python"), 0.0);
    }

    #[test]
    fn ranks_by_overlap_and_excludes_misses() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CollectionStore::open(tmp.path()).unwrap();
        let notes = collection(
            &store,
            Scope::Notes,
            vec![
                passage(Scope::Notes, "a.md", 0, "install the rust toolchain"),
                passage(Scope::Notes, "b.md", 0, "rust is fun"),
                passage(Scope::Notes, "c.md", 0, "gardening tips"),
            ],
        );

        let results = search(&[notes], "rust toolchain", 10);
        let ids: Vec<_> =
            results.iter().map(|c| c.document_id().as_str()).collect();
        assert_eq!(ids, vec!["notes/a.md", "notes/b.md"]);
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(results[1].distance, 0.5);
    }

    #[test]
    fn one_passage_per_document_and_ties_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CollectionStore::open(tmp.path()).unwrap();
        let notes = collection(
            &store,
            Scope::Notes,
            vec![
                passage(Scope::Notes, "b.md", 0, "cleanup disk"),
                passage(Scope::Notes, "a.md", 0, "disk"),
                passage(Scope::Notes, "a.md", 1, "cleanup disk space"),
            ],
        );

        let results = search(&[notes], "disk cleanup", 10);
        let found: Vec<_> = results
            .iter()
            .map(|c| (c.document_id().as_str(), c.passage.index))
            .collect();
        assert_eq!(found, vec![("notes/a.md", 1), ("notes/b.md", 0)]);
    }

    #[test]
    fn merges_collections_and_truncates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CollectionStore::open(tmp.path()).unwrap();
        let notes = collection(
            &store,
            Scope::Notes,
            vec![passage(Scope::Notes, "n.md", 0, "backup restore")],
        );
        let playbooks = collection(
            &store,
            Scope::Playbooks,
            vec![passage(Scope::Playbooks, "p.md", 0, "backup")],
        );

        let results = search(&[notes, playbooks], "backup restore", 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].passage.scope, Scope::Notes);
    }

    #[test]
    fn query_without_tokens_finds_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CollectionStore::open(tmp.path()).unwrap();
        let notes = collection(
            &store,
            Scope::Notes,
            vec![passage(Scope::Notes, "a.md", 0, "a b c")],
        );
        assert!(search(&[notes], "? !", 5).is_empty());
    }
}
