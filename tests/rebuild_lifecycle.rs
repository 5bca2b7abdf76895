mod common;

use std::{
    collections::BTreeSet,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use common::{TestProvider, rebuilder, source_dir, write_doc};
use docscope::{
    CollectionStore,
    Error,
    HashingEmbedder,
    embedding::{EmbeddingProvider, EmbeddingVector, ProviderError},
    rebuild::CancelToken,
    scope::{Scope, ScopeSelector},
    search::SearchEngine,
    store::{CollectionState, collection_file_name},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn notes_source(root: &Path, count: usize, stem: &str) -> std::path::PathBuf {
    let dir = source_dir(root, "notes-src");
    for i in 0..count {
        write_doc(
            &dir,
            &format!("{stem}-{i}.md"),
            format!("# {stem} {i}\n\nNotes about {stem} topic number {i}."),
        );
    }
    dir
}

fn search_ids(
    engine: &SearchEngine,
    query: &str,
    selector: ScopeSelector,
) -> Result<Vec<String>, Error> {
    Ok(engine
        .search(query, selector, 100)?
        .into_iter()
        .map(|r| r.document_id.as_str().to_string())
        .collect())
}

#[test]
fn malformed_document_is_skipped_and_rest_committed() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = notes_source(tmp.path(), 4, "good");
    write_doc(&dir, "bad.md", [0xff, 0xfe, 0x00, 0x80]);

    let store = CollectionStore::open(&tmp.path().join("collections"))?;
    let report = rebuilder(&store, TestProvider::working())
        .with_source(Scope::Notes, dir)
        .rebuild(Scope::Notes.into(), &CancelToken::new())?;

    assert_eq!(report.documents_processed, 4);
    assert_eq!(report.documents_skipped, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(
        report.errors[0].document_id.as_str(),
        "notes/notes-src/bad.md"
    );
    assert_eq!(store.state(Scope::Notes), CollectionState::Ready);

    let engine = SearchEngine::new(store, TestProvider::working());
    let ids = search_ids(&engine, "good notes", Scope::Notes.into())?;
    assert_eq!(ids.len(), 4);
    assert!(!ids.iter().any(|id| id.ends_with("bad.md")));
    Ok(())
}

#[test]
fn rebuild_is_idempotent() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = notes_source(tmp.path(), 5, "topic");
    let store = CollectionStore::open(&tmp.path().join("collections"))?;
    let rebuild = || {
        rebuilder(&store, TestProvider::working())
            .with_source(Scope::Notes, dir.clone())
            .rebuild(Scope::Notes.into(), &CancelToken::new())
    };

    let first = rebuild()?;
    let second = rebuild()?;
    assert_eq!(first.documents_processed, second.documents_processed);
    assert_eq!(first.passages_indexed, second.passages_indexed);
    assert_eq!(first.scopes[0].digest, second.scopes[0].digest);
    assert!(second.scopes[0].generation > first.scopes[0].generation);
    Ok(())
}

#[test]
fn outage_leaves_previous_collections_active() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = notes_source(tmp.path(), 12, "before");
    let store = CollectionStore::open(&tmp.path().join("collections"))?;
    rebuilder(&store, TestProvider::working())
        .with_source(Scope::Notes, dir.clone())
        .with_source(Scope::Playbooks, dir.clone())
        .rebuild(ScopeSelector::All, &CancelToken::new())?;
    let notes_before = store.manifest(Scope::Notes);
    let playbooks_before = store.manifest(Scope::Playbooks);

    let err = rebuilder(&store, TestProvider::failing_after(1))
        .with_source(Scope::Notes, dir.clone())
        .with_source(Scope::Playbooks, dir)
        .rebuild(ScopeSelector::All, &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, Error::ProviderUnavailable(_)));
    assert_eq!(store.manifest(Scope::Notes), notes_before);
    assert_eq!(store.manifest(Scope::Playbooks), playbooks_before);
    for scope in Scope::ALL {
        assert_ne!(store.state(scope), CollectionState::Building);
    }
    Ok(())
}

#[test]
fn concurrent_search_sees_old_or_new_never_a_mix() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = notes_source(tmp.path(), 3, "old");
    let store = CollectionStore::open(&tmp.path().join("collections"))?;
    rebuilder(&store, TestProvider::working())
        .with_source(Scope::Notes, dir.clone())
        .rebuild(Scope::Notes.into(), &CancelToken::new())?;

    let engine = SearchEngine::new(store.clone(), TestProvider::working());
    let old: BTreeSet<String> =
        search_ids(&engine, "notes topic", ScopeSelector::All)?
            .into_iter()
            .collect();
    assert_eq!(old.len(), 3);

    for i in 0..3 {
        std::fs::remove_file(dir.join(format!("old-{i}.md")))?;
    }
    notes_source(tmp.path(), 12, "new");

    let done = AtomicBool::new(false);
    let observed = std::thread::scope(|s| {
        let searcher = s.spawn(|| {
            let mut seen = Vec::new();
            while !done.load(Ordering::Acquire) {
                let ids: BTreeSet<String> =
                    search_ids(&engine, "notes topic", ScopeSelector::All)
                        .unwrap()
                        .into_iter()
                        .collect();
                seen.push(ids);
            }
            seen
        });

        let slow = TestProvider::slow(Duration::from_millis(20));
        let result = rebuilder(&store, slow)
            .with_source(Scope::Notes, dir.clone())
            .rebuild(Scope::Notes.into(), &CancelToken::new());
        done.store(true, Ordering::Release);
        result.unwrap();
        searcher.join().unwrap()
    });

    let new: BTreeSet<String> =
        search_ids(&engine, "notes topic", ScopeSelector::All)?
            .into_iter()
            .collect();
    assert_eq!(new.len(), 12);
    assert!(!observed.is_empty());
    for ids in observed {
        assert!(ids == old || ids == new, "mixed view: {ids:?}");
    }
    Ok(())
}

#[test]
fn committed_state_survives_restart_without_reembedding() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = notes_source(tmp.path(), 6, "persisted");
    let collections = tmp.path().join("collections");

    let store = CollectionStore::open(&collections)?;
    rebuilder(&store, TestProvider::working())
        .with_source(Scope::Notes, dir)
        .rebuild(Scope::Notes.into(), &CancelToken::new())?;
    let before = SearchEngine::new(store.clone(), TestProvider::working())
        .search("persisted topic 3", ScopeSelector::All, 6)?;
    store.close()?;

    let reopened = CollectionStore::open(&collections)?;
    assert_eq!(reopened.state(Scope::Notes), CollectionState::Ready);
    let provider = TestProvider::working();
    let after = SearchEngine::new(reopened, provider.clone())
        .search("persisted topic 3", ScopeSelector::All, 6)?;

    assert_eq!(provider.calls(), 1);
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(b.document_id, a.document_id);
        assert_eq!(b.distance, a.distance);
    }
    Ok(())
}

#[test]
fn corrupt_file_is_reported_and_rebuild_recovers() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = notes_source(tmp.path(), 2, "fragile");
    let collections = tmp.path().join("collections");

    let store = CollectionStore::open(&collections)?;
    rebuilder(&store, TestProvider::working())
        .with_source(Scope::Notes, dir.clone())
        .rebuild(ScopeSelector::All, &CancelToken::new())?;
    store.close()?;

    std::fs::write(
        collections.join(collection_file_name(Scope::Notes)),
        b"definitely not a database",
    )?;

    let store = CollectionStore::open(&collections)?;
    assert_eq!(store.state(Scope::Notes), CollectionState::Corrupt);
    assert_eq!(store.state(Scope::Toolchain), CollectionState::Ready);

    let engine = SearchEngine::new(store.clone(), TestProvider::working());
    for selector in [ScopeSelector::One(Scope::Notes), ScopeSelector::All] {
        assert!(matches!(
            engine.search("fragile", selector, 5),
            Err(Error::CollectionCorrupt {
                scope: Scope::Notes,
                ..
            })
        ));
    }
    assert!(engine.search("fragile", Scope::Toolchain.into(), 5).is_ok());

    rebuilder(&store, TestProvider::working())
        .with_source(Scope::Notes, dir)
        .rebuild(Scope::Notes.into(), &CancelToken::new())?;
    assert_eq!(store.state(Scope::Notes), CollectionState::Ready);
    assert_eq!(engine.search("fragile", Scope::Notes.into(), 5)?.len(), 2);
    Ok(())
}

#[test]
fn backup_and_restore_round_trip() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = notes_source(tmp.path(), 3, "original");
    let store = CollectionStore::open(&tmp.path().join("collections"))?;
    rebuilder(&store, TestProvider::working())
        .with_source(Scope::Notes, dir.clone())
        .rebuild(Scope::Notes.into(), &CancelToken::new())?;
    let original = store.manifest(Scope::Notes);

    let backup = tmp.path().join("backup");
    let written = store.backup(&backup)?;
    assert_eq!(written.len(), 1);

    notes_source(tmp.path(), 2, "replacement");
    rebuilder(&store, TestProvider::working())
        .with_source(Scope::Notes, dir)
        .rebuild(Scope::Notes.into(), &CancelToken::new())?;
    assert_ne!(
        store.manifest(Scope::Notes).map(|m| m.digest),
        original.as_ref().map(|m| m.digest.clone())
    );

    let restored = store.restore(&backup)?;
    assert_eq!(restored, vec![Scope::Notes]);
    assert_eq!(store.manifest(Scope::Notes), original);
    Ok(())
}

#[test]
fn second_rebuild_of_a_scope_fails_fast() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let store = CollectionStore::open(tmp.path())?;
    let handle = store.begin_rebuild(Scope::Playbooks)?;
    assert_eq!(store.state(Scope::Playbooks), CollectionState::Building);

    let err = rebuilder(&store, TestProvider::working())
        .rebuild(ScopeSelector::All, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::RebuildInProgress(Scope::Playbooks)));
    assert!(matches!(
        store.backup(&tmp.path().join("backup")),
        Err(Error::RebuildInProgress(_))
    ));

    // Scopes staged before the conflict were released.
    assert_eq!(store.state(Scope::Toolchain), CollectionState::Absent);
    store.abort_rebuild(handle);
    rebuilder(&store, TestProvider::working())
        .rebuild(Scope::Playbooks.into(), &CancelToken::new())?;
    Ok(())
}

/// Cancels the rebuild the first time it is asked to embed anything.
struct CancellingProvider {
    inner: HashingEmbedder,
    token: CancelToken,
}

impl EmbeddingProvider for CancellingProvider {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(
        &self,
        texts: &[String],
    ) -> Result<Vec<EmbeddingVector>, ProviderError> {
        self.token.cancel();
        self.inner.embed(texts)
    }
}

#[test]
fn cancellation_keeps_the_active_collection() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = notes_source(tmp.path(), 4, "stable");
    let store = CollectionStore::open(&tmp.path().join("collections"))?;
    rebuilder(&store, TestProvider::working())
        .with_source(Scope::Notes, dir.clone())
        .rebuild(Scope::Notes.into(), &CancelToken::new())?;
    let before = store.manifest(Scope::Notes);

    let token = CancelToken::new();
    let provider = Arc::new(CancellingProvider {
        inner: HashingEmbedder::new(common::DIMENSION),
        token: token.clone(),
    });
    let err = rebuilder(&store, provider)
        .with_source(Scope::Notes, dir)
        .rebuild(Scope::Notes.into(), &token)
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(store.manifest(Scope::Notes), before);
    assert_eq!(store.state(Scope::Notes), CollectionState::Ready);
    Ok(())
}
