mod common;

use std::collections::BTreeSet;

use common::{TestProvider, rebuilder, source_dir, write_doc};
use docscope::{
    CollectionStore,
    Error,
    rebuild::CancelToken,
    scope::{Scope, ScopeSelector},
    search::{ResultSource, SearchEngine},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Three toolchain documents and two playbooks, committed in one rebuild.
fn three_and_two(
    root: &std::path::Path,
) -> Result<CollectionStore, Box<dyn std::error::Error>> {
    let toolchain = source_dir(root, "toolchain-docs");
    write_doc(
        &toolchain,
        "rustup.md",
        "# Rustup\n\nInstall and update the rust toolchain with rustup.",
    );
    write_doc(
        &toolchain,
        "cargo.md",
        "# Cargo\n\nCargo builds rust crates and runs their tests.",
    );
    write_doc(
        &toolchain,
        "clippy.md",
        "# Clippy\n\nClippy lints rust code for common mistakes.",
    );

    let playbooks = source_dir(root, "playbooks-docs");
    write_doc(
        &playbooks,
        "disk.md",
        "# Disk cleanup\n\nRemove old logs to free disk space.",
    );
    write_doc(
        &playbooks,
        "restart.md",
        "# Restart\n\nRestart the web service after a deploy.",
    );

    let store = CollectionStore::open(&root.join("collections"))?;
    let report = rebuilder(&store, TestProvider::working())
        .with_source(Scope::Toolchain, toolchain)
        .with_source(Scope::Playbooks, playbooks)
        .rebuild(ScopeSelector::All, &CancelToken::new())?;
    assert_eq!(report.documents_processed, 5);
    assert_eq!(report.documents_skipped, 0);
    Ok(store)
}

fn ids(results: &[docscope::search::SearchResult]) -> Vec<String> {
    results
        .iter()
        .map(|r| r.document_id.as_str().to_string())
        .collect()
}

#[test]
fn single_scope_returns_only_that_scope() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let store = three_and_two(tmp.path())?;
    let engine = SearchEngine::new(store, TestProvider::working());

    let results = engine.search("rust toolchain", Scope::Toolchain.into(), 10)?;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.scope == Scope::Toolchain));
    assert!(
        ids(&results)
            .iter()
            .all(|id| id.starts_with("toolchain/toolchain-docs/"))
    );

    let results = engine.search("rust toolchain", Scope::Playbooks.into(), 10)?;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.scope == Scope::Playbooks));
    Ok(())
}

#[test]
fn union_covers_every_scope_and_respects_k() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let store = three_and_two(tmp.path())?;
    let engine = SearchEngine::new(store, TestProvider::working());

    let results = engine.search("rust disk", ScopeSelector::All, 10)?;
    assert_eq!(results.len(), 5);
    let scopes: BTreeSet<_> = results.iter().map(|r| r.scope).collect();
    assert_eq!(
        scopes,
        BTreeSet::from([Scope::Toolchain, Scope::Playbooks])
    );
    let unique: BTreeSet<_> = ids(&results).into_iter().collect();
    assert_eq!(unique.len(), 5);

    let top = engine.search("free disk space", ScopeSelector::All, 1)?;
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].document_id.as_str(), "playbooks/playbooks-docs/disk.md");
    assert_eq!(top[0].title, "Disk cleanup");
    assert!(top[0].snippet.contains("disk"));
    Ok(())
}

#[test]
fn ranking_is_sorted_and_deterministic() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let store = three_and_two(tmp.path())?;
    let engine = SearchEngine::new(store, TestProvider::working());

    let first = engine.search("rust crates tests", ScopeSelector::All, 5)?;
    let second = engine.search("rust crates tests", ScopeSelector::All, 5)?;
    assert_eq!(ids(&first), ids(&second));
    for pair in first.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    let ranks: Vec<_> = first.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    Ok(())
}

#[test]
fn unbuilt_scope_is_empty_not_an_error() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let store = three_and_two(tmp.path())?;
    let provider = TestProvider::working();
    let engine = SearchEngine::new(store, provider.clone());

    let results = engine.search("anything", Scope::Notes.into(), 10)?;
    assert!(results.is_empty());
    assert_eq!(provider.calls(), 0);
    Ok(())
}

#[test]
fn provider_outage_falls_back_to_lexical() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let store = three_and_two(tmp.path())?;
    let engine = SearchEngine::new(store, TestProvider::down());

    let results = engine.search("restart service", ScopeSelector::All, 10)?;
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.source == ResultSource::Fallback));
    assert_eq!(
        results[0].document_id.as_str(),
        "playbooks/playbooks-docs/restart.md"
    );

    let scoped = engine.search("restart service", Scope::Toolchain.into(), 10)?;
    assert!(scoped.is_empty());
    Ok(())
}

#[test]
fn invalid_queries_are_rejected() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let store = three_and_two(tmp.path())?;
    let provider = TestProvider::working();
    let engine = SearchEngine::new(store, provider.clone());

    assert!(matches!(
        engine.search("", ScopeSelector::All, 10),
        Err(Error::InvalidQuery(_))
    ));
    assert!(matches!(
        engine.search("rust", ScopeSelector::All, 0),
        Err(Error::InvalidQuery(_))
    ));
    assert!(matches!(
        engine.search("rust", ScopeSelector::All, 101),
        Err(Error::InvalidQuery(_))
    ));
    assert!(matches!(
        "future".parse::<ScopeSelector>(),
        Err(Error::ScopeNotFound(_))
    ));
    assert_eq!(provider.calls(), 0);
    Ok(())
}

#[test]
fn distance_cutoff_is_opt_in() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let store = three_and_two(tmp.path())?;

    let open = SearchEngine::new(store.clone(), TestProvider::working());
    let all = open.search("zebra giraffe", ScopeSelector::All, 10)?;
    assert_eq!(all.len(), 5);

    let strict = SearchEngine::new(store, TestProvider::working())
        .with_max_distance(Some(0.0));
    assert!(strict.search("zebra giraffe", ScopeSelector::All, 10)?.is_empty());
    Ok(())
}

#[test]
fn equal_distances_order_by_document_id() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let text = "# Twin\n\nRotate the signing keys every quarter.";
    // Toolchain is queried first, so the tie must be settled by id.
    let toolchain = source_dir(tmp.path(), "keys");
    write_doc(&toolchain, "rotate.md", text);
    let playbooks = source_dir(tmp.path(), "runbook");
    write_doc(&playbooks, "rotate.md", text);

    let store = CollectionStore::open(&tmp.path().join("collections"))?;
    rebuilder(&store, TestProvider::working())
        .with_source(Scope::Toolchain, toolchain)
        .with_source(Scope::Playbooks, playbooks)
        .rebuild(ScopeSelector::All, &CancelToken::new())?;

    let engine = SearchEngine::new(store, TestProvider::working());
    let results = engine.search("signing keys", ScopeSelector::All, 2)?;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.source == ResultSource::Embedding));
    assert_eq!(results[0].distance, results[1].distance);
    assert_eq!(
        ids(&results),
        vec![
            "playbooks/runbook/rotate.md".to_string(),
            "toolchain/keys/rotate.md".to_string(),
        ]
    );
    Ok(())
}
