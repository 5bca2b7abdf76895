//! Durable per-scope collections with atomic replacement.
//!
//! Each scope's active collection is one redb file, `<dir>/<scope>.redb`,
//! with `passages` and `vectors` tables keyed by passage ordinal and a
//! [`Manifest`] in the `meta` table. Active files are never opened for
//! writing: they are read under a shared lock, loaded into memory and
//! released, so any number of processes can serve searches from them.
//!
//! A rebuild writes a complete new file, `<scope>.staging.redb`, and commits
//! by renaming it over the active one, so a crash leaves either the old or
//! the new collection in place. Writers of a scope (rebuilds, restores)
//! hold an OS lock on `<scope>.lock`, which excludes other processes too. A
//! staging file left behind by a crash is replaced by the next rebuild.
//!
//! Queries never touch redb: the active collection of every scope is held
//! in memory as an immutable [`Collection`] behind an `Arc`, and committing
//! swaps that `Arc` under a write lock. Readers clone the `Arc` and
//! release the lock immediately, so they always see one complete
//! generation.

use std::{
    collections::{HashMap, HashSet},
    fs::{File, OpenOptions, TryLockError},
    path::{Path, PathBuf},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use rayon::prelude::*;
use redb::{
    Database, ReadOnlyDatabase, ReadTransaction, ReadableDatabase,
    ReadableTable, ReadableTableMetadata, TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{
    doc_id::DocumentId,
    embedding::{EmbeddingVector, cosine_distance},
    error::{Error, Result},
    ingestion::Passage,
    ranking::{self, Candidate},
    scope::Scope,
};

const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const PASSAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("passages");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");

const MANIFEST_KEY: &str = "manifest";

/// Extension of collection files.
pub const COLLECTION_FILE_EXT: &str = "redb";

/// Collection file name for `scope`.
pub fn collection_file_name(scope: Scope) -> String {
    format!("{scope}.{COLLECTION_FILE_EXT}")
}

/// Name of the file a rebuild of `scope` writes before it is committed.
pub fn staging_file_name(scope: Scope) -> String {
    format!("{scope}.staging.{COLLECTION_FILE_EXT}")
}

fn restore_file_name(scope: Scope) -> String {
    format!("{scope}.restore.{COLLECTION_FILE_EXT}")
}

fn lock_file_name(scope: Scope) -> String {
    format!("{scope}.lock")
}

/// Lifecycle state of one scope's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionState {
    /// Never built.
    Absent,
    /// A rebuild is staging a new generation. Queries still see the
    /// previous one, if any.
    Building,
    /// A verified generation is active.
    Ready,
    /// The stored generation failed verification; rebuild required.
    Corrupt,
}

impl std::fmt::Display for CollectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CollectionState::Absent => "absent",
            CollectionState::Building => "building",
            CollectionState::Ready => "ready",
            CollectionState::Corrupt => "corrupt",
        })
    }
}

/// Summary of one committed generation, stored next to its tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub scope: Scope,
    pub generation: u64,
    /// `None` for an empty collection.
    pub model_id: Option<String>,
    pub dimension: usize,
    pub passage_count: usize,
    pub document_count: usize,
    /// blake3 over every (ordinal, passage, vector) entry in ordinal order.
    pub digest: String,
    /// Seconds since the Unix epoch.
    pub committed_at: u64,
}

/// An immutable, fully built collection as seen by queries.
#[derive(Debug)]
pub struct Collection {
    manifest: Manifest,
    passages: Vec<Passage>,
    /// Row-major, `manifest.dimension` values per passage.
    vectors: Vec<f32>,
}

impl Collection {
    pub fn scope(&self) -> Scope {
        self.manifest.scope
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn vector(&self, ordinal: usize) -> &[f32] {
        let dim = self.manifest.dimension;
        &self.vectors[ordinal * dim..(ordinal + 1) * dim]
    }

    /// Fail with [`Error::ModelMismatch`] unless `query` was produced by the
    /// model this collection was built with.
    pub fn check_compatible(&self, query: &EmbeddingVector) -> Result<()> {
        let Some(model_id) = &self.manifest.model_id else {
            return Ok(());
        };
        if model_id.as_str() != &*query.model_id
            || self.manifest.dimension != query.dimension()
        {
            return Err(Error::ModelMismatch {
                scope: self.scope(),
                collection: format!("{model_id}/d{}", self.manifest.dimension),
                provider: format!("{}/d{}", query.model_id, query.dimension()),
            });
        }
        Ok(())
    }

    /// The `k` nearest documents to `query`, one passage each.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<Candidate> {
        let distances: Vec<f32> = (0..self.len())
            .into_par_iter()
            .map(|i| cosine_distance(query, self.vector(i)))
            .collect();

        let mut best: HashMap<&DocumentId, usize> = HashMap::new();
        for (i, passage) in self.passages.iter().enumerate() {
            best.entry(&passage.document_id)
                .and_modify(|current| {
                    if distances[i] < distances[*current] {
                        *current = i;
                    }
                })
                .or_insert(i);
        }

        let mut ranked: Vec<Candidate> = best
            .into_values()
            .map(|i| Candidate::new(distances[i], self.passages[i].clone()))
            .collect();
        ranked.sort_by(ranking::rank_order);
        ranked.truncate(k);
        ranked
    }

    /// Every (passage, vector) pair, in ordinal order.
    fn pairs(&self) -> impl Iterator<Item = (Passage, EmbeddingVector)> + '_ {
        let model: Arc<str> =
            Arc::from(self.manifest.model_id.clone().unwrap_or_default());
        self.passages.iter().enumerate().map(move |(i, p)| {
            let vector =
                EmbeddingVector::new(model.clone(), self.vector(i).to_vec());
            (p.clone(), vector)
        })
    }
}

/// Nearest documents to `vector` across already-resolved `collections`.
pub fn query_collections(
    collections: &[Arc<Collection>],
    vector: &EmbeddingVector,
    k: usize,
) -> Result<Vec<Candidate>> {
    for collection in collections {
        collection.check_compatible(vector)?;
    }
    let lists = collections
        .iter()
        .map(|c| c.nearest(&vector.values, k))
        .collect();
    Ok(ranking::merge(lists, k))
}

#[derive(Debug, Clone)]
enum Active {
    Absent,
    Ready(Arc<Collection>),
    Corrupt(String),
}

struct Slot {
    scope: Scope,
    path: PathBuf,
    active: RwLock<Active>,
    building: AtomicBool,
}

impl Slot {
    fn active(&self) -> Active {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active(&self, active: Active) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = active;
    }

    fn sibling(&self, name: String) -> PathBuf {
        self.path.with_file_name(name)
    }

    /// Pick up a collection another process committed since this one was
    /// loaded. Returns the newest generation known for the scope, 0 if none.
    fn refresh(&self) -> Result<u64> {
        let loaded = match self.active() {
            Active::Ready(c) => Some(c.manifest().clone()),
            _ => None,
        };
        // An unreadable file is reported by the full load below, or left
        // for the commit to replace.
        let on_disk = read_manifest(self.scope, &self.path).ok().flatten();

        if on_disk.is_some() && on_disk != loaded {
            tracing::debug!(
                scope = %self.scope,
                "reloading changed collection"
            );
            self.set_active(load_slot(self.scope, &self.path)?);
        }
        Ok([on_disk, loaded]
            .iter()
            .flatten()
            .map(|m| m.generation)
            .max()
            .unwrap_or(0))
    }
}

/// Write access to one scope, released on drop.
///
/// Every claim sets the scope's `building` flag, which excludes other
/// claims in this process. An exclusive claim also holds the OS lock on
/// `<scope>.lock`, which excludes other processes.
struct ScopeClaim {
    store: Arc<StoreInner>,
    scope: Scope,
    _lock: Option<File>,
}

impl ScopeClaim {
    fn local(store: &Arc<StoreInner>, scope: Scope) -> Result<Self> {
        store
            .slot(scope)
            .building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::RebuildInProgress(scope))?;
        Ok(Self {
            store: store.clone(),
            scope,
            _lock: None,
        })
    }

    fn exclusive(store: &Arc<StoreInner>, scope: Scope) -> Result<Self> {
        let mut claim = Self::local(store, scope)?;
        let path = store.slot(scope).sibling(lock_file_name(scope));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                tracing::debug!(%scope, "scope is locked by another process");
                return Err(Error::RebuildInProgress(scope));
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }
        claim._lock = Some(file);
        Ok(claim)
    }

    /// Claim every scope, or none: claims taken before a conflict are
    /// released as the partial vector drops.
    fn all(
        store: &Arc<StoreInner>,
        claim: fn(&Arc<StoreInner>, Scope) -> Result<Self>,
    ) -> Result<Vec<Self>> {
        Scope::ALL
            .into_iter()
            .map(|scope| claim(store, scope))
            .collect()
    }
}

impl Drop for ScopeClaim {
    fn drop(&mut self) {
        self.store
            .slot(self.scope)
            .building
            .store(false, Ordering::Release);
    }
}

struct StoreInner {
    dir: PathBuf,
    slots: HashMap<Scope, Slot>,
}

impl StoreInner {
    fn slot(&self, scope: Scope) -> &Slot {
        // Every scope gets a slot in `CollectionStore::open`.
        &self.slots[&scope]
    }
}

/// The set of per-scope collections under one directory.
///
/// Cheap to clone; clones share the same collections.
#[derive(Clone)]
pub struct CollectionStore {
    inner: Arc<StoreInner>,
}

impl CollectionStore {
    /// Load every existing collection file under `dir`, creating the
    /// directory if needed.
    ///
    /// A file that fails verification does not fail the open; its scope is
    /// marked [`CollectionState::Corrupt`] instead.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut slots = HashMap::new();
        for scope in Scope::ALL {
            let path = dir.join(collection_file_name(scope));
            let active = load_slot(scope, &path)?;
            slots.insert(
                scope,
                Slot {
                    scope,
                    path,
                    active: RwLock::new(active),
                    building: AtomicBool::new(false),
                },
            );
        }

        let store = Self {
            inner: Arc::new(StoreInner {
                dir: dir.to_path_buf(),
                slots,
            }),
        };
        for scope in Scope::ALL {
            match store.inner.slot(scope).active() {
                Active::Ready(c) => tracing::debug!(
                    %scope,
                    passages = c.len(),
                    generation = c.manifest().generation,
                    "loaded collection"
                ),
                Active::Corrupt(reason) => {
                    tracing::warn!(%scope, %reason, "collection is corrupt")
                }
                Active::Absent => {}
            }
        }
        Ok(store)
    }

    /// Release the store.
    ///
    /// Fails with [`Error::RebuildInProgress`] while a staging or restore
    /// of this store is open.
    pub fn close(self) -> Result<()> {
        let _claims = ScopeClaim::all(&self.inner, ScopeClaim::local)?;
        tracing::debug!(dir = %self.inner.dir.display(), "store closed");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn state(&self, scope: Scope) -> CollectionState {
        let slot = self.inner.slot(scope);
        if slot.building.load(Ordering::Acquire) {
            return CollectionState::Building;
        }
        match slot.active() {
            Active::Absent => CollectionState::Absent,
            Active::Ready(_) => CollectionState::Ready,
            Active::Corrupt(_) => CollectionState::Corrupt,
        }
    }

    /// Manifest of the active generation, if the scope is ready.
    pub fn manifest(&self, scope: Scope) -> Option<Manifest> {
        match self.inner.slot(scope).active() {
            Active::Ready(c) => Some(c.manifest().clone()),
            _ => None,
        }
    }

    /// The active collection of `scope`.
    ///
    /// `Ok(None)` for an absent scope; [`Error::CollectionCorrupt`] for a
    /// corrupt one.
    pub fn snapshot(&self, scope: Scope) -> Result<Option<Arc<Collection>>> {
        match self.inner.slot(scope).active() {
            Active::Absent => Ok(None),
            Active::Ready(c) => Ok(Some(c)),
            Active::Corrupt(reason) => {
                Err(Error::CollectionCorrupt { scope, reason })
            }
        }
    }

    /// Snapshots of every scope in `scopes` that has a collection.
    ///
    /// Fails fast if any of them is corrupt.
    pub fn snapshots(
        &self,
        scopes: &[Scope],
    ) -> Result<Vec<Arc<Collection>>> {
        let mut out = Vec::with_capacity(scopes.len());
        for &scope in scopes {
            if let Some(c) = self.snapshot(scope)? {
                out.push(c);
            }
        }
        Ok(out)
    }

    /// Nearest documents to `vector` across `scopes`, at most `k`.
    pub fn query(
        &self,
        scopes: &[Scope],
        vector: &EmbeddingVector,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        query_collections(&self.snapshots(scopes)?, vector, k)
    }

    /// Start staging a new generation for `scope`.
    ///
    /// Only one staging per scope may be open, in this process or any
    /// other; a second call fails with [`Error::RebuildInProgress`] until
    /// the first is committed or aborted. Dropping the handle aborts it.
    pub fn begin_rebuild(&self, scope: Scope) -> Result<StagingHandle> {
        let claim = ScopeClaim::exclusive(&self.inner, scope)?;
        let slot = self.inner.slot(scope);
        let generation = slot.refresh()? + 1;

        let path = slot.sibling(staging_file_name(scope));
        if path.exists() {
            tracing::debug!(%scope, "removing leftover staging file");
            std::fs::remove_file(&path)?;
        }
        let db = Database::create(&path)?;
        let txn = db.begin_write()?;
        // Empty collections still need their tables.
        txn.open_table(META)?;
        txn.open_table(PASSAGES)?;
        txn.open_table(VECTORS)?;
        txn.commit()?;

        tracing::debug!(%scope, generation, "staging started");
        Ok(StagingHandle {
            _claim: claim,
            scope,
            generation,
            path,
            db: Some(db),
            model: None,
            passages: Vec::new(),
            vectors: Vec::new(),
            hasher: blake3::Hasher::new(),
            committed: false,
        })
    }

    /// Atomically replace the active collection with the staged one.
    pub fn commit_rebuild(
        &self,
        mut handle: StagingHandle,
    ) -> Result<Manifest> {
        let slot = self.inner.slot(handle.scope);
        let manifest = handle.manifest();

        let db = handle.take_db()?;
        let txn = db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            let encoded = serde_json::to_vec(&manifest)?;
            meta.insert(MANIFEST_KEY, encoded.as_slice())?;
        }
        txn.commit()?;
        // Closed before the rename so the file lands complete and unlocked.
        drop(db);
        std::fs::rename(&handle.path, &slot.path)?;
        handle.committed = true;

        let collection = Collection {
            manifest: manifest.clone(),
            passages: std::mem::take(&mut handle.passages),
            vectors: std::mem::take(&mut handle.vectors),
        };
        slot.set_active(Active::Ready(Arc::new(collection)));
        drop(handle);

        tracing::info!(
            scope = %manifest.scope,
            generation = manifest.generation,
            passages = manifest.passage_count,
            documents = manifest.document_count,
            "collection committed"
        );
        Ok(manifest)
    }

    /// Discard a staging; the active collection is untouched.
    pub fn abort_rebuild(&self, handle: StagingHandle) {
        drop(handle);
    }

    /// Replace the passages of the documents in `pairs` and commit.
    ///
    /// Copy-on-write: the active collection is copied into a new generation
    /// with those documents' old passages left out, then the new pairs are
    /// appended.
    pub fn upsert(
        &self,
        scope: Scope,
        pairs: Vec<(Passage, EmbeddingVector)>,
    ) -> Result<Manifest> {
        let mut handle = self.begin_rebuild(scope)?;
        // Read after the claim so a commit from another process is kept.
        let current = self.snapshot(scope)?;

        let replaced: HashSet<&DocumentId> =
            pairs.iter().map(|(p, _)| &p.document_id).collect();
        if let Some(collection) = &current {
            let kept: Vec<_> = collection
                .pairs()
                .filter(|(p, _)| !replaced.contains(&p.document_id))
                .collect();
            handle.stage(kept)?;
        }
        handle.stage(pairs)?;

        self.commit_rebuild(handle)
    }

    /// Copy every collection file into `dest`, verbatim.
    ///
    /// Fails with [`Error::RebuildInProgress`] if any scope is staging. The
    /// scopes stay claimed until the copy is done, so no rebuild can start
    /// meanwhile.
    pub fn backup(&self, dest: &Path) -> Result<Vec<PathBuf>> {
        let _claims = ScopeClaim::all(&self.inner, ScopeClaim::local)?;
        std::fs::create_dir_all(dest)?;

        let mut written = Vec::new();
        for scope in Scope::ALL {
            let slot = self.inner.slot(scope);
            if !slot.path.exists() {
                continue;
            }
            let target = dest.join(collection_file_name(scope));
            std::fs::copy(&slot.path, &target)?;
            written.push(target);
        }

        tracing::info!(
            dest = %dest.display(),
            files = written.len(),
            "backup written"
        );
        Ok(written)
    }

    /// Replace collections with the files found in `src`, verbatim, then
    /// verify them.
    ///
    /// Scopes without a file in `src` are left as they are. A restored file
    /// that fails verification leaves its scope corrupt and the call
    /// returns [`Error::CollectionCorrupt`] after every file is processed.
    pub fn restore(&self, src: &Path) -> Result<Vec<Scope>> {
        let _claims = ScopeClaim::all(&self.inner, ScopeClaim::exclusive)?;

        let mut restored = Vec::new();
        let mut first_error = None;
        for scope in Scope::ALL {
            let file = src.join(collection_file_name(scope));
            if !file.is_file() {
                continue;
            }

            let slot = self.inner.slot(scope);
            // Copied next to the target first so the swap is a rename.
            let incoming = slot.sibling(restore_file_name(scope));
            std::fs::copy(&file, &incoming)?;
            std::fs::rename(&incoming, &slot.path)?;

            let active = load_slot(scope, &slot.path)?;
            if let Active::Corrupt(reason) = &active {
                tracing::warn!(
                    %scope,
                    %reason,
                    "restored collection is corrupt"
                );
                if first_error.is_none() {
                    first_error = Some(Error::CollectionCorrupt {
                        scope,
                        reason: reason.clone(),
                    });
                }
            }
            slot.set_active(active);
            restored.push(scope);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(
                    src = %src.display(),
                    scopes = restored.len(),
                    "restore complete"
                );
                Ok(restored)
            }
        }
    }
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("dir", &self.inner.dir)
            .finish_non_exhaustive()
    }
}

/// An open staging of a new generation for one scope.
///
/// Staged pairs are written durably to the scope's staging file but stay
/// invisible to queries until [`CollectionStore::commit_rebuild`].
/// Dropping the handle without committing aborts the staging.
pub struct StagingHandle {
    _claim: ScopeClaim,
    scope: Scope,
    generation: u64,
    path: PathBuf,
    db: Option<Database>,
    model: Option<(Arc<str>, usize)>,
    passages: Vec<Passage>,
    vectors: Vec<f32>,
    hasher: blake3::Hasher,
    committed: bool,
}

impl StagingHandle {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn staged(&self) -> usize {
        self.passages.len()
    }

    /// Append `pairs` to the staging.
    ///
    /// The whole batch is rejected with [`Error::MixedEmbedding`] if any
    /// vector disagrees in model or dimension with what was staged before.
    pub fn stage(
        &mut self,
        pairs: Vec<(Passage, EmbeddingVector)>,
    ) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        self.check_batch(&pairs)?;

        let first = self.passages.len() as u64;
        let mut encoded = Vec::with_capacity(pairs.len());
        for (passage, _) in &pairs {
            encoded.push(serde_json::to_vec(passage)?);
        }

        let db = self.db.as_ref().ok_or_else(|| {
            Error::Config(format!("staging of {} is closed", self.scope))
        })?;
        let txn = db.begin_write()?;
        {
            let mut passages = txn.open_table(PASSAGES)?;
            let mut vectors = txn.open_table(VECTORS)?;
            for (offset, ((_, vector), bytes)) in
                pairs.iter().zip(&encoded).enumerate()
            {
                let ordinal = first + offset as u64;
                passages.insert(ordinal, bytes.as_slice())?;
                vectors.insert(
                    ordinal,
                    bytemuck::cast_slice::<f32, u8>(&vector.values),
                )?;
            }
        }
        txn.commit()?;

        for (offset, ((passage, vector), bytes)) in
            pairs.into_iter().zip(&encoded).enumerate()
        {
            hash_entry(
                &mut self.hasher,
                first + offset as u64,
                bytes,
                &vector.values,
            );
            self.vectors.extend_from_slice(&vector.values);
            self.passages.push(passage);
        }
        Ok(())
    }

    fn check_batch(
        &mut self,
        pairs: &[(Passage, EmbeddingVector)],
    ) -> Result<()> {
        if let Some((passage, _)) =
            pairs.iter().find(|(p, _)| p.scope != self.scope)
        {
            return Err(Error::Config(format!(
                "passage {} belongs to '{}', not '{}'",
                passage.document_id, passage.scope, self.scope
            )));
        }

        let (model, dimension) = match &self.model {
            Some(expected) => expected.clone(),
            None => {
                let first = &pairs[0].1;
                (first.model_id.clone(), first.dimension())
            }
        };
        if dimension == 0 {
            return Err(Error::MixedEmbedding {
                scope: self.scope,
                expected: "a non-empty vector".into(),
                actual: format!("{model}/d0"),
            });
        }
        if let Some((_, bad)) = pairs
            .iter()
            .find(|(_, v)| v.model_id != model || v.dimension() != dimension)
        {
            return Err(Error::MixedEmbedding {
                scope: self.scope,
                expected: format!("{model}/d{dimension}"),
                actual: format!("{}/d{}", bad.model_id, bad.dimension()),
            });
        }
        self.model = Some((model, dimension));
        Ok(())
    }

    fn manifest(&self) -> Manifest {
        let documents: HashSet<&DocumentId> =
            self.passages.iter().map(|p| &p.document_id).collect();
        let committed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Manifest {
            scope: self.scope,
            generation: self.generation,
            model_id: self.model.as_ref().map(|(m, _)| m.to_string()),
            dimension: self.model.as_ref().map_or(0, |(_, d)| *d),
            passage_count: self.passages.len(),
            document_count: documents.len(),
            digest: self.hasher.finalize().to_hex().to_string(),
            committed_at,
        }
    }

    fn take_db(&mut self) -> Result<Database> {
        self.db.take().ok_or_else(|| {
            Error::Config(format!("staging of {} is closed", self.scope))
        })
    }
}

impl Drop for StagingHandle {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.db.take());
        if let Err(e) = std::fs::remove_file(&self.path) {
            // The next rebuild replaces it.
            tracing::warn!(
                scope = %self.scope,
                error = %e,
                "failed to discard staging"
            );
        }
        tracing::info!(
            scope = %self.scope,
            generation = self.generation,
            "staging aborted"
        );
    }
}

impl std::fmt::Debug for StagingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingHandle")
            .field("scope", &self.scope)
            .field("generation", &self.generation)
            .field("staged", &self.passages.len())
            .finish_non_exhaustive()
    }
}

fn hash_entry(
    hasher: &mut blake3::Hasher,
    ordinal: u64,
    passage: &[u8],
    vector: &[f32],
) {
    hasher.update(&ordinal.to_le_bytes());
    hasher.update(&(passage.len() as u64).to_le_bytes());
    hasher.update(passage);
    hasher.update(bytemuck::cast_slice(vector));
}

/// Open an active file for reading. `Ok(None)` if it does not exist.
fn open_read_only(path: &Path) -> Result<Option<ReadOnlyDatabase>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(ReadOnlyDatabase::open(path)?))
}

/// The manifest of the file at `path`, without loading the collection.
fn read_manifest(scope: Scope, path: &Path) -> Result<Option<Manifest>> {
    let Some(db) = open_read_only(path)? else {
        return Ok(None);
    };
    let txn = db.begin_read()?;
    manifest_of(scope, &txn).map(Some)
}

fn manifest_of(scope: Scope, txn: &ReadTransaction) -> Result<Manifest> {
    let corrupt = |reason: String| Error::CollectionCorrupt { scope, reason };

    let meta = txn
        .open_table(META)
        .map_err(|e| corrupt(format!("meta missing: {e}")))?;
    let entry = meta
        .get(MANIFEST_KEY)?
        .ok_or_else(|| corrupt("manifest missing".into()))?;
    let manifest: Manifest = serde_json::from_slice(entry.value())
        .map_err(|e| corrupt(format!("manifest unreadable: {e}")))?;
    if manifest.scope != scope {
        return Err(corrupt("manifest does not match its file".into()));
    }
    Ok(manifest)
}

/// Load and verify one scope's active file.
///
/// Anything wrong with the file yields a corrupt state; only a file held
/// open for writing elsewhere is an error.
fn load_slot(scope: Scope, path: &Path) -> Result<Active> {
    let db = match open_read_only(path) {
        Ok(Some(db)) => db,
        Ok(None) => return Ok(Active::Absent),
        Err(Error::RedbDatabase(redb::DatabaseError::DatabaseAlreadyOpen)) => {
            return Err(redb::DatabaseError::DatabaseAlreadyOpen.into());
        }
        Err(e) => return Ok(Active::Corrupt(format!("cannot open: {e}"))),
    };

    Ok(match load_collection(scope, &db) {
        Ok(collection) => Active::Ready(Arc::new(collection)),
        Err(Error::CollectionCorrupt { reason, .. }) => Active::Corrupt(reason),
        Err(e) => Active::Corrupt(e.to_string()),
    })
}

fn load_collection(scope: Scope, db: &ReadOnlyDatabase) -> Result<Collection> {
    let corrupt = |reason: String| Error::CollectionCorrupt { scope, reason };

    let txn = db.begin_read()?;
    let manifest = manifest_of(scope, &txn)?;
    let passage_rows = txn
        .open_table(PASSAGES)
        .map_err(|e| corrupt(format!("passages missing: {e}")))?;
    let vector_rows = txn
        .open_table(VECTORS)
        .map_err(|e| corrupt(format!("vectors missing: {e}")))?;

    // Counts are checked against the tables before anything is sized from
    // them.
    let rows = passage_rows.len()?;
    if rows != vector_rows.len()?
        || usize::try_from(rows).ok() != Some(manifest.passage_count)
    {
        return Err(corrupt(format!(
            "expected {} passages, found {rows}",
            manifest.passage_count
        )));
    }
    let dim = manifest.dimension;
    let row_bytes = dim
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or_else(|| corrupt(format!("dimension {dim} out of range")))?;
    if let Some((_, first)) = vector_rows.first()? {
        if first.value().len() != row_bytes {
            return Err(corrupt("vector 0 has wrong length".into()));
        }
    }
    let capacity = manifest
        .passage_count
        .checked_mul(dim)
        .ok_or_else(|| corrupt(format!("dimension {dim} out of range")))?;

    let mut hasher = blake3::Hasher::new();
    let mut passages = Vec::with_capacity(manifest.passage_count);
    let mut vectors = Vec::with_capacity(capacity);

    for (expected, (p_entry, v_entry)) in
        passage_rows.iter()?.zip(vector_rows.iter()?).enumerate()
    {
        let (p_key, p_value) = p_entry?;
        let (v_key, v_value) = v_entry?;
        let ordinal = p_key.value();
        if ordinal != expected as u64 || v_key.value() != ordinal {
            return Err(corrupt(format!("entry {expected} out of sequence")));
        }

        let bytes = v_value.value();
        if bytes.len() != row_bytes {
            return Err(corrupt(format!("vector {ordinal} has wrong length")));
        }
        let values: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);

        let passage: Passage = serde_json::from_slice(p_value.value())
            .map_err(|e| {
                corrupt(format!("passage {ordinal} unreadable: {e}"))
            })?;
        if passage.scope != scope {
            return Err(corrupt(format!(
                "passage {ordinal} belongs to '{}'",
                passage.scope
            )));
        }

        hash_entry(&mut hasher, ordinal, p_value.value(), &values);
        vectors.extend_from_slice(&values);
        passages.push(passage);
    }

    let documents: HashSet<&DocumentId> =
        passages.iter().map(|p| &p.document_id).collect();
    if documents.len() != manifest.document_count {
        return Err(corrupt("document count mismatch".into()));
    }
    if hasher.finalize().to_hex().as_str() != manifest.digest {
        return Err(corrupt("digest mismatch".into()));
    }

    Ok(Collection {
        manifest,
        passages,
        vectors,
    })
}
