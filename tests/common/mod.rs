#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use docscope::{
    ChunkingConfig,
    CollectionStore,
    HashingEmbedder,
    embedding::{
        BatchEmbedder,
        EmbeddingProvider,
        EmbeddingVector,
        ProviderError,
    },
    rebuild::Rebuilder,
};

pub const DIMENSION: usize = 64;

/// Hashing embedder that counts calls and can be told to fail or slow down.
pub struct TestProvider {
    inner: HashingEmbedder,
    calls: AtomicUsize,
    /// Calls at or past this count report the backend unavailable.
    fail_from: usize,
    delay: Duration,
}

impl TestProvider {
    pub fn working() -> Arc<Self> {
        Self::build(usize::MAX, Duration::ZERO)
    }

    pub fn down() -> Arc<Self> {
        Self::build(0, Duration::ZERO)
    }

    pub fn failing_after(calls: usize) -> Arc<Self> {
        Self::build(calls, Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(usize::MAX, delay)
    }

    fn build(fail_from: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new(DIMENSION),
            calls: AtomicUsize::new(0),
            fail_from,
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for TestProvider {
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
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.fail_from {
            return Err(ProviderError::Unavailable(
                "connection refused".into(),
            ));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.embed(texts)
    }
}

/// Write `content` to `dir/name`, creating parent directories.
pub fn write_doc(dir: &Path, name: &str, content: impl AsRef<[u8]>) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Create an empty source directory called `name` under `root`.
pub fn source_dir(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn rebuilder(
    store: &CollectionStore,
    provider: Arc<dyn EmbeddingProvider>,
) -> Rebuilder {
    let batcher = BatchEmbedder::new(provider, 4, 2).unwrap();
    Rebuilder::new(store.clone(), batcher, ChunkingConfig::default())
}
