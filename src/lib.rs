//! docscope - scoped semantic search over local documentation.
//!
//! Documents are registered as sources of a [`Scope`](scope::Scope),
//! split into passages, embedded by a pluggable
//! [`EmbeddingProvider`](embedding::EmbeddingProvider) and stored in one
//! [redb](https://github.com/cberner/redb) file per scope. Queries address
//! one scope or all of them and return the nearest documents. Rebuilds
//! stage a complete new generation and swap it in atomically, so searches
//! never observe a half-built collection. When the provider is unreachable,
//! search degrades to token overlap instead of failing.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docscope::{
//!     ChunkingConfig,
//!     CollectionStore,
//!     DataDir,
//!     HashingEmbedder,
//!     embedding::BatchEmbedder,
//!     rebuild::{CancelToken, Rebuilder},
//!     scope::{Scope, ScopeSelector},
//!     search::SearchEngine,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = CollectionStore::open(&data_dir.collections_dir().unwrap())
//!     .unwrap();
//! let provider = Arc::new(HashingEmbedder::new(256));
//!
//! let batcher = BatchEmbedder::new(provider.clone(), 32, 4).unwrap();
//! Rebuilder::new(store.clone(), batcher, ChunkingConfig::default())
//!     .with_source(Scope::Notes, "docs/notes".into())
//!     .rebuild(ScopeSelector::All, &CancelToken::new())
//!     .unwrap();
//!
//! let engine = SearchEngine::new(store, provider);
//! for r in engine.search("rotate logs", ScopeSelector::All, 10).unwrap() {
//!     println!("{} ({:.3}) {}", r.document_id, r.distance, r.snippet);
//! }
//! ```

pub mod chunking;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod hashing_embedder;
pub mod http_embedder;
pub mod ingestion;
pub mod lexical;
pub mod provider;
pub mod ranking;
pub mod rebuild;
pub mod scope;
pub mod search;
pub mod settings;
pub mod store;
pub mod text_util;
pub mod walker;

pub use chunking::ChunkingConfig;
pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use error::{Error, Result};
pub use hashing_embedder::HashingEmbedder;
pub use http_embedder::HttpEmbedder;
pub use settings::Settings;
pub use store::CollectionStore;
