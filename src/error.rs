use std::path::PathBuf;

use crate::{embedding::ProviderError, scope::Scope};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("collection '{scope}' is corrupt ({reason}); rebuild required")]
    CollectionCorrupt { scope: Scope, reason: String },

    #[error("a rebuild of '{0}' is already in progress")]
    RebuildInProgress(Scope),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unknown scope: {0}")]
    ScopeNotFound(String),

    #[error(
        "embedding mismatch in '{scope}': expected {expected}, got {actual}"
    )]
    MixedEmbedding {
        scope: Scope,
        expected: String,
        actual: String,
    },

    #[error(
        "collection '{scope}' was built with {collection}, provider is {provider}; rebuild required"
    )]
    ModelMismatch {
        scope: Scope,
        collection: String,
        provider: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(reason) => {
                Error::ProviderUnavailable(reason)
            }
            ProviderError::InvalidResponse(reason) => Error::Provider(reason),
        }
    }
}
